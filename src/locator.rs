use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// How to pick one artifact when several files match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactSelection {
    /// Most recently modified; equal mtimes resolve to the greatest path.
    #[default]
    Newest,
    /// Lexicographically first path.
    First,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactLocator {
    selection: ArtifactSelection,
}

impl ArtifactLocator {
    pub fn new(selection: ArtifactSelection) -> Self {
        Self { selection }
    }

    /// Recursively search `dir` for files whose name matches `pattern`.
    ///
    /// Nothing matching is not an error: the caller decides whether a
    /// missing artifact is fatal.
    pub fn find(&self, dir: &Path, pattern: &str) -> Option<PathBuf> {
        let mut matches = find_all(dir, pattern);
        let chosen = match self.selection {
            ArtifactSelection::First => {
                matches.sort();
                matches.into_iter().next()
            }
            ArtifactSelection::Newest => matches
                .into_iter()
                .map(|path| (modified(&path), path))
                .max()
                .map(|(_, path)| path),
        };
        if let Some(path) = &chosen {
            debug!(
                dir = %dir.display(),
                pattern,
                artifact = %path.display(),
                "Artifact located"
            );
        }
        chosen
    }
}

/// All files under `dir` (at any depth) whose file name matches `pattern`.
pub fn find_all(dir: &Path, pattern: &str) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let full = format!("{escaped}/**/{pattern}");
    let entries = match glob::glob(&full) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(pattern, error = %err, "Invalid artifact pattern");
            return Vec::new();
        }
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .collect()
}

fn modified(path: &Path) -> SystemTime {
    path.metadata()
        .and_then(|meta| meta.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::time::Duration;
    use tempfile::tempdir;

    fn touch(path: &Path, mtime: SystemTime) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let file = File::create(path).unwrap();
        file.set_modified(mtime).unwrap();
    }

    #[test]
    fn returns_none_when_nothing_matches() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("readme.txt"), "x").unwrap();
        let locator = ArtifactLocator::default();
        assert_eq!(locator.find(temp.path(), "vista-web-ui_*.ipk"), None);
    }

    #[test]
    fn returns_none_for_missing_directory() {
        let temp = tempdir().unwrap();
        let locator = ArtifactLocator::default();
        assert_eq!(locator.find(&temp.path().join("nope"), "*.ipk"), None);
    }

    #[test]
    fn invalid_pattern_is_not_an_error() {
        let temp = tempdir().unwrap();
        let locator = ArtifactLocator::default();
        assert_eq!(locator.find(temp.path(), "[unclosed"), None);
    }

    #[test]
    fn searches_nested_directories() {
        let temp = tempdir().unwrap();
        let nested = temp.path().join("ipk/cortexa7t2hf-neon/vista-web-ui_1.2.3.ipk");
        touch(&nested, SystemTime::now());
        fs::create_dir_all(temp.path().join("ipk/all/vista-web-ui_0.9.ipk")).unwrap();

        let locator = ArtifactLocator::default();
        assert_eq!(locator.find(temp.path(), "vista-web-ui_*.ipk"), Some(nested));
    }

    #[test]
    fn newest_selection_prefers_latest_mtime() {
        let temp = tempdir().unwrap();
        let base = SystemTime::now() - Duration::from_secs(3600);
        let older = temp.path().join("a/vista-web-ui_2.0.0.ipk");
        let newer = temp.path().join("b/vista-web-ui_1.0.0.ipk");
        touch(&older, base);
        touch(&newer, base + Duration::from_secs(60));

        let locator = ArtifactLocator::new(ArtifactSelection::Newest);
        assert_eq!(locator.find(temp.path(), "vista-web-ui_*.ipk"), Some(newer));
    }

    #[test]
    fn first_selection_is_lexicographic() {
        let temp = tempdir().unwrap();
        let base = SystemTime::now() - Duration::from_secs(3600);
        let first = temp.path().join("a/vista-web-ui_2.0.0.ipk");
        let second = temp.path().join("b/vista-web-ui_1.0.0.ipk");
        touch(&first, base);
        touch(&second, base + Duration::from_secs(60));

        let locator = ArtifactLocator::new(ArtifactSelection::First);
        assert_eq!(locator.find(temp.path(), "vista-web-ui_*.ipk"), Some(first));
    }

    #[test]
    fn equal_mtimes_resolve_to_greatest_path() {
        let temp = tempdir().unwrap();
        let stamp = SystemTime::now() - Duration::from_secs(10);
        touch(&temp.path().join("vista-web-ui_1.0.0.ipk"), stamp);
        let last = temp.path().join("vista-web-ui_1.0.1.ipk");
        touch(&last, stamp);

        let locator = ArtifactLocator::default();
        assert_eq!(locator.find(temp.path(), "vista-web-ui_*.ipk"), Some(last));
    }
}
