use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::info;

use crate::config::DeployConfig;
use crate::locator::find_all;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanSummary {
    pub removed: Vec<PathBuf>,
}

/// Remove the build output directory and, with `artifacts`, every packaged
/// artifact in the deploy tree. Paths that are already gone are skipped.
pub fn clean(config: &DeployConfig, artifacts: bool) -> io::Result<CleanSummary> {
    let mut summary = CleanSummary::default();

    let output_dir = &config.build.output_dir;
    if output_dir.is_dir() {
        fs::remove_dir_all(output_dir)?;
        info!(path = %output_dir.display(), "Removed build output");
        summary.removed.push(output_dir.clone());
    }

    if artifacts {
        let packaging = &config.packaging;
        for artifact in find_all(&packaging.deploy_dir, &packaging.artifact_pattern) {
            fs::remove_file(&artifact)?;
            info!(path = %artifact.display(), "Removed artifact");
            summary.removed.push(artifact);
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn removes_output_and_artifacts() {
        let temp = tempdir().unwrap();
        let mut config = DeployConfig::default();
        config.build.output_dir = temp.path().join("dist");
        config.packaging.deploy_dir = temp.path().join("deploy");
        fs::create_dir_all(config.build.output_dir.join("assets")).unwrap();
        fs::create_dir_all(config.packaging.deploy_dir.join("all")).unwrap();
        let artifact = config.packaging.deploy_dir.join("all/vista-web-ui_1.2.3.ipk");
        fs::write(&artifact, b"ipk").unwrap();
        let unrelated = config.packaging.deploy_dir.join("all/other_1.0.ipk");
        fs::write(&unrelated, b"ipk").unwrap();

        let kept = clean(&config, false).unwrap();
        assert_eq!(kept.removed, vec![config.build.output_dir.clone()]);
        assert!(artifact.exists());

        let summary = clean(&config, true).unwrap();
        assert_eq!(summary.removed, vec![artifact.clone()]);
        assert!(!artifact.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn missing_directories_are_fine() {
        let temp = tempdir().unwrap();
        let mut config = DeployConfig::default();
        config.build.output_dir = temp.path().join("nope");
        config.packaging.deploy_dir = temp.path().join("nothing");
        assert_eq!(clean(&config, true).unwrap(), CleanSummary::default());
    }
}
