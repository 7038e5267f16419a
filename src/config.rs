use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::locator::ArtifactSelection;
use crate::remote::RemoteTarget;
use crate::stage::BuildTarget;

pub const DEFAULT_CONFIG_FILE: &str = "vista-deploy.yaml";
pub const CONFIG_VERSION: u32 = 1;

/// Everything a pipeline run needs, passed in explicitly rather than read
/// from the process environment along the way.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeployConfig {
    pub version: u32,
    pub target: TargetSpec,
    pub build: BuildSpec,
    pub packaging: PackagingSpec,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            target: TargetSpec::default(),
            build: BuildSpec::default(),
            packaging: PackagingSpec::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TargetSpec {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    /// Passed to ssh/scp as `ConnectTimeout`; unset leaves the client default.
    pub connect_timeout_secs: Option<u32>,
    pub temp_path: String,
    pub service: String,
    pub package_manager: String,
    pub service_manager: String,
}

impl Default for TargetSpec {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: "root".into(),
            port: 22,
            identity_file: None,
            connect_timeout_secs: None,
            temp_path: "/tmp/vista-web-ui.ipk".into(),
            service: "vista-web-ui".into(),
            package_manager: "opkg".into(),
            service_manager: "systemctl".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildSpec {
    pub name: String,
    pub source_dir: PathBuf,
    pub tool: String,
    pub args: Vec<String>,
    pub output_dir: PathBuf,
    pub marker: String,
}

impl Default for BuildSpec {
    fn default() -> Self {
        Self {
            name: "web-ui".into(),
            source_dir: PathBuf::from("web"),
            tool: "npm".into(),
            args: vec!["run".into(), "build".into()],
            output_dir: PathBuf::from("web/dist"),
            marker: "index.html".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PackagingSpec {
    /// Program or script that must be available before packaging can run.
    pub entry_point: String,
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub deploy_dir: PathBuf,
    pub artifact_pattern: String,
    pub selection: ArtifactSelection,
    /// Suggested alternative when the packaging toolchain is unavailable.
    pub fallback: String,
}

impl Default for PackagingSpec {
    fn default() -> Self {
        Self {
            entry_point: "bitbake".into(),
            command: vec!["bitbake".into(), "vista-web-ui".into()],
            workdir: PathBuf::from("."),
            deploy_dir: PathBuf::from("build/tmp/deploy/ipk"),
            artifact_pattern: "vista-web-ui_*.ipk".into(),
            selection: ArtifactSelection::Newest,
            fallback: "build the full device image (`bitbake vista-image`), which packages the web UI"
                .into(),
        }
    }
}

/// Values given on the command line; each one wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub build_dir: Option<PathBuf>,
}

impl DeployConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Load `path` if given; otherwise use the default file when it exists
    /// and built-in defaults when it does not.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.is_file() {
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(host) = &overrides.host {
            self.target.host = host.clone();
        }
        if let Some(dir) = &overrides.build_dir {
            self.build.output_dir = dir.clone();
        }
    }

    /// Look up a setting by its dotted name, as used by the environment gate.
    pub fn setting(&self, name: &str) -> Option<String> {
        let value = match name {
            "target.host" => self.target.host.clone(),
            "target.user" => self.target.user.clone(),
            "target.temp_path" => self.target.temp_path.clone(),
            "target.service" => self.target.service.clone(),
            "target.package_manager" => self.target.package_manager.clone(),
            "target.service_manager" => self.target.service_manager.clone(),
            "build.tool" => self.build.tool.clone(),
            "build.marker" => self.build.marker.clone(),
            "build.output_dir" => self.build.output_dir.to_string_lossy().to_string(),
            "packaging.entry_point" => self.packaging.entry_point.clone(),
            "packaging.deploy_dir" => self.packaging.deploy_dir.to_string_lossy().to_string(),
            "packaging.artifact_pattern" => self.packaging.artifact_pattern.clone(),
            _ => return None,
        };
        Some(value)
    }

    pub fn build_target(&self) -> BuildTarget {
        BuildTarget {
            name: self.build.name.clone(),
            source_dir: self.build.source_dir.clone(),
            tool: self.build.tool.clone(),
            args: self.build.args.clone(),
            output_dir: self.build.output_dir.clone(),
            marker: self.build.marker.clone(),
        }
    }

    pub fn remote_target(&self) -> RemoteTarget {
        RemoteTarget {
            host: self.target.host.clone(),
            user: self.target.user.clone(),
            port: self.target.port,
            identity_file: self.target.identity_file.clone(),
            connect_timeout_secs: self.target.connect_timeout_secs,
            temp_path: self.target.temp_path.clone(),
            service: self.target.service.clone(),
            package_manager: self.target.package_manager.clone(),
            service_manager: self.target.service_manager.clone(),
        }
    }
}

/// Write a starter config to `destination`, refusing to overwrite unless
/// `force` is set.
pub fn write_starter(
    destination: &Path,
    host: Option<&str>,
    force: bool,
) -> anyhow::Result<PathBuf> {
    if destination.exists() && !force {
        bail!(
            "Config file '{}' already exists (use --force to overwrite)",
            destination.display()
        );
    }
    let mut config = DeployConfig::default();
    if let Some(host) = host {
        config.target.host = host.to_string();
    }
    let rendered = serde_yaml::to_string(&config)?;
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(destination, rendered)
        .with_context(|| format!("Failed to write config file: {}", destination.display()))?;
    Ok(destination.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = DeployConfig::from_yaml(
            "version: 1\ntarget:\n  host: 192.168.7.2\npackaging:\n  selection: first\n",
        )
        .unwrap();
        assert_eq!(config.target.host, "192.168.7.2");
        assert_eq!(config.target.user, "root");
        assert_eq!(config.target.service, "vista-web-ui");
        assert_eq!(config.packaging.selection, ArtifactSelection::First);
        assert_eq!(config.build.marker, "index.html");
    }

    #[test]
    fn overrides_win_over_file_values() {
        let mut config = DeployConfig::default();
        config.target.host = "10.0.0.5".into();
        config.apply(&Overrides {
            host: Some("10.0.0.9".into()),
            build_dir: Some(PathBuf::from("out/www")),
        });
        assert_eq!(config.target.host, "10.0.0.9");
        assert_eq!(config.build.output_dir, PathBuf::from("out/www"));
        assert_eq!(config.build_target().output_dir, PathBuf::from("out/www"));
    }

    #[test]
    fn unknown_setting_is_none() {
        let config = DeployConfig::default();
        assert_eq!(config.setting("target.host"), Some(String::new()));
        assert_eq!(config.setting("target.nope"), None);
    }

    #[test]
    fn starter_round_trips_and_refuses_overwrite() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("conf/vista-deploy.yaml");
        write_starter(&path, Some("192.168.7.2"), false).unwrap();

        let loaded = DeployConfig::load(&path).unwrap();
        assert_eq!(loaded.target.host, "192.168.7.2");
        assert_eq!(loaded.packaging, PackagingSpec::default());

        assert!(write_starter(&path, None, false).is_err());
        write_starter(&path, None, true).unwrap();
        assert_eq!(DeployConfig::load(&path).unwrap().target.host, "");
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = DeployConfig::load(Path::new("/nonexistent/vista-deploy.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
