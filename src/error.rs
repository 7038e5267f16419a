use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::Stage;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Required setting '{0}' is missing or empty")]
    MissingRequired(String),
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Build tool not found: {}", .0.display())]
    ToolMissing(PathBuf),
    #[error("Build tool exited with status {0}")]
    ToolFailed(i32),
    #[error("Expected output missing: {}", .0.display())]
    OutputMissing(PathBuf),
    #[error("Packaging toolchain '{entry_point}' is not available")]
    ToolchainUnavailable {
        entry_point: String,
        fallback: String,
    },
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("No artifact matching '{pattern}' under {}", .dir.display())]
    ArtifactNotFound { dir: PathBuf, pattern: String },
    #[error("Transfer to device failed: {0}")]
    TransferFailed(String),
    #[error("Remote install failed: {0}")]
    InstallFailed(String),
}

/// Failure of a single pipeline stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Deploy(#[from] DeployError),
}

#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: StageError,
}

impl PipelineError {
    pub fn new(stage: Stage, source: impl Into<StageError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    pub fn hints(&self) -> Vec<String> {
        self.source.hints()
    }
}

impl StageError {
    /// Remediation steps shown to the operator alongside the failure.
    pub fn hints(&self) -> Vec<String> {
        match self {
            StageError::Config(ConfigError::MissingRequired(name)) => vec![format!(
                "Set '{name}' in the config file or pass it on the command line (e.g. --host <address>)"
            )],
            StageError::Config(_) => vec!["Run `vista-deploy validate` to check the config file".into()],
            StageError::Build(err) => err.hints(),
            StageError::Deploy(err) => err.hints(),
        }
    }
}

impl BuildError {
    pub fn hints(&self) -> Vec<String> {
        match self {
            BuildError::ToolMissing(path) => vec![format!(
                "Install the build tool or fix its path ({})",
                path.display()
            )],
            BuildError::ToolFailed(_) => {
                vec!["Re-run with RUST_LOG=debug to see the tool's output".into()]
            }
            BuildError::OutputMissing(_) => vec![
                "The tool reported success but produced no usable output".into(),
                "Check the configured output directory and marker file".into(),
            ],
            BuildError::ToolchainUnavailable { fallback, .. } => vec![
                "Source the packaging environment so its tools are on PATH".into(),
                format!("Alternatively use the all-in-one route: {fallback}"),
            ],
            BuildError::Spawn { .. } => vec!["Check the tool is executable".into()],
        }
    }
}

impl DeployError {
    pub fn hints(&self) -> Vec<String> {
        match self {
            DeployError::ArtifactNotFound { .. } => {
                vec!["Run `vista-deploy package` and check the deploy directory".into()]
            }
            DeployError::TransferFailed(_) => vec![
                "Check the device is powered and reachable (ping the address)".into(),
                "Check SSH key authentication is set up for the device user".into(),
                "Check the target address is correct (--host or VISTA_TARGET_HOST)".into(),
            ],
            DeployError::InstallFailed(_) => vec![
                "The device may be left with a partially installed package".into(),
                "Inspect the device with `ssh` and re-run the deploy".into(),
            ],
        }
    }
}
