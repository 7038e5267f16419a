//! Shipping an artifact to the device: transfer, install plus restart, and
//! an advisory cleanup of the uploaded file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{BuildError, DeployError};
use crate::pipeline::Stage;
use crate::process::{CommandRunner, CommandSpec, ProcessOutput};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout_secs: Option<u32>,
    pub temp_path: String,
    pub service: String,
    pub package_manager: String,
    pub service_manager: String,
}

impl RemoteTarget {
    pub fn destination(&self) -> String {
        if self.user.is_empty() {
            self.host.clone()
        } else {
            format!("{}@{}", self.user, self.host)
        }
    }

    /// scp splits `host:path` at the first colon, so IPv6 literals need brackets.
    fn scp_destination(&self) -> String {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.user.is_empty() {
            host
        } else {
            format!("{}@{host}", self.user)
        }
    }

    fn common_options(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().to_string());
        }
        args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        if let Some(timeout) = self.connect_timeout_secs {
            args.extend(["-o".to_string(), format!("ConnectTimeout={timeout}")]);
        }
        args
    }

    pub fn scp_command(&self, local: &Path) -> CommandSpec {
        let mut args = self.common_options();
        if self.port != 22 {
            args.extend(["-P".to_string(), self.port.to_string()]);
        }
        args.push(local.to_string_lossy().to_string());
        args.push(format!("{}:{}", self.scp_destination(), self.temp_path));
        CommandSpec::new("scp").args(args)
    }

    pub fn ssh_command(&self, remote_command: &str) -> CommandSpec {
        let mut args = self.common_options();
        if self.port != 22 {
            args.extend(["-p".to_string(), self.port.to_string()]);
        }
        args.push(self.destination());
        args.push(remote_command.to_string());
        CommandSpec::new("ssh").args(args)
    }

    /// Install (forcing reinstall) and restart, chained so a failed install
    /// never restarts the service.
    pub fn install_command(&self) -> String {
        format!(
            "{} install --force-reinstall {} && {} restart {}",
            self.package_manager,
            quote(&self.temp_path),
            self.service_manager,
            quote(&self.service)
        )
    }

    pub fn cleanup_command(&self) -> String {
        format!("rm -f {}", quote(&self.temp_path))
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Where the deployer gets an artifact from when the expected one is gone.
pub trait ArtifactSource {
    fn locate(&self) -> Option<PathBuf>;
    fn repackage(&self) -> Result<(), BuildError>;
    /// Deploy directory and pattern, for error reporting.
    fn describe(&self) -> (PathBuf, String);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum CleanupOutcome {
    Removed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub artifact: PathBuf,
    pub host: String,
    pub service: String,
    pub cleanup: CleanupOutcome,
}

pub struct RemoteDeployer {
    runner: Arc<dyn CommandRunner>,
    target: RemoteTarget,
}

impl RemoteDeployer {
    pub fn new(runner: Arc<dyn CommandRunner>, target: RemoteTarget) -> Self {
        Self { runner, target }
    }

    /// Locate, transfer, install and clean up, reporting each step to
    /// `observer` before it starts.
    ///
    /// A failed install still removes the uploaded file, but that cleanup is
    /// part of the install failure and is not reported as its own step.
    #[instrument(skip_all, fields(host = %self.target.host))]
    pub fn deploy(
        &self,
        artifact: Option<&Path>,
        source: &dyn ArtifactSource,
        observer: &mut dyn FnMut(Stage),
    ) -> Result<DeployReport, DeployError> {
        observer(Stage::Locating);
        let artifact = self.resolve_artifact(artifact, source)?;

        observer(Stage::Transferring);
        self.transfer(&artifact)?;

        observer(Stage::Installing);
        if let Err(err) = self.install() {
            // The uploaded file is removed even though the install failed.
            let cleanup = self.cleanup();
            debug!(?cleanup, "Cleanup after failed install");
            return Err(err);
        }

        observer(Stage::CleaningUp);
        let cleanup = self.cleanup();

        info!(
            artifact = %artifact.display(),
            service = %self.target.service,
            "Deployment complete"
        );
        Ok(DeployReport {
            artifact,
            host: self.target.host.clone(),
            service: self.target.service.clone(),
            cleanup,
        })
    }

    /// Use `artifact` if it exists; otherwise package once more and search
    /// again before giving up.
    pub fn resolve_artifact(
        &self,
        artifact: Option<&Path>,
        source: &dyn ArtifactSource,
    ) -> Result<PathBuf, DeployError> {
        if let Some(path) = artifact.filter(|path| path.is_file()) {
            return Ok(path.to_path_buf());
        }
        if let Err(err) = source.repackage() {
            warn!(error = %err, "Repackaging failed");
        }
        source.locate().ok_or_else(|| {
            let (dir, pattern) = source.describe();
            DeployError::ArtifactNotFound { dir, pattern }
        })
    }

    pub fn transfer(&self, artifact: &Path) -> Result<(), DeployError> {
        let command = self.target.scp_command(artifact);
        info!(
            artifact = %artifact.display(),
            destination = %self.target.destination(),
            temp_path = %self.target.temp_path,
            "Uploading artifact"
        );
        let output = self
            .runner
            .run(&command)
            .map_err(|err| DeployError::TransferFailed(format!("could not start scp: {err}")))?;
        check(&output, "scp").map_err(DeployError::TransferFailed)
    }

    pub fn install(&self) -> Result<(), DeployError> {
        let command = self.target.ssh_command(&self.target.install_command());
        info!(service = %self.target.service, "Installing package and restarting service");
        let output = self
            .runner
            .run(&command)
            .map_err(|err| DeployError::InstallFailed(format!("could not start ssh: {err}")))?;
        check(&output, "remote install").map_err(|cause| {
            error!(%cause, "Remote install failed; device may be partially updated");
            DeployError::InstallFailed(cause)
        })
    }

    /// Best effort: a failure is reported in the outcome, never as an error.
    pub fn cleanup(&self) -> CleanupOutcome {
        let command = self.target.ssh_command(&self.target.cleanup_command());
        let result = match self.runner.run(&command) {
            Ok(output) => check(&output, "remote cleanup"),
            Err(err) => Err(format!("could not start ssh: {err}")),
        };
        match result {
            Ok(()) => {
                info!(temp_path = %self.target.temp_path, "Remote temp artifact removed");
                CleanupOutcome::Removed
            }
            Err(cause) => {
                warn!(%cause, temp_path = %self.target.temp_path, "Remote cleanup failed");
                CleanupOutcome::Failed(cause)
            }
        }
    }
}

fn check(output: &ProcessOutput, what: &str) -> Result<(), String> {
    if output.success() {
        return Ok(());
    }
    let detail = output.diagnostic();
    if detail.is_empty() {
        Err(format!("{what} exited with status {}", output.exit_code))
    } else {
        Err(format!(
            "{what} exited with status {}: {detail}",
            output.exit_code
        ))
    }
}
