use std::path::PathBuf;

use tracing::{info, instrument, warn};

use crate::config::PackagingSpec;
use crate::error::BuildError;
use crate::locator::ArtifactLocator;
use crate::process::CommandSpec;
use crate::remote::ArtifactSource;
use crate::stage::{BuildTarget, StageRunner, locate_tool};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageOutcome {
    Built(PathBuf),
    /// An artifact was already present in the deploy tree.
    Reused(PathBuf),
}

impl PackageOutcome {
    pub fn artifact(&self) -> &PathBuf {
        match self {
            PackageOutcome::Built(path) | PackageOutcome::Reused(path) => path,
        }
    }
}

/// Packages the built web UI into an installable artifact.
pub struct PackagingStage {
    stages: StageRunner,
    spec: PackagingSpec,
    build: BuildTarget,
    locator: ArtifactLocator,
}

impl PackagingStage {
    pub fn new(stages: StageRunner, spec: PackagingSpec, build: BuildTarget) -> Self {
        let locator = ArtifactLocator::new(spec.selection);
        Self {
            stages,
            spec,
            build,
            locator,
        }
    }

    /// The packaging environment must be installed before anything else runs.
    pub fn check_toolchain(&self) -> Result<PathBuf, BuildError> {
        locate_tool(&self.spec.entry_point, &self.spec.workdir).ok_or_else(|| {
            BuildError::ToolchainUnavailable {
                entry_point: self.spec.entry_point.clone(),
                fallback: self.spec.fallback.clone(),
            }
        })
    }

    pub fn locate(&self) -> Option<PathBuf> {
        self.locator
            .find(&self.spec.deploy_dir, &self.spec.artifact_pattern)
    }

    /// Run the packaging tool and return the artifact it produced.
    #[instrument(skip(self))]
    pub fn run(&self) -> Result<PathBuf, BuildError> {
        let entry_point = self.check_toolchain()?;
        info!(entry_point = %entry_point.display(), "Packaging toolchain available");
        self.stages.verify_output(&self.build)?;

        let (tool, args) = self
            .spec
            .command
            .split_first()
            .ok_or_else(|| BuildError::ToolMissing(PathBuf::new()))?;
        let program = locate_tool(tool, &self.spec.workdir).ok_or_else(|| {
            BuildError::ToolMissing(self.spec.workdir.join(tool))
        })?;
        let command = CommandSpec::new(program.to_string_lossy())
            .args(args.iter().cloned())
            .current_dir(&self.spec.workdir);
        info!(command = %command, "Running packaging tool");
        self.stages.execute(&command)?;

        let artifact = self.locate().ok_or_else(|| {
            BuildError::OutputMissing(self.spec.deploy_dir.join(&self.spec.artifact_pattern))
        })?;
        info!(artifact = %artifact.display(), "Package built");
        Ok(artifact)
    }

    /// Package only when no artifact is present yet, unless `force` is set.
    pub fn ensure(&self, force: bool) -> Result<PackageOutcome, BuildError> {
        if !force && let Some(existing) = self.locate() {
            info!(artifact = %existing.display(), "Reusing existing package");
            return Ok(PackageOutcome::Reused(existing));
        }
        self.run().map(PackageOutcome::Built)
    }
}

impl ArtifactSource for PackagingStage {
    fn locate(&self) -> Option<PathBuf> {
        PackagingStage::locate(self)
    }

    fn repackage(&self) -> Result<(), BuildError> {
        warn!("Artifact missing at deploy time; packaging once more");
        self.run().map(|_| ())
    }

    fn describe(&self) -> (PathBuf, String) {
        (
            self.spec.deploy_dir.clone(),
            self.spec.artifact_pattern.clone(),
        )
    }
}
