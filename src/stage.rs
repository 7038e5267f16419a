use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, instrument};

use crate::error::BuildError;
use crate::process::{CommandRunner, CommandSpec, ProcessOutput, find_on_path, is_path_like};

/// A buildable unit and the contract its tool must satisfy.
///
/// Paths are relative to the directory the orchestrator runs in, except a
/// path-like `tool`, which is resolved against `source_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTarget {
    pub name: String,
    pub source_dir: PathBuf,
    pub tool: String,
    pub args: Vec<String>,
    pub output_dir: PathBuf,
    pub marker: String,
}

impl BuildTarget {
    pub fn marker_path(&self) -> PathBuf {
        self.output_dir.join(&self.marker)
    }
}

/// Runs external build steps with precondition and postcondition checks.
#[derive(Clone)]
pub struct StageRunner {
    runner: Arc<dyn CommandRunner>,
}

impl StageRunner {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    #[instrument(skip(self, target), fields(target = %target.name))]
    pub fn run(&self, target: &BuildTarget) -> Result<(), BuildError> {
        let program = self.preflight(target)?;
        let spec = CommandSpec::new(program.to_string_lossy())
            .args(target.args.iter().cloned())
            .current_dir(&target.source_dir);
        info!(command = %spec, "Running build tool");
        if let Err(err) = self.execute(&spec) {
            // A half-written output tree is reported as such whatever the exit code.
            let marker = target.marker_path();
            if matches!(err, BuildError::ToolFailed(_))
                && target.output_dir.is_dir()
                && !marker.is_file()
            {
                return Err(BuildError::OutputMissing(marker));
            }
            return Err(err);
        }
        self.verify_output(target)?;
        info!(output = %target.output_dir.display(), "Build output verified");
        Ok(())
    }

    /// Resolve the target's tool without running anything.
    pub fn preflight(&self, target: &BuildTarget) -> Result<PathBuf, BuildError> {
        locate_tool(&target.tool, &target.source_dir).ok_or_else(|| {
            let expected = if is_path_like(&target.tool) {
                target.source_dir.join(&target.tool)
            } else {
                PathBuf::from(&target.tool)
            };
            BuildError::ToolMissing(expected)
        })
    }

    /// Run a command to completion; a non-zero exit is a [`BuildError::ToolFailed`].
    pub fn execute(&self, spec: &CommandSpec) -> Result<ProcessOutput, BuildError> {
        let output = self.runner.run(spec).map_err(|source| BuildError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        if !output.success() {
            error!(
                command = %spec,
                exit_code = output.exit_code,
                detail = %output.diagnostic(),
                "Tool failed"
            );
            return Err(BuildError::ToolFailed(output.exit_code));
        }
        Ok(output)
    }

    /// Both the output directory and its marker file must exist; a tool that
    /// exits 0 without producing them has not succeeded.
    pub fn verify_output(&self, target: &BuildTarget) -> Result<(), BuildError> {
        if !target.output_dir.is_dir() {
            return Err(BuildError::OutputMissing(target.output_dir.clone()));
        }
        let marker = target.marker_path();
        if !marker.is_file() {
            return Err(BuildError::OutputMissing(marker));
        }
        debug!(marker = %marker.display(), "Marker file present");
        Ok(())
    }
}

/// Find a tool: path-like names relative to `base_dir`, bare names on `PATH`.
pub fn locate_tool(tool: &str, base_dir: &Path) -> Option<PathBuf> {
    if tool.trim().is_empty() {
        return None;
    }
    if is_path_like(tool) {
        let candidate = base_dir.join(tool);
        if candidate.is_file() {
            return Some(fs::canonicalize(&candidate).unwrap_or(candidate));
        }
        return None;
    }
    find_on_path(tool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    struct ExitWith(i32);

    impl CommandRunner for ExitWith {
        fn run(&self, _spec: &CommandSpec) -> io::Result<ProcessOutput> {
            Ok(ProcessOutput {
                exit_code: self.0,
                stdout: String::new(),
                stderr: "boom".into(),
            })
        }
    }

    fn target(root: &Path) -> BuildTarget {
        fs::write(root.join("build.sh"), "#!/bin/sh\n").unwrap();
        BuildTarget {
            name: "web-ui".into(),
            source_dir: root.to_path_buf(),
            tool: "./build.sh".into(),
            args: Vec::new(),
            output_dir: root.join("dist"),
            marker: "index.html".into(),
        }
    }

    #[test]
    fn missing_path_tool_reports_expected_location() {
        let temp = tempfile::tempdir().unwrap();
        let mut target = target(temp.path());
        target.tool = "./missing.sh".into();
        let err = StageRunner::new(Arc::new(ExitWith(0)))
            .run(&target)
            .unwrap_err();
        assert!(matches!(err, BuildError::ToolMissing(path) if path.ends_with("missing.sh")));
    }

    #[test]
    fn exit_zero_without_output_is_not_success() {
        let temp = tempfile::tempdir().unwrap();
        let target = target(temp.path());
        let err = StageRunner::new(Arc::new(ExitWith(0)))
            .run(&target)
            .unwrap_err();
        assert!(matches!(err, BuildError::OutputMissing(path) if path == target.output_dir));
    }

    #[test]
    fn missing_marker_is_output_missing_for_any_exit_code() {
        for code in [0, 1, 3] {
            let temp = tempfile::tempdir().unwrap();
            let target = target(temp.path());
            fs::create_dir_all(target.output_dir.join("assets")).unwrap();
            let err = StageRunner::new(Arc::new(ExitWith(code)))
                .run(&target)
                .unwrap_err();
            assert!(
                matches!(&err, BuildError::OutputMissing(path) if *path == target.marker_path()),
                "exit {code}: {err:?}"
            );
        }
    }

    #[test]
    fn non_zero_exit_without_output_tree_is_tool_failure() {
        let temp = tempfile::tempdir().unwrap();
        let target = target(temp.path());
        let err = StageRunner::new(Arc::new(ExitWith(3)))
            .run(&target)
            .unwrap_err();
        assert!(matches!(err, BuildError::ToolFailed(3)));
    }

    #[test]
    fn non_zero_exit_with_complete_output_is_tool_failure() {
        let temp = tempfile::tempdir().unwrap();
        let target = target(temp.path());
        fs::create_dir_all(&target.output_dir).unwrap();
        fs::write(target.marker_path(), "<html></html>").unwrap();
        let err = StageRunner::new(Arc::new(ExitWith(2)))
            .run(&target)
            .unwrap_err();
        assert!(matches!(err, BuildError::ToolFailed(2)));
    }
}
