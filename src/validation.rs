use serde::Serialize;

use crate::config::{CONFIG_VERSION, DeployConfig};

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Static checks on a config file; nothing is executed or contacted.
pub fn validate_config(config: &DeployConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    if config.version != CONFIG_VERSION {
        report
            .errors
            .push(format!("Unsupported config version: {}", config.version));
    }

    report.merge(validate_build(config));
    report.merge(validate_packaging(config));
    report.merge(validate_target(config));
    report
}

fn validate_build(config: &DeployConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    let build = &config.build;
    if build.tool.trim().is_empty() {
        report.errors.push("build.tool cannot be empty".into());
    }
    if build.marker.trim().is_empty() {
        report.errors.push("build.marker cannot be empty".into());
    }
    if build.output_dir.as_os_str().is_empty() {
        report.errors.push("build.output_dir cannot be empty".into());
    }
    if !build.source_dir.is_dir() {
        report.warnings.push(format!(
            "build.source_dir '{}' does not exist yet",
            build.source_dir.display()
        ));
    }
    report
}

fn validate_packaging(config: &DeployConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    let packaging = &config.packaging;
    if packaging.command.is_empty() {
        report
            .errors
            .push("packaging.command must name at least the program to run".into());
    }
    if packaging.entry_point.trim().is_empty() {
        report.errors.push("packaging.entry_point cannot be empty".into());
    }
    if packaging.artifact_pattern.trim().is_empty() {
        report
            .errors
            .push("packaging.artifact_pattern cannot be empty".into());
    } else if let Err(err) = glob::Pattern::new(&packaging.artifact_pattern) {
        report.errors.push(format!(
            "packaging.artifact_pattern '{}' is not a valid glob: {}",
            packaging.artifact_pattern, err
        ));
    } else if packaging.artifact_pattern.contains('/') {
        report.errors.push(format!(
            "packaging.artifact_pattern '{}' must match a file name, not a path",
            packaging.artifact_pattern
        ));
    }
    if packaging.fallback.trim().is_empty() {
        report
            .warnings
            .push("packaging.fallback is empty; no alternative route will be suggested".into());
    }
    report
}

fn validate_target(config: &DeployConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    let target = &config.target;
    if target.host.trim().is_empty() {
        report.warnings.push(
            "target.host is not set; pass --host or VISTA_TARGET_HOST when deploying".into(),
        );
    }
    if !target.temp_path.starts_with('/') {
        report.errors.push(format!(
            "target.temp_path '{}' must be an absolute path on the device",
            target.temp_path
        ));
    }
    if target.service.trim().is_empty() {
        report.errors.push("target.service cannot be empty".into());
    }
    if target.port == 0 {
        report.errors.push("target.port cannot be 0".into());
    }
    if let Some(identity) = &target.identity_file
        && !identity.is_file()
    {
        report.errors.push(format!(
            "target.identity_file '{}' does not exist",
            identity.display()
        ));
    }
    report
}
