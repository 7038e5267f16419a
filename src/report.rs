use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::pipeline::{PipelineResult, Plan, StageRecord};
use crate::remote::CleanupOutcome;

/// What was installed where, written after a successful deploy.
#[derive(Debug, Serialize)]
pub struct DeployReceipt {
    pub generated_at: DateTime<Utc>,
    pub plan: Plan,
    pub host: String,
    pub service: String,
    pub artifact: String,
    pub artifact_sha256: String,
    pub stages: Vec<StageRecord>,
    pub cleanup: CleanupOutcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl DeployReceipt {
    pub fn from_result(result: &PipelineResult) -> Result<Self> {
        let deploy = result
            .deploy
            .as_ref()
            .ok_or_else(|| anyhow!("Pipeline run did not deploy anything"))?;
        let artifact_sha256 = compute_sha256(&deploy.artifact)?;
        Ok(Self {
            generated_at: Utc::now(),
            plan: result.plan,
            host: deploy.host.clone(),
            service: deploy.service.clone(),
            artifact: deploy.artifact.to_string_lossy().to_string(),
            artifact_sha256,
            stages: result.stages.clone(),
            cleanup: deploy.cleanup.clone(),
            warnings: result.warnings.clone(),
        })
    }
}

pub fn write_receipt(result: &PipelineResult, path: &Path) -> Result<DeployReceipt> {
    let receipt = DeployReceipt::from_result(result)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory: {}", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to create deploy report: {}", path.display()))?;
    serde_yaml::to_writer(file, &receipt)
        .with_context(|| format!("Failed to write deploy report: {}", path.display()))?;
    Ok(receipt)
}

/// SHA256 of the file at `path` as a hex string.
pub fn compute_sha256(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
