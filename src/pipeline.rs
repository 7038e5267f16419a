use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::span::EnteredSpan;
use tracing::{error, info, info_span, instrument, warn};

use crate::config::DeployConfig;
use crate::error::PipelineError;
use crate::gate::{DEPLOY_REQUIREMENTS, EnvironmentGate};
use crate::observability::{MetricsCollector, StageTimer};
use crate::package::{PackageOutcome, PackagingStage};
use crate::process::CommandRunner;
use crate::remote::{CleanupOutcome, DeployReport, RemoteDeployer};
use crate::stage::StageRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validating,
    Building,
    Packaging,
    Locating,
    Transferring,
    Installing,
    CleaningUp,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validating => "validate",
            Stage::Building => "build",
            Stage::Packaging => "package",
            Stage::Locating => "locate",
            Stage::Transferring => "transfer",
            Stage::Installing => "install",
            Stage::CleaningUp => "cleanup",
        }
    }

    /// Stages that talk to the device and therefore need the environment gate.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Stage::Transferring | Stage::Installing | Stage::CleaningUp
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running(Stage),
    Done,
    Failed { stage: Stage, cause: String },
}

/// A composed prefix of the full workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Build,
    Package,
    Deploy,
}

impl Plan {
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            Plan::Build => &[Stage::Building],
            Plan::Package => &[Stage::Building, Stage::Packaging],
            Plan::Deploy => &[
                Stage::Validating,
                Stage::Building,
                Stage::Packaging,
                Stage::Locating,
                Stage::Transferring,
                Stage::Installing,
                Stage::CleaningUp,
            ],
        }
    }

    pub fn includes(&self, stage: Stage) -> bool {
        self.stages().contains(&stage)
    }

    pub fn needs_validation(&self) -> bool {
        self.stages().iter().any(Stage::is_remote)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    /// Package even when an artifact is already present in the deploy tree.
    pub repackage: bool,
}

#[derive(Debug)]
pub struct PipelineResult {
    pub plan: Plan,
    pub state: PipelineState,
    pub stages: Vec<StageRecord>,
    pub artifact: Option<PathBuf>,
    pub deploy: Option<DeployReport>,
    /// Advisory problems that did not fail the run.
    pub warnings: Vec<String>,
    error: Option<PipelineError>,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.state == PipelineState::Done
    }

    pub fn error(&self) -> Option<&PipelineError> {
        self.error.as_ref()
    }

    pub fn into_result(mut self) -> Result<Self, PipelineError> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

pub struct Pipeline {
    config: DeployConfig,
    runner: Arc<dyn CommandRunner>,
    options: PipelineOptions,
    metrics: MetricsCollector,
}

impl Pipeline {
    pub fn new(config: DeployConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            options: PipelineOptions::default(),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    pub fn packaging_stage(&self) -> PackagingStage {
        PackagingStage::new(
            StageRunner::new(self.runner.clone()),
            self.config.packaging.clone(),
            self.config.build_target(),
        )
    }

    /// Run every stage of `plan` in order, stopping at the first failure.
    #[instrument(skip(self))]
    pub fn run(&self, plan: Plan) -> PipelineResult {
        self.metrics.reset();
        let started = Instant::now();
        let mut tracker = Tracker::new(plan, &self.metrics);
        let outcome = self.drive(plan, &mut tracker);
        self.metrics.record_total_duration(started.elapsed());
        tracker.finish(outcome)
    }

    fn drive(&self, plan: Plan, tracker: &mut Tracker<'_>) -> Result<(), PipelineError> {
        if plan.needs_validation() {
            tracker.enter(Stage::Validating);
            EnvironmentGate::new(&self.config)
                .check(DEPLOY_REQUIREMENTS)
                .map_err(|err| PipelineError::new(Stage::Validating, err))?;
            tracker.complete(None);
        }

        let stages = StageRunner::new(self.runner.clone());
        let build = self.config.build_target();
        tracker.enter(Stage::Building);
        stages
            .run(&build)
            .map_err(|err| PipelineError::new(Stage::Building, err))?;
        tracker.complete(Some(build.output_dir.display().to_string()));

        if !plan.includes(Stage::Packaging) {
            return Ok(());
        }
        let packaging = self.packaging_stage();
        tracker.enter(Stage::Packaging);
        // The package plan always packages; deploy reuses what is there.
        let force = plan == Plan::Package || self.options.repackage;
        let outcome = packaging
            .ensure(force)
            .map_err(|err| PipelineError::new(Stage::Packaging, err))?;
        let detail = match &outcome {
            PackageOutcome::Built(path) => format!("built {}", path.display()),
            PackageOutcome::Reused(path) => format!("reused {}", path.display()),
        };
        tracker.artifact = Some(outcome.artifact().clone());
        tracker.complete(Some(detail));

        if !plan.includes(Stage::Locating) {
            return Ok(());
        }
        let deployer = RemoteDeployer::new(self.runner.clone(), self.config.remote_target());
        let artifact = tracker.artifact.clone();
        let deployed = deployer.deploy(artifact.as_deref(), &packaging, &mut |stage| {
            tracker.advance(stage)
        });
        let report = deployed.map_err(|err| {
            let stage = tracker.current().unwrap_or(Stage::Locating);
            PipelineError::new(stage, err)
        })?;

        let detail = match &report.cleanup {
            CleanupOutcome::Removed => "temp artifact removed".to_string(),
            CleanupOutcome::Failed(cause) => {
                self.metrics.record_cleanup_failure();
                let warning = format!(
                    "Could not remove {} on {}: {cause}",
                    self.config.target.temp_path, self.config.target.host
                );
                tracker.warnings.push(warning.clone());
                warning
            }
        };
        tracker.artifact = Some(report.artifact.clone());
        tracker.complete(Some(detail));
        tracker.deploy = Some(report);
        Ok(())
    }
}

/// Bookkeeping for one run: current state, records, timer and span.
struct Tracker<'a> {
    plan: Plan,
    metrics: &'a MetricsCollector,
    state: PipelineState,
    active: Option<Stage>,
    records: Vec<StageRecord>,
    artifact: Option<PathBuf>,
    deploy: Option<DeployReport>,
    warnings: Vec<String>,
    timer: Option<StageTimer>,
    span: Option<EnteredSpan>,
}

impl<'a> Tracker<'a> {
    fn new(plan: Plan, metrics: &'a MetricsCollector) -> Self {
        Self {
            plan,
            metrics,
            state: PipelineState::Idle,
            active: None,
            records: Vec::new(),
            artifact: None,
            deploy: None,
            warnings: Vec::new(),
            timer: None,
            span: None,
        }
    }

    fn current(&self) -> Option<Stage> {
        self.active
    }

    fn enter(&mut self, stage: Stage) {
        self.span = None;
        self.span = Some(info_span!("stage", stage = stage.as_str()).entered());
        self.timer = Some(self.metrics.start_stage(stage.as_str()));
        self.state = PipelineState::Running(stage);
        self.active = Some(stage);
        info!("Stage started");
    }

    fn complete(&mut self, detail: Option<String>) {
        if let Some(stage) = self.active.take() {
            info!(detail = detail.as_deref().unwrap_or(""), "Stage succeeded");
            self.records.push(StageRecord {
                stage,
                succeeded: true,
                detail,
            });
        }
        self.timer = None;
        self.span = None;
    }

    /// Called by the deployer as it moves from one step to the next.
    fn advance(&mut self, next: Stage) {
        self.complete(None);
        self.enter(next);
    }

    fn finish(mut self, outcome: Result<(), PipelineError>) -> PipelineResult {
        let error = match outcome {
            Ok(()) => {
                self.state = PipelineState::Done;
                info!(plan = ?self.plan, "Pipeline finished");
                None
            }
            Err(err) => {
                let cause = err.source.to_string();
                error!(stage = err.stage.as_str(), %cause, "Stage failed");
                self.records.push(StageRecord {
                    stage: err.stage,
                    succeeded: false,
                    detail: Some(cause.clone()),
                });
                self.metrics.record_stage_failure(err.stage.as_str());
                self.state = PipelineState::Failed {
                    stage: err.stage,
                    cause,
                };
                Some(err)
            }
        };
        self.timer = None;
        self.span = None;
        for warning in &self.warnings {
            warn!("{warning}");
        }
        PipelineResult {
            plan: self.plan,
            state: self.state,
            stages: self.records,
            artifact: self.artifact,
            deploy: self.deploy,
            warnings: self.warnings,
            error,
        }
    }
}
