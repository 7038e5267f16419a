use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use serde_json::to_writer_pretty;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};
use vista_deploy::clean::clean;
use vista_deploy::config::{DEFAULT_CONFIG_FILE, DeployConfig, Overrides, write_starter};
use vista_deploy::error::{DeployError, PipelineError};
use vista_deploy::observability::{MetricsCollector, log_snapshot};
use vista_deploy::pipeline::{Pipeline, PipelineOptions, Plan, Stage};
use vista_deploy::process::SystemRunner;
use vista_deploy::report::{compute_sha256, write_receipt};
use vista_deploy::stage::StageRunner;
use vista_deploy::validation::validate_config;

#[cfg(feature = "otel")]
use opentelemetry::KeyValue;
#[cfg(feature = "otel")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "otel")]
use opentelemetry_sdk::{resource::Resource, trace as sdktrace};

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_tracing(cli.global.otlp_endpoint.as_deref())?;

    let command_result = match cli.command {
        Commands::Build { metrics } => run_plan(&cli.global, Plan::Build, false, None, &metrics),
        Commands::Package { metrics } => {
            run_plan(&cli.global, Plan::Package, false, None, &metrics)
        }
        Commands::Deploy {
            repackage,
            report,
            metrics,
        } => run_plan(&cli.global, Plan::Deploy, repackage, report, &metrics),
        Commands::Clean { artifacts } => clean_command(&cli.global, artifacts),
        Commands::CheckBuild => check_build(&cli.global),
        Commands::CheckPackage => check_package(&cli.global),
        Commands::Validate => validate_command(&cli.global),
        Commands::Init { output, force } => init_command(&cli.global, output, force),
    };

    #[cfg(feature = "otel")]
    if cli.global.otlp_endpoint.is_some() {
        opentelemetry::global::shutdown_tracer_provider();
    }

    command_result
}

fn configure_tracing(otlp_endpoint: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(feature = "otel")]
    {
        if let Some(endpoint) = otlp_endpoint {
            let tracer =
                opentelemetry_otlp::new_pipeline()
                    .tracing()
                    .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(
                        vec![KeyValue::new("service.name", "vista-deploy")],
                    )))
                    .with_exporter(
                        opentelemetry_otlp::new_exporter()
                            .tonic()
                            .with_endpoint(endpoint),
                    )
                    .install_simple()?;

            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()
                .map_err(|err| anyhow!(err.to_string()))?;
            return Ok(());
        }
    }

    #[cfg(not(feature = "otel"))]
    if let Some(endpoint) = otlp_endpoint {
        eprintln!(
            "warning: --otlp-endpoint '{}' requested but OpenTelemetry support is not enabled. Rebuild with --features otel.",
            endpoint
        );
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;

    Ok(())
}

fn load_config(global: &GlobalArgs) -> Result<DeployConfig> {
    let mut config = DeployConfig::resolve(global.config.as_deref())?;
    config.apply(&Overrides {
        host: global.host.clone(),
        build_dir: global.build_dir.clone(),
    });
    Ok(config)
}

fn run_plan(
    global: &GlobalArgs,
    plan: Plan,
    repackage: bool,
    report: Option<PathBuf>,
    metrics: &MetricsArgs,
) -> Result<()> {
    let config = load_config(global)?;
    let pipeline = Pipeline::new(config, Arc::new(SystemRunner))
        .with_options(PipelineOptions { repackage });

    let result = pipeline.run(plan);
    emit_metrics(&pipeline.metrics(), metrics)?;

    let result = result.into_result().map_err(surface)?;
    if let Some(artifact) = &result.artifact {
        info!(artifact = %artifact.display(), "Artifact");
    }
    if let Some(path) = report {
        write_receipt(&result, &path)?;
        info!(report = %path.display(), "Deploy report written");
    }
    println!("{} completed", plan_label(plan));
    Ok(())
}

fn plan_label(plan: Plan) -> &'static str {
    match plan {
        Plan::Build => "build",
        Plan::Package => "package",
        Plan::Deploy => "deploy",
    }
}

/// Log the remediation hints and turn the failure into the process error.
fn surface(err: PipelineError) -> anyhow::Error {
    for hint in err.hints() {
        error!(stage = err.stage.as_str(), "hint: {hint}");
    }
    anyhow!(err)
}

fn emit_metrics(metrics: &MetricsCollector, args: &MetricsArgs) -> Result<()> {
    if !args.print_metrics && args.metrics_json.is_none() {
        return Ok(());
    }
    let snapshot = metrics.snapshot();
    if args.print_metrics {
        log_snapshot(&snapshot);
    }
    if let Some(path) = &args.metrics_json {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create metrics directory: {}", parent.display())
            })?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
        to_writer_pretty(file, &snapshot)
            .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
        info!(metrics = %path.display(), "Metrics JSON written");
    }
    Ok(())
}

fn clean_command(global: &GlobalArgs, artifacts: bool) -> Result<()> {
    let config = load_config(global)?;
    let summary = clean(&config, artifacts).context("Failed to clean build outputs")?;
    if summary.removed.is_empty() {
        println!("Nothing to clean");
    }
    for path in &summary.removed {
        println!("removed {}", path.display());
    }
    Ok(())
}

fn check_build(global: &GlobalArgs) -> Result<()> {
    let config = load_config(global)?;
    let target = config.build_target();
    StageRunner::new(Arc::new(SystemRunner))
        .verify_output(&target)
        .map_err(|err| surface(PipelineError::new(Stage::Building, err)))?;
    println!("Build output OK: {}", target.marker_path().display());
    Ok(())
}

fn check_package(global: &GlobalArgs) -> Result<()> {
    let config = load_config(global)?;
    let pipeline = Pipeline::new(config, Arc::new(SystemRunner));
    let packaging = pipeline.packaging_stage();

    match packaging.check_toolchain() {
        Ok(entry_point) => {
            info!(entry_point = %entry_point.display(), "Packaging toolchain available")
        }
        Err(err) => warn!("{err}; `vista-deploy package` will not be able to rebuild the artifact"),
    }

    let spec = &pipeline.config().packaging;
    let artifact = packaging.locate().ok_or_else(|| {
        surface(PipelineError::new(
            Stage::Locating,
            DeployError::ArtifactNotFound {
                dir: spec.deploy_dir.clone(),
                pattern: spec.artifact_pattern.clone(),
            },
        ))
    })?;
    let digest = compute_sha256(&artifact)?;
    println!("{}  {}", digest, artifact.display());
    Ok(())
}

fn validate_command(global: &GlobalArgs) -> Result<()> {
    let config = load_config(global)?;
    let label = global
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let report = validate_config(&config);

    for warning in &report.warnings {
        warn!(file = %label.display(), "{warning}");
    }

    if report.is_ok() {
        info!(file = %label.display(), "Config validation passed");
        Ok(())
    } else {
        for error_msg in &report.errors {
            error!(file = %label.display(), "{error_msg}");
        }
        Err(anyhow!(
            "Config validation failed with {} error(s)",
            report.errors.len()
        ))
    }
}

fn init_command(global: &GlobalArgs, output: Option<PathBuf>, force: bool) -> Result<()> {
    let destination = output
        .or_else(|| global.config.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let written = write_starter(&destination, global.host.as_deref(), force)?;
    info!(path = %written.display(), "Starter config written");
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "vista-deploy",
    version,
    about = "Build, package and deploy the Vista web UI to a device"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Config file (defaults to ./vista-deploy.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Device address or hostname
    #[arg(long, global = true, env = "VISTA_TARGET_HOST")]
    host: Option<String>,
    /// Build output directory of the web UI
    #[arg(long = "build-dir", global = true)]
    build_dir: Option<PathBuf>,
    #[arg(long = "otlp-endpoint", global = true)]
    otlp_endpoint: Option<String>,
}

#[derive(Args)]
struct MetricsArgs {
    #[arg(long)]
    print_metrics: bool,
    #[arg(long = "metrics-json")]
    metrics_json: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the web UI bundle
    Build {
        #[command(flatten)]
        metrics: MetricsArgs,
    },
    /// Build and package the web UI
    Package {
        #[command(flatten)]
        metrics: MetricsArgs,
    },
    /// Build, package if needed, and install on the device
    Deploy {
        /// Package even if an artifact already exists
        #[arg(long)]
        repackage: bool,
        /// Write a YAML deploy report here
        #[arg(long)]
        report: Option<PathBuf>,
        #[command(flatten)]
        metrics: MetricsArgs,
    },
    /// Remove build output
    Clean {
        /// Also remove packaged artifacts
        #[arg(long)]
        artifacts: bool,
    },
    /// Check the build output and marker file exist
    CheckBuild,
    /// Check a packaged artifact exists
    CheckPackage,
    /// Validate the config file
    Validate,
    /// Write a starter config file
    Init {
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
}
