use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use imageci::config::{CREDENTIAL_ID_ENV, REGISTRY_TARGET_ENV, RunConfig};
use imageci::definition::{PipelineDefinition, base_dir};
use imageci::docker::DockerCli;
use imageci::lockfile::generate_lock;
use imageci::observability::log_snapshot;
use imageci::presets::{PRESETS, generate_preset};
use imageci::stages::{self, Backends, build_pipeline};
use imageci::validation::{ValidationReport, validate_definition, validate_run_config};
use serde_json::to_writer_pretty;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    configure_tracing()?;

    match cli.command {
        Commands::Run(args) => run_pipeline(args),
        Commands::Validate { definition, config } => {
            validate_cmd(&definition, &config).map(|()| ExitCode::SUCCESS)
        }
        Commands::Lock { definition, output } => {
            lock_cmd(&definition, &output).map(|()| ExitCode::SUCCESS)
        }
        Commands::Init { preset, output } => {
            let generated = generate_preset(&preset, &output)?;
            info!(preset = %preset, path = %generated.display(), "Pipeline definition generated");
            Ok(ExitCode::SUCCESS)
        }
        Commands::ListStages => {
            println!("Available stages:");
            for name in stages::known_stages() {
                println!("- {name}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "imageci", &mut io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn configure_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}

fn run_pipeline(args: RunArgs) -> Result<ExitCode> {
    let definition = PipelineDefinition::load(&args.definition)?;
    let base = base_dir(&args.definition);
    let config = args.config.resolve(&definition)?;

    let mut report = validate_definition(&definition, &base);
    report.merge(validate_run_config(&definition, &config));
    log_report(&args.definition, &report);
    if !report.is_ok() {
        bail!(
            "Pipeline definition is invalid ({} error(s))",
            report.errors.len()
        );
    }

    if args.dry_run {
        info!(
            image = %config.registry_target,
            stages = ?definition.pipeline.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "Dry run: pipeline definition and configuration are valid"
        );
        return Ok(ExitCode::SUCCESS);
    }

    let cli = DockerCli::new(&args.docker_bin);
    cli.check_available()?;
    let executor = build_pipeline(&definition, &base, &Backends::docker(cli))?;
    let metrics_handle = executor.metrics();

    let run = executor.run(&config);
    let outcome = run.outcome();

    if let Some(failure) = run.failure() {
        error!(
            stage = failure.stage.as_str(),
            error_kind = %failure.error,
            "{}",
            failure.message
        );
        if !failure.output.is_empty() {
            eprintln!("{}", failure.output);
        }
    } else if let Some(artifact) = run.artifact() {
        info!(image = %artifact.reference, digest = artifact.digest.as_str(), "Pipeline succeeded");
    }
    println!("{outcome}");

    if let Some(path) = &args.report_json {
        create_parent_dir(path)?;
        let file = File::create(path)
            .with_context(|| format!("Failed to create run report: {}", path.display()))?;
        to_writer_pretty(file, &run)
            .with_context(|| format!("Failed to write run report: {}", path.display()))?;
        info!(report = %path.display(), "Run report written");
    }

    if args.print_metrics || args.metrics_json.is_some() || args.metrics_prometheus.is_some() {
        let snapshot = metrics_handle.snapshot();
        if args.print_metrics {
            log_snapshot(&snapshot);
        }
        if let Some(path) = &args.metrics_json {
            create_parent_dir(path)?;
            let file = File::create(path)
                .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
            to_writer_pretty(file, &snapshot)
                .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
            info!(metrics = %path.display(), "Metrics JSON written");
        }
        if let Some(path) = &args.metrics_prometheus {
            create_parent_dir(path)?;
            std::fs::write(path, snapshot.to_prometheus()).with_context(|| {
                format!("Failed to write Prometheus metrics: {}", path.display())
            })?;
            info!(metrics = %path.display(), "Prometheus metrics written");
        }
    }

    Ok(ExitCode::from(outcome.exit_code()))
}

fn validate_cmd(path: &Path, config: &ConfigArgs) -> Result<()> {
    let definition = PipelineDefinition::load(path)?;
    let mut report = validate_definition(&definition, &base_dir(path));
    if config.registry_target.is_some() || config.credential_id.is_some() {
        match config.resolve(&definition) {
            Ok(resolved) => report.merge(validate_run_config(&definition, &resolved)),
            Err(err) => report.errors.push(format!("{err:#}")),
        }
    }
    log_report(path, &report);

    if report.is_ok() {
        info!(file = %path.display(), "Pipeline validation passed");
        Ok(())
    } else {
        Err(anyhow!(
            "Pipeline validation failed with {} error(s)",
            report.errors.len()
        ))
    }
}

fn lock_cmd(path: &Path, output: &Path) -> Result<()> {
    let definition = PipelineDefinition::load(path)?;
    let report = validate_definition(&definition, &base_dir(path));
    log_report(path, &report);
    if !report.is_ok() {
        return Err(anyhow!(
            "Cannot generate lockfile due to {} validation error(s)",
            report.errors.len()
        ));
    }

    create_parent_dir(output)?;
    generate_lock(&definition, output)?;
    info!(lockfile = %output.display(), "Lockfile generated successfully");
    Ok(())
}

fn log_report(path: &Path, report: &ValidationReport) {
    for warning in &report.warnings {
        warn!(file = %path.display(), "{warning}");
    }
    for error_msg in &report.errors {
        error!(file = %path.display(), "{error_msg}");
    }
}

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "imageci",
    version,
    about = "Build, test and publish a container image as one fail-fast pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the pipeline.
    Run(RunArgs),
    /// Check a pipeline definition (and configuration, when given).
    Validate {
        definition: PathBuf,
        #[command(flatten)]
        config: ConfigArgs,
    },
    Lock {
        definition: PathBuf,
        output: PathBuf,
    },
    /// Write a starter pipeline definition.
    Init {
        #[arg(long, value_parser = PRESETS)]
        preset: String,
        #[arg(long, default_value = "imageci.yaml")]
        output: PathBuf,
    },
    ListStages,
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    definition: PathBuf,
    #[command(flatten)]
    config: ConfigArgs,
    #[arg(long = "docker-bin", env = "IMAGECI_DOCKER", default_value = "docker")]
    docker_bin: PathBuf,
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    print_metrics: bool,
    #[arg(long = "metrics-json")]
    metrics_json: Option<PathBuf>,
    #[arg(long = "metrics-prometheus")]
    metrics_prometheus: Option<PathBuf>,
    #[arg(long = "report-json")]
    report_json: Option<PathBuf>,
}

#[derive(clap::Args)]
struct ConfigArgs {
    #[arg(long = "registry-target", env = REGISTRY_TARGET_ENV)]
    registry_target: Option<String>,
    #[arg(long = "credential-id", env = CREDENTIAL_ID_ENV)]
    credential_id: Option<String>,
}

impl ConfigArgs {
    fn resolve(&self, definition: &PipelineDefinition) -> Result<RunConfig> {
        RunConfig::resolve(
            self.registry_target.as_deref(),
            self.credential_id.as_deref(),
            definition.image.as_deref(),
        )
    }
}
