mod config;
mod registry;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use config::{AppConfig, ConfigError, init_config, load_config};
use registry::{RunContext, RunReport, RunStatus, init_run_logging, start_run, write_report};
use synthload_core::{RedactedConnection, redact_connection_string};
use synthload_generate::{BatchGenerator, GenerationError, LocaleKey};
use synthload_load::pipeline::{self, PipelineError};
use synthload_load::{
    CsvSink, MemorySink, PostgresSink, ResilientLoader, RunSummary, Sink, SinkError,
};

#[derive(Debug, Error)]
enum CliError {
    #[error("registry error: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("unsupported engine: {0}")]
    UnsupportedEngine(String),
}

#[derive(Parser, Debug)]
#[command(name = "synthload", version, about = "Synthetic customer record generator and loader")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate records and load them into a sink.
    Generate(GenerateArgs),
    /// Write a default config file.
    InitConfig(InitConfigArgs),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Number of records to load.
    #[arg(long, short = 'n')]
    count: u64,
    /// Path to a synthload.toml config file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Database connection string (flag form).
    #[arg(long, value_name = "CONNECTION_STRING", conflicts_with = "conn_pos")]
    conn: Option<String>,
    /// Database connection string (positional form).
    #[arg(value_name = "CONNECTION_STRING")]
    conn_pos: Option<String>,
    /// Append records to a CSV file instead of a database.
    #[arg(long, value_name = "PATH", conflicts_with_all = ["conn", "conn_pos", "dry_run"])]
    csv: Option<PathBuf>,
    /// Generate and validate without persisting anything.
    #[arg(long, default_value_t = false, conflicts_with_all = ["conn", "conn_pos"])]
    dry_run: bool,
    /// Target table (`name` or `schema.name`).
    #[arg(long)]
    table: Option<String>,
    /// Create the target table before loading.
    #[arg(long, default_value_t = false)]
    create_table: bool,
    /// Output directory for runs.
    #[arg(long, default_value = "runs")]
    run_dir: PathBuf,
    /// Name locale (en_US, pt_BR).
    #[arg(long)]
    locale: Option<String>,
    /// Records per batch.
    #[arg(long)]
    batch_size: Option<usize>,
    /// Email domain; repeat to allow several. Replaces the configured list.
    #[arg(long = "domain", value_name = "DOMAIN")]
    domains: Vec<String>,
    /// Stderr log filter when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Args, Debug)]
struct InitConfigArgs {
    /// Where to write the config.
    #[arg(default_value = "synthload.toml")]
    path: PathBuf,
    /// Overwrite an existing file.
    #[arg(long, default_value_t = false)]
    force: bool,
}

enum Target {
    Postgres(String),
    Csv(PathBuf),
    DryRun,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Generate(args) => run_generate(args).await,
        Command::InitConfig(args) => run_init_config(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            match err {
                CliError::Pipeline(PipelineError::Cancelled { .. }) => ExitCode::from(130),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn run_init_config(args: InitConfigArgs) -> Result<(), CliError> {
    init_config(&args.path, args.force)?;
    println!("wrote {}", args.path.display());
    Ok(())
}

async fn run_generate(args: GenerateArgs) -> Result<(), CliError> {
    let GenerateArgs {
        count,
        config,
        conn,
        conn_pos,
        csv,
        dry_run,
        table,
        create_table,
        run_dir,
        locale,
        batch_size,
        domains,
        log_level,
    } = args;

    if count == 0 {
        return Err(CliError::InvalidArgs(
            "--count must be greater than zero".to_string(),
        ));
    }

    let mut config = match &config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    apply_overrides(&mut config, locale, batch_size, domains, table, create_table)?;
    config.validate()?;

    let target = resolve_target(conn, conn_pos, csv, dry_run)?;
    let (engine, connection) = match &target {
        Target::Postgres(url) => (detect_engine(url)?, redact_connection_string(url)),
        Target::Csv(path) => ("csv", RedactedConnection::local("csv", &path.display().to_string())),
        Target::DryRun => ("memory", RedactedConnection::local("memory", "dry-run")),
    };

    let run_id = Uuid::new_v4().to_string();
    let run_ctx = RunContext {
        run_id: run_id.clone(),
        started_at: chrono::Utc::now(),
        engine: engine.to_string(),
        requested: count,
        run_dir,
        config: config.clone(),
        connection,
    };

    let run_paths = start_run(&run_ctx)?;
    init_run_logging(&run_paths.logs_path, &log_level)?;

    tracing::info!(
        event = "run_registered",
        run_id = %run_id,
        engine,
        run_dir = %run_paths.root.display()
    );

    let mut dry_run_sink = None;
    let sink: Arc<dyn Sink> = match &target {
        Target::Postgres(url) => {
            let sink = PostgresSink::new(url.clone(), &config.sink.table)?;
            if config.sink.create_table {
                sink.ensure_table().await?;
                tracing::info!(event = "table_ensured", table = sink.table());
            }
            Arc::new(sink)
        }
        Target::Csv(path) => Arc::new(CsvSink::new(path.clone())),
        Target::DryRun => {
            let sink = MemorySink::new();
            dry_run_sink = Some(sink.clone());
            Arc::new(sink)
        }
    };

    let generator = BatchGenerator::from_options(&config.generation)?;
    let cancel = CancellationToken::new();
    watch_ctrl_c(cancel.clone());

    let timer = Instant::now();
    let mut loader = ResilientLoader::new(sink, config.load.clone());
    let outcome = pipeline::run(generator, count, &mut loader, &config.pipeline, cancel.clone()).await;
    cancel.cancel();
    let duration_ms = timer.elapsed().as_millis() as u64;

    let (status, error, summary) = match &outcome {
        Ok(summary) => (RunStatus::Success, None, summary),
        Err(err @ PipelineError::Cancelled { .. }) => {
            (RunStatus::Cancelled, Some(err.to_string()), err.summary())
        }
        Err(err) => (RunStatus::Failed, Some(err.to_string()), err.summary()),
    };

    write_report(
        &run_paths,
        &RunReport {
            run_id: &run_id,
            status,
            error,
            duration_ms,
            summary,
        },
    )?;
    tracing::info!(event = "report_written", path = %run_paths.report_path.display());

    print_summary(summary, status, duration_ms);
    if let Some(sink) = dry_run_sink {
        print_preview(&sink);
    }
    println!("run directory: {}", run_paths.root.display());

    outcome.map(|_| ()).map_err(CliError::from)
}

fn apply_overrides(
    config: &mut AppConfig,
    locale: Option<String>,
    batch_size: Option<usize>,
    domains: Vec<String>,
    table: Option<String>,
    create_table: bool,
) -> Result<(), CliError> {
    if let Some(locale) = locale {
        config.generation.locale = LocaleKey::parse(&locale)
            .ok_or_else(|| CliError::InvalidArgs(format!("unknown locale '{locale}'")))?;
    }
    if let Some(batch_size) = batch_size {
        config.generation.batch_size = batch_size;
    }
    if !domains.is_empty() {
        config.generation.email_domains = domains;
    }
    if let Some(table) = table {
        config.sink.table = table;
    }
    if create_table {
        config.sink.create_table = true;
    }
    Ok(())
}

fn resolve_target(
    conn: Option<String>,
    conn_pos: Option<String>,
    csv: Option<PathBuf>,
    dry_run: bool,
) -> Result<Target, CliError> {
    match (conn.or(conn_pos), csv, dry_run) {
        (Some(conn), None, false) => Ok(Target::Postgres(conn)),
        (None, Some(path), false) => Ok(Target::Csv(path)),
        (None, None, true) => Ok(Target::DryRun),
        (None, None, false) => Err(CliError::InvalidArgs(
            "a connection string, --csv or --dry-run is required".to_string(),
        )),
        _ => Err(CliError::InvalidArgs(
            "use exactly one of a connection string, --csv or --dry-run".to_string(),
        )),
    }
}

fn detect_engine(conn: &str) -> Result<&'static str, CliError> {
    if conn.starts_with("postgres://") || conn.starts_with("postgresql://") {
        Ok("postgres")
    } else {
        Err(CliError::UnsupportedEngine(
            redact_connection_string(conn).redacted,
        ))
    }
}

fn watch_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    tracing::warn!(event = "cancel_requested", "interrupt received, finishing current batch");
                    cancel.cancel();
                }
            }
        }
    });
}

fn print_summary(summary: &RunSummary, status: RunStatus, duration_ms: u64) {
    let status = match status {
        RunStatus::Success => "success",
        RunStatus::Failed => "failed",
        RunStatus::Cancelled => "cancelled",
    };
    println!(
        "{status}: loaded {} of {} records in {} batches ({} ms)",
        summary.total_loaded, summary.requested, summary.batches_loaded, duration_ms
    );
    println!(
        "reconnects: {}, skipped batches: {}, discarded candidates: {}, collisions: {}",
        summary.loader.reconnects,
        summary.batches_skipped,
        summary.generation.candidates_discarded,
        summary.generation.collisions_total()
    );
}

fn print_preview(sink: &MemorySink) {
    for record in sink.committed().iter().take(3) {
        println!(
            "  {} {} {} <{}> {}",
            record.uid(),
            record.first_name(),
            record.last_name(),
            record.email(),
            record.birth_date()
        );
    }
}
