//! Sumi-Harvest main entry point
//!
//! This is the command-line interface for the Sumi-Harvest data-file collector.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sumi_harvest::config::{load_config, load_config_with_hash, Config, LaunchMode};
use sumi_harvest::orchestrator::{
    run_worker, ConfigJobFactory, FailureKind, InProcessLauncher, JobFailure, JobLauncher,
    ProcessLauncher, WorkerReport,
};
use sumi_harvest::storage::download_counts;
use sumi_harvest::ProcessPoolOrchestrator;
use tracing_subscriber::EnvFilter;

/// Sumi-Harvest: a polite periodic data-file collector
///
/// Sumi-Harvest runs a fixed set of collection jobs against remote sources,
/// downloading new data files as they appear and remembering what it has
/// already collected.
#[derive(Parser, Debug)]
#[command(name = "sumi-harvest")]
#[command(version)]
#[command(about = "A polite periodic data-file collector", long_about = None)]
#[command(subcommand_negates_reqs = true)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG", required = true)]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show the job plan without collecting anything
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show download statistics from the seen database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Only run the named job (repeatable)
    #[arg(long = "job", value_name = "NAME")]
    jobs: Vec<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs a single job and reports on stdout (spawned by the process pool)
    #[command(hide = true)]
    Worker {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        #[arg(long)]
        job: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    if let Some(Command::Worker { config, job }) = &cli.command {
        // The stdin watcher keeps a blocking read alive, so don't wait for
        // the runtime to shut down
        std::process::exit(handle_worker(config, job).await);
    }

    let config_path = cli.config.clone().context("missing CONFIG argument")?;

    tracing::info!("Loading configuration from: {}", config_path.display());
    let (config, config_hash) = load_config_with_hash(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let jobs = selected_jobs(&config, &cli.jobs)?;

    if cli.dry_run {
        handle_dry_run(&config, &jobs);
        Ok(())
    } else if cli.stats {
        handle_stats(&config)
    } else {
        handle_harvest(config, &config_path, jobs, &cli).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// Logs go to stderr; worker processes reserve stdout for their report.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_harvest=info,warn"),
            1 => EnvFilter::new("sumi_harvest=debug,info"),
            2 => EnvFilter::new("sumi_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Resolves `--job` filters against the configuration
///
/// Without filters every enabled job runs. Named jobs run even when
/// disabled in the file.
fn selected_jobs(config: &Config, requested: &[String]) -> anyhow::Result<Vec<String>> {
    if requested.is_empty() {
        return Ok(config.enabled_jobs().map(|job| job.name.clone()).collect());
    }

    for name in requested {
        if config.job(name).is_none() {
            bail!("unknown job '{}'", name);
        }
    }
    Ok(requested.to_vec())
}

/// Handles the hidden `worker` subcommand; returns the process exit code
async fn handle_worker(config_path: &Path, job: &str) -> i32 {
    let report = match load_config(config_path) {
        Ok(config) => run_worker(Arc::new(config), job).await,
        Err(e) => WorkerReport {
            job: job.to_string(),
            result: Err(JobFailure::new(
                job,
                FailureKind::Fatal,
                format!("failed to load configuration: {}", e),
            )),
        },
    };

    let code = if report.result.is_ok() { 0 } else { 1 };
    match serde_json::to_string(&report) {
        Ok(line) => {
            let mut stdout = std::io::stdout().lock();
            if writeln!(stdout, "{}", line).and_then(|_| stdout.flush()).is_err() {
                tracing::error!("Failed to write worker report");
                return 2;
            }
        }
        Err(e) => {
            tracing::error!("Failed to encode worker report: {}", e);
            return 2;
        }
    }
    code
}

/// Handles the --dry-run mode: validates config and shows the job plan
fn handle_dry_run(config: &Config, jobs: &[String]) {
    println!("=== Sumi-Harvest Dry Run ===\n");

    println!("Orchestrator Configuration:");
    println!("  Pool size: {}", config.orchestrator.pool_size);
    println!("  Mode: {:?}", config.orchestrator.mode);
    println!(
        "  Default poll interval: {}s",
        config.orchestrator.poll_interval_secs
    );
    println!("  Grace period: {}s", config.orchestrator.grace_period_secs);

    println!("\nPipeline:");
    println!(
        "  Workers: {} process / {} download / {} storage",
        config.pipeline.process_workers,
        config.pipeline.download_workers,
        config.pipeline.storage_workers
    );
    println!("  Queue capacity: {}", config.pipeline.queue_capacity);

    println!("\nRetry:");
    println!(
        "  {} tries, delay {}ms x{} (max {}ms), timeout {}s +{}s (max {}s)",
        config.retry.tries,
        config.retry.initial_delay_ms,
        config.retry.backoff,
        config.retry.max_delay_ms,
        config.retry.initial_timeout_secs,
        config.retry.timeout_increment_secs,
        config.retry.max_timeout_secs
    );

    println!("\nOutput:");
    println!("  Storage directory: {}", config.output.storage_dir);
    println!("  Seen database: {}", config.output.seen_db);

    println!("\nJobs ({}):", jobs.len());
    for job in jobs.iter().filter_map(|name| config.job(name)) {
        println!("  - {} ({})", job.name, job.source.kind());
        println!("    pattern: {}", job.source.pattern());
        if let Some(limit) = job.limit {
            println!("    limit: {}", limit);
        }
        if !job.categories.is_empty() {
            println!("    categories: {}", job.categories.join(", "));
        }
        if job.single_pass {
            println!("    single pass");
        }
        if let Some(date) = job.target_date {
            println!("    target date: {}", date);
        }
        if let Some(group) = &job.lock_group {
            println!("    lock group: {}", group);
        }
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows download statistics from the seen database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.seen_db);

    let counts = download_counts(Path::new(&config.output.seen_db))
        .context("failed to read seen database")?;

    if counts.is_empty() {
        println!("No downloads recorded yet");
        return Ok(());
    }

    println!("{:<24} {:>10} {:>16}", "Job", "Files", "Bytes");
    for (job, files, bytes) in &counts {
        println!("{:<24} {:>10} {:>16}", job, files, bytes);
    }
    let files: u64 = counts.iter().map(|(_, f, _)| f).sum();
    let bytes: u64 = counts.iter().map(|(_, _, b)| b).sum();
    println!("{:<24} {:>10} {:>16}", "Total", files, bytes);

    Ok(())
}

/// Handles the main collection run
async fn handle_harvest(
    config: Config,
    config_path: &Path,
    jobs: Vec<String>,
    cli: &Cli,
) -> anyhow::Result<()> {
    let launcher: Arc<dyn JobLauncher> = match config.orchestrator.mode {
        LaunchMode::Process => {
            let mut args = Vec::new();
            if cli.quiet {
                args.push("--quiet".to_string());
            } else if cli.verbose > 0 {
                args.push(format!("-{}", "v".repeat(cli.verbose as usize)));
            }
            Arc::new(
                ProcessLauncher::current(config_path)
                    .context("failed to locate the current executable")?
                    .with_args(args),
            )
        }
        LaunchMode::InProcess => {
            let factory = ConfigJobFactory::new(Arc::new(config.clone()))?;
            Arc::new(InProcessLauncher::new(Arc::new(factory)))
        }
    };

    tracing::info!(
        "Starting {} job(s) with pool size {} ({:?} mode)",
        jobs.len(),
        config.orchestrator.pool_size,
        config.orchestrator.mode
    );

    let orchestrator = Arc::new(ProcessPoolOrchestrator::new(
        jobs,
        config.orchestrator.pool_size,
        config.orchestrator.grace_period(),
        launcher,
    )?);

    let signals = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received, finishing current runs (press again to force)");
                orchestrator.shutdown();
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                orchestrator.terminate();
            }
        }
    });

    let results = orchestrator.run().await;
    signals.abort();

    println!("\n=== Harvest Summary ===\n");
    let mut failed = 0usize;
    for (job, result) in &results {
        match result {
            Ok(outcome) => println!(
                "✓ {:<24} {} file(s) in {} run(s), {}",
                job, outcome.collected_total, outcome.runs, outcome.exit_reason
            ),
            Err(failure) => {
                failed += 1;
                println!("✗ {:<24} {:?}: {}", job, failure.kind, failure.message);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} job(s) failed", failed, results.len());
    }
    Ok(())
}
