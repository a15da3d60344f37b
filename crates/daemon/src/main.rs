//! kfed daemon entry point.
//!
//! Loads configuration, builds the federated resolver, runs the policy
//! scheduler and handles graceful shutdown.

mod scheduler;
mod signals;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use kfed_core::config::expand_tilde;
use kfed_core::git::GitClient;
use kfed_core::registry::SourceRegistry;
use kfed_core::FederatedResolver;

/// How long shutdown waits for an in-flight cycle.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// kfed policy scheduler daemon.
#[derive(Parser, Debug)]
#[command(
    name = "kfed-daemon",
    version,
    about = "Keeps federated knowledge caches fresh according to their sync policies"
)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "~/.config/kfed/config.yaml")]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Also write a daily rolling log file into this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Run one policy cycle and exit.
    #[arg(long)]
    once: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = expand_tilde(&args.config);

    // Load, resolve and validate configuration
    let registry = SourceRegistry::load(&config_path).context("failed to load configuration")?;

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| registry.settings().log_level.clone());
    let _log_guard = init_tracing(&log_level, args.log_dir.as_deref())?;

    let settings = registry.settings().clone();
    let poll_interval = Duration::from_secs(settings.poll_interval_secs.max(1));

    // Startup banner
    info!("========================================");
    info!("  kfed daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", config_path.display());
    info!("Sources       : {}", registry.len());
    info!("Cache root    : {}", settings.cache_root_path().display());
    info!("Poll interval : {}s", poll_interval.as_secs());
    info!("Parallel sync : {}", settings.parallel_sync);
    info!("Log level     : {}", log_level);
    info!("========================================");

    std::fs::create_dir_all(settings.cache_root_path()).context("failed to create cache root")?;

    let resolver = Arc::new(FederatedResolver::new(registry, Arc::new(GitClient::new())));
    let sched = Arc::new(scheduler::Scheduler::new(Arc::clone(&resolver), poll_interval));

    if args.once {
        if let Some(report) = sched.maybe_run_cycle("once").await {
            report_cache_usage(&resolver);
            if report.failed > 0 {
                anyhow::bail!("{} of {} due source(s) failed to sync", report.failed, report.total);
            }
        }
        return Ok(());
    }

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let scheduler_handle = {
        let sched = Arc::clone(&sched);
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move { sched.run(shutdown).await })
    };

    signals::wait_for_shutdown().await;
    info!("Shutdown signal received, stopping...");

    // A stored permit reaches the scheduler even mid-cycle.
    shutdown.notify_one();

    match tokio::time::timeout(SHUTDOWN_GRACE, scheduler_handle).await {
        Ok(Ok(())) => info!("scheduler stopped gracefully"),
        Ok(Err(e)) => warn!("scheduler task error: {}", e),
        Err(_) => warn!(
            "scheduler did not stop within {}s, forcing shutdown",
            SHUTDOWN_GRACE.as_secs()
        ),
    }

    report_cache_usage(&resolver);
    info!("kfed daemon stopped.");
    Ok(())
}

/// Console output, plus a daily rolling file when `log_dir` is set.
///
/// The returned guard flushes the file writer when dropped.
fn init_tracing(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = || EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(true);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "kfed-daemon.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter())
                .with(console)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter())
                .with(console)
                .init();
            Ok(None)
        }
    }
}

fn report_cache_usage(resolver: &FederatedResolver) {
    match resolver.cache_usage() {
        Ok(usage) => info!(
            root = %usage.root.display(),
            bytes = usage.bytes,
            limit = usage.limit,
            "cache usage"
        ),
        Err(e) => warn!(error = %e, "could not measure cache usage"),
    }
}
