//! kfed command-line management tool.
//!
//! Provides subcommands for generating and validating the configuration
//! document, managing registered sources, syncing caches, inspecting status
//! and resolving the merged knowledge tree.

mod sources;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use kfed_core::config::{expand_tilde, FederationConfig};
use kfed_core::merge::{Category, ConflictStrategy};
use kfed_core::models::{AuthConfig, BatchSyncReport, RepoStatus, SourceKind};
use kfed_core::resolver::{LocalDir, ResolutionRequest, SourceStatus};
use kfed_core::FederatedResolver;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// kfed command-line management tool.
#[derive(Parser, Debug)]
#[command(
    name = "kfed",
    version,
    about = "Sync and merge federated knowledge sources"
)]
struct Cli {
    /// Path to the configuration file (YAML, or TOML by extension).
    #[arg(short, long, global = true, default_value = "~/.config/kfed/config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path. Defaults to the --config path.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate the configuration file.
    Validate,

    /// Manage registered sources.
    Sources {
        #[command(subcommand)]
        action: sources::SourcesAction,
    },

    /// Sync one source, or every repository source.
    Sync {
        name: Option<String>,

        /// Ignore sync policies and recorded timestamps.
        #[arg(long)]
        force: bool,
    },

    /// Show cache and repository status.
    Status { name: Option<String> },

    /// Sync due sources and merge everything into one knowledge tree.
    Resolve {
        /// Local knowledge directory merged at the top priority. Repeatable.
        #[arg(long = "local")]
        local: Vec<PathBuf>,

        /// priority, local_wins or manual. Defaults to the configured one.
        #[arg(long)]
        strategy: Option<ConflictStrategy>,

        /// Merge what is cached without syncing.
        #[arg(long, conflicts_with = "force")]
        no_sync: bool,

        /// Sync every repository source regardless of policy.
        #[arg(long)]
        force: bool,

        /// Write the full resolution as JSON.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete one source's cache, or the whole cache root.
    CleanCache { name: Option<String> },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    // Minimal logging for CLI
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = expand_tilde(&cli.config);

    match cli.command {
        Commands::Init { output } => {
            let output = output.map(|p| expand_tilde(&p)).unwrap_or(config_path);
            cmd_init(&output)
        }
        Commands::Validate => cmd_validate(&config_path),
        Commands::Sources { action } => sources::run_sources(action, &config_path).await,
        Commands::Sync { name, force } => {
            let resolver = open_resolver(&config_path)?;
            cmd_sync(&resolver, name.as_deref(), force).await
        }
        Commands::Status { name } => {
            let resolver = open_resolver(&config_path)?;
            cmd_status(&resolver, name.as_deref()).await
        }
        Commands::Resolve {
            local,
            strategy,
            no_sync,
            force,
            output,
        } => {
            let resolver = open_resolver(&config_path)?;
            let request = ResolutionRequest {
                force_sync: force,
                skip_sync: no_sync,
                local_dirs: local_dirs(&local),
                strategy,
            };
            cmd_resolve(&resolver, &request, output.as_deref()).await
        }
        Commands::CleanCache { name } => {
            let resolver = open_resolver(&config_path)?;
            cmd_clean_cache(&resolver, name.as_deref())
        }
    }
}

fn open_resolver(path: &Path) -> Result<FederatedResolver> {
    FederatedResolver::from_config_file(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// Name local dirs after their final path component; disambiguate repeats.
fn local_dirs(paths: &[PathBuf]) -> Vec<LocalDir> {
    let mut dirs: Vec<LocalDir> = Vec::with_capacity(paths.len());
    for path in paths {
        let base = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "local".into());
        let mut name = format!("local:{}", base);
        let mut n = 2;
        while dirs.iter().any(|d| d.name == name) {
            name = format!("local:{}-{}", base, n);
            n += 1;
        }
        dirs.push(LocalDir::new(name, expand_tilde(path)));
    }
    dirs
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::with_template("{spinner:.blue} {msg}") {
        spinner.set_style(
            template.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"# kfed configuration
#
# Sources are merged by priority (0-999, higher wins). Local directories
# passed to `kfed resolve --local` are merged on top at priority 999.

version: "1"

settings:
  cache_root: ~/.cache/kfed
  max_cache_size: 2GB
  # Seconds; a slow sync is reported, never aborted.
  sync_timeout: 300
  retry_attempts: 3
  parallel_sync: true
  # priority | local_wins | manual
  conflict_resolution: priority
  log_level: info
  # Daemon policy evaluation interval.
  poll_interval_secs: 900

sources: {}
# Example:
#
#   company-kb:
#     kind: repository
#     url: https://github.com/acme/kb.git
#     branch: main
#     sync_policy: daily
#     priority: 10
#     auth:
#       type: token
#       token_env: KB_TOKEN
#     filters:
#       include: ["templates/**"]
#       exclude: ["**/draft-*"]
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).context("failed to create config directory")?;
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Register a source: kfed sources add <name> --url <repo-url>");
    println!("  2. Set the referenced environment variables (e.g. KB_TOKEN)");
    println!("  3. Validate with: kfed validate --config {}", output.display());
    println!("  4. Start the daemon: kfed-daemon --config {}", output.display());

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        FederationConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  {}", style::success("Document structure is valid"));

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  {}", style::success("Environment variable references processed"));

    if let Err(e) = config.validate() {
        println!("  {}", style::error(&format!("Validation error: {}", e)));
        anyhow::bail!("configuration validation failed");
    }
    println!("  {}", style::success("All fields are valid"));

    let settings = &config.settings;
    println!();
    println!("{}", style::header("Configuration summary"));
    println!("  Cache root    : {}", settings.cache_root_path().display());
    println!("  Max cache     : {}", settings.max_cache_size);
    println!("  Strategy      : {}", settings.conflict_resolution);
    println!("  Parallel sync : {}", settings.parallel_sync);
    println!("  Poll interval : {}s", settings.poll_interval_secs);
    println!("  Sources       : {}", config.sources.len());

    for source in config.sources.values() {
        let credential = match &source.kind {
            SourceKind::Repository(repo) => match &repo.auth {
                None => "none".to_string(),
                Some(AuthConfig::Ssh { .. }) => "ssh agent".to_string(),
                Some(AuthConfig::Token { token_env, token, .. }) => {
                    format!("{} ({})", token_env, if token.is_some() { "set" } else { "NOT SET" })
                }
                Some(AuthConfig::Basic {
                    password_env,
                    password,
                    ..
                }) => format!(
                    "{} ({})",
                    password_env,
                    if password.is_some() { "set" } else { "NOT SET" }
                ),
            },
            SourceKind::Database(_) | SourceKind::Web(_) => "-".to_string(),
        };
        println!(
            "    {:<20} {:<10} priority {:<4} credential {}",
            source.name,
            source.kind_label(),
            source.priority,
            credential
        );
    }
    println!();
    println!("Configuration is valid.");

    Ok(())
}

async fn cmd_sync(resolver: &FederatedResolver, name: Option<&str>, force: bool) -> Result<()> {
    let report = match name {
        Some(name) => {
            let progress = spinner(format!("Syncing {}...", name));
            let result = resolver.sync_source(name, force).await;
            progress.finish_and_clear();
            BatchSyncReport::from_results(vec![result?])
        }
        None => {
            let progress = spinner(format!(
                "Syncing {} source(s)...",
                resolver.registry().len()
            ));
            let report = resolver.sync_all_repositories(force).await;
            progress.finish_and_clear();
            report
        }
    };

    print_report(&report);
    if report.failed > 0 {
        anyhow::bail!("{} of {} source(s) failed to sync", report.failed, report.total);
    }
    Ok(())
}

fn print_report(report: &BatchSyncReport) {
    println!();
    for result in &report.results {
        println!("  {}", style::sync_line(result));
    }
    println!();
    println!(
        "  {} total, {} successful, {} failed, {} in progress",
        report.total, report.successful, report.failed, report.in_progress
    );
}

async fn cmd_status(resolver: &FederatedResolver, name: Option<&str>) -> Result<()> {
    let statuses = match name {
        Some(name) => vec![resolver.status(name).await?],
        None => resolver.status_all().await,
    };

    println!();
    println!("{}", style::header("kfed status"));
    println!();

    if statuses.is_empty() {
        println!("  {}", style::dim("No sources registered."));
    } else {
        println!("{}", status_table(&statuses));
    }

    let usage = resolver.cache_usage()?;
    let line = format!(
        "Cache {} : {} of {}",
        usage.root.display(),
        style::bytes(usage.bytes),
        style::bytes(usage.limit)
    );
    println!();
    if usage.exceeded() {
        println!("  {}", style::warn(&format!("{} (over limit)", line)));
    } else {
        println!("  {}", line);
    }
    println!();
    Ok(())
}

fn status_table(statuses: &[SourceStatus]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Source", "Kind", "Cache", "Commit", "Last sync", "Next due"]);

    for status in statuses {
        let (cache, commit) = match &status.repository {
            None => ("external".to_string(), "-".to_string()),
            Some(RepoStatus::NotCloned) => ("not cloned".to_string(), "-".to_string()),
            Some(RepoStatus::InvalidRepo) => ("invalid".to_string(), "-".to_string()),
            Some(RepoStatus::Ready(details)) => {
                let mut state = details.branch.clone().unwrap_or_else(|| "detached".into());
                if !details.modified.is_empty() || !details.staged.is_empty() {
                    state.push_str(" (dirty)");
                }
                let commit = details
                    .latest_commit
                    .as_ref()
                    .map(|c| style::short_sha(&c.sha).to_string())
                    .unwrap_or_else(|| "-".into());
                (state, commit)
            }
        };
        let last = status
            .state
            .last_synced_at()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".into());
        let next = if status.syncing {
            "syncing".to_string()
        } else {
            status
                .next_due_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| status.sync_policy.clone())
        };

        table.add_row(vec![
            Cell::new(&status.name),
            Cell::new(status.kind),
            Cell::new(cache),
            Cell::new(commit),
            Cell::new(last),
            Cell::new(next),
        ]);
    }
    table
}

async fn cmd_resolve(
    resolver: &FederatedResolver,
    request: &ResolutionRequest,
    output: Option<&Path>,
) -> Result<()> {
    let progress = spinner("Resolving knowledge...".to_string());
    let resolved = resolver.resolve_knowledge(request).await;
    progress.finish_and_clear();

    if let Some(report) = &resolved.sync {
        if report.total > 0 {
            print_report(report);
        }
    }

    let merged = &resolved.merged;
    let summary = merged.summary();
    println!();
    println!(
        "{}",
        style::header(&format!(
            "Merged {} source(s) with strategy '{}'",
            summary.sources,
            merged.strategy()
        ))
    );
    for category in Category::ALL {
        println!(
            "  {:<10} {}",
            category.label(),
            summary.entries.get(&category).copied().unwrap_or(0)
        );
    }
    println!("  {:<10} {}", "conflicts", summary.conflicts);

    if !merged.conflicts().is_empty() {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Key", "Existing", "Incoming", "Resolution", "Reason"]);
        for record in merged.conflicts() {
            table.add_row(vec![
                Cell::new(&record.key),
                Cell::new(&record.existing_origin),
                Cell::new(&record.incoming_origin),
                Cell::new(style::resolution(record.resolution)),
                Cell::new(&record.reason),
            ]);
        }
        println!();
        println!("{}", table);
    }

    if let Some(path) = output {
        let json =
            serde_json::to_string_pretty(&resolved).context("failed to serialize resolution")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!();
        println!("{}", style::success(&format!("Resolution written to {}", path.display())));
    }
    println!();

    if let Some(report) = &resolved.sync {
        if report.failed > 0 {
            println!(
                "{}",
                style::warn(&format!(
                    "{} source(s) failed to sync; their last cached contents were merged",
                    report.failed
                ))
            );
        }
    }
    Ok(())
}

fn cmd_clean_cache(resolver: &FederatedResolver, name: Option<&str>) -> Result<()> {
    resolver.clean_cache(name)?;
    match name {
        Some(name) => println!("{}", style::success(&format!("Cache for '{}' removed", name))),
        None => println!(
            "{}",
            style::success(&format!(
                "Cache root {} cleared",
                resolver.manager().cache_root().display()
            ))
        ),
    }
    Ok(())
}
