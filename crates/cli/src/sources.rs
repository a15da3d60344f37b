//! `kfed sources` subcommands: list, add and remove registered sources.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use kfed_core::models::{
    AuthConfig, DatabaseSource, RepositorySource, SourceDescriptor, SourceFilters, SourceKind,
    SyncPolicy, WebSource,
};
use kfed_core::registry::SourceRegistry;
use kfed_core::FederatedResolver;

use crate::style;

#[derive(Subcommand, Debug)]
pub enum SourcesAction {
    /// List registered sources.
    List,

    /// Register a source, persist the config and run its first sync.
    Add {
        /// Unique source name (letters, digits, '-', '_', '.').
        name: String,

        /// Repository or web URL. For database sources, the name of the
        /// environment variable holding the connection string.
        #[arg(long)]
        url: String,

        #[arg(long, value_enum, default_value_t = KindArg::Repository)]
        kind: KindArg,

        #[arg(long, default_value = "main")]
        branch: String,

        /// 0..=999, higher wins conflicts.
        #[arg(long, default_value = "0")]
        priority: u16,

        /// daily, weekly, on_demand or manual.
        #[arg(long, default_value = "daily")]
        policy: SyncPolicy,

        /// Explicit cache directory instead of `<cache_root>/<name>`.
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Environment variable holding an access token for the URL.
        #[arg(long)]
        token_env: Option<String>,
    },

    /// Unregister a source and purge its cache.
    Remove {
        name: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum KindArg {
    Repository,
    Database,
    Web,
}

pub async fn run_sources(action: SourcesAction, config_path: &Path) -> Result<()> {
    match action {
        SourcesAction::List => {
            let registry = SourceRegistry::load(config_path).context("failed to load registry")?;
            run_list(&registry);
            Ok(())
        }
        SourcesAction::Add {
            name,
            url,
            kind,
            branch,
            priority,
            policy,
            cache,
            token_env,
        } => {
            let source = build_descriptor(name, url, kind, branch, token_env)
                .with_priority(priority)
                .with_policy(policy);
            let source = match cache {
                Some(path) => source.with_cache(path),
                None => source,
            };
            run_add(config_path, source).await
        }
        SourcesAction::Remove { name } => run_remove(config_path, &name),
    }
}

fn build_descriptor(
    name: String,
    url: String,
    kind: KindArg,
    branch: String,
    token_env: Option<String>,
) -> SourceDescriptor {
    let kind = match kind {
        KindArg::Repository => SourceKind::Repository(RepositorySource {
            url,
            branch,
            auth: token_env.map(|token_env| AuthConfig::Token {
                token_env,
                host_style: None,
                token: None,
            }),
        }),
        KindArg::Database => SourceKind::Database(DatabaseSource {
            connection_env: url,
            query: None,
        }),
        KindArg::Web => SourceKind::Web(WebSource { url }),
    };
    SourceDescriptor {
        name,
        kind,
        local_cache: None,
        sync_policy: SyncPolicy::default(),
        priority: 0,
        filters: SourceFilters::default(),
    }
}

fn run_list(registry: &SourceRegistry) {
    if registry.is_empty() {
        println!();
        println!("{}", style::dim("No sources registered. Add one with 'kfed sources add'."));
        println!();
        return;
    }

    println!();
    println!("{}", style::header(&format!("Sources ({})", registry.len())));
    println!();

    let cache_root = registry.cache_root();
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Name", "Kind", "Location", "Priority", "Policy", "Cache"]);

    for source in registry.list() {
        table.add_row(vec![
            Cell::new(&source.name),
            Cell::new(source.kind_label()),
            Cell::new(source.location()),
            Cell::new(source.priority),
            Cell::new(source.sync_policy),
            Cell::new(source.cache_path(&cache_root).display()),
        ]);
    }

    println!("{}", table);
    println!();
}

async fn run_add(config_path: &Path, source: SourceDescriptor) -> Result<()> {
    let name = source.name.clone();
    let mut resolver =
        FederatedResolver::from_config_file(config_path).context("failed to load registry")?;

    let first_sync = resolver
        .add_source(source)
        .await
        .with_context(|| format!("failed to add source '{}'", name))?;

    println!(
        "{}",
        style::success(&format!(
            "Source '{}' registered in {}",
            name,
            config_path.display()
        ))
    );
    match first_sync {
        Some(result) => {
            println!("{}", style::sync_line(&result));
            if result.is_error() {
                anyhow::bail!("first sync of '{}' failed", name);
            }
        }
        None => println!(
            "  {}",
            style::dim("Not a repository; its cache is filled by an external fetcher.")
        ),
    }
    Ok(())
}

fn run_remove(config_path: &Path, name: &str) -> Result<()> {
    let mut resolver =
        FederatedResolver::from_config_file(config_path).context("failed to load registry")?;
    let removed = resolver
        .remove_source(name)
        .with_context(|| format!("failed to remove source '{}'", name))?;

    println!(
        "{}",
        style::success(&format!("Source '{}' removed and its cache purged", removed.name))
    );
    Ok(())
}
