//! Federated resolver: sync every registered source, add local knowledge at
//! the top priority and merge everything into one tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::errors::{CoreError, RegistryError, SyncError};
use crate::git::{GitClient, VersionControl};
use crate::merge::{ConflictStrategy, KnowledgeMerger, MergeSource, MergedKnowledgeTree};
use crate::models::{
    BatchSyncReport, RepoStatus, SourceDescriptor, SourceKind, SyncOutcome, SyncResult,
    MAX_PRIORITY,
};
use crate::registry::SourceRegistry;
use crate::sync::{policy, RepoSyncManager, SyncOptions, SyncState, SyncStateTable};

/// A first-party knowledge directory added on top of the registered sources.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDir {
    pub name: String,
    pub path: PathBuf,
    /// Defaults to the maximum priority.
    pub priority: Option<u16>,
}

impl LocalDir {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            priority: None,
        }
    }
}

/// Parameters of one resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolutionRequest {
    /// Sync every repository source, ignoring policies.
    pub force_sync: bool,
    /// Merge whatever is cached without touching the network.
    pub skip_sync: bool,
    pub local_dirs: Vec<LocalDir>,
    /// Overrides `settings.conflict_resolution`.
    pub strategy: Option<ConflictStrategy>,
}

/// Output of [`FederatedResolver::resolve_knowledge`].
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedKnowledge {
    pub sources: Vec<MergeSource>,
    /// Sync phase report; `None` when syncing was skipped.
    pub sync: Option<BatchSyncReport>,
    pub merged: MergedKnowledgeTree,
    pub resolved_at: DateTime<Utc>,
}

/// Per-source status for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub kind: &'static str,
    pub priority: u16,
    pub sync_policy: String,
    pub cache_path: PathBuf,
    /// `None` for sources that are not git repositories.
    pub repository: Option<RepoStatus>,
    pub state: SyncState,
    pub syncing: bool,
    pub next_due_at: Option<DateTime<Utc>>,
}

/// Disk usage of the cache root.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheUsage {
    pub root: PathBuf,
    pub bytes: u64,
    pub limit: u64,
}

impl CacheUsage {
    pub fn exceeded(&self) -> bool {
        self.bytes > self.limit
    }
}

/// Orchestrates the registry, the sync manager and the merger.
///
/// Registry mutations take `&mut self`; callers serialize them.
pub struct FederatedResolver {
    registry: SourceRegistry,
    manager: Arc<RepoSyncManager>,
}

impl FederatedResolver {
    pub fn new(registry: SourceRegistry, git: Arc<dyn VersionControl>) -> Self {
        let options = SyncOptions::from_settings(registry.settings());
        Self::with_options(registry, git, options)
    }

    pub fn with_options(
        registry: SourceRegistry,
        git: Arc<dyn VersionControl>,
        options: SyncOptions,
    ) -> Self {
        let manager = RepoSyncManager::new(
            git,
            registry.cache_root(),
            SyncStateTable::new(),
            options,
        );
        Self {
            registry,
            manager: Arc::new(manager),
        }
    }

    /// Load the document at `path` and use the `git2` client.
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let registry = SourceRegistry::load(path)?;
        Ok(Self::new(registry, Arc::new(GitClient::new())))
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn manager(&self) -> &RepoSyncManager {
        &self.manager
    }

    pub fn state(&self) -> &SyncStateTable {
        self.manager.state()
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    /// Sync one registered source.
    pub async fn sync_source(&self, name: &str, force: bool) -> Result<SyncResult, RegistryError> {
        let source = self.registry.require(name)?;
        Ok(if force {
            self.manager.force_sync(source).await
        } else {
            self.manager.sync(source).await
        })
    }

    /// Sync every repository source, regardless of policy.
    pub async fn sync_all_repositories(&self, force: bool) -> BatchSyncReport {
        let sources: Vec<SourceDescriptor> = self
            .registry
            .list()
            .into_iter()
            .filter(|s| s.as_repository().is_some())
            .cloned()
            .collect();
        self.run_batch(sources, force).await
    }

    /// Sync repository sources whose policy says they are due, plus any whose
    /// cache has never been populated.
    pub async fn sync_due(&self) -> BatchSyncReport {
        let now = Utc::now();
        let due: Vec<SourceDescriptor> = self
            .registry
            .list()
            .into_iter()
            .filter(|s| s.as_repository().is_some())
            .filter(|s| {
                self.manager.should_sync(s, now) || !self.manager.cache_path(s).exists()
            })
            .cloned()
            .collect();
        debug!(due = due.len(), "evaluated sync policies");
        self.run_batch(due, false).await
    }

    async fn run_batch(&self, sources: Vec<SourceDescriptor>, force: bool) -> BatchSyncReport {
        let parallel = self.registry.settings().parallel_sync;
        info!(sources = sources.len(), parallel, force, "starting batch sync");

        let mut results = Vec::with_capacity(sources.len());
        if parallel {
            let handles: Vec<_> = sources
                .into_iter()
                .map(|source| {
                    let manager = Arc::clone(&self.manager);
                    let name = source.name.clone();
                    let handle = tokio::spawn(async move {
                        if force {
                            manager.force_sync(&source).await
                        } else {
                            manager.sync(&source).await
                        }
                    });
                    (name, handle)
                })
                .collect();

            // Awaited in registry order, so results keep that order.
            for (name, handle) in handles {
                match handle.await {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        warn!(source = %name, error = %e, "sync task failed");
                        results.push(SyncResult::new(
                            name,
                            SyncOutcome::Error {
                                detail: format!("sync task failed: {}", e),
                            },
                        ));
                    }
                }
            }
        } else {
            for source in &sources {
                let result = if force {
                    self.manager.force_sync(source).await
                } else {
                    self.manager.sync(source).await
                };
                results.push(result);
            }
        }

        let report = BatchSyncReport::from_results(results);
        info!(
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            in_progress = report.in_progress,
            "batch sync finished"
        );
        report
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Sync (unless skipped), then merge cached sources and local dirs.
    pub async fn resolve_knowledge(&self, request: &ResolutionRequest) -> ResolvedKnowledge {
        let sync = if request.skip_sync {
            None
        } else if request.force_sync {
            Some(self.sync_all_repositories(true).await)
        } else {
            Some(self.sync_due().await)
        };

        let sources = self.merge_sources(&request.local_dirs);
        let strategy = request
            .strategy
            .unwrap_or(self.registry.settings().conflict_resolution);
        let merged = KnowledgeMerger::new(strategy).merge(&sources);

        ResolvedKnowledge {
            sources,
            sync,
            merged,
            resolved_at: Utc::now(),
        }
    }

    /// Registered sources with a populated cache, then local dirs.
    pub fn merge_sources(&self, local_dirs: &[LocalDir]) -> Vec<MergeSource> {
        let mut sources = Vec::new();
        for source in self.registry.list() {
            let path = self.manager.cache_path(source);
            if !path.is_dir() {
                debug!(source = %source.name, "cache not populated, leaving out of merge");
                continue;
            }
            sources.push(
                MergeSource::new(&source.name, path, source.priority)
                    .with_filters(source.filters.clone()),
            );
        }
        for local in local_dirs {
            let mut merge_source = MergeSource::local(&local.name, &local.path);
            merge_source.priority = local.priority.unwrap_or(MAX_PRIORITY);
            sources.push(merge_source);
        }
        sources
    }

    // -----------------------------------------------------------------------
    // Registry mutation
    // -----------------------------------------------------------------------

    /// Register, persist, then immediately sync the new source.
    ///
    /// Returns the first sync result for repository sources.
    pub async fn add_source(
        &mut self,
        source: SourceDescriptor,
    ) -> Result<Option<SyncResult>, CoreError> {
        let name = source.name.clone();
        self.registry.add(source)?;
        self.registry.persist()?;

        let source = self.registry.require(&name)?;
        match source.kind {
            SourceKind::Repository(_) => Ok(Some(self.manager.sync(source).await)),
            SourceKind::Database(_) | SourceKind::Web(_) => Ok(None),
        }
    }

    /// Unregister, persist, and purge the source's cache and sync state.
    ///
    /// A source whose sync is running is left registered.
    pub fn remove_source(&mut self, name: &str) -> Result<SourceDescriptor, CoreError> {
        let source = self.registry.require(name)?;
        if self.manager.is_syncing(source) {
            return Err(SyncError::InProgress {
                source_name: source.name.clone(),
            }
            .into());
        }
        let removed = self.registry.remove(name)?;
        self.registry.persist()?;
        self.manager.clean_cache(Some(&removed))?;
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Inspection and maintenance
    // -----------------------------------------------------------------------

    pub async fn status(&self, name: &str) -> Result<SourceStatus, RegistryError> {
        let source = self.registry.require(name)?;
        Ok(self.source_status(source).await)
    }

    pub async fn status_all(&self) -> Vec<SourceStatus> {
        let mut statuses = Vec::with_capacity(self.registry.len());
        for source in self.registry.list() {
            statuses.push(self.source_status(source).await);
        }
        statuses
    }

    async fn source_status(&self, source: &SourceDescriptor) -> SourceStatus {
        let cache_path = self.manager.cache_path(source);
        let repository = match source.kind {
            SourceKind::Repository(_) => Some(self.manager.status(&cache_path).await),
            SourceKind::Database(_) | SourceKind::Web(_) => None,
        };
        let state = self.state().get(&source.name);
        SourceStatus {
            name: source.name.clone(),
            kind: source.kind_label(),
            priority: source.priority,
            sync_policy: source.sync_policy.to_string(),
            cache_path,
            repository,
            syncing: self.manager.is_syncing(source),
            next_due_at: policy::next_due_at(source.sync_policy, state.last_synced_at(), Utc::now()),
            state,
        }
    }

    /// Clean one source's cache, or the whole cache root.
    pub fn clean_cache(&self, name: Option<&str>) -> Result<(), CoreError> {
        match name {
            Some(name) => {
                let source = self.registry.require(name)?;
                self.manager.clean_cache(Some(source))?;
            }
            None => self.manager.clean_cache(None)?,
        }
        Ok(())
    }

    /// Bytes stored under the cache root against `max_cache_size`.
    pub fn cache_usage(&self) -> Result<CacheUsage, CoreError> {
        let root = self.manager.cache_root().to_path_buf();
        let limit = self.registry.settings().max_cache_bytes()?;
        let bytes = WalkDir::new(&root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum();

        let usage = CacheUsage { root, bytes, limit };
        if usage.exceeded() {
            warn!(bytes, limit, "cache exceeds max_cache_size");
        }
        Ok(usage)
    }
}
