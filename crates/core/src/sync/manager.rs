//! Repository sync manager.
//!
//! Keeps a source's cache directory in step with its remote using
//! clone-or-pull semantics. Each `(location, cache path)` pair is synced by
//! at most one task at a time; concurrent requests get
//! [`SyncOutcome::InProgress`] immediately.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use super::lock::SyncLocks;
use super::policy;
use super::state::SyncStateTable;
use crate::config::Settings;
use crate::errors::SyncError;
use crate::git::remote_url::{inject_credentials, redact_credentials};
use crate::git::{CloneOptions, ResetMode, VersionControl};
use crate::models::{
    CommitInfo, RemoteInfo, RepoDetails, RepoStatus, RepositorySource, SourceDescriptor,
    SourceKind, SyncOperation, SyncOutcome, SyncResult,
};

/// Tunables for [`RepoSyncManager`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Clone attempts before giving up (at least one is always made).
    pub retry_attempts: u32,
    /// Linear backoff step between clone attempts.
    pub retry_backoff: Duration,
    /// Advisory only: longer syncs are logged, never cancelled.
    pub sync_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            sync_timeout: Duration::from_secs(300),
        }
    }
}

impl SyncOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            retry_attempts: settings.retry_attempts,
            sync_timeout: Duration::from_secs(settings.sync_timeout),
            ..Self::default()
        }
    }
}

/// Clone-or-pull sync of repository sources into the cache.
pub struct RepoSyncManager {
    git: Arc<dyn VersionControl>,
    cache_root: PathBuf,
    state: SyncStateTable,
    locks: SyncLocks,
    options: SyncOptions,
}

impl RepoSyncManager {
    pub fn new(
        git: Arc<dyn VersionControl>,
        cache_root: impl Into<PathBuf>,
        state: SyncStateTable,
        options: SyncOptions,
    ) -> Self {
        Self {
            git,
            cache_root: cache_root.into(),
            state,
            locks: SyncLocks::new(),
            options,
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn state(&self) -> &SyncStateTable {
        &self.state
    }

    pub fn cache_path(&self, source: &SourceDescriptor) -> PathBuf {
        source.cache_path(&self.cache_root)
    }

    /// Whether a sync for `source` is currently running.
    pub fn is_syncing(&self, source: &SourceDescriptor) -> bool {
        self.locks
            .is_held(source.location(), &self.cache_path(source))
    }

    /// Sync one source. Never fails: errors become [`SyncOutcome::Error`].
    #[instrument(skip(self, source), fields(source = %source.name))]
    pub async fn sync(&self, source: &SourceDescriptor) -> SyncResult {
        let cache_path = self.cache_path(source);
        let Some(_lease) = self.locks.try_acquire(source.location(), &cache_path) else {
            info!("sync already in progress, rejecting request");
            return SyncResult::new(&source.name, SyncOutcome::InProgress);
        };
        let _running = self.state.mark_in_progress(&source.name);

        let started = Instant::now();
        let outcome = match self.run_sync(source, cache_path).await {
            Ok(outcome) => {
                self.state.record_success(&source.name, Utc::now());
                outcome
            }
            Err(e) => {
                warn!(error = %e, "sync failed");
                SyncOutcome::Error {
                    detail: e.to_string(),
                }
            }
        };

        let elapsed = started.elapsed();
        if elapsed > self.options.sync_timeout {
            warn!(
                elapsed_secs = elapsed.as_secs(),
                timeout_secs = self.options.sync_timeout.as_secs(),
                "sync exceeded the configured timeout"
            );
        } else {
            debug!(elapsed_ms = elapsed.as_millis() as u64, "sync finished");
        }

        SyncResult::new(&source.name, outcome)
    }

    /// Clear the recorded timestamp and sync unconditionally.
    pub async fn force_sync(&self, source: &SourceDescriptor) -> SyncResult {
        info!(source = %source.name, "forcing sync");
        self.state.clear_timestamp(&source.name);
        self.sync(source).await
    }

    /// Policy check against the recorded last-sync time.
    pub fn should_sync(&self, source: &SourceDescriptor, now: DateTime<Utc>) -> bool {
        policy::should_sync(
            source.sync_policy,
            self.state.last_synced_at(&source.name),
            now,
        )
    }

    /// Remove one source's cache (`Some`) or the whole cache root (`None`).
    ///
    /// Refuses while a sync holds the affected key, or any key for `None`.
    pub fn clean_cache(&self, source: Option<&SourceDescriptor>) -> Result<(), SyncError> {
        match source {
            Some(source) => {
                let path = self.cache_path(source);
                let Some(lease) = self.locks.try_acquire(source.location(), &path) else {
                    warn!(source = %source.name, "sync in progress, cache left in place");
                    return Err(SyncError::InProgress {
                        source_name: source.name.clone(),
                    });
                };
                if path.exists() {
                    std::fs::remove_dir_all(&path)?;
                }
                self.state.remove(&source.name);
                drop(lease);
                self.locks.prune(source.location(), &path);
                info!(source = %source.name, path = %path.display(), "source cache removed");
            }
            None => {
                let Some(_all) = self.locks.try_acquire_all() else {
                    warn!("syncs in progress, cache root left in place");
                    return Err(SyncError::CacheBusy);
                };
                if self.cache_root.exists() {
                    std::fs::remove_dir_all(&self.cache_root)?;
                }
                std::fs::create_dir_all(&self.cache_root)?;
                self.state.clear_all();
                self.locks.prune_idle();
                info!(path = %self.cache_root.display(), "cache root reset");
            }
        }
        Ok(())
    }

    /// Number of lock keys tracked by this manager.
    pub fn lock_slots(&self) -> usize {
        self.locks.slot_count()
    }

    /// Read-only inspection of a cache directory.
    pub async fn status(&self, cache_path: &Path) -> RepoStatus {
        let git = Arc::clone(&self.git);
        let path = cache_path.to_path_buf();
        tokio::task::spawn_blocking(move || inspect(git.as_ref(), &path))
            .await
            .unwrap_or(RepoStatus::InvalidRepo)
    }

    async fn run_sync(
        &self,
        source: &SourceDescriptor,
        cache_path: PathBuf,
    ) -> Result<SyncOutcome, SyncError> {
        let repo = match &source.kind {
            SourceKind::Repository(repo) => repo.clone(),
            SourceKind::Database(_) | SourceKind::Web(_) => {
                return Err(SyncError::UnsupportedKind {
                    source_name: source.name.clone(),
                    kind: source.kind_label().to_string(),
                })
            }
        };

        let remote_url = match &repo.auth {
            Some(auth) => inject_credentials(&repo.url, auth).map_err(|detail| {
                SyncError::MissingCredential {
                    source_name: source.name.clone(),
                    detail,
                }
            })?,
            None => repo.url.clone(),
        };

        let git = Arc::clone(&self.git);
        let options = self.options.clone();
        tokio::task::spawn_blocking(move || {
            sync_blocking(git.as_ref(), &repo, &remote_url, &cache_path, &options)
        })
        .await
        .map_err(|e| SyncError::TaskFailed(e.to_string()))?
    }
}

fn sync_blocking(
    git: &dyn VersionControl,
    repo: &RepositorySource,
    remote_url: &str,
    cache_path: &Path,
    options: &SyncOptions,
) -> Result<SyncOutcome, SyncError> {
    if !cache_path.exists() || is_empty_dir(cache_path)? {
        clone_with_retry(git, repo, remote_url, cache_path, options)?;
        return Ok(SyncOutcome::Success {
            operation: SyncOperation::Clone,
            commit: latest_commit(git, cache_path),
            warning: None,
        });
    }

    // Credential-bearing URLs are fetched anonymously so the secret never
    // lands in the cache's git config.
    let pull_remote = if remote_url == repo.url {
        "origin"
    } else {
        remote_url
    };

    match checkout_and_pull(git, cache_path, &repo.branch, pull_remote) {
        Ok(()) => Ok(SyncOutcome::Success {
            operation: SyncOperation::Pull,
            commit: latest_commit(git, cache_path),
            warning: None,
        }),
        Err(first) => {
            let target = format!("origin/{}", repo.branch);
            warn!(
                path = %cache_path.display(),
                error = %first,
                target = %target,
                "pull failed, hard-resetting cache to the remote tip"
            );
            git.reset(cache_path, ResetMode::Hard, &target)?;
            checkout_and_pull(git, cache_path, &repo.branch, pull_remote)?;
            Ok(SyncOutcome::Success {
                operation: SyncOperation::ResetAndPull,
                commit: latest_commit(git, cache_path),
                warning: Some(format!(
                    "pull failed ({}); local changes in the cache were discarded by a hard reset to {}",
                    first, target
                )),
            })
        }
    }
}

fn checkout_and_pull(
    git: &dyn VersionControl,
    path: &Path,
    branch: &str,
    remote: &str,
) -> Result<(), SyncError> {
    if git.current_branch(path)?.as_deref() != Some(branch) {
        git.checkout(path, branch)?;
    }
    git.pull(path, remote, branch)?;
    Ok(())
}

fn clone_with_retry(
    git: &dyn VersionControl,
    repo: &RepositorySource,
    remote_url: &str,
    cache_path: &Path,
    options: &SyncOptions,
) -> Result<(), SyncError> {
    let clone_opts = CloneOptions::shallow(repo.branch.clone()).with_origin_url(repo.url.clone());
    let attempts = options.retry_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        if cache_path.exists() {
            std::fs::remove_dir_all(cache_path)?;
        }
        if let Some(parent) = cache_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!(
            url = %redact_credentials(remote_url),
            path = %cache_path.display(),
            attempt,
            "cloning source"
        );
        match git.clone_repo(remote_url, cache_path, &clone_opts) {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(attempt, attempts, error = %e, "clone attempt failed");
                last_error = Some(e);
                if attempt < attempts {
                    std::thread::sleep(options.retry_backoff * attempt);
                }
            }
        }
    }

    if cache_path.exists() {
        std::fs::remove_dir_all(cache_path)?;
    }
    match last_error {
        Some(e) => Err(e.into()),
        None => Err(SyncError::TaskFailed("clone was never attempted".into())),
    }
}

fn latest_commit(git: &dyn VersionControl, path: &Path) -> Option<CommitInfo> {
    git.log(path, 1).ok().and_then(|mut commits| commits.pop())
}

fn is_empty_dir(path: &Path) -> Result<bool, SyncError> {
    if !path.is_dir() {
        return Ok(false);
    }
    Ok(std::fs::read_dir(path)?.next().is_none())
}

fn inspect(git: &dyn VersionControl, path: &Path) -> RepoStatus {
    if !path.exists() {
        return RepoStatus::NotCloned;
    }
    if !git.is_repository(path) {
        return RepoStatus::InvalidRepo;
    }
    let tree = match git.status(path) {
        Ok(tree) => tree,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "status failed");
            return RepoStatus::InvalidRepo;
        }
    };
    let remotes = git
        .remotes(path)
        .unwrap_or_default()
        .into_iter()
        .map(|r| RemoteInfo {
            url: redact_credentials(&r.url),
            name: r.name,
        })
        .collect();

    RepoStatus::Ready(RepoDetails {
        branch: tree.branch,
        ahead: tree.ahead,
        behind: tree.behind,
        modified: tree.modified,
        staged: tree.staged,
        latest_commit: latest_commit(git, path),
        remotes,
    })
}
