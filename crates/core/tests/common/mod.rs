//! Shared helpers: a scripted in-memory `VersionControl` and source builders.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kfed_core::config::FederationConfig;
use kfed_core::errors::GitError;
use kfed_core::git::{CloneOptions, ResetMode, VersionControl};
use kfed_core::models::{CommitInfo, RemoteInfo, WorkingTreeStatus};
use kfed_core::registry::SourceRegistry;
use kfed_core::sync::SyncOptions;

/// Fake git: a "remote" is a URL mapped to a set of files. Cloning writes
/// the files plus a `.git` marker directory; pulling rewrites them. The
/// checked-out branch lives in `.git/HEAD`.
#[derive(Default)]
pub struct FakeGit {
    remotes: Mutex<HashMap<String, Vec<(String, String)>>>,
    broken_urls: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    clone_options: Mutex<Vec<CloneOptions>>,
    pub clone_delay: Duration,
    pub failing_clones: AtomicUsize,
    pub failing_pulls: AtomicUsize,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            clone_delay: delay,
            ..Self::default()
        }
    }

    pub fn set_remote(&self, url: &str, files: &[(&str, &str)]) {
        self.remotes.lock().unwrap().insert(
            url.to_string(),
            files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
        );
    }

    /// Every clone and pull of `url` fails.
    pub fn break_url(&self, url: &str) {
        self.broken_urls.lock().unwrap().insert(url.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(op)).count()
    }

    pub fn clone_options(&self) -> Vec<CloneOptions> {
        self.clone_options.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn write_files(&self, url: &str, path: &Path) -> Result<(), GitError> {
        let files = self
            .remotes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_default();
        for (rel, content) in files {
            let target = path.join(rel);
            std::fs::create_dir_all(target.parent().unwrap())?;
            std::fs::write(target, content)?;
        }
        Ok(())
    }

    fn head_of(path: &Path) -> Option<String> {
        std::fs::read_to_string(path.join(".git").join("HEAD")).ok()
    }

    fn origin_of(path: &Path) -> String {
        std::fs::read_to_string(path.join(".git").join("origin")).unwrap_or_default()
    }
}

impl VersionControl for FakeGit {
    fn clone_repo(&self, url: &str, path: &Path, options: &CloneOptions) -> Result<(), GitError> {
        self.record(format!("clone {}", url));
        self.clone_options.lock().unwrap().push(options.clone());
        std::thread::sleep(self.clone_delay);

        if self.broken_urls.lock().unwrap().contains(url) || Self::take_failure(&self.failing_clones) {
            // Leave a partial directory behind, as an interrupted clone would.
            std::fs::create_dir_all(path)?;
            std::fs::write(path.join("partial"), "x")?;
            return Err(GitError::RefNotFound("origin/main".into()));
        }

        std::fs::create_dir_all(path.join(".git"))?;
        let origin = options.origin_url.clone().unwrap_or_else(|| url.to_string());
        std::fs::write(path.join(".git").join("origin"), origin)?;
        let branch = options.branch.as_deref().unwrap_or("main");
        std::fs::write(path.join(".git").join("HEAD"), branch)?;
        self.write_files(url, path)
    }

    fn pull(&self, path: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        self.record(format!("pull {} {}", remote, branch));
        let url = if remote == "origin" {
            Self::origin_of(path)
        } else {
            remote.to_string()
        };
        if self.broken_urls.lock().unwrap().contains(&url) || Self::take_failure(&self.failing_pulls) {
            return Err(GitError::NonFastForward {
                branch: branch.to_string(),
            });
        }
        self.write_files(&url, path)
    }

    fn checkout(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        self.record(format!("checkout {}", branch));
        std::fs::write(path.join(".git").join("HEAD"), branch)?;
        Ok(())
    }

    fn reset(&self, _path: &Path, mode: ResetMode, reference: &str) -> Result<(), GitError> {
        self.record(format!("reset {:?} {}", mode, reference));
        Ok(())
    }

    fn log(&self, _path: &Path, limit: usize) -> Result<Vec<CommitInfo>, GitError> {
        Ok(vec![CommitInfo {
            sha: "0123456789abcdef0123456789abcdef01234567".into(),
            message: "update knowledge".into(),
            author_name: "Kb Bot".into(),
            author_email: "bot@example.com".into(),
            author_time: 1_750_000_000,
        }]
        .into_iter()
        .take(limit)
        .collect())
    }

    fn status(&self, path: &Path) -> Result<WorkingTreeStatus, GitError> {
        Ok(WorkingTreeStatus {
            branch: Self::head_of(path),
            ..WorkingTreeStatus::default()
        })
    }

    fn remotes(&self, path: &Path) -> Result<Vec<RemoteInfo>, GitError> {
        Ok(vec![RemoteInfo {
            name: "origin".into(),
            url: Self::origin_of(path),
        }])
    }

    fn rev_parse(&self, _path: &Path, _spec: &str) -> Result<String, GitError> {
        Ok("0123456789abcdef0123456789abcdef01234567".into())
    }

    fn current_branch(&self, path: &Path) -> Result<Option<String>, GitError> {
        Ok(Self::head_of(path))
    }

    fn is_repository(&self, path: &Path) -> bool {
        path.join(".git").is_dir()
    }
}

/// Sync options without backoff delays.
pub fn fast_options() -> SyncOptions {
    SyncOptions {
        retry_attempts: 3,
        retry_backoff: Duration::ZERO,
        sync_timeout: Duration::from_secs(60),
    }
}

/// Registry backed by `<dir>/config.yaml` with its cache under `<dir>/cache`.
pub fn registry_in(dir: &Path, parallel: bool) -> SourceRegistry {
    let mut config = FederationConfig::default();
    config.settings.cache_root = dir.join("cache");
    config.settings.parallel_sync = parallel;
    let path = dir.join("config.yaml");
    config.save_to_file(&path).unwrap();
    SourceRegistry::from_config(config, Some(path))
}

pub fn cache_dir(dir: &Path, source: &str) -> PathBuf {
    dir.join("cache").join(source)
}

pub fn shared(git: FakeGit) -> Arc<FakeGit> {
    Arc::new(git)
}
