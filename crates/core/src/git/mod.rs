//! Version-control capability used by the sync manager.
//!
//! The engine never shells out: every git operation goes through the
//! [`VersionControl`] trait. [`GitClient`] is the `git2` implementation.

pub mod client;
pub mod remote_url;

use std::path::Path;

pub use client::GitClient;

use crate::errors::GitError;
use crate::models::{CommitInfo, RemoteInfo, WorkingTreeStatus};

/// Options for [`VersionControl::clone_repo`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloneOptions {
    /// Branch to check out after cloning. `None` uses the remote HEAD.
    pub branch: Option<String>,
    /// History depth. `None` clones the full history.
    pub depth: Option<u32>,
    /// Only fetch `branch` (requires `branch`).
    pub single_branch: bool,
    /// URL recorded for `origin` after the clone. Lets callers clone through
    /// a credential-bearing URL without persisting the secret.
    pub origin_url: Option<String>,
}

impl CloneOptions {
    /// Shallow, single-branch clone of `branch`.
    pub fn shallow(branch: impl Into<String>) -> Self {
        Self {
            branch: Some(branch.into()),
            depth: Some(1),
            single_branch: true,
            origin_url: None,
        }
    }

    pub fn with_origin_url(mut self, url: impl Into<String>) -> Self {
        self.origin_url = Some(url.into());
        self
    }
}

/// Reset flavours, mirroring `git reset --soft|--mixed|--hard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    Soft,
    Mixed,
    Hard,
}

/// Path-addressed git operations.
///
/// Implementations must be usable from blocking worker threads, hence
/// `Send + Sync`; all methods block.
pub trait VersionControl: Send + Sync {
    fn clone_repo(&self, url: &str, path: &Path, options: &CloneOptions) -> Result<(), GitError>;

    /// Fetch `branch` from `remote` (a remote name or URL) and fast-forward
    /// the local branch. Diverged histories fail with
    /// [`GitError::NonFastForward`].
    fn pull(&self, path: &Path, remote: &str, branch: &str) -> Result<(), GitError>;

    /// Switch to `branch`, creating it from `origin/<branch>` if needed.
    fn checkout(&self, path: &Path, branch: &str) -> Result<(), GitError>;

    fn reset(&self, path: &Path, mode: ResetMode, reference: &str) -> Result<(), GitError>;

    /// Up to `limit` commits reachable from HEAD, newest first.
    fn log(&self, path: &Path, limit: usize) -> Result<Vec<CommitInfo>, GitError>;

    fn status(&self, path: &Path) -> Result<WorkingTreeStatus, GitError>;

    fn remotes(&self, path: &Path) -> Result<Vec<RemoteInfo>, GitError>;

    /// Resolve `spec` to a full object id.
    fn rev_parse(&self, path: &Path, spec: &str) -> Result<String, GitError>;

    /// Current branch name; `None` when HEAD is detached.
    fn current_branch(&self, path: &Path) -> Result<Option<String>, GitError>;

    fn is_repository(&self, path: &Path) -> bool;
}
