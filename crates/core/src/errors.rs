//! Error types for the kfed core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Merge(#[from] MergeError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading, validation and persistence.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// YAML / TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// The document could not be serialized back to disk.
    #[error("configuration serialize error: {0}")]
    SerializeError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading or writing the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Registry errors
// ---------------------------------------------------------------------------

/// Errors from the source registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A source with this name is already registered.
    #[error("source '{0}' is already registered")]
    DuplicateSource(String),

    /// No source with this name is registered.
    #[error("source '{0}' is not registered")]
    UnknownSource(String),

    /// Two sources would share (or nest) a cache directory.
    #[error("cache path '{path}' of source '{source_name}' overlaps the cache of source '{other}'")]
    CachePathOverlap {
        source_name: String,
        other: String,
        path: String,
    },

    /// The descriptor or persisted document is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from local Git (git2) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// The local branch and the remote branch have diverged.
    #[error("cannot fast-forward branch '{branch}': local and remote histories have diverged")]
    NonFastForward { branch: String },

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Errors from the repository sync manager.
///
/// These never escape [`crate::sync::RepoSyncManager::sync`]; they are
/// rendered into the error outcome of a [`crate::models::SyncResult`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// The source kind has no repository to clone or pull.
    #[error("source '{source_name}' is a {kind} source and is refreshed by an external fetcher")]
    UnsupportedKind { source_name: String, kind: String },

    /// A required credential could not be resolved.
    #[error("missing credential for source '{source_name}': {detail}")]
    MissingCredential { source_name: String, detail: String },

    /// Underlying Git error during sync.
    #[error("sync git error: {0}")]
    GitError(#[from] GitError),

    /// Cache directory I/O failure.
    #[error("sync cache I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A sync holds the source's cache, so it cannot be removed now.
    #[error("source '{source_name}' is being synced; retry once it finishes")]
    InProgress { source_name: String },

    /// Syncs are running, so the cache root cannot be reset.
    #[error("cache root is in use by a running sync")]
    CacheBusy,

    /// The blocking git task panicked or was cancelled.
    #[error("sync task failed: {0}")]
    TaskFailed(String),
}

// ---------------------------------------------------------------------------
// Merge errors
// ---------------------------------------------------------------------------

/// Errors from the knowledge merger.
///
/// The merger is best-effort: these are logged and the offending source or
/// artifact skipped.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The source root does not exist.
    #[error("source path not found: {0}")]
    SourceMissing(String),

    /// An artifact could not be read.
    #[error("failed to read artifact '{path}': {detail}")]
    ReadFailed { path: String, detail: String },

    /// Structured content could not be serialized back to text.
    #[error("failed to serialize merged content for '{key}': {detail}")]
    SerializeFailed { key: String, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = GitError::RepositoryNotFound("/tmp/repo".into());
        assert_eq!(err.to_string(), "git repository not found at '/tmp/repo'");

        let err = GitError::NonFastForward {
            branch: "main".into(),
        };
        assert!(err.to_string().contains("diverged"));

        let err = SyncError::InProgress {
            source_name: "kb".into(),
        };
        assert_eq!(err.to_string(), "source 'kb' is being synced; retry once it finishes");

        let err = RegistryError::CachePathOverlap {
            source_name: "a".into(),
            other: "b".into(),
            path: "/cache/b".into(),
        };
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let git_err = GitError::RefNotFound("origin/main".into());
        let core_err: CoreError = git_err.into();
        assert!(matches!(core_err, CoreError::Git(_)));

        let reg_err = RegistryError::UnknownSource("kb".into());
        let core_err: CoreError = reg_err.into();
        assert!(matches!(core_err, CoreError::Registry(_)));
    }
}
