//! Repository synchronization: per-key locking, ephemeral state, policy
//! evaluation and the clone-or-pull manager.

pub mod lock;
pub mod manager;
pub mod policy;
pub mod state;

pub use lock::{LockKey, SyncLease, SyncLocks};
pub use manager::{RepoSyncManager, SyncOptions};
pub use state::{SyncState, SyncStateTable};
