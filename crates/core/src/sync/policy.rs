//! Sync policy evaluation. Pure functions of (policy, last sync, now).

use chrono::{DateTime, Duration, Utc};

use crate::models::SyncPolicy;

/// Refresh interval for automatically synced policies.
pub fn interval(policy: SyncPolicy) -> Option<Duration> {
    match policy {
        SyncPolicy::Daily => Some(Duration::hours(24)),
        SyncPolicy::Weekly => Some(Duration::days(7)),
        SyncPolicy::OnDemand | SyncPolicy::Manual => None,
    }
}

/// Whether an automatic trigger should sync a source now.
///
/// `on_demand` and `manual` sources are never due; only an explicit or
/// forced sync refreshes them.
pub fn should_sync(
    policy: SyncPolicy,
    last_synced_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let Some(every) = interval(policy) else {
        return false;
    };
    match last_synced_at {
        None => true,
        Some(last) => now - last >= every,
    }
}

/// When the source next becomes due. `None` for never-due policies; a
/// never-synced source is due immediately (returns `now`).
pub fn next_due_at(
    policy: SyncPolicy,
    last_synced_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let every = interval(policy)?;
    Some(last_synced_at.map(|last| last + every).unwrap_or(now))
}
