//! Ephemeral per-source sync state.
//!
//! Never persisted. The table is a cheap clonable handle so the resolver can
//! own it and share it with the sync manager.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncState {
    pub last_synced_at_ms: Option<i64>,
    pub in_progress: bool,
}

impl SyncState {
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at_ms.and_then(DateTime::from_timestamp_millis)
    }
}

/// Shared handle to the state of every source, keyed by source name.
#[derive(Debug, Clone, Default)]
pub struct SyncStateTable {
    inner: Arc<Mutex<HashMap<String, SyncState>>>,
}

/// Clears the `in_progress` flag when dropped.
#[derive(Debug)]
pub struct InProgressGuard {
    table: SyncStateTable,
    source: String,
}

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        if let Some(state) = self.table.entries().get_mut(&self.source) {
            state.in_progress = false;
        }
    }
}

impl SyncStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, SyncState>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, source: &str) -> SyncState {
        self.entries().get(source).copied().unwrap_or_default()
    }

    pub fn last_synced_at(&self, source: &str) -> Option<DateTime<Utc>> {
        self.get(source).last_synced_at()
    }

    pub fn record_success(&self, source: &str, at: DateTime<Utc>) {
        self.entries()
            .entry(source.to_string())
            .or_default()
            .last_synced_at_ms = Some(at.timestamp_millis());
    }

    pub fn clear_timestamp(&self, source: &str) {
        if let Some(state) = self.entries().get_mut(source) {
            state.last_synced_at_ms = None;
        }
    }

    pub fn mark_in_progress(&self, source: &str) -> InProgressGuard {
        self.entries()
            .entry(source.to_string())
            .or_default()
            .in_progress = true;
        InProgressGuard {
            table: self.clone(),
            source: source.to_string(),
        }
    }

    pub fn remove(&self, source: &str) {
        self.entries().remove(source);
    }

    pub fn clear_all(&self) {
        self.entries().clear();
    }

    pub fn snapshot(&self) -> HashMap<String, SyncState> {
        self.entries().clone()
    }
}
