//! Priority-ordered fold of source directories into one knowledge tree.
//!
//! Sources are stable-sorted by priority (highest first) and folded in that
//! order, so the current holder of a key always has a priority at least as
//! high as any later contributor. Each collision is described in the ledger
//! in declaration order: `existing` is the source the caller listed first,
//! `incoming` the one listed later.

use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::deep;
use super::strategy::{decide, ConflictStrategy, Resolution};
use super::tree::{Category, ConflictRecord, KnowledgeEntry, MergedKnowledgeTree, SourceProvenance};
use super::walker::{self, Artifact};
use crate::errors::MergeError;
use crate::file_policy::SourceFilter;
use crate::models::{SourceFilters, MAX_PRIORITY};

/// One directory taking part in a merge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeSource {
    pub name: String,
    pub path: PathBuf,
    pub priority: u16,
    pub is_local: bool,
    pub filters: SourceFilters,
}

impl MergeSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, priority: u16) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            priority,
            is_local: false,
            filters: SourceFilters::default(),
        }
    }

    /// First-party knowledge, at the maximum priority.
    pub fn local(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            is_local: true,
            ..Self::new(name, path, MAX_PRIORITY)
        }
    }

    pub fn with_filters(mut self, filters: SourceFilters) -> Self {
        self.filters = filters;
        self
    }
}

/// Stateless merger configured with a conflict strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct KnowledgeMerger {
    strategy: ConflictStrategy,
}

impl KnowledgeMerger {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Merge `sources` (in declaration order) into a fresh tree.
    ///
    /// Missing source directories and unreadable artifacts are skipped with a
    /// warning; a merge never fails.
    pub fn merge(&self, sources: &[MergeSource]) -> MergedKnowledgeTree {
        let mut order: Vec<(usize, &MergeSource)> = sources.iter().enumerate().collect();
        order.sort_by(|a, b| b.1.priority.cmp(&a.1.priority));

        info!(
            sources = sources.len(),
            strategy = %self.strategy,
            "merging knowledge sources"
        );

        let mut tree = MergedKnowledgeTree::new(self.strategy);
        for (layer, source) in order {
            if !source.path.is_dir() {
                let err = MergeError::SourceMissing(source.path.display().to_string());
                warn!(source = %source.name, error = %err, "skipping source");
                continue;
            }

            let filter = SourceFilter::from(&source.filters);
            let mut artifacts = 0;
            for category in Category::ALL {
                for artifact in walker::collect(&source.path, category, &filter) {
                    artifacts += 1;
                    self.fold(&mut tree, category, source, layer, artifact);
                }
            }

            debug!(source = %source.name, artifacts, "source folded");
            tree.push_source(SourceProvenance {
                name: source.name.clone(),
                path: source.path.clone(),
                priority: source.priority,
                is_local: source.is_local,
                artifacts,
                processed_at: Utc::now(),
            });
        }

        tree.finalize();
        info!(
            entries = tree.summary().total_entries,
            conflicts = tree.summary().conflicts,
            "merge complete"
        );
        tree
    }

    fn fold(
        &self,
        tree: &mut MergedKnowledgeTree,
        category: Category,
        source: &MergeSource,
        layer: usize,
        artifact: Artifact,
    ) {
        let Artifact { key, content } = artifact;
        let new = KnowledgeEntry::new(content, &source.name, source.priority, layer, source.is_local);

        let Some(current) = tree.category(category).get(&key).cloned() else {
            tree.category_mut(category).insert(key, new);
            return;
        };

        let new_is_incoming = new.layer >= current.layer;
        let (existing, incoming) = if new_is_incoming {
            (&current, &new)
        } else {
            (&new, &current)
        };

        if category == Category::Data {
            match deep::merge_documents(&key, &current.content, &new.content) {
                Some(Ok(content)) => {
                    let mut merged_from = if current.merged_from.is_empty() {
                        vec![current.origin.clone()]
                    } else {
                        current.merged_from.clone()
                    };
                    merged_from.push(new.origin.clone());

                    let record = ledger_record(
                        category,
                        &key,
                        existing,
                        incoming,
                        Resolution::Merged,
                        "both sides are structured maps; deep-merged".to_string(),
                    );
                    let entry = KnowledgeEntry {
                        content,
                        merged_from,
                        ..current
                    };
                    debug!(key = %key, "data entries deep-merged");
                    tree.category_mut(category).insert(key, entry);
                    tree.push_conflict(record);
                    return;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "deep merge failed, falling back to strategy");
                }
                None => {}
            }
        }

        let decision = decide(self.strategy, &existing.contender(), &incoming.contender());
        let new_wins = match decision.resolution {
            Resolution::Replace => new_is_incoming,
            Resolution::Keep => !new_is_incoming,
            Resolution::Merged | Resolution::Manual => false,
        };
        debug!(
            category = %category,
            key = %key,
            resolution = %decision.resolution,
            "conflict resolved"
        );

        let record = ledger_record(
            category,
            &key,
            existing,
            incoming,
            decision.resolution,
            decision.reason,
        );
        tree.push_conflict(record);
        if new_wins {
            tree.category_mut(category).insert(key, new);
        }
    }
}

fn ledger_record(
    category: Category,
    key: &str,
    existing: &KnowledgeEntry,
    incoming: &KnowledgeEntry,
    resolution: Resolution,
    reason: String,
) -> ConflictRecord {
    ConflictRecord {
        id: Uuid::new_v4(),
        category,
        key: key.to_string(),
        existing_origin: existing.origin.clone(),
        incoming_origin: incoming.origin.clone(),
        resolution,
        reason,
        timestamp: Utc::now(),
    }
}
