//! Knowledge merging: artifact discovery, conflict strategies, structural
//! merge of data artifacts and the resulting knowledge tree.

pub mod deep;
pub mod merger;
pub mod strategy;
pub mod tree;
pub mod walker;

pub use merger::{KnowledgeMerger, MergeSource};
pub use strategy::{ConflictStrategy, Resolution};
pub use tree::{
    Category, ConflictRecord, KnowledgeEntry, MergeSummary, MergedKnowledgeTree, SourceProvenance,
};
