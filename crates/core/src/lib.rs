//! kfed core library.
//!
//! This crate provides the foundational components for federated knowledge
//! sync and merge: configuration, the source registry, the repository sync
//! manager, the priority-based knowledge merger and the federated resolver
//! that composes them.

pub mod config;
pub mod errors;
pub mod file_policy;
pub mod git;
pub mod merge;
pub mod models;
pub mod registry;
pub mod resolver;
pub mod sync;

// Re-exports for convenience.
pub use config::FederationConfig;
pub use merge::{KnowledgeMerger, MergedKnowledgeTree};
pub use registry::SourceRegistry;
pub use resolver::FederatedResolver;
pub use sync::RepoSyncManager;
