//! The merged knowledge tree returned by a merge.
//!
//! A tree is built by the merger and handed out as an immutable snapshot:
//! its fields are private and only read accessors are public.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::strategy::{ConflictStrategy, Contender, Resolution};

/// Artifact category, each with a fixed root directory inside a source.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Templates,
    Workflows,
    Data,
    Configs,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Templates,
        Category::Workflows,
        Category::Data,
        Category::Configs,
    ];

    /// Directory under the source root holding this category.
    pub fn root_dir(self) -> &'static str {
        match self {
            Self::Templates => "templates",
            Self::Workflows => "workflows",
            Self::Data => "data",
            Self::Configs => "config",
        }
    }

    /// Recognized file extensions (lower case, no dot).
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Templates => &["md", "txt", "yaml", "yml", "json", "hbs", "tmpl", "j2"],
            Self::Workflows => &["yaml", "yml", "json", "md"],
            Self::Data => &["json", "yaml", "yml"],
            Self::Configs => &["yaml", "yml", "json", "toml"],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Templates => "templates",
            Self::Workflows => "workflows",
            Self::Data => "data",
            Self::Configs => "configs",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One artifact in a category map.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct KnowledgeEntry {
    pub content: String,
    pub origin: String,
    pub priority: u16,
    /// Contributors of a deep-merged entry, in merge order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub merged_from: Vec<String>,

    /// Declaration index of the winning source.
    #[serde(skip)]
    pub(crate) layer: usize,
    #[serde(skip)]
    pub(crate) is_local: bool,
}

impl KnowledgeEntry {
    pub(crate) fn new(
        content: String,
        origin: &str,
        priority: u16,
        layer: usize,
        is_local: bool,
    ) -> Self {
        Self {
            content,
            origin: origin.to_string(),
            priority,
            merged_from: Vec::new(),
            layer,
            is_local,
        }
    }

    pub(crate) fn contender(&self) -> Contender<'_> {
        Contender {
            origin: &self.origin,
            priority: self.priority,
            is_local: self.is_local,
        }
    }
}

/// Provenance of one processed source, in processing order.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceProvenance {
    pub name: String,
    pub path: PathBuf,
    pub priority: u16,
    pub is_local: bool,
    pub artifacts: usize,
    pub processed_at: DateTime<Utc>,
}

/// One ledger entry.
///
/// `existing_origin` is the contribution of the source declared earlier in
/// the merge request, `incoming_origin` the one declared later.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConflictRecord {
    pub id: Uuid,
    pub category: Category,
    pub key: String,
    pub existing_origin: String,
    pub incoming_origin: String,
    pub resolution: Resolution,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Reporting counts. Never influences the merge itself.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MergeSummary {
    pub sources: usize,
    pub entries: BTreeMap<Category, usize>,
    pub total_entries: usize,
    pub conflicts: usize,
    pub resolutions: BTreeMap<Resolution, usize>,
}

/// Result of a merge.
#[derive(Debug, Clone, Serialize)]
pub struct MergedKnowledgeTree {
    strategy: ConflictStrategy,
    merged_at: DateTime<Utc>,
    sources: Vec<SourceProvenance>,
    templates: BTreeMap<String, KnowledgeEntry>,
    workflows: BTreeMap<String, KnowledgeEntry>,
    data: BTreeMap<String, KnowledgeEntry>,
    configs: BTreeMap<String, KnowledgeEntry>,
    conflicts: Vec<ConflictRecord>,
    summary: MergeSummary,
}

impl MergedKnowledgeTree {
    pub(crate) fn new(strategy: ConflictStrategy) -> Self {
        Self {
            strategy,
            merged_at: Utc::now(),
            sources: Vec::new(),
            templates: BTreeMap::new(),
            workflows: BTreeMap::new(),
            data: BTreeMap::new(),
            configs: BTreeMap::new(),
            conflicts: Vec::new(),
            summary: MergeSummary::default(),
        }
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    pub fn merged_at(&self) -> DateTime<Utc> {
        self.merged_at
    }

    pub fn sources(&self) -> &[SourceProvenance] {
        &self.sources
    }

    pub fn category(&self, category: Category) -> &BTreeMap<String, KnowledgeEntry> {
        match category {
            Category::Templates => &self.templates,
            Category::Workflows => &self.workflows,
            Category::Data => &self.data,
            Category::Configs => &self.configs,
        }
    }

    pub fn templates(&self) -> &BTreeMap<String, KnowledgeEntry> {
        &self.templates
    }

    pub fn workflows(&self) -> &BTreeMap<String, KnowledgeEntry> {
        &self.workflows
    }

    pub fn data(&self) -> &BTreeMap<String, KnowledgeEntry> {
        &self.data
    }

    pub fn configs(&self) -> &BTreeMap<String, KnowledgeEntry> {
        &self.configs
    }

    pub fn get(&self, category: Category, key: &str) -> Option<&KnowledgeEntry> {
        self.category(category).get(key)
    }

    pub fn conflicts(&self) -> &[ConflictRecord] {
        &self.conflicts
    }

    pub fn summary(&self) -> &MergeSummary {
        &self.summary
    }

    pub fn is_empty(&self) -> bool {
        Category::ALL.iter().all(|c| self.category(*c).is_empty())
    }

    pub(crate) fn category_mut(&mut self, category: Category) -> &mut BTreeMap<String, KnowledgeEntry> {
        match category {
            Category::Templates => &mut self.templates,
            Category::Workflows => &mut self.workflows,
            Category::Data => &mut self.data,
            Category::Configs => &mut self.configs,
        }
    }

    pub(crate) fn push_source(&mut self, provenance: SourceProvenance) {
        self.sources.push(provenance);
    }

    pub(crate) fn push_conflict(&mut self, record: ConflictRecord) {
        self.conflicts.push(record);
    }

    /// Compute the summary. Called once, after the last source.
    pub(crate) fn finalize(&mut self) {
        let mut summary = MergeSummary {
            sources: self.sources.len(),
            conflicts: self.conflicts.len(),
            ..MergeSummary::default()
        };
        for category in Category::ALL {
            let count = self.category(category).len();
            summary.entries.insert(category, count);
            summary.total_entries += count;
        }
        for record in &self.conflicts {
            *summary.resolutions.entry(record.resolution).or_default() += 1;
        }
        self.summary = summary;
        self.merged_at = Utc::now();
    }
}
