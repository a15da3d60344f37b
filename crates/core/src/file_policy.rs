//! Per-source artifact filtering.
//!
//! Provides [`SourceFilter`], built from a source's `filters` block, which
//! decides whether a discovered artifact takes part in the merge.
//!
//! # Decision model
//!
//! | Condition | Decision |
//! |-----------|----------|
//! | Key matches an exclude pattern | `Excluded` |
//! | Include list non-empty and no include pattern matches | `NotIncluded` |
//! | None of the above | `Allow` |
//!
//! Patterns are matched against the normalized merge key (forward slashes,
//! lower case, relative to the source root).

use tracing::debug;

use crate::models::SourceFilters;

/// The outcome of evaluating an artifact key against the filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Allow,
    /// Key matches an exclude pattern.
    Excluded { pattern: String },
    /// An include list is configured and nothing in it matches.
    NotIncluded,
}

impl FilterDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Excluded { .. } => "excluded",
            Self::NotIncluded => "not-included",
        }
    }
}

/// Include/exclude glob evaluation for one source.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl SourceFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self {
            include: include.iter().map(|p| normalize_pattern(p)).collect(),
            exclude: exclude.iter().map(|p| normalize_pattern(p)).collect(),
        }
    }

    /// Evaluate a normalized artifact key.
    pub fn evaluate(&self, key: &str) -> FilterDecision {
        for pattern in &self.exclude {
            if glob_match::glob_match(pattern, key) {
                debug!(key, pattern = pattern.as_str(), "artifact matches exclude pattern");
                return FilterDecision::Excluded {
                    pattern: pattern.clone(),
                };
            }
        }

        if !self.include.is_empty()
            && !self
                .include
                .iter()
                .any(|pattern| glob_match::glob_match(pattern, key))
        {
            return FilterDecision::NotIncluded;
        }

        FilterDecision::Allow
    }

    pub fn allows(&self, key: &str) -> bool {
        self.evaluate(key).is_allowed()
    }

    /// Whether the filter has any constraints at all.
    pub fn has_constraints(&self) -> bool {
        !self.include.is_empty() || !self.exclude.is_empty()
    }
}

impl From<&SourceFilters> for SourceFilter {
    fn from(filters: &SourceFilters) -> Self {
        Self::new(filters.include.clone(), filters.exclude.clone())
    }
}

/// Keys are lower-cased with forward slashes; patterns follow suit.
fn normalize_pattern(pattern: &str) -> String {
    pattern.replace('\\', "/").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_when_no_constraints() {
        let filter = SourceFilter::default();
        assert_eq!(filter.evaluate("templates/api.yaml"), FilterDecision::Allow);
        assert!(!filter.has_constraints());
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let filter = SourceFilter::new(vec!["templates/**".into()], vec!["**/draft-*".into()]);
        let decision = filter.evaluate("templates/sub/draft-api.md");
        assert!(matches!(decision, FilterDecision::Excluded { .. }));
        assert_eq!(decision.label(), "excluded");
        assert!(filter.allows("templates/sub/api.md"));
    }

    #[test]
    fn test_include_list_restricts() {
        let filter = SourceFilter::new(vec!["templates/**".into(), "data/*.json".into()], vec![]);
        assert!(filter.allows("templates/a/b.md"));
        assert!(filter.allows("data/team.json"));
        assert_eq!(filter.evaluate("workflows/ci.yaml"), FilterDecision::NotIncluded);
        assert!(!filter.allows("data/nested/team.json"));
    }

    #[test]
    fn test_patterns_are_case_and_separator_insensitive() {
        let filter = SourceFilter::new(vec![], vec!["Config\\Secrets/**".into()]);
        assert!(!filter.allows("config/secrets/prod.yaml"));
    }

    #[test]
    fn test_from_source_filters() {
        let filters = SourceFilters {
            include: vec![],
            exclude: vec!["*.tmp".into()],
        };
        let filter = SourceFilter::from(&filters);
        assert!(filter.has_constraints());
        assert!(!filter.allows("scratch.tmp"));
    }
}
