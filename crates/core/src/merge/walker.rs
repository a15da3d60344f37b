//! Artifact discovery inside a source directory.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use super::tree::Category;
use crate::errors::MergeError;
use crate::file_policy::SourceFilter;

/// A discovered artifact: normalized key plus its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub key: String,
    pub content: String,
}

/// Normalize a source-relative path into a merge key.
pub fn normalize_key(relative: &Path) -> String {
    relative.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// Locate the category directory under `source_root`, ignoring case.
///
/// An exact match wins; otherwise the first match in name order.
fn category_root(source_root: &Path, dir_name: &str) -> Option<PathBuf> {
    let exact = source_root.join(dir_name);
    if exact.is_dir() {
        return Some(exact);
    }
    let mut matches: Vec<PathBuf> = std::fs::read_dir(source_root)
        .ok()?
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|name| name.eq_ignore_ascii_case(dir_name))
        })
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    matches.sort();
    matches.into_iter().next()
}

/// Walk one category root of `source_root`, in file-name order.
///
/// Unreadable artifacts are logged and skipped.
pub fn collect(source_root: &Path, category: Category, filter: &SourceFilter) -> Vec<Artifact> {
    let Some(root) = category_root(source_root, category.root_dir()) else {
        return Vec::new();
    };

    let mut artifacts = Vec::new();
    let walker = WalkDir::new(&root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !has_extension(entry.path(), category.extensions()) {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(source_root) else {
            continue;
        };
        let key = normalize_key(relative);
        let decision = filter.evaluate(&key);
        if !decision.is_allowed() {
            debug!(key = %key, decision = decision.label(), "artifact filtered out");
            continue;
        }

        match std::fs::read_to_string(entry.path()) {
            Ok(content) => artifacts.push(Artifact { key, content }),
            Err(e) => {
                let err = MergeError::ReadFailed {
                    path: entry.path().display().to_string(),
                    detail: e.to_string(),
                };
                warn!(error = %err, "skipping artifact");
            }
        }
    }

    artifacts
}
