//! In-memory catalog of configured sources, backed by the configuration
//! document.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{find_cache_overlap, validate_source, FederationConfig, Settings};
use crate::errors::RegistryError;
use crate::models::SourceDescriptor;

/// Source catalog. Mutations only touch memory until [`persist`](Self::persist).
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    config: FederationConfig,
    path: Option<PathBuf>,
}

impl SourceRegistry {
    /// Registry backed by the document at `path` (loaded, resolved, validated).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let config = FederationConfig::load_and_resolve(path)?;
        Ok(Self {
            config,
            path: Some(path.to_path_buf()),
        })
    }

    /// Registry over an already-loaded document. `path` is where
    /// [`persist`](Self::persist) writes; `None` keeps it in memory only.
    pub fn from_config(config: FederationConfig, path: Option<PathBuf>) -> Self {
        Self { config, path }
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.config.settings
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn cache_root(&self) -> PathBuf {
        self.config.settings.cache_root_path()
    }

    pub fn get(&self, name: &str) -> Option<&SourceDescriptor> {
        self.config.sources.get(name)
    }

    /// Require a registered source.
    pub fn require(&self, name: &str) -> Result<&SourceDescriptor, RegistryError> {
        self.get(name)
            .ok_or_else(|| RegistryError::UnknownSource(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.config.sources.contains_key(name)
    }

    /// All sources in registry order (sorted by name).
    pub fn list(&self) -> Vec<&SourceDescriptor> {
        self.config.sources.values().collect()
    }

    pub fn len(&self) -> usize {
        self.config.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.config.sources.is_empty()
    }

    /// Register a new source after validating it against the others.
    pub fn add(&mut self, source: SourceDescriptor) -> Result<(), RegistryError> {
        validate_source(&source)?;
        if self.contains(&source.name) {
            return Err(RegistryError::DuplicateSource(source.name));
        }

        let cache_root = self.cache_root();
        let mut candidates = self.list();
        candidates.push(&source);
        if let Some((a, b, path)) = find_cache_overlap(&candidates, &cache_root) {
            return Err(RegistryError::CachePathOverlap {
                source_name: a,
                other: b,
                path: path.display().to_string(),
            });
        }

        info!(source = %source.name, kind = source.kind_label(), "source registered");
        self.config.sources.insert(source.name.clone(), source);
        self.config.resolve_env_vars()?;
        Ok(())
    }

    /// Unregister a source, returning its descriptor.
    pub fn remove(&mut self, name: &str) -> Result<SourceDescriptor, RegistryError> {
        let removed = self
            .config
            .sources
            .remove(name)
            .ok_or_else(|| RegistryError::UnknownSource(name.to_string()))?;
        info!(source = %name, "source unregistered");
        Ok(removed)
    }

    /// Write the document back to its file, if the registry has one.
    pub fn persist(&self) -> Result<(), RegistryError> {
        match &self.path {
            Some(path) => self.config.save_to_file(path)?,
            None => debug!("registry has no backing file; not persisting"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncPolicy;

    fn registry(dir: &Path) -> SourceRegistry {
        let mut config = FederationConfig::default();
        config.settings.cache_root = dir.join("cache");
        SourceRegistry::from_config(config, Some(dir.join("config.yaml")))
    }

    #[test]
    fn test_add_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = registry(dir.path());

        reg.add(
            SourceDescriptor::repository("kb", "https://github.com/acme/kb.git")
                .with_priority(7)
                .with_policy(SyncPolicy::Weekly),
        )
        .unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.require("kb").unwrap().priority, 7);

        let removed = reg.remove("kb").unwrap();
        assert_eq!(removed.name, "kb");
        assert!(reg.is_empty());
        assert!(matches!(reg.remove("kb"), Err(RegistryError::UnknownSource(_))));
    }

    #[test]
    fn test_duplicate_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = registry(dir.path());
        reg.add(SourceDescriptor::repository("kb", "https://x/kb.git"))
            .unwrap();
        assert!(matches!(
            reg.add(SourceDescriptor::repository("kb", "https://x/other.git")),
            Err(RegistryError::DuplicateSource(_))
        ));
    }

    #[test]
    fn test_overlapping_cache_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = registry(dir.path());
        reg.add(SourceDescriptor::repository("kb", "https://x/kb.git"))
            .unwrap();

        let nested = SourceDescriptor::repository("inner", "https://x/inner.git")
            .with_cache(dir.path().join("cache").join("kb").join("inner"));
        assert!(matches!(
            reg.add(nested),
            Err(RegistryError::CachePathOverlap { .. })
        ));
    }

    #[test]
    fn test_invalid_descriptor_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = registry(dir.path());
        let bad = SourceDescriptor::repository("kb", "https://x/kb.git").with_priority(1000);
        assert!(matches!(reg.add(bad), Err(RegistryError::Config(_))));
    }

    #[test]
    fn test_persist_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = registry(dir.path());
        reg.add(SourceDescriptor::repository("kb", "https://x/kb.git"))
            .unwrap();
        reg.persist().unwrap();

        let reloaded = SourceRegistry::load(dir.path().join("config.yaml")).unwrap();
        assert!(reloaded.contains("kb"));
        assert_eq!(reloaded.cache_root(), dir.path().join("cache"));
    }
}
