//! Configuration document for kfed.
//!
//! The document is YAML by default; a `.toml` extension selects TOML. All
//! sensitive values (tokens, passwords) are stored as `_env` fields that
//! reference environment variable names. The actual secrets are resolved at
//! runtime via [`FederationConfig::resolve_env_vars`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::merge::ConflictStrategy;
use crate::models::{AuthConfig, SourceDescriptor, SourceKind, MAX_PRIORITY};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// The persisted configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub settings: Settings,

    /// Source name -> descriptor.
    #[serde(default)]
    pub sources: BTreeMap<String, SourceDescriptor>,
}

fn default_version() -> String {
    "1".into()
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            settings: Settings::default(),
            sources: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Global settings
// ---------------------------------------------------------------------------

/// Global engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root directory for source caches. `~` is expanded.
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,

    /// Soft cap on the cache root, e.g. `2GB`. Exceeding it is reported,
    /// never enforced by deletion.
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: String,

    /// Advisory sync timeout in seconds.
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout: u64,

    /// Clone attempts before a sync is reported as failed.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Sync sources concurrently in batch operations.
    #[serde(default = "default_true")]
    pub parallel_sync: bool,

    /// Default conflict strategy for merges.
    #[serde(default)]
    pub conflict_resolution: ConflictStrategy,

    /// Minimum tracing level for the daemon.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seconds between daemon policy evaluations.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("~/.cache/kfed")
}
fn default_max_cache_size() -> String {
    "2GB".into()
}
fn default_sync_timeout() -> u64 {
    300
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".into()
}
fn default_poll_interval() -> u64 {
    900
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            max_cache_size: default_max_cache_size(),
            sync_timeout: default_sync_timeout(),
            retry_attempts: default_retry_attempts(),
            parallel_sync: true,
            conflict_resolution: ConflictStrategy::default(),
            log_level: default_log_level(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Settings {
    /// Cache root with `~` expanded.
    pub fn cache_root_path(&self) -> PathBuf {
        expand_tilde(&self.cache_root)
    }

    /// `max_cache_size` in bytes.
    pub fn max_cache_bytes(&self) -> Result<u64, ConfigError> {
        parse_size(&self.max_cache_size).map_err(|detail| ConfigError::InvalidValue {
            field: "settings.max_cache_size".into(),
            detail,
        })
    }
}

// ---------------------------------------------------------------------------
// Document format
// ---------------------------------------------------------------------------

/// On-disk format, selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading, resolving, saving
// ---------------------------------------------------------------------------

impl FederationConfig {
    /// Parse a document from a string in the given format.
    pub fn from_str_with_format(contents: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let mut config: FederationConfig = match format {
            ConfigFormat::Yaml => {
                serde_yaml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?
            }
            ConfigFormat::Toml => {
                toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?
            }
        };
        config.assign_names();
        Ok(config)
    }

    /// Load a [`FederationConfig`] from a file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_str_with_format(&contents, ConfigFormat::from_path(path))?;

        debug!(sources = config.sources.len(), "configuration parsed successfully");
        Ok(config)
    }

    /// Serialize the document in the given format.
    pub fn to_string_with_format(&self, format: ConfigFormat) -> Result<String, ConfigError> {
        match format {
            ConfigFormat::Yaml => {
                serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
            }
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| ConfigError::SerializeError(e.to_string())),
        }
    }

    /// Write the document back to `path`, in the format its extension selects.
    ///
    /// The file is written to a sibling temporary file and renamed into place.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = self.to_string_with_format(ConfigFormat::from_path(path))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("kfed-tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, path)?;

        info!(path = %path.display(), sources = self.sources.len(), "configuration saved");
        Ok(())
    }

    /// Resolve all `*_env` credential fields from environment variables.
    ///
    /// Missing variables log a warning but do **not** fail -- the sync
    /// manager reports a missing credential when the source is synced.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        for (name, source) in self.sources.iter_mut() {
            let SourceKind::Repository(repo) = &mut source.kind else {
                continue;
            };
            match &mut repo.auth {
                Some(AuthConfig::Token {
                    token_env, token, ..
                }) => {
                    let field = format!("sources.{}.auth.token_env", name);
                    *token = resolve_optional_env(token_env, &field);
                }
                Some(AuthConfig::Basic {
                    password_env,
                    password,
                    ..
                }) => {
                    let field = format!("sources.{}.auth.password_env", name);
                    *password = resolve_optional_env(password_env, &field);
                }
                Some(AuthConfig::Ssh { .. }) | None => {}
            }
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "version".into(),
                detail: "version must not be empty".into(),
            });
        }
        if self.settings.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "settings.poll_interval_secs".into(),
                detail: "poll interval must be > 0".into(),
            });
        }
        if self.settings.sync_timeout == 0 {
            return Err(ConfigError::InvalidValue {
                field: "settings.sync_timeout".into(),
                detail: "sync timeout must be > 0".into(),
            });
        }
        if self.settings.retry_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "settings.retry_attempts".into(),
                detail: "at least one attempt is required".into(),
            });
        }
        self.settings.max_cache_bytes()?;

        for source in self.sources.values() {
            validate_source(source)?;
        }

        let cache_root = self.settings.cache_root_path();
        let sources: Vec<&SourceDescriptor> = self.sources.values().collect();
        if let Some((a, b, path)) = find_cache_overlap(&sources, &cache_root) {
            return Err(ConfigError::InvalidValue {
                field: format!("sources.{}.local_cache", a),
                detail: format!(
                    "cache path '{}' overlaps the cache of source '{}'",
                    path.display(),
                    b
                ),
            });
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    fn assign_names(&mut self) {
        for (name, source) in self.sources.iter_mut() {
            source.name = name.clone();
        }
    }
}

/// Field-level checks for one source descriptor.
pub fn validate_source(source: &SourceDescriptor) -> Result<(), ConfigError> {
    let field = |suffix: &str| format!("sources.{}.{}", source.name, suffix);

    if !is_valid_source_name(&source.name) {
        return Err(ConfigError::InvalidValue {
            field: "sources".into(),
            detail: format!(
                "source name '{}' must be non-empty and use only letters, digits, '-', '_' or '.'",
                source.name
            ),
        });
    }
    if source.priority > MAX_PRIORITY {
        return Err(ConfigError::InvalidValue {
            field: field("priority"),
            detail: format!("priority must be between 0 and {}", MAX_PRIORITY),
        });
    }

    match &source.kind {
        SourceKind::Repository(repo) => {
            if repo.url.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field("url"),
                    detail: "repository URL must not be empty".into(),
                });
            }
            if repo.branch.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field("branch"),
                    detail: "branch must not be empty".into(),
                });
            }
        }
        SourceKind::Database(db) => {
            if db.connection_env.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field("connection_env"),
                    detail: "connection_env must not be empty".into(),
                });
            }
        }
        SourceKind::Web(web) => {
            if web.url.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field("url"),
                    detail: "web URL must not be empty".into(),
                });
            }
        }
    }

    for pattern in source.filters.include.iter().chain(&source.filters.exclude) {
        if pattern.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: field("filters"),
                detail: "filter patterns must not be empty".into(),
            });
        }
    }

    Ok(())
}

fn is_valid_source_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Find the first pair of sources whose cache directories are equal or nested.
///
/// Returns `(source, other, path)` where `path` is `source`'s cache path.
pub fn find_cache_overlap(
    sources: &[&SourceDescriptor],
    cache_root: &Path,
) -> Option<(String, String, PathBuf)> {
    let paths: Vec<(&str, PathBuf)> = sources
        .iter()
        .map(|s| (s.name.as_str(), s.cache_path(cache_root)))
        .collect();

    for (i, (name_a, path_a)) in paths.iter().enumerate() {
        for (name_b, path_b) in paths.iter().skip(i + 1) {
            if path_a.starts_with(path_b) || path_b.starts_with(path_a) {
                return Some((name_a.to_string(), name_b.to_string(), path_a.clone()));
            }
        }
    }
    None
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if s == "~" {
        return dirs::home_dir().unwrap_or_else(|| path.to_path_buf());
    }
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// Parse a human size such as `512MB`, `2 GB` or `1024` into bytes.
pub fn parse_size(input: &str) -> Result<u64, String> {
    let s = input.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("'{}' is not a size (expected e.g. 512MB)", input))?;

    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => 1 << 10,
        "M" | "MB" => 1 << 20,
        "G" | "GB" => 1 << 30,
        "T" | "TB" => 1 << 40,
        other => return Err(format!("unknown size unit '{}'", other)),
    };
    Ok((value * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HostStyle, SyncPolicy};

    fn sample_yaml() -> &'static str {
        r#"
version: "1"
settings:
  cache_root: /tmp/kfed-cache
  max_cache_size: 512MB
  sync_timeout: 120
  retry_attempts: 2
  parallel_sync: false
  conflict_resolution: local_wins
sources:
  company-kb:
    kind: repository
    url: https://github.com/acme/kb.git
    branch: develop
    sync_policy: weekly
    priority: 10
    auth:
      type: token
      token_env: KFED_TEST_KB_TOKEN
      host_style: gitlab
    filters:
      include: ["templates/**"]
      exclude: ["**/draft-*"]
  metrics:
    kind: database
    connection_env: METRICS_DSN
    sync_policy: manual
  handbook:
    kind: web
    url: https://handbook.example.com
    local_cache: /srv/handbook
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config =
            FederationConfig::from_str_with_format(sample_yaml(), ConfigFormat::Yaml).unwrap();
        assert_eq!(config.settings.retry_attempts, 2);
        assert!(!config.settings.parallel_sync);
        assert_eq!(config.settings.conflict_resolution, ConflictStrategy::LocalWins);
        assert_eq!(config.sources.len(), 3);

        let kb = &config.sources["company-kb"];
        assert_eq!(kb.name, "company-kb");
        assert_eq!(kb.priority, 10);
        assert_eq!(kb.sync_policy, SyncPolicy::Weekly);
        let repo = kb.as_repository().unwrap();
        assert_eq!(repo.branch, "develop");
        assert!(matches!(
            repo.auth,
            Some(AuthConfig::Token {
                host_style: Some(HostStyle::Gitlab),
                ..
            })
        ));
        assert_eq!(kb.filters.exclude, vec!["**/draft-*"]);

        assert_eq!(config.sources["metrics"].kind_label(), "database");
        assert_eq!(
            config.sources["handbook"].local_cache.as_deref(),
            Some(Path::new("/srv/handbook"))
        );
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
sources:
  kb:
    kind: repository
    url: https://github.com/acme/kb.git
"#;
        let config = FederationConfig::from_str_with_format(minimal, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.version, "1");
        assert_eq!(config.settings.sync_timeout, 300);
        assert_eq!(config.settings.retry_attempts, 3);
        assert!(config.settings.parallel_sync);
        assert_eq!(config.settings.conflict_resolution, ConflictStrategy::Priority);
        let kb = &config.sources["kb"];
        assert_eq!(kb.as_repository().unwrap().branch, "main");
        assert_eq!(kb.sync_policy, SyncPolicy::Daily);
        assert_eq!(kb.priority, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_reload_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let config =
            FederationConfig::from_str_with_format(sample_yaml(), ConfigFormat::Yaml).unwrap();
        config.save_to_file(&path).unwrap();

        let reloaded = FederationConfig::load_from_file(&path).unwrap();
        assert_eq!(reloaded.sources, config.sources);
        assert_eq!(reloaded.settings.max_cache_size, "512MB");
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("token_env: KFED_TEST_KB_TOKEN"));
    }

    #[test]
    fn test_save_and_reload_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config =
            FederationConfig::from_str_with_format(sample_yaml(), ConfigFormat::Yaml).unwrap();
        config.save_to_file(&path).unwrap();

        let reloaded = FederationConfig::load_from_file(&path).unwrap();
        assert_eq!(reloaded.sources, config.sources);
    }

    #[test]
    fn test_file_not_found() {
        let result = FederationConfig::load_from_file("/nonexistent/config.yaml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("KFED_TEST_KB_TOKEN", "glpat-123");
        let mut config =
            FederationConfig::from_str_with_format(sample_yaml(), ConfigFormat::Yaml).unwrap();
        config.resolve_env_vars().unwrap();

        let repo = config.sources["company-kb"].as_repository().unwrap();
        match &repo.auth {
            Some(AuthConfig::Token { token, .. }) => assert_eq!(token.as_deref(), Some("glpat-123")),
            other => panic!("unexpected auth: {:?}", other),
        }
        std::env::remove_var("KFED_TEST_KB_TOKEN");
    }

    #[test]
    fn test_validate_rejects_priority_out_of_range() {
        let mut config =
            FederationConfig::from_str_with_format(sample_yaml(), ConfigFormat::Yaml).unwrap();
        config.sources.get_mut("company-kb").unwrap().priority = 1000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "sources.company-kb.priority"
        ));
    }

    #[test]
    fn test_validate_rejects_shared_cache() {
        let mut config =
            FederationConfig::from_str_with_format(sample_yaml(), ConfigFormat::Yaml).unwrap();
        config.sources.get_mut("metrics").unwrap().local_cache =
            Some(PathBuf::from("/srv/handbook/nested"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn test_validate_rejects_bad_name() {
        let mut config = FederationConfig::default();
        let mut source = SourceDescriptor::repository("../escape", "https://x/y.git");
        source.name = "../escape".into();
        config.sources.insert(source.name.clone(), source);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024"), Ok(1024));
        assert_eq!(parse_size("2KB"), Ok(2048));
        assert_eq!(parse_size("512 MB"), Ok(512 * 1024 * 1024));
        assert_eq!(parse_size("1.5GB"), Ok(1610612736));
        assert!(parse_size("lots").is_err());
        assert!(parse_size("3PB").is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.yaml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")), ConfigFormat::Yaml);
    }
}
