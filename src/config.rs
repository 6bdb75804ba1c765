use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::CacheConfig;
use crate::embedding::EmbeddingConfig;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "groundwork.yml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Absent disables embeddings and with them retrieval.
    #[serde(default)]
    pub embeddings: Option<EmbeddingConfig>,

    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,

    /// Pin the vector length up front instead of learning it from the first
    /// insert.
    #[serde(default)]
    pub dimension: Option<usize>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            dimension: None,
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("groundwork-index.json")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

fn default_max_context_chars() -> usize {
    4000
}

impl AppConfig {
    pub fn from_yaml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text, path)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.index.dimension == Some(0) {
            return Err(ConfigError::Invalid("index.dimension must be positive".to_string()));
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid("retrieval.top_k must be positive".to_string()));
        }
        if let Some(embeddings) = &self.embeddings {
            if embeddings.api_key_env.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "embeddings.api_key_env must name an environment variable".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// An explicit path must load. Without one, `groundwork.yml` in the working
/// directory is used if present; a broken discovered file is reported and
/// skipped in favour of defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
    if let Some(path) = explicit {
        let config = AppConfig::load_from_path(path)?;
        info!(path = %path.display(), "loaded config");
        return Ok(config);
    }

    let discovered = Path::new(DEFAULT_CONFIG_FILE);
    if !discovered.exists() {
        return Ok(AppConfig::default());
    }
    match AppConfig::load_from_path(discovered) {
        Ok(config) => {
            info!(path = %discovered.display(), "loaded config");
            Ok(config)
        }
        Err(e) => {
            warn!(error = %e, "ignoring unreadable config, using defaults");
            Ok(AppConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BackendKind;
    use crate::embedding::ProviderKind;

    #[test]
    fn empty_document_gives_defaults() {
        let config = AppConfig::from_yaml("{}", Path::new("inline")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.cache.ttl, 300);
        assert_eq!(config.cache.backend, BackendKind::Memory);
        assert!(config.embeddings.is_none());
    }

    #[test]
    fn full_document_parses() {
        let yaml = r#"
index:
  path: /var/lib/groundwork/index.json
  dimension: 384
cache:
  backend: file
  directory: /tmp/gw-cache
  ttl: 0
embeddings:
  provider: hashed
  dimensions: 384
retrieval:
  top_k: 3
"#;
        let config = AppConfig::from_yaml(yaml, Path::new("inline")).unwrap();
        assert_eq!(config.index.dimension, Some(384));
        assert_eq!(config.cache.backend, BackendKind::File);
        assert_eq!(config.cache.directory, PathBuf::from("/tmp/gw-cache"));
        assert_eq!(config.cache.ttl, 0);
        let embeddings = config.embeddings.unwrap();
        assert_eq!(embeddings.provider, ProviderKind::Hashed);
        assert_eq!(embeddings.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.retrieval.max_context_chars, 4000);
    }

    #[test]
    fn custom_backend_names_survive_parsing() {
        let config = AppConfig::from_yaml("cache:\n  backend: sqlite\n", Path::new("inline")).unwrap();
        assert_eq!(config.cache.backend, BackendKind::Custom("sqlite".to_string()));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            AppConfig::from_yaml("retrieval:\n  top_k: 0\n", Path::new("inline")),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AppConfig::from_yaml("index: [1, 2]\n", Path::new("inline")),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yml");
        assert!(matches!(load_config(Some(&missing)), Err(ConfigError::Io { .. })));

        let present = dir.path().join("gw.yml");
        fs::write(&present, "cache:\n  ttl: 42\n").unwrap();
        assert_eq!(load_config(Some(&present)).unwrap().cache.ttl, 42);
    }
}
