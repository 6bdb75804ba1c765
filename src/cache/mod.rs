//! TTL result cache with interchangeable backends.
//!
//! Every backend speaks [`CacheBackend`]. Which one runs is decided once, at
//! construction, from a typed [`BackendKind`]; names that are not built in
//! resolve through a [`BackendRegistry`] of caller-supplied factories.

pub mod file;
pub mod memory;
pub mod remote;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use file::FileCache;
pub use memory::MemoryCache;
pub use remote::RemoteCache;

/// Default lifetime of a cached result, in seconds.
pub const DEFAULT_TTL_SECS: i64 = 300;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown cache backend '{0}'")]
    UnknownBackend(String),

    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),

    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// One stored value plus the bookkeeping needed to expire it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    /// Unix time in milliseconds
    pub created_at: u64,
    /// `<= 0` means the entry never expires
    pub ttl_seconds: i64,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: Value, ttl_seconds: i64) -> Self {
        Self {
            key: key.into(),
            value,
            created_at: now_millis(),
            ttl_seconds,
        }
    }

    pub fn expires_at(&self) -> Option<u64> {
        if self.ttl_seconds <= 0 {
            return None;
        }
        let ttl_ms = (self.ttl_seconds as u64).saturating_mul(1000);
        Some(self.created_at.saturating_add(ttl_ms))
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at().map_or(false, |deadline| now_ms >= deadline)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Key -> value store with per-entry expiry.
///
/// `get` never distinguishes "never stored" from "expired".
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> CacheResult<Option<Value>>;

    /// Overwrites any existing entry for `key`.
    async fn set(&self, key: &str, value: Value, ttl_seconds: i64) -> CacheResult<()>;

    /// No-op when the key is absent.
    async fn invalidate(&self, key: &str) -> CacheResult<()>;

    /// Drop every expired entry, returning how many went.
    async fn purge_expired(&self) -> CacheResult<usize> {
        Ok(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendKind {
    #[default]
    Memory,
    File,
    Remote,
    /// Looked up in a [`BackendRegistry`]
    Custom(String),
}

impl FromStr for BackendKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        match name.to_ascii_lowercase().as_str() {
            "" => Err(CacheError::InvalidConfig("backend name is empty".to_string())),
            "memory" | "mem" => Ok(Self::Memory),
            "file" | "filesystem" => Ok(Self::File),
            "remote" | "http" => Ok(Self::Remote),
            _ => Ok(Self::Custom(name.to_string())),
        }
    }
}

impl TryFrom<String> for BackendKind {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackendKind> for String {
    fn from(kind: BackendKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::File => write!(f, "file"),
            BackendKind::Remote => write!(f, "remote"),
            BackendKind::Custom(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Where the file backend keeps its entries
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Base URL of the remote key-value service
    #[serde(default = "default_url")]
    pub url: String,

    /// Upper bound on any single remote call
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Default TTL in seconds when a caller does not pick one
    #[serde(default = "default_ttl")]
    pub ttl: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            directory: default_directory(),
            url: default_url(),
            timeout_ms: default_timeout_ms(),
            ttl: default_ttl(),
        }
    }
}

fn default_directory() -> PathBuf {
    PathBuf::from(".groundwork-cache")
}

fn default_url() -> String {
    "http://127.0.0.1:8750".to_string()
}

fn default_timeout_ms() -> u64 {
    500
}

fn default_ttl() -> i64 {
    DEFAULT_TTL_SECS
}

type BackendFactory =
    Arc<dyn Fn(&CacheConfig) -> CacheResult<Arc<dyn CacheBackend>> + Send + Sync>;

/// Extension point for backends this crate does not ship.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("names", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in names (`memory`, `file`, `remote`) always win over a
    /// registration with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&CacheConfig) -> CacheResult<Arc<dyn CacheBackend>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Register an already-built backend under `name`.
    pub fn register_instance(&mut self, name: impl Into<String>, backend: Arc<dyn CacheBackend>) {
        self.register(name, move |_| Ok(Arc::clone(&backend)));
    }

    pub fn build(&self, config: &CacheConfig) -> CacheResult<Arc<dyn CacheBackend>> {
        match &config.backend {
            BackendKind::Memory => Ok(Arc::new(MemoryCache::new())),
            BackendKind::File => Ok(Arc::new(FileCache::open(&config.directory)?)),
            BackendKind::Remote => Ok(Arc::new(RemoteCache::new(
                &config.url,
                Duration::from_millis(config.timeout_ms),
            )?)),
            BackendKind::Custom(name) => {
                let factory = self
                    .factories
                    .get(name)
                    .ok_or_else(|| CacheError::UnknownBackend(name.clone()))?;
                factory(config)
            }
        }
    }
}

/// A backend plus the default TTL callers fall back on.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    default_ttl: i64,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend.name())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, default_ttl: i64) -> Self {
        Self {
            backend,
            default_ttl,
        }
    }

    pub fn from_config(config: &CacheConfig, registry: &BackendRegistry) -> CacheResult<Self> {
        let backend = registry.build(config)?;
        tracing::info!(backend = backend.name(), ttl = config.ttl, "cache store ready");
        Ok(Self::new(backend, config.ttl))
    }

    pub fn in_memory(default_ttl: i64) -> Self {
        Self::new(Arc::new(MemoryCache::new()), default_ttl)
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn default_ttl(&self) -> i64 {
        self.default_ttl
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        self.backend.get(key).await
    }

    /// `ttl = None` uses the store's default.
    pub async fn set(&self, key: &str, value: Value, ttl: Option<i64>) -> CacheResult<()> {
        self.backend
            .set(key, value, ttl.unwrap_or(self.default_ttl))
            .await
    }

    pub async fn invalidate(&self, key: &str) -> CacheResult<()> {
        self.backend.invalidate(key).await
    }

    pub async fn purge_expired(&self) -> CacheResult<usize> {
        self.backend.purge_expired().await
    }
}
