//! Memoization of whole consensus runs.
//!
//! A run is identified by its question, the experts consulted, the synthesis
//! style and the model. Two requests that agree on those fingerprint to the
//! same cache key no matter how the expert list was ordered.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::cache::CacheStore;

/// Prefix on every consensus cache key.
pub const KEY_PREFIX: &str = "consensus:";

// Bump when the canonical encoding changes so old entries stop matching.
const FINGERPRINT_VERSION: &[u8] = b"consensus-v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisStyle {
    /// Agreements and practical next steps
    #[default]
    Balanced,
    /// Risks, failure modes, mitigations
    Critical,
    /// Synergies and phased collaboration
    Collaborative,
}

impl SynthesisStyle {
    pub const ALL: [SynthesisStyle; 3] = [
        SynthesisStyle::Balanced,
        SynthesisStyle::Critical,
        SynthesisStyle::Collaborative,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SynthesisStyle::Balanced => "balanced",
            SynthesisStyle::Critical => "critical",
            SynthesisStyle::Collaborative => "collaborative",
        }
    }
}

impl fmt::Display for SynthesisStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SynthesisStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|style| style.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown synthesis style '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusRequest {
    pub question: String,
    pub experts: Vec<String>,
    #[serde(default)]
    pub style: SynthesisStyle,
    #[serde(default)]
    pub model: Option<String>,
    /// `false` skips both lookup and store
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
    /// Overrides the store's default TTL
    #[serde(default)]
    pub ttl: Option<i64>,
}

fn default_use_cache() -> bool {
    true
}

impl ConsensusRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            experts: Vec::new(),
            style: SynthesisStyle::default(),
            model: None,
            use_cache: true,
            ttl: None,
        }
    }

    pub fn experts<I, S>(mut self, experts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.experts = experts.into_iter().map(Into::into).collect();
        self
    }

    pub fn style(mut self, style: SynthesisStyle) -> Self {
        self.style = style;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn ttl(mut self, ttl_seconds: i64) -> Self {
        self.ttl = Some(ttl_seconds);
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Cache key for this request. Pure: no clock, no randomness.
    pub fn fingerprint(&self) -> String {
        let mut experts: Vec<&str> = self.experts.iter().map(String::as_str).collect();
        experts.sort_unstable();
        experts.dedup();

        // Length-prefixed fields, so no choice of text can shift a boundary.
        let mut hasher = Sha256::new();
        put_field(&mut hasher, FINGERPRINT_VERSION);
        put_field(&mut hasher, self.question.as_bytes());
        hasher.update((experts.len() as u64).to_le_bytes());
        for expert in experts {
            put_field(&mut hasher, expert.as_bytes());
        }
        put_field(&mut hasher, self.style.as_str().as_bytes());
        match &self.model {
            Some(model) => {
                hasher.update([1u8]);
                put_field(&mut hasher, model.as_bytes());
            }
            None => hasher.update([0u8]),
        }

        format!("{}{:x}", KEY_PREFIX, hasher.finalize())
    }
}

fn put_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Cache-aside wrapper around an expensive consensus computation.
///
/// The cache only ever removes work. Backend failures are logged and the
/// computation runs as if nothing were cached.
#[derive(Debug, Clone)]
pub struct ConsensusCache {
    store: CacheStore,
}

impl ConsensusCache {
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    pub fn store_handle(&self) -> &CacheStore {
        &self.store
    }

    pub async fn lookup<T: DeserializeOwned>(&self, request: &ConsensusRequest) -> Option<T> {
        if !request.use_cache {
            return None;
        }
        let key = request.fingerprint();
        let value = match self.store.get(&key).await {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(e) => {
                warn!(%key, error = %e, "consensus cache lookup failed, computing instead");
                return None;
            }
        };
        match serde_json::from_value(value) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(%key, error = %e, "cached consensus has an unexpected shape, ignoring it");
                None
            }
        }
    }

    pub async fn store<T: Serialize>(&self, request: &ConsensusRequest, result: &T) {
        if !request.use_cache {
            return;
        }
        let key = request.fingerprint();
        let value = match serde_json::to_value(result) {
            Ok(value) => value,
            Err(e) => {
                warn!(%key, error = %e, "consensus result is not serializable, not caching");
                return;
            }
        };
        if let Err(e) = self.store.set(&key, value, request.ttl).await {
            warn!(%key, error = %e, "consensus cache write failed");
        }
    }

    /// Return the cached result for `request`, or run `compute`, cache what it
    /// returns and hand it back. Errors from `compute` are passed through and
    /// never cached.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        request: &ConsensusRequest,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.lookup(request).await {
            info!(style = %request.style, "returning cached consensus");
            return Ok(cached);
        }

        debug!(experts = request.experts.len(), "consensus cache miss, computing");
        let result = compute().await?;
        self.store(request, &result).await;
        Ok(result)
    }
}
