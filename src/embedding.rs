use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("no embedding provider is configured")]
    Disabled,

    #[error("embedding credentials missing: environment variable {var} is not set")]
    MissingCredentials { var: String },

    #[error("embedding provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("embedding provider answered {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("embedding provider returned an unusable response: {0}")]
    InvalidResponse(String),

    #[error("invalid embedding input: {0}")]
    InvalidInput(String),
}

impl EmbeddingError {
    /// Worth retrying later: the provider, not the request, is at fault.
    pub fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Transport(_) | EmbeddingError::InvalidResponse(_) => true,
            EmbeddingError::Provider { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Text -> fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn label(&self) -> &str;

    /// Known up front for some providers, learned from the first response for
    /// others.
    fn dimension(&self) -> Option<usize>;

    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding returned".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Any service speaking the OpenAI `/embeddings` API
    #[default]
    OpenAI,
    /// Deterministic feature hashing, no network
    Hashed,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OpenAI => write!(f, "openai"),
            ProviderKind::Hashed => write!(f, "hashed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: ProviderKind,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the environment variable holding the API key. The key itself
    /// never lives in config.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default)]
    pub dimensions: Option<usize>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            dimensions: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

const DEFAULT_HASHED_DIMENSION: usize = 256;

/// Build the configured provider. `Ok(None)` means embeddings are switched
/// off, either by config or because the API key variable is unset; callers
/// degrade instead of failing.
pub fn embedder_from_config(
    config: Option<&EmbeddingConfig>,
) -> EmbeddingResult<Option<Arc<dyn Embedder>>> {
    let Some(config) = config else {
        return Ok(None);
    };
    let embedder: Arc<dyn Embedder> = match config.provider {
        ProviderKind::OpenAI => match HttpEmbedder::from_config(config) {
            Ok(embedder) => Arc::new(embedder),
            Err(EmbeddingError::MissingCredentials { var }) => {
                warn!(var = %var, "embedding API key not set; embeddings disabled");
                return Ok(None);
            }
            Err(e) => return Err(e),
        },
        ProviderKind::Hashed => Arc::new(HashedEmbedder::new(
            config.dimensions.unwrap_or(DEFAULT_HASHED_DIMENSION),
        )),
    };
    info!(provider = embedder.label(), dimension = ?embedder.dimension(), "embedding provider ready");
    Ok(Some(embedder))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// OpenAI-compatible HTTP embeddings client.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    dimensions: Option<usize>,
}

impl fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl HttpEmbedder {
    /// Resolves the API key through `config.api_key_env` now, so a missing
    /// secret shows up at startup rather than on the first query.
    pub fn from_config(config: &EmbeddingConfig) -> EmbeddingResult<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| EmbeddingError::MissingCredentials {
                var: config.api_key_env.clone(),
            })?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: String) -> EmbeddingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn label(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> Option<usize> {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbeddingError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let mut parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "asked for {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index);

        debug!(model = %self.model, count = texts.len(), "embedded batch");
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Bag-of-words feature hashing into a fixed number of buckets, L2
/// normalized. Same text, same vector, on every machine.
#[derive(Debug, Clone)]
pub struct HashedEmbedder {
    dimension: usize,
}

impl HashedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokens(text) {
            let h = seahash::hash(token.as_bytes());
            let bucket = (h % self.dimension as u64) as usize;
            // High bit picks the sign so unrelated tokens tend to cancel
            // instead of piling up.
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashedEmbedder {
    fn label(&self) -> &str {
        "hashed"
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
}
