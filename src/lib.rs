pub mod cache;
pub mod config;
pub mod consensus;
pub mod embedding;
pub mod index;
pub mod manager;
pub mod model;
pub mod retrieval;
pub mod server;
pub mod storage;
pub mod vector;

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::cache::{BackendRegistry, CacheError, CacheStore};
use crate::config::{AppConfig, RetrievalConfig};
use crate::consensus::ConsensusCache;
use crate::embedding::{embedder_from_config, EmbeddingError};
use crate::index::{IndexError, VectorIndex};
use crate::retrieval::{format_context, retriever_from, Retriever};
use crate::server::AppState;

pub use crate::model::{IndexRecord, Metadata, NewRecord, SearchHit, DEFAULT_NAMESPACE};

#[derive(Debug, thiserror::Error)]
pub enum GroundworkError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

/// The index, the retriever over it, and the result cache, wired from one
/// config. Cheap to clone.
#[derive(Clone)]
pub struct Groundwork {
    pub index: Arc<VectorIndex>,
    pub retriever: Arc<dyn Retriever>,
    pub consensus: ConsensusCache,
    retrieval: RetrievalConfig,
}

impl fmt::Debug for Groundwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Groundwork")
            .field("index", &self.index)
            .field("embeddings", &self.retriever.is_enabled())
            .field("cache", &self.consensus.store_handle())
            .finish()
    }
}

impl Groundwork {
    pub fn from_config(config: &AppConfig, registry: &BackendRegistry) -> Result<Self, GroundworkError> {
        let index = Arc::new(VectorIndex::load(&config.index.path, config.index.dimension)?);
        let embedder = embedder_from_config(config.embeddings.as_ref())?;
        let retriever = retriever_from(embedder, index.clone());
        let cache = CacheStore::from_config(&config.cache, registry)?;

        info!(
            records = index.len(),
            embeddings = retriever.is_enabled(),
            cache = cache.backend_name(),
            "groundwork ready"
        );

        Ok(Self {
            index,
            retriever,
            consensus: ConsensusCache::new(cache),
            retrieval: config.retrieval.clone(),
        })
    }

    pub fn cache(&self) -> &CacheStore {
        self.consensus.store_handle()
    }

    /// Best-effort grounding block for a prompt: the most relevant stored
    /// chunks in `namespace`, bounded by the configured size. Empty when
    /// retrieval is disabled or fails.
    pub async fn context_for(&self, query: &str, namespace: Option<&str>) -> String {
        let chunks = self
            .retriever
            .retrieve_relevant_chunks(query, namespace, self.retrieval.top_k)
            .await;
        format_context(&chunks, self.retrieval.max_context_chars)
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            index: self.index.clone(),
            retriever: self.retriever.clone(),
            cache: self.cache().clone(),
            default_top_k: self.retrieval.top_k,
        }
    }
}
