//! Query text in, ranked stored chunks out.
//!
//! Whether embeddings exist is decided once, in [`retriever_from`]: callers
//! always hold an `Arc<dyn Retriever>` and never branch on configuration.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embedding::{Embedder, EmbeddingError};
use crate::index::{IndexError, VectorStore};
use crate::model::{Metadata, NewRecord, DEFAULT_NAMESPACE};

/// Separator between chunks in [`format_context`] output.
pub const CONTEXT_DELIMITER: &str = "\n\n---\n\n";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub id: u64,
    pub text: String,
    pub score: f32,
    pub namespace: String,
    pub metadata: Metadata,
}

pub type RetrievalResult<T> = Result<T, RetrievalError>;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("embeddings are disabled: configure an `embeddings` section to enable retrieval")]
    Disabled,

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("{0}")]
    InvalidInput(String),

    #[error("index task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait Retriever: Send + Sync {
    fn is_enabled(&self) -> bool;

    async fn embed(&self, texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>>;

    /// Embeds `texts` and stores them in one all-or-nothing batch.
    async fn embed_and_store(
        &self,
        texts: &[String],
        namespace: Option<&str>,
        metadata: Metadata,
    ) -> RetrievalResult<Vec<u64>>;

    async fn search(
        &self,
        query: &str,
        namespace: Option<&str>,
        top_k: usize,
    ) -> RetrievalResult<Vec<RetrievedChunk>>;

    /// Best-effort [`Retriever::search`]: any failure is logged and becomes an
    /// empty result, so callers can carry on ungrounded.
    async fn retrieve_relevant_chunks(
        &self,
        query: &str,
        namespace: Option<&str>,
        top_k: usize,
    ) -> Vec<RetrievedChunk> {
        match self.search(query, namespace, top_k).await {
            Ok(chunks) => chunks,
            Err(RetrievalError::Disabled) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "retrieval failed, continuing without context");
                Vec::new()
            }
        }
    }
}

/// Pick the retriever once at startup.
pub fn retriever_from(
    embedder: Option<Arc<dyn Embedder>>,
    index: Arc<dyn VectorStore>,
) -> Arc<dyn Retriever> {
    match embedder {
        Some(embedder) => Arc::new(GroundedRetriever::new(embedder, index)),
        None => {
            warn!("no embedding provider configured; retrieval is disabled");
            Arc::new(DisabledRetriever)
        }
    }
}

pub struct GroundedRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorStore>,
}

impl GroundedRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorStore>) -> Self {
        Self { embedder, index }
    }
}

#[async_trait]
impl Retriever for GroundedRetriever {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn embed(&self, texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(RetrievalError::InvalidInput(
                "texts must not contain empty strings".to_string(),
            ));
        }
        Ok(self.embedder.embed_batch(texts).await?)
    }

    async fn embed_and_store(
        &self,
        texts: &[String],
        namespace: Option<&str>,
        metadata: Metadata,
    ) -> RetrievalResult<Vec<u64>> {
        let vectors = self.embed(texts).await?;
        let namespace = namespace.unwrap_or(DEFAULT_NAMESPACE);
        let records: Vec<NewRecord> = texts
            .iter()
            .zip(vectors)
            .map(|(text, vector)| {
                NewRecord::new(text.clone(), vector)
                    .in_namespace(namespace)
                    .with_metadata(metadata.clone())
            })
            .collect();

        // Inserting persists to disk.
        let index = self.index.clone();
        let ids = tokio::task::spawn_blocking(move || index.insert_batch(records)).await??;
        debug!(count = ids.len(), namespace, "stored embedded chunks");
        Ok(ids)
    }

    async fn search(
        &self,
        query: &str,
        namespace: Option<&str>,
        top_k: usize,
    ) -> RetrievalResult<Vec<RetrievedChunk>> {
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidInput("query must not be empty".to_string()));
        }
        let vector = self.embedder.embed(query).await?;
        let hits = self.index.search(&vector, namespace, top_k)?;
        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                id: hit.id,
                text: hit.text,
                score: hit.score,
                namespace: hit.namespace,
                metadata: hit.metadata,
            })
            .collect())
    }
}

/// Stand-in when no provider is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledRetriever;

#[async_trait]
impl Retriever for DisabledRetriever {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn embed(&self, _texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>> {
        Err(RetrievalError::Disabled)
    }

    async fn embed_and_store(
        &self,
        _texts: &[String],
        _namespace: Option<&str>,
        _metadata: Metadata,
    ) -> RetrievalResult<Vec<u64>> {
        Err(RetrievalError::Disabled)
    }

    async fn search(
        &self,
        _query: &str,
        _namespace: Option<&str>,
        _top_k: usize,
    ) -> RetrievalResult<Vec<RetrievedChunk>> {
        Err(RetrievalError::Disabled)
    }
}

/// Join chunk texts with [`CONTEXT_DELIMITER`], best first, within
/// `max_chars` characters.
///
/// Chunks that do not fit are dropped lowest score first (higher id first on
/// ties). If even the best chunk alone is too long it is cut at a char
/// boundary.
pub fn format_context(chunks: &[RetrievedChunk], max_chars: usize) -> String {
    if max_chars == 0 || chunks.is_empty() {
        return String::new();
    }

    let mut ranked: Vec<&RetrievedChunk> = chunks.iter().collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));

    let delimiter_len = CONTEXT_DELIMITER.chars().count();
    let mut total = ranked
        .iter()
        .map(|c| c.text.chars().count())
        .sum::<usize>()
        + delimiter_len * (ranked.len() - 1);
    while total > max_chars && ranked.len() > 1 {
        if let Some(dropped) = ranked.pop() {
            total -= dropped.text.chars().count() + delimiter_len;
        }
    }

    if total > max_chars {
        return ranked[0].text.chars().take(max_chars).collect();
    }

    ranked
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingResult, HashedEmbedder};
    use crate::index::VectorIndex;

    fn chunk(id: u64, text: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            id,
            text: text.to_string(),
            score,
            namespace: DEFAULT_NAMESPACE.to_string(),
            metadata: Metadata::new(),
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn label(&self) -> &str {
            "failing"
        }

        fn dimension(&self) -> Option<usize> {
            None
        }

        async fn embed_batch(&self, _texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
            Err(EmbeddingError::InvalidResponse("boom".to_string()))
        }
    }

    fn scratch_index() -> (tempfile::TempDir, Arc<VectorIndex>) {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::load(dir.path().join("index.json"), None).unwrap();
        (dir, Arc::new(index))
    }

    #[test]
    fn context_keeps_best_chunks_first() {
        let chunks = vec![chunk(0, "low", 0.1), chunk(1, "high", 0.9), chunk(2, "mid", 0.5)];
        assert_eq!(
            format_context(&chunks, 1000),
            format!("high{d}mid{d}low", d = CONTEXT_DELIMITER)
        );
    }

    #[test]
    fn context_drops_lowest_scores_to_fit() {
        let chunks = vec![
            chunk(0, "aaaaaaaaaa", 0.9),
            chunk(1, "bbbbbbbbbb", 0.2),
            chunk(2, "cccccccccc", 0.5),
        ];
        let budget = 20 + CONTEXT_DELIMITER.len();
        assert_eq!(
            format_context(&chunks, budget),
            format!("aaaaaaaaaa{}cccccccccc", CONTEXT_DELIMITER)
        );
    }

    #[test]
    fn context_truncates_single_oversized_chunk() {
        let chunks = vec![chunk(0, "héllo wörld", 1.0)];
        assert_eq!(format_context(&chunks, 5), "héllo");
        assert_eq!(format_context(&chunks, 0), "");
        assert_eq!(format_context(&[], 100), "");
    }

    #[test]
    fn context_ties_drop_higher_id() {
        let chunks = vec![chunk(4, "later", 0.5), chunk(3, "first", 0.5)];
        assert_eq!(format_context(&chunks, 5), "first");
    }

    #[tokio::test]
    async fn disabled_retriever_degrades_to_empty() {
        let retriever = DisabledRetriever;
        assert!(!retriever.is_enabled());
        assert!(retriever.retrieve_relevant_chunks("anything", None, 3).await.is_empty());
        assert!(matches!(
            retriever.search("anything", None, 3).await,
            Err(RetrievalError::Disabled)
        ));
    }

    #[tokio::test]
    async fn grounded_retriever_stores_and_finds() {
        let (_dir, index) = scratch_index();
        let retriever = retriever_from(Some(Arc::new(HashedEmbedder::new(256))), index.clone());
        assert!(retriever.is_enabled());

        let texts = vec![
            "the sky is blue".to_string(),
            "grass is green".to_string(),
        ];
        let ids = retriever
            .embed_and_store(&texts, Some("ns1"), Metadata::new())
            .await
            .unwrap();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(index.len(), 2);

        let chunks = retriever.retrieve_relevant_chunks("blue sky", Some("ns1"), 1).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "the sky is blue");

        assert!(retriever
            .retrieve_relevant_chunks("blue sky", Some("elsewhere"), 5)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn provider_failure_is_best_effort() {
        let (_dir, index) = scratch_index();
        let retriever = GroundedRetriever::new(Arc::new(FailingEmbedder), index);
        assert!(retriever.retrieve_relevant_chunks("q", None, 3).await.is_empty());
        assert!(matches!(
            retriever.search("q", None, 3).await,
            Err(RetrievalError::Embedding(_))
        ));
    }

    #[tokio::test]
    async fn empty_inputs_are_rejected() {
        let (_dir, index) = scratch_index();
        let retriever = GroundedRetriever::new(Arc::new(HashedEmbedder::new(16)), index);
        assert!(matches!(
            retriever.search("   ", None, 3).await,
            Err(RetrievalError::InvalidInput(_))
        ));
        assert!(matches!(
            retriever.embed(&["ok".to_string(), "".to_string()]).await,
            Err(RetrievalError::InvalidInput(_))
        ));
    }
}
