use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::cache::{CacheError, CacheStore};
use crate::embedding::EmbeddingError;
use crate::index::{IndexError, VectorIndex};
use crate::model::Metadata;
use crate::retrieval::{RetrievalError, Retriever};

/// Request bodies above this are refused before parsing.
const MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;

/// Texts per `/embed` call.
const MAX_EMBED_BATCH: usize = 512;

/// Everything a handler may touch.
#[derive(Clone)]
pub struct AppState {
    pub index: Arc<VectorIndex>,
    pub retriever: Arc<dyn Retriever>,
    pub cache: CacheStore,
    pub default_top_k: usize,
}

#[derive(Debug, Deserialize)]
struct EmbedRequest {
    texts: Vec<String>,
    #[serde(default)]
    store: bool,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CacheQuery {
    key: String,
    #[serde(default)]
    ttl: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    kind: &'a str,
    retryable: bool,
}

/// A failure already mapped onto its HTTP shape.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    retryable: bool,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            retryable: false,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(kind = self.kind, error = %self.message, "request failed");
        } else {
            debug!(kind = self.kind, error = %self.message, "request rejected");
        }
        let body = ErrorBody {
            error: &self.message,
            kind: self.kind,
            retryable: self.retryable,
        };
        warp::reply::with_status(warp::reply::json(&body), self.status).into_response()
    }
}

impl From<IndexError> for ApiError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::DimensionMismatch { .. } => {
                ApiError::new(StatusCode::BAD_REQUEST, "dimension_mismatch", e.to_string())
            }
            IndexError::InvalidVector(_) => ApiError::bad_request(e.to_string()),
            _ => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "persistence", e.to_string()),
        }
    }
}

impl From<EmbeddingError> for ApiError {
    fn from(e: EmbeddingError) -> Self {
        match e {
            EmbeddingError::Disabled => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "embeddings_disabled",
                e.to_string(),
            ),
            EmbeddingError::InvalidInput(_) => ApiError::bad_request(e.to_string()),
            _ => {
                let retryable = e.is_transient();
                let mut api = ApiError::new(StatusCode::BAD_GATEWAY, "embedding_failed", e.to_string());
                api.retryable = retryable;
                api
            }
        }
    }
}

impl From<RetrievalError> for ApiError {
    fn from(e: RetrievalError) -> Self {
        match e {
            RetrievalError::Disabled => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "embeddings_disabled",
                e.to_string(),
            ),
            RetrievalError::Embedding(inner) => inner.into(),
            RetrievalError::Index(inner) => inner.into(),
            RetrievalError::InvalidInput(message) => ApiError::bad_request(message),
            RetrievalError::Join(_) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string())
            }
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(e: CacheError) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "cache", e.to_string())
    }
}

fn respond<T: Serialize>(result: Result<T, ApiError>) -> Result<Response, Rejection> {
    Ok(match result {
        Ok(body) => warp::reply::json(&body).into_response(),
        Err(e) => e.into_response(),
    })
}

/// All routes, with rejections rendered as JSON errors.
///
/// Every route matches its path before its method, so an unknown path is a
/// 404 rather than a 405.
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    // POST /embed
    let embed = warp::path("embed")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(|req: EmbedRequest, state: AppState| async move { respond(embed_texts(req, state).await) });

    // POST /search
    let search = warp::path("search")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(|req: SearchRequest, state: AppState| async move { respond(search_text(req, state).await) });

    // GET /stats
    let stats = warp::path("stats")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .map(|state: AppState| {
            warp::reply::json(&json!({
                "records": state.index.len(),
                "dimension": state.index.dimension(),
                "namespaces": state.index.namespaces(),
                "path": state.index.path().display().to_string(),
            }))
        });

    // GET /health
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .map(|state: AppState| {
            warp::reply::json(&json!({
                "status": "ok",
                "embeddings": state.retriever.is_enabled(),
                "cache": state.cache.backend_name(),
            }))
        });

    // GET|PUT|DELETE /cache?key=..[&ttl=..]
    let cache_path = warp::path("cache").and(warp::path::end());

    let cache_get = cache_path
        .clone()
        .and(warp::get())
        .and(warp::query::<CacheQuery>())
        .and(with_cache(state.cache.clone()))
        .and_then(|q: CacheQuery, cache: CacheStore| async move {
            Ok::<_, Rejection>(match cache.get(&q.key).await {
                Ok(Some(value)) => warp::reply::json(&value).into_response(),
                Ok(None) => ApiError::new(StatusCode::NOT_FOUND, "not_found", "no such key").into_response(),
                Err(e) => ApiError::from(e).into_response(),
            })
        });

    let cache_put = cache_path
        .clone()
        .and(warp::put())
        .and(warp::query::<CacheQuery>())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json::<Value>())
        .and(with_cache(state.cache.clone()))
        .and_then(|q: CacheQuery, value: Value, cache: CacheStore| async move {
            Ok::<_, Rejection>(match cache.set(&q.key, value, q.ttl).await {
                Ok(()) => StatusCode::NO_CONTENT.into_response(),
                Err(e) => ApiError::from(e).into_response(),
            })
        });

    let cache_delete = cache_path
        .clone()
        .and(warp::delete())
        .and(warp::query::<CacheQuery>())
        .and(with_cache(state.cache.clone()))
        .and_then(|q: CacheQuery, cache: CacheStore| async move {
            Ok::<_, Rejection>(match cache.invalidate(&q.key).await {
                Ok(()) => StatusCode::NO_CONTENT.into_response(),
                Err(e) => ApiError::from(e).into_response(),
            })
        });

    embed
        .or(search)
        .or(stats)
        .or(health)
        .or(cache_get)
        .or(cache_put)
        .or(cache_delete)
        .recover(handle_rejection)
        .with(warp::trace::request())
}

/// Serve until `shutdown` resolves.
pub async fn serve<S>(state: AppState, addr: SocketAddr, shutdown: S) -> Result<(), warp::Error>
where
    S: Future<Output = ()> + Send + 'static,
{
    let (bound, server) = warp::serve(routes(state)).try_bind_with_graceful_shutdown(addr, shutdown)?;
    info!(addr = %bound, "groundwork listening");
    server.await;
    info!("server stopped");
    Ok(())
}

async fn embed_texts(req: EmbedRequest, state: AppState) -> Result<Value, ApiError> {
    if req.texts.is_empty() {
        return Err(ApiError::bad_request("texts must not be empty"));
    }
    if req.texts.len() > MAX_EMBED_BATCH {
        return Err(ApiError::bad_request(format!(
            "at most {} texts per request, got {}",
            MAX_EMBED_BATCH,
            req.texts.len()
        )));
    }

    if req.store {
        let ids = state
            .retriever
            .embed_and_store(&req.texts, req.namespace.as_deref(), req.metadata)
            .await?;
        Ok(json!({ "ids": ids }))
    } else {
        let vectors = state.retriever.embed(&req.texts).await?;
        Ok(json!({ "vectors": vectors }))
    }
}

async fn search_text(req: SearchRequest, state: AppState) -> Result<Value, ApiError> {
    let top_k = req.top_k.unwrap_or(state.default_top_k);
    let results = state
        .retriever
        .search(&req.query, req.namespace.as_deref(), top_k)
        .await?;
    Ok(json!({ "results": results }))
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let api = if err.is_not_found() {
        ApiError::new(StatusCode::NOT_FOUND, "not_found", "no such route")
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        ApiError::bad_request(e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        ApiError::bad_request(e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, "bad_request", "request body too large")
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some()
        || err.find::<warp::reject::LengthRequired>().is_some()
    {
        ApiError::bad_request("expected a JSON body with a content length")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        ApiError::new(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", "method not allowed")
    } else {
        error!(rejection = ?err, "unhandled rejection");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal error")
    };
    Ok(api.into_response())
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn with_cache(cache: CacheStore) -> impl Filter<Extract = (CacheStore,), Error = Infallible> + Clone {
    warp::any().map(move || cache.clone())
}
