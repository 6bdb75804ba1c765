use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tracing::{debug, warn};

use super::{CacheBackend, CacheError, CacheResult};

/// Client for an HTTP key-value service speaking
/// `GET | PUT | DELETE {base}/cache?key=<key>`, with `PUT ...&ttl=<secs>` so
/// the service expires entries itself.
///
/// An unreachable or misbehaving service is indistinguishable from an empty
/// cache: every failure is logged and reported as a miss (or a dropped write).
#[derive(Debug, Clone)]
pub struct RemoteCache {
    base: Url,
    client: reqwest::Client,
}

impl RemoteCache {
    pub fn new(base_url: &str, timeout: Duration) -> CacheResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| CacheError::InvalidConfig(format!("remote url '{}': {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(CacheError::InvalidConfig(format!(
                "remote url '{}' cannot hold a path",
                base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| CacheError::InvalidConfig(e.to_string()))?;
        Ok(Self { base, client })
    }

    fn url_for(&self, key: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("cache");
        }
        url.query_pairs_mut().clear().append_pair("key", key);
        url
    }
}

#[async_trait]
impl CacheBackend for RemoteCache {
    fn name(&self) -> &str {
        "remote"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let resp = match self.client.get(self.url_for(key)).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(key, error = %e, "remote cache unreachable, treating as miss");
                return Ok(None);
            }
        };

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => match resp.json::<Value>().await {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!(key, error = %e, "remote cache returned an unreadable body");
                    Ok(None)
                }
            },
            status => {
                warn!(key, %status, "remote cache lookup failed");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Value, ttl_seconds: i64) -> CacheResult<()> {
        let result = self
            .client
            .put(self.url_for(key))
            .query(&[("ttl", ttl_seconds.to_string())])
            .json(&value)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(key, ttl_seconds, "remote cache stored entry");
            }
            Ok(resp) => warn!(key, status = %resp.status(), "remote cache rejected write"),
            Err(e) => warn!(key, error = %e, "remote cache unreachable, write dropped"),
        }
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> CacheResult<()> {
        match self.client.delete(self.url_for(key)).send().await {
            Ok(resp) if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND => {}
            Ok(resp) => warn!(key, status = %resp.status(), "remote cache rejected invalidate"),
            Err(e) => warn!(key, error = %e, "remote cache unreachable, invalidate dropped"),
        }
        Ok(())
    }
}
