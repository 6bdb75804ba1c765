use std::thread;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;

/// Runtime sizing picked from the host.
#[derive(Debug, Clone)]
pub struct SystemProfile {
    pub logical_cores: usize,
    pub worker_threads: usize,
    /// Concurrent blocking tasks (index writes, file cache I/O)
    pub max_blocking_threads: usize,
}

impl SystemProfile {
    pub fn detect() -> Self {
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::for_cores(cores)
    }

    pub fn for_cores(cores: usize) -> Self {
        let cores = cores.max(1);
        if cores <= 1 {
            // One for the reactor, one for handlers.
            Self {
                logical_cores: cores,
                worker_threads: 2,
                max_blocking_threads: 4,
            }
        } else {
            Self {
                logical_cores: cores,
                worker_threads: cores,
                max_blocking_threads: (cores * 4).min(128),
            }
        }
    }
}

/// Periodically drops expired cache entries. Reads already ignore them; this
/// only reclaims space.
///
/// A zero interval disables the sweep and the task exits immediately.
pub fn start_sweep_task(cache: CacheStore, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        if every.is_zero() {
            debug!("cache sweep disabled");
            return;
        }
        info!(backend = cache.backend_name(), every_secs = every.as_secs(), "cache sweep started");

        let mut ticker = tokio::time::interval(every);
        // First tick fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match cache.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "swept expired cache entries"),
                Err(e) => warn!(error = %e, "cache sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_core_hosts_still_get_two_workers() {
        assert_eq!(SystemProfile::for_cores(0).worker_threads, 2);
        assert_eq!(SystemProfile::for_cores(1).worker_threads, 2);
        let big = SystemProfile::for_cores(64);
        assert_eq!(big.worker_threads, 64);
        assert_eq!(big.max_blocking_threads, 128);
    }

    #[tokio::test]
    async fn sweep_purges_expired_entries() {
        let cache = CacheStore::in_memory(60);
        cache.set("short", json!(1), Some(1)).await.unwrap();
        cache.set("kept", json!(2), Some(0)).await.unwrap();

        let handle = start_sweep_task(cache.clone(), Duration::from_millis(200));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.abort();

        // Already purged, so nothing left for a manual pass.
        assert_eq!(cache.purge_expired().await.unwrap(), 0);
        assert_eq!(cache.get("kept").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn zero_interval_exits() {
        let handle = start_sweep_task(CacheStore::in_memory(60), Duration::ZERO);
        handle.await.unwrap();
    }
}
