// Leaderboard Cache Module
// Short-TTL read-through cache with request coalescing: concurrent callers
// share a single upstream fetch instead of each issuing their own. On a
// failed refresh the last good value is served as long as one exists.
//
// Instances are constructed once at startup and handed out through the
// shared app state. No module-level globals.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};

struct CacheSlot<T> {
    value: Option<Arc<T>>,
    fetched_at: Option<Instant>,
    version: u64,
}

pub struct CacheManager<T> {
    name: &'static str,
    ttl: Duration,
    slot: RwLock<CacheSlot<T>>,
    // Serializes refreshes. Readers of an already-fresh value never touch it.
    refresh_lock: Mutex<()>,
}

impl<T> CacheManager<T> {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            slot: RwLock::new(CacheSlot {
                value: None,
                fetched_at: None,
                version: 1,
            }),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Returns the cached value if fresh, otherwise runs `fetch` to refresh it.
    /// Concurrent stale callers queue on the refresh lock; whoever gets it
    /// first fetches, the rest find the fresh value on the double-check and
    /// return without an upstream call.
    pub async fn get_or_fetch<F, Fut, E>(&self, force_refresh: bool, fetch: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if !force_refresh {
            if let Some(value) = self.fresh_value().await {
                return Ok(value);
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // Double-check after acquiring the lock: another caller may have
        // refreshed while we waited.
        if !force_refresh {
            if let Some(value) = self.fresh_value().await {
                tracing::debug!("{} cache refreshed while waiting, reusing it", self.name);
                return Ok(value);
            }
        }

        match fetch().await {
            Ok(value) => {
                let value = Arc::new(value);
                let mut slot = self.slot.write().await;
                slot.value = Some(value.clone());
                slot.fetched_at = Some(Instant::now());
                slot.version += 1;
                tracing::debug!("{} cache updated to version {}", self.name, slot.version);
                Ok(value)
            }
            Err(err) => {
                let slot = self.slot.read().await;
                match &slot.value {
                    Some(stale) => {
                        tracing::warn!(
                            "{} fetch failed ({}), serving stale cache",
                            self.name,
                            err
                        );
                        Ok(stale.clone())
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Last known value regardless of freshness. Never waits on a refresh.
    pub async fn peek(&self) -> Option<Arc<T>> {
        self.slot.read().await.value.clone()
    }

    /// Forces the next `get_or_fetch` to go upstream.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.write().await;
        slot.fetched_at = None;
        slot.version += 1;
        tracing::debug!("{} cache invalidated", self.name);
    }

    /// Replaces the cached value without fetching.
    pub async fn update(&self, value: T) {
        let mut slot = self.slot.write().await;
        slot.value = Some(Arc::new(value));
        slot.fetched_at = Some(Instant::now());
        slot.version += 1;
    }

    pub async fn version(&self) -> u64 {
        self.slot.read().await.version
    }

    /// Time since the last successful refresh, if any.
    pub async fn age(&self) -> Option<Duration> {
        self.slot.read().await.fetched_at.map(|at| at.elapsed())
    }

    pub async fn is_fresh(&self) -> bool {
        self.fresh_value().await.is_some()
    }

    async fn fresh_value(&self) -> Option<Arc<T>> {
        let slot = self.slot.read().await;
        match (&slot.value, slot.fetched_at) {
            (Some(value), Some(at)) if at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_fetches_share_one_upstream_call() {
        let cache = Arc::new(CacheManager::new("test", Duration::from_secs(30)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(false, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, String>(42u32)
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(*handle.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    async fn no_fetch() -> Result<u32, String> {
        panic!("should not fetch while fresh")
    }

    #[tokio::test]
    async fn fresh_value_skips_upstream() {
        let cache = CacheManager::new("test", Duration::from_secs(30));
        cache.update(1u32).await;

        let value = cache.get_or_fetch(false, no_fetch).await.unwrap();
        assert_eq!(*value, 1);
    }

    #[tokio::test]
    async fn stale_value_served_when_fetch_fails() {
        let cache = CacheManager::new("test", Duration::from_secs(30));
        cache.update(7u32).await;
        cache.invalidate().await;

        let value = cache
            .get_or_fetch(false, || async move { Err::<u32, String>("down".into()) })
            .await
            .unwrap();
        assert_eq!(*value, 7);
    }

    #[tokio::test]
    async fn error_propagates_when_cache_is_cold() {
        let cache: CacheManager<u32> = CacheManager::new("test", Duration::from_secs(30));

        let result = cache
            .get_or_fetch(false, || async move { Err::<u32, String>("down".into()) })
            .await;
        assert_eq!(result.unwrap_err(), "down");
    }

    #[tokio::test]
    async fn ttl_expiry_triggers_refetch() {
        let cache = CacheManager::new("test", Duration::from_millis(10));
        cache.update(1u32).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!cache.is_fresh().await);

        let value = cache
            .get_or_fetch(false, || async move { Ok::<_, String>(2u32) })
            .await
            .unwrap();
        assert_eq!(*value, 2);
    }

    #[tokio::test]
    async fn force_refresh_goes_upstream_even_when_fresh() {
        let cache = CacheManager::new("test", Duration::from_secs(30));
        cache.update(1u32).await;
        let before = cache.version().await;

        let value = cache
            .get_or_fetch(true, || async move { Ok::<_, String>(2u32) })
            .await
            .unwrap();
        assert_eq!(*value, 2);
        assert!(cache.version().await > before);
    }
}
