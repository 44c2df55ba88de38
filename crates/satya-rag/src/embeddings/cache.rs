//! Process-wide embedding cache.
//!
//! Shared by every pipeline run. Reads go straight to the LRU; a miss takes a
//! per-key async lock so a given text is embedded by one caller at a time and
//! concurrent callers for the same text wait for that result.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::TextEmbedder;

pub struct CachedEmbedder {
    inner: Arc<dyn TextEmbedder>,
    cache: Arc<RwLock<lru::LruCache<String, Vec<f32>>>>,
    key_locks: KeyLocks,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn TextEmbedder>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Arc::new(RwLock::new(lru::LruCache::new(capacity))),
            key_locks: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn cached(&self, text: &str) -> Option<Vec<f32>> {
        // LruCache::get updates recency, so it needs the write lock.
        self.cache.write().get(text).cloned()
    }

    pub async fn embed_cached(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.cached(text) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }

        let key_lock = KeyLock::new(&self.key_locks, text);
        let _guard = key_lock.lock.lock().await;
        if let Some(hit) = self.cached(text) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let computed = self.inner.embed(text).await;
        if let Ok(vector) = &computed {
            self.cache.write().put(text.to_string(), vector.clone());
        }
        computed
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type KeyLocks = DashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Holds one clone of a per-key lock. On drop, including when the owning
/// future is cancelled, the map entry is removed once no other caller holds it.
struct KeyLock<'a> {
    locks: &'a KeyLocks,
    key: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> KeyLock<'a> {
    fn new(locks: &'a KeyLocks, key: &'a str) -> Self {
        let lock = locks.entry(key.to_string()).or_default().clone();
        Self { locks, key, lock }
    }
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        // Release our clone first so the count seen below is the map's plus
        // any other waiter's.
        drop(std::mem::take(&mut self.lock));
        self.locks
            .remove_if(self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[async_trait]
impl TextEmbedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_cached(text).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextEmbedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(vec![text.len() as f32, 1.0])
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn test_repeated_text_hits_cache() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedEmbedder::new(inner.clone(), 8);

        let a = cached.embed("module x").await.unwrap();
        let b = cached.embed("module x").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.hits(), 1);
        assert_eq!(cached.misses(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_compute_once_per_key() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cached = Arc::new(CachedEmbedder::new(inner.clone(), 8));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cached = cached.clone();
                tokio::spawn(async move { cached.embed("same text").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert!(cached.key_locks.is_empty());
    }

    struct StalledEmbedder;

    #[async_trait]
    impl TextEmbedder for StalledEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(vec![1.0])
        }

        fn dimension(&self) -> usize {
            1
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_embeds_release_key_locks() {
        let cached = Arc::new(CachedEmbedder::new(Arc::new(StalledEmbedder), 8));

        for i in 0..50 {
            let text = format!("text {i}");
            let result =
                tokio::time::timeout(Duration::from_millis(1), cached.embed_cached(&text)).await;
            assert!(result.is_err());
        }
        assert!(cached.key_locks.is_empty());

        // A waiter cancelled behind a running caller leaves no entry either.
        let runner = {
            let cached = cached.clone();
            tokio::spawn(async move { cached.embed_cached("shared").await })
        };
        tokio::task::yield_now().await;
        let waiter =
            tokio::time::timeout(Duration::from_millis(1), cached.embed_cached("shared")).await;
        assert!(waiter.is_err());
        assert_eq!(cached.key_locks.len(), 1);

        runner.await.unwrap().unwrap();
        assert!(cached.key_locks.is_empty());
        assert_eq!(cached.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recent() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedEmbedder::new(inner.clone(), 1);
        cached.embed("one").await.unwrap();
        cached.embed("two").await.unwrap();
        cached.embed("one").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(cached.len(), 1);
    }
}
