//! Process-wide backpressure on the external services.
//!
//! One semaphore per service, shared by every concurrent run. A run waits for
//! a permit before each embed/search/generate call; nothing else blocks
//! across runs.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ConcurrencyConfig;

#[derive(Debug, Clone)]
pub struct ServiceLimits {
    embeddings: Arc<Semaphore>,
    searches: Arc<Semaphore>,
    generations: Arc<Semaphore>,
}

impl ServiceLimits {
    pub fn new(config: &ConcurrencyConfig) -> Self {
        Self {
            embeddings: Arc::new(Semaphore::new(config.max_concurrent_embeddings.max(1))),
            searches: Arc::new(Semaphore::new(config.max_concurrent_searches.max(1))),
            generations: Arc::new(Semaphore::new(config.max_concurrent_generations.max(1))),
        }
    }

    pub async fn embedding(&self) -> Result<OwnedSemaphorePermit> {
        Self::acquire(&self.embeddings, "embedding").await
    }

    pub async fn search(&self) -> Result<OwnedSemaphorePermit> {
        Self::acquire(&self.searches, "search").await
    }

    pub async fn generation(&self) -> Result<OwnedSemaphorePermit> {
        Self::acquire(&self.generations, "generation").await
    }

    async fn acquire(semaphore: &Arc<Semaphore>, service: &str) -> Result<OwnedSemaphorePermit> {
        semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| anyhow!("{} limiter closed: {}", service, e))
    }
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self::new(&ConcurrencyConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permits_bound_concurrency() {
        let config = ConcurrencyConfig {
            max_concurrent_generations: 1,
            ..ConcurrencyConfig::default()
        };
        let limits = ServiceLimits::new(&config);

        let first = limits.generation().await.unwrap();
        assert_eq!(limits.generations.available_permits(), 0);
        drop(first);
        assert_eq!(limits.generations.available_permits(), 1);

        let clone = limits.clone();
        let _held = clone.search().await.unwrap();
        assert_eq!(
            limits.searches.available_permits(),
            config.max_concurrent_searches - 1
        );
    }
}
