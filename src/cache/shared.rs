use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("shared store backend error: {0}")]
    Backend(String),
    #[error("shared store request timed out")]
    Timeout,
}

/// Cross-process cache tier. Implementations wrap an external key/value
/// store (Redis or similar) that owns its own consistency model; values are
/// JSON strings so every tier round-trips the same bytes. Calls are expected
/// to carry their own timeouts and fail fast rather than hang a request.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(
        &self,
        key: &str,
        payload: String,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
}

/// In-memory stand-in for the external store, used by tests and the demo
/// binary. Honors per-entry TTL the way a real backend would.
#[derive(Debug, Clone, Default)]
pub struct MemorySharedStore {
    inner: Arc<RwLock<HashMap<String, (String, Option<Instant>)>>>,
}

impl MemorySharedStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedStore for MemorySharedStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let map = self.inner.read().await;
        Ok(map.get(key).and_then(|(payload, expires_at)| {
            match expires_at {
                Some(at) if *at <= Instant::now() => None,
                _ => Some(payload.clone()),
            }
        }))
    }

    async fn set(
        &self,
        key: &str,
        payload: String,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut map = self.inner.write().await;
        map.retain(|_, (_, expires_at)| !matches!(expires_at, Some(at) if *at <= now));
        map.insert(key.to_string(), (payload, ttl.map(|ttl| now + ttl)));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut map = self.inner.write().await;
        map.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemorySharedStore::new();
        store.set("k", "\"v\"".to_string(), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("\"v\"".to_string()));
        assert!(store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemorySharedStore::new();
        store
            .set("k", "1".to_string(), Some(Duration::from_millis(30)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemorySharedStore::new();
        store.set("k", "1".to_string(), None).await.unwrap();
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
