use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct LocalEntry {
    payload: String,
    expires_at: Option<Instant>,
}

impl LocalEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// In-process cache tier: a shared map of serialized values with per-entry
/// TTL. Expired entries are invisible to readers and purged on write.
#[derive(Debug, Clone, Default)]
pub struct LocalCache {
    inner: Arc<RwLock<HashMap<String, LocalEntry>>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let map = self.inner.read().await;
        let entry = map.get(key)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(entry.payload.clone())
    }

    pub async fn set(&self, key: &str, payload: String, ttl: Option<Duration>) {
        let now = Instant::now();
        let mut map = self.inner.write().await;
        // purge expired
        map.retain(|_, entry| !entry.is_expired(now));
        map.insert(
            key.to_string(),
            LocalEntry {
                payload,
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
    }

    pub async fn remove(&self, key: &str) {
        let mut map = self.inner.write().await;
        map.remove(key);
    }

    pub async fn exists(&self, key: &str) -> bool {
        let map = self.inner.read().await;
        match map.get(key) {
            Some(entry) => !entry.is_expired(Instant::now()),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = LocalCache::new();
        cache.set("k", "\"v\"".to_string(), None).await;
        assert_eq!(cache.get("k").await, Some("\"v\"".to_string()));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let cache = LocalCache::new();
        assert_eq!(cache.get("absent").await, None);
        assert!(!cache.exists("absent").await);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = LocalCache::new();
        cache
            .set("k", "1".to_string(), Some(Duration::from_millis(30)))
            .await;
        assert!(cache.exists("k").await);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("k").await, None);
        assert!(!cache.exists("k").await);
    }

    #[tokio::test]
    async fn test_expired_entries_purged_on_write() {
        let cache = LocalCache::new();
        cache
            .set("old", "1".to_string(), Some(Duration::from_millis(10)))
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        cache.set("new", "2".to_string(), None).await;
        let map = cache.inner.read().await;
        assert!(!map.contains_key("old"));
        assert!(map.contains_key("new"));
    }

    #[tokio::test]
    async fn test_remove() {
        let cache = LocalCache::new();
        cache.set("k", "1".to_string(), None).await;
        cache.remove("k").await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let cache = LocalCache::new();
        let cloned = cache.clone();
        cloned.set("k", "1".to_string(), None).await;
        assert_eq!(cache.get("k").await, Some("1".to_string()));
    }
}
