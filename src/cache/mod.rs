pub mod local;
pub mod shared;

pub use local::LocalCache;
pub use shared::{MemorySharedStore, SharedStore, StoreError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Which cache tier an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    Local,
    Shared,
    Both,
}

impl CacheScope {
    fn includes_local(self) -> bool {
        matches!(self, CacheScope::Local | CacheScope::Both)
    }

    fn includes_shared(self) -> bool {
        matches!(self, CacheScope::Shared | CacheScope::Both)
    }
}

/// Two-tier cache: a fast Local map in front of the Shared store.
///
/// `Both` reads check Local first and promote Shared hits into Local;
/// `Both` writes hit both tiers with the same TTL, with no atomicity between
/// them. Shared-store failures are logged and treated as misses, so a remote
/// outage degrades lookups instead of stalling requests. Local tiers on
/// sibling processes are never invalidated remotely; they converge by TTL.
#[derive(Clone)]
pub struct CacheService {
    local: LocalCache,
    shared: Arc<dyn SharedStore>,
    promotion_ttl: Duration,
}

const DEFAULT_PROMOTION_TTL: Duration = Duration::from_secs(60);

impl CacheService {
    pub fn new(shared: Arc<dyn SharedStore>) -> Self {
        Self {
            local: LocalCache::new(),
            shared,
            promotion_ttl: DEFAULT_PROMOTION_TTL,
        }
    }

    /// Bound on how long a value promoted from the Shared tier may live in
    /// Local. Keeps cross-process staleness finite for `Both`-scope readers.
    pub fn with_promotion_ttl(mut self, ttl: Duration) -> Self {
        self.promotion_ttl = ttl;
        self
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str, scope: CacheScope) -> Option<T> {
        if scope.includes_local() {
            if let Some(payload) = self.local.get(key).await {
                return decode(key, &payload);
            }
        }

        if scope.includes_shared() {
            let payload = match self.shared.get(key).await {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(key, error = %err, "shared cache read failed, treating as miss");
                    None
                }
            }?;

            if scope == CacheScope::Both {
                self.local
                    .set(key, payload.clone(), Some(self.promotion_ttl))
                    .await;
            }
            return decode(key, &payload);
        }

        None
    }

    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        scope: CacheScope,
    ) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(key, error = %err, "failed to serialize cache value");
                return;
            }
        };

        if scope.includes_local() {
            self.local.set(key, payload.clone(), ttl).await;
        }

        if scope.includes_shared() {
            if let Err(err) = self.shared.set(key, payload, ttl).await {
                warn!(key, error = %err, "shared cache write failed");
            }
        }
    }

    pub async fn remove(&self, key: &str, scope: CacheScope) {
        if scope.includes_local() {
            self.local.remove(key).await;
        }

        if scope.includes_shared() {
            if let Err(err) = self.shared.remove(key).await {
                warn!(key, error = %err, "shared cache remove failed");
            }
        }
    }

    pub async fn exists(&self, key: &str, scope: CacheScope) -> bool {
        if scope.includes_local() && self.local.exists(key).await {
            return true;
        }

        if scope.includes_shared() {
            match self.shared.exists(key).await {
                Ok(found) => return found,
                Err(err) => {
                    warn!(key, error = %err, "shared cache exists failed, treating as miss");
                }
            }
        }

        false
    }
}

fn decode<T: DeserializeOwned>(key: &str, payload: &str) -> Option<T> {
    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, error = %err, "failed to decode cached value");
            None
        }
    }
}
