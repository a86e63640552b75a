use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheScope, CacheService};
use crate::security::directory::Directory;

/// Subject id 1 bypasses every permission check and resolves to the full
/// menu-permission universe.
pub const SUPER_ADMIN_ID: u64 = 1;

const EPOCH_KEY: &str = "permission:epoch";

fn permission_set_key(subject_id: u64, epoch: i64) -> String {
    format!("permission:user:{subject_id}:{epoch}")
}

/// Resolves and caches per-subject permission sets, invalidated wholesale by
/// bumping an epoch counter. Permission sets are keyed by `(subject, epoch)`,
/// so a bump makes every cached set unreachable without enumerating keys;
/// orphaned entries simply age out by TTL.
pub struct PermissionService {
    cache: Arc<CacheService>,
    directory: Arc<dyn Directory>,
    set_ttl: Duration,
    epoch_ttl: Duration,
}

impl PermissionService {
    /// Both TTLs must stay comfortably below the credential lifetime so
    /// sibling processes converge before any stale decision can outlive the
    /// session that produced it.
    pub fn new(
        cache: Arc<CacheService>,
        directory: Arc<dyn Directory>,
        set_ttl: Duration,
        epoch_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            directory,
            set_ttl,
            epoch_ttl,
        }
    }

    /// Current permission epoch, establishing one if none exists. Zero means
    /// "unset" and is never returned.
    pub async fn current_epoch(&self) -> i64 {
        match self.cache.get::<i64>(EPOCH_KEY, CacheScope::Both).await {
            Some(epoch) if epoch != 0 => epoch,
            _ => self.bump_epoch().await,
        }
    }

    /// Establish a new epoch strictly greater than the previous one. Must be
    /// called after any mutation of role, role-permission, or menu data.
    pub async fn bump_epoch(&self) -> i64 {
        let previous = self
            .cache
            .get::<i64>(EPOCH_KEY, CacheScope::Both)
            .await
            .unwrap_or(0);
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let epoch = now.max(previous + 1);
        self.cache
            .set(EPOCH_KEY, &epoch, Some(self.epoch_ttl), CacheScope::Both)
            .await;
        epoch
    }

    /// Permission set for a subject under the current epoch. Subjects with no
    /// roles resolve to an empty set, which is cached like any other so the
    /// directory is not hit again within the epoch.
    pub async fn permissions_for(&self, subject_id: u64) -> Result<Vec<String>> {
        let epoch = self.current_epoch().await;
        let key = permission_set_key(subject_id, epoch);

        if let Some(cached) = self.cache.get::<Vec<String>>(&key, CacheScope::Local).await {
            return Ok(cached);
        }

        let permissions = if subject_id == SUPER_ADMIN_ID {
            self.directory.all_menu_permissions().await?
        } else {
            let role_ids = self.directory.role_ids_for_user(subject_id).await?;
            if role_ids.is_empty() {
                Vec::new()
            } else {
                self.directory.permissions_for_roles(&role_ids).await?
            }
        };

        self.cache
            .set(&key, &permissions, Some(self.set_ttl), CacheScope::Local)
            .await;

        Ok(permissions)
    }

    pub async fn has_permission(&self, subject_id: u64, permission: &str) -> Result<bool> {
        if subject_id == SUPER_ADMIN_ID {
            return Ok(true);
        }
        let permissions = self.permissions_for(subject_id).await?;
        Ok(permissions.iter().any(|p| p == permission))
    }
}
