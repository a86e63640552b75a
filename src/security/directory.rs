use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// User row as exposed by the surrounding storage layer.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: u64,
    pub username: String,
    pub nickname: String,
    pub password_hash: String,
    pub is_active: bool,
}

/// Seam to the relational layer this crate treats as external: user lookup,
/// role membership, role permissions, and the full menu-permission universe.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn user_by_id(&self, id: u64) -> Result<Option<UserRecord>>;
    async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>>;
    async fn role_ids_for_user(&self, id: u64) -> Result<Vec<u64>>;
    async fn role_names(&self, role_ids: &[u64]) -> Result<Vec<String>>;
    async fn permissions_for_roles(&self, role_ids: &[u64]) -> Result<Vec<String>>;
    async fn all_menu_permissions(&self) -> Result<Vec<String>>;
    async fn update_password_hash(&self, id: u64, password_hash: String) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct RoleRecord {
    pub name: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Default)]
struct DirectoryData {
    users: Vec<UserRecord>,
    roles: HashMap<u64, RoleRecord>,
    assignments: HashMap<u64, Vec<u64>>,
    menu_permissions: Vec<String>,
}

/// In-memory directory for tests and the demo binary. Counts role and
/// permission lookups so cache behavior is observable from tests.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    data: RwLock<DirectoryData>,
    role_lookups: AtomicU64,
    permission_lookups: AtomicU64,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: UserRecord) {
        let mut data = self.data.write().expect("directory lock poisoned");
        data.users.push(user);
    }

    pub fn add_role(&self, id: u64, name: &str, permissions: Vec<String>) {
        let mut data = self.data.write().expect("directory lock poisoned");
        data.roles.insert(
            id,
            RoleRecord {
                name: name.to_string(),
                permissions,
            },
        );
    }

    pub fn assign_roles(&self, user_id: u64, role_ids: Vec<u64>) {
        let mut data = self.data.write().expect("directory lock poisoned");
        data.assignments.insert(user_id, role_ids);
    }

    pub fn set_menu_permissions(&self, permissions: Vec<String>) {
        let mut data = self.data.write().expect("directory lock poisoned");
        data.menu_permissions = permissions;
    }

    pub fn role_lookup_count(&self) -> u64 {
        self.role_lookups.load(Ordering::Relaxed)
    }

    pub fn permission_lookup_count(&self) -> u64 {
        self.permission_lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn user_by_id(&self, id: u64) -> Result<Option<UserRecord>> {
        let data = self.data.read().expect("directory lock poisoned");
        Ok(data.users.iter().find(|u| u.id == id).cloned())
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let data = self.data.read().expect("directory lock poisoned");
        Ok(data.users.iter().find(|u| u.username == username).cloned())
    }

    async fn role_ids_for_user(&self, id: u64) -> Result<Vec<u64>> {
        self.role_lookups.fetch_add(1, Ordering::Relaxed);
        let data = self.data.read().expect("directory lock poisoned");
        Ok(data.assignments.get(&id).cloned().unwrap_or_default())
    }

    async fn role_names(&self, role_ids: &[u64]) -> Result<Vec<String>> {
        let data = self.data.read().expect("directory lock poisoned");
        Ok(role_ids
            .iter()
            .filter_map(|id| data.roles.get(id).map(|r| r.name.clone()))
            .collect())
    }

    async fn permissions_for_roles(&self, role_ids: &[u64]) -> Result<Vec<String>> {
        self.permission_lookups.fetch_add(1, Ordering::Relaxed);
        let data = self.data.read().expect("directory lock poisoned");
        let mut permissions: Vec<String> = Vec::new();
        for id in role_ids {
            if let Some(role) = data.roles.get(id) {
                for permission in &role.permissions {
                    if !permissions.contains(permission) {
                        permissions.push(permission.clone());
                    }
                }
            }
        }
        Ok(permissions)
    }

    async fn all_menu_permissions(&self) -> Result<Vec<String>> {
        let data = self.data.read().expect("directory lock poisoned");
        Ok(data.menu_permissions.clone())
    }

    async fn update_password_hash(&self, id: u64, password_hash: String) -> Result<()> {
        let mut data = self.data.write().expect("directory lock poisoned");
        let user = data
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| anyhow::anyhow!("no user with id {id}"))?;
        user.password_hash = password_hash;
        Ok(())
    }
}
