use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::error::ServiceError;
use crate::security::directory::Directory;
use crate::security::permission::{PermissionService, SUPER_ADMIN_ID};
use crate::security::token::{TokenService, DEFAULT_TOKEN_CONFIG};

pub const SUPER_ADMIN_ROLE_NAME: &str = "Super Admin";

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub id: u64,
    pub username: String,
    pub nickname: String,
    pub roles: Vec<String>,
}

/// Login, logout, and identity queries over the directory seam. All failures
/// the caller may act on are Business errors with fixed messages; nothing
/// here distinguishes "unknown user" from "wrong password".
pub struct AuthService {
    tokens: Arc<TokenService>,
    permissions: Arc<PermissionService>,
    directory: Arc<dyn Directory>,
}

impl AuthService {
    pub fn new(
        tokens: Arc<TokenService>,
        permissions: Arc<PermissionService>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self {
            tokens,
            permissions,
            directory,
        }
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ServiceError> {
        let user = self
            .directory
            .user_by_username(&request.username)
            .await
            .context("looking up user")?
            .ok_or_else(|| ServiceError::Business("invalid username or password".to_string()))?;

        let password_ok = bcrypt::verify(&request.password, &user.password_hash)
            .map_err(|_| ServiceError::Business("invalid username or password".to_string()))?;
        if !password_ok {
            return Err(ServiceError::Business(
                "invalid username or password".to_string(),
            ));
        }

        if !user.is_active {
            return Err(ServiceError::Business("user is disabled".to_string()));
        }

        let token = self
            .tokens
            .issue(user.id, DEFAULT_TOKEN_CONFIG)
            .await
            .map_err(|_| ServiceError::Business("login failed".to_string()))?;

        Ok(LoginResponse { token })
    }

    /// Best-effort from the caller's perspective: the outcome is a boolean,
    /// never an error.
    pub async fn logout(&self, credential: &str) -> bool {
        self.tokens.revoke(credential).await
    }

    /// Replace the caller's password after proving they know the current one.
    /// Existing sessions stay valid; only future logins use the new hash.
    pub async fn change_password(
        &self,
        user_id: u64,
        request: &ChangePasswordRequest,
    ) -> Result<(), ServiceError> {
        let user = self
            .directory
            .user_by_id(user_id)
            .await
            .context("looking up user")?
            .ok_or_else(|| ServiceError::Business("user not found".to_string()))?;

        let old_ok = bcrypt::verify(&request.old_password, &user.password_hash)
            .map_err(|_| ServiceError::Business("incorrect old password".to_string()))?;
        if !old_ok {
            return Err(ServiceError::Business(
                "incorrect old password".to_string(),
            ));
        }

        let hash = bcrypt::hash(&request.new_password, bcrypt::DEFAULT_COST)
            .context("hashing new password")?;
        self.directory
            .update_password_hash(user_id, hash)
            .await
            .context("storing new password")?;
        Ok(())
    }

    pub async fn permissions(&self, user_id: u64) -> Result<Vec<String>, ServiceError> {
        Ok(self.permissions.permissions_for(user_id).await?)
    }

    pub async fn user_info(&self, user_id: u64) -> Result<UserInfo, ServiceError> {
        let user = self
            .directory
            .user_by_id(user_id)
            .await
            .context("looking up user")?
            .ok_or_else(|| ServiceError::Business("user not found".to_string()))?;

        let roles = if user_id == SUPER_ADMIN_ID {
            vec![SUPER_ADMIN_ROLE_NAME.to_string()]
        } else {
            let role_ids = self
                .directory
                .role_ids_for_user(user_id)
                .await
                .context("looking up roles")?;
            self.directory
                .role_names(&role_ids)
                .await
                .context("resolving role names")?
        };

        Ok(UserInfo {
            id: user.id,
            username: user.username,
            nickname: user.nickname,
            roles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheService, MemorySharedStore};
    use crate::security::directory::{MemoryDirectory, UserRecord};
    use crate::security::token::TokenOptions;
    use std::time::Duration;

    fn hash(password: &str) -> String {
        // Minimum cost keeps the test fast; production wiring uses DEFAULT_COST.
        bcrypt::hash(password, 4).unwrap()
    }

    fn setup() -> (AuthService, Arc<MemoryDirectory>) {
        let directory = Arc::new(MemoryDirectory::new());
        directory.add_user(UserRecord {
            id: 1,
            username: "admin".to_string(),
            nickname: "Admin".to_string(),
            password_hash: hash("admin123"),
            is_active: true,
        });
        directory.add_user(UserRecord {
            id: 2,
            username: "alice".to_string(),
            nickname: "Alice".to_string(),
            password_hash: hash("wonder"),
            is_active: true,
        });
        directory.add_user(UserRecord {
            id: 3,
            username: "mallory".to_string(),
            nickname: "Mallory".to_string(),
            password_hash: hash("evil"),
            is_active: false,
        });
        directory.add_role(10, "editor", vec!["menu:create".into()]);
        directory.assign_roles(2, vec![10]);

        let cache = Arc::new(CacheService::new(Arc::new(MemorySharedStore::new())));
        let tokens = Arc::new(
            TokenService::new(
                vec![TokenOptions {
                    name: DEFAULT_TOKEN_CONFIG.to_string(),
                    secret: "a-test-secret-that-is-long-enough".to_string(),
                    issuer: "admin-gate-tests".to_string(),
                    audience: "admin-gate-clients".to_string(),
                    expires_in_minutes: 30,
                    single_session: false,
                }],
                cache.clone(),
            )
            .unwrap(),
        );
        let permissions = Arc::new(PermissionService::new(
            cache,
            directory.clone(),
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        (
            AuthService::new(tokens.clone(), permissions, directory.clone()),
            directory,
        )
    }

    fn login_request(username: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn test_login_success_issues_verifiable_token() {
        let (auth, _) = setup();
        let response = auth.login(&login_request("alice", "wonder")).await.unwrap();
        assert!(!response.token.is_empty());
        assert_eq!(
            auth.tokens.verify(&response.token, DEFAULT_TOKEN_CONFIG).await,
            2
        );
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let (auth, _) = setup();
        let err = auth.login(&login_request("alice", "nope")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Business(msg) if msg == "invalid username or password"));
    }

    #[tokio::test]
    async fn test_login_unknown_user() {
        let (auth, _) = setup();
        let err = auth.login(&login_request("ghost", "x")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Business(msg) if msg == "invalid username or password"));
    }

    #[tokio::test]
    async fn test_login_disabled_user() {
        let (auth, _) = setup();
        let err = auth.login(&login_request("mallory", "evil")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Business(msg) if msg == "user is disabled"));
    }

    #[tokio::test]
    async fn test_logout_revokes_token() {
        let (auth, _) = setup();
        let response = auth.login(&login_request("alice", "wonder")).await.unwrap();
        assert!(auth.logout(&response.token).await);
        assert_eq!(
            auth.tokens.verify(&response.token, DEFAULT_TOKEN_CONFIG).await,
            0
        );
    }

    fn change_request(old: &str, new: &str) -> ChangePasswordRequest {
        ChangePasswordRequest {
            old_password: old.to_string(),
            new_password: new.to_string(),
        }
    }

    #[tokio::test]
    async fn test_change_password_requires_the_old_one() {
        let (auth, _) = setup();
        let err = auth
            .change_password(2, &change_request("nope", "new-wonder"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Business(msg) if msg == "incorrect old password"));

        // the old password still works
        assert!(auth.login(&login_request("alice", "wonder")).await.is_ok());
    }

    #[tokio::test]
    async fn test_change_password_takes_effect_for_future_logins() {
        let (auth, _) = setup();
        auth.change_password(2, &change_request("wonder", "new-wonder"))
            .await
            .unwrap();

        let err = auth.login(&login_request("alice", "wonder")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Business(msg) if msg == "invalid username or password"));
        assert!(auth.login(&login_request("alice", "new-wonder")).await.is_ok());
    }

    #[tokio::test]
    async fn test_change_password_unknown_user() {
        let (auth, _) = setup();
        let err = auth
            .change_password(99, &change_request("a", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Business(msg) if msg == "user not found"));
    }

    #[tokio::test]
    async fn test_user_info_roles() {
        let (auth, _) = setup();
        let info = auth.user_info(2).await.unwrap();
        assert_eq!(info.username, "alice");
        assert_eq!(info.roles, vec!["editor"]);

        let admin = auth.user_info(1).await.unwrap();
        assert_eq!(admin.roles, vec![SUPER_ADMIN_ROLE_NAME]);
    }
}
