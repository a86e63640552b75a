//! Cross-process behavior: two service instances sharing one backing store,
//! the way two replicas would share Redis.

use std::sync::Arc;
use std::time::Duration;

use admin_gate::cache::{CacheService, MemorySharedStore, SharedStore};
use admin_gate::security::directory::{Directory, MemoryDirectory, UserRecord};
use admin_gate::security::permission::PermissionService;
use admin_gate::security::token::{TokenOptions, TokenService};

const SECRET: &str = "0123456789abcdef0123456789abcdef";

fn token_options(single_session: bool) -> Vec<TokenOptions> {
    vec![TokenOptions {
        name: "Default".to_string(),
        secret: SECRET.to_string(),
        issuer: "admin-gate".to_string(),
        audience: "admin-gate".to_string(),
        expires_in_minutes: 60,
        single_session,
    }]
}

fn cache_on(store: &Arc<MemorySharedStore>, promotion_ttl: Duration) -> Arc<CacheService> {
    let shared: Arc<dyn SharedStore> = store.clone();
    Arc::new(CacheService::new(shared).with_promotion_ttl(promotion_ttl))
}

fn tokens_on(store: &Arc<MemorySharedStore>, single_session: bool) -> TokenService {
    TokenService::new(
        token_options(single_session),
        cache_on(store, Duration::from_secs(60)),
    )
    .unwrap()
}

#[tokio::test]
async fn test_revocation_is_visible_to_sibling_process() {
    let store = Arc::new(MemorySharedStore::new());
    let process_a = tokens_on(&store, false);
    let process_b = tokens_on(&store, false);

    let credential = process_a.issue(42, "Default").await.unwrap();
    assert_eq!(process_b.verify(&credential, "Default").await, 42);

    assert!(process_a.revoke(&credential).await);
    assert_eq!(process_b.verify(&credential, "Default").await, 0);
    assert_eq!(process_a.verify(&credential, "Default").await, 0);
}

#[tokio::test]
async fn test_single_session_supersedes_across_processes() {
    let store = Arc::new(MemorySharedStore::new());
    let process_a = tokens_on(&store, true);
    let process_b = tokens_on(&store, true);

    let first = process_a.issue(7, "Default").await.unwrap();
    assert_eq!(process_b.verify(&first, "Default").await, 7);

    // a later login anywhere retires every earlier credential everywhere
    let second = process_b.issue(7, "Default").await.unwrap();
    assert_eq!(process_a.verify(&first, "Default").await, 0);
    assert_eq!(process_a.verify(&second, "Default").await, 7);
}

#[tokio::test]
async fn test_verify_requires_matching_config() {
    let store = Arc::new(MemorySharedStore::new());
    let tokens = tokens_on(&store, false);

    let credential = tokens.issue(5, "Default").await.unwrap();
    assert_eq!(tokens.verify(&credential, "Default").await, 5);
    assert_eq!(tokens.verify(&credential, "Refresh").await, 0);
}

#[tokio::test]
async fn test_revoking_garbage_fails_cleanly() {
    let store = Arc::new(MemorySharedStore::new());
    let tokens = tokens_on(&store, false);

    assert!(!tokens.revoke("").await);
    assert!(!tokens.revoke("not-a-credential").await);
}

fn seeded_directory() -> Arc<MemoryDirectory> {
    let directory = MemoryDirectory::new();
    directory.add_role(10, "Operators", vec!["ops:read".to_string()]);
    directory.add_user(UserRecord {
        id: 2,
        username: "alice".to_string(),
        nickname: "Alice".to_string(),
        password_hash: String::new(),
        is_active: true,
    });
    directory.assign_roles(2, vec![10]);
    directory.set_menu_permissions(vec!["ops:read".to_string(), "ops:write".to_string()]);
    Arc::new(directory)
}

fn permissions_on(
    store: &Arc<MemorySharedStore>,
    directory: Arc<dyn Directory>,
    promotion_ttl: Duration,
) -> PermissionService {
    PermissionService::new(
        cache_on(store, promotion_ttl),
        directory,
        Duration::from_secs(600),
        Duration::from_secs(600),
    )
}

#[tokio::test]
async fn test_epoch_bump_propagates_after_promotion_expiry() {
    let store = Arc::new(MemorySharedStore::new());
    let directory = seeded_directory();
    let promotion_ttl = Duration::from_millis(40);
    let process_a = permissions_on(&store, directory.clone(), promotion_ttl);
    let process_b = permissions_on(&store, directory.clone(), promotion_ttl);

    // process A establishes the epoch; B only ever holds a promoted copy
    process_a.current_epoch().await;
    assert!(process_b.has_permission(2, "ops:read").await.unwrap());
    let lookups_before = directory.role_lookup_count();

    // a new role grant followed by an epoch bump in the sibling process
    directory.add_role(11, "Writers", vec!["ops:write".to_string()]);
    directory.assign_roles(2, vec![10, 11]);
    process_a.bump_epoch().await;

    // once the promoted epoch copy expires, the next check resolves afresh
    tokio::time::sleep(promotion_ttl + Duration::from_millis(40)).await;
    assert!(process_b.has_permission(2, "ops:write").await.unwrap());
    assert!(directory.role_lookup_count() > lookups_before);
}

#[tokio::test]
async fn test_epoch_values_strictly_increase() {
    let store = Arc::new(MemorySharedStore::new());
    let directory = seeded_directory();
    let permissions = permissions_on(&store, directory, Duration::from_secs(60));

    let first = permissions.bump_epoch().await;
    let second = permissions.bump_epoch().await;
    let third = permissions.bump_epoch().await;
    assert!(first > 0);
    assert!(second > first);
    assert!(third > second);
}
