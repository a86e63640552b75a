use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, MethodRouter};
use axum::{Extension, Json, Router};
use dashmap::DashMap;
use serde_json::json;
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{error, info, warn};

use crate::api::error::{mark_error, ServiceError};
use crate::api::filters::{bearer_token, AuditMarker, CurrentUser, RouteName, RouterAuthExt};
use crate::api::response::{ApiResponse, ResponseCode};
use crate::cache::{CacheService, SharedStore};
use crate::config::Config;
use crate::security::audit::AuditSink;
use crate::security::auth::{
    AuthService, ChangePasswordRequest, LoginRequest, LoginResponse, UserInfo,
};
use crate::security::directory::Directory;
use crate::security::permission::PermissionService;
use crate::security::token::{TokenService, DEFAULT_TOKEN_CONFIG};

/// Shared per-process state behind the filter chain.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheService>,
    pub tokens: Arc<TokenService>,
    pub permissions: Arc<PermissionService>,
    pub auth: Arc<AuthService>,
    pub directory: Arc<dyn Directory>,
    pub audit: Arc<dyn AuditSink>,
    // Username/nickname cache for audit records. Deliberately unbounded and
    // TTL-free: a renamed user keeps the old display name until process
    // restart. Cosmetic staleness only, never a security property.
    user_names: Arc<DashMap<u64, (String, String)>>,
}

impl AppState {
    pub fn new(
        config: &Config,
        directory: Arc<dyn Directory>,
        shared: Arc<dyn SharedStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let cache = Arc::new(
            CacheService::new(shared)
                .with_promotion_ttl(Duration::from_secs(config.cache.promotion_ttl_secs)),
        );
        let tokens = Arc::new(TokenService::new(config.tokens.clone(), cache.clone())?);
        let permissions = Arc::new(PermissionService::new(
            cache.clone(),
            directory.clone(),
            Duration::from_secs(config.cache.permission_ttl_secs),
            Duration::from_secs(config.cache.epoch_ttl_secs),
        ));
        let auth = Arc::new(AuthService::new(
            tokens.clone(),
            permissions.clone(),
            directory.clone(),
        ));

        Ok(Self {
            cache,
            tokens,
            permissions,
            auth,
            directory,
            audit,
            user_names: Arc::new(DashMap::new()),
        })
    }

    /// Best-effort username/nickname for audit records. A failed directory
    /// lookup degrades to empty strings; the audit write never waits on or
    /// fails because of this.
    pub async fn user_display(&self, user_id: u64) -> (String, String) {
        if user_id == 0 {
            return (String::new(), String::new());
        }

        if let Some(entry) = self.user_names.get(&user_id) {
            return entry.clone();
        }

        match self.directory.user_by_id(user_id).await {
            Ok(Some(user)) => {
                let display = (user.username, user.nickname);
                self.user_names.insert(user_id, display.clone());
                display
            }
            Ok(None) => (String::new(), String::new()),
            Err(err) => {
                warn!(user_id, error = %err, "user lookup for audit display failed");
                (String::new(), String::new())
            }
        }
    }

    /// Invalidates every cached permission set. Call after any mutation of
    /// role, role-permission, or menu data.
    pub async fn bump_permission_epoch(&self) -> i64 {
        self.permissions.bump_epoch().await
    }
}

/// A route behind the full chain: authentication, permission check, and
/// (optionally) audit capture. `name` is both the logical route id and the
/// permission token guarding it.
pub fn protected_route(
    state: &AppState,
    path: &str,
    handler: MethodRouter<AppState>,
    name: &'static str,
    marker: Option<AuditMarker>,
) -> Router<AppState> {
    // Metadata extensions are layered last so they are in place before any
    // filter runs. The panic boundary sits inside the audit filter so a
    // panicking handler still produces its audit record.
    let mut router = Router::new()
        .route(path, handler)
        .route_layer(panic_boundary())
        .require_audit(state)
        .require_permission(state)
        .require_authentication(state, DEFAULT_TOKEN_CONFIG)
        .route_layer(Extension(RouteName(name)));
    if let Some(marker) = marker {
        router = router.route_layer(Extension(marker));
    }
    router
}

/// An unauthenticated route that still produces audit records.
pub fn audited_route(
    state: &AppState,
    path: &str,
    handler: MethodRouter<AppState>,
    name: &'static str,
    marker: AuditMarker,
) -> Router<AppState> {
    Router::new()
        .route(path, handler)
        .route_layer(panic_boundary())
        .require_audit(state)
        .route_layer(Extension(RouteName(name)))
        .route_layer(Extension(marker))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "version": crate::VERSION}))
}

async fn login_handler(
    axum::extract::State(state): axum::extract::State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<LoginResponse>>, ServiceError> {
    let Json(request) =
        payload.map_err(|err| ServiceError::InvalidParams(err.body_text()))?;
    if request.username.is_empty() || request.password.is_empty() {
        return Err(ServiceError::InvalidParams(
            "username and password are required".to_string(),
        ));
    }

    let response = state.auth.login(&request).await?;
    Ok(Json(ApiResponse::with_data(response)))
}

async fn logout_handler(
    axum::extract::State(state): axum::extract::State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse>, ServiceError> {
    let credential = bearer_token(&headers).unwrap_or_default();
    if state.auth.logout(&credential).await {
        Ok(Json(ApiResponse::ok()))
    } else {
        Err(ServiceError::Business(
            ResponseCode::Error.default_message().to_string(),
        ))
    }
}

async fn change_password_handler(
    axum::extract::State(state): axum::extract::State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<Json<ApiResponse>, ServiceError> {
    let Json(request) =
        payload.map_err(|err| ServiceError::InvalidParams(err.body_text()))?;
    for (label, value) in [
        ("old", &request.old_password),
        ("new", &request.new_password),
    ] {
        let length = value.chars().count();
        if !(8..=16).contains(&length) {
            return Err(ServiceError::InvalidParams(format!(
                "{label} password must be 8 to 16 characters"
            )));
        }
    }

    state.auth.change_password(user_id, &request).await?;
    Ok(Json(ApiResponse::ok()))
}

async fn user_info_handler(
    axum::extract::State(state): axum::extract::State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<UserInfo>>, ServiceError> {
    let info = state.auth.user_info(user_id).await?;
    Ok(Json(ApiResponse::with_data(info)))
}

async fn permissions_handler(
    axum::extract::State(state): axum::extract::State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<Vec<String>>>, ServiceError> {
    let permissions = state.auth.permissions(user_id).await?;
    Ok(Json(ApiResponse::with_data(permissions)))
}

type PanicHandler = fn(Box<dyn Any + Send + 'static>) -> Response;

fn panic_boundary() -> CatchPanicLayer<PanicHandler> {
    CatchPanicLayer::custom(panic_envelope as PanicHandler)
}

fn panic_envelope(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    error!(detail = %detail, "request handler panicked");

    mark_error(
        (
            StatusCode::OK,
            Json(ApiResponse::error(ResponseCode::Error, None)),
        )
            .into_response(),
    )
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(audited_route(
            &state,
            "/admin/login",
            post(login_handler),
            "auth:login",
            AuditMarker::without_body("login"),
        ))
        .merge(protected_route(
            &state,
            "/admin/logout",
            post(logout_handler),
            "auth:logout",
            Some(AuditMarker::new("logout")),
        ))
        .merge(protected_route(
            &state,
            "/admin/change-password",
            post(change_password_handler),
            "auth:change-password",
            Some(AuditMarker::without_body("change password")),
        ))
        .merge(protected_route(
            &state,
            "/admin/user/info",
            get(user_info_handler),
            "auth:user-info",
            None,
        ))
        .merge(protected_route(
            &state,
            "/admin/permissions",
            get(permissions_handler),
            "auth:permissions",
            None,
        ))
        .layer(panic_boundary())
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = create_router(state).into_make_service_with_connect_info::<SocketAddr>();

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("admin API listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
