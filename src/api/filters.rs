use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{Extensions, HeaderMap};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use chrono::Utc;
use std::net::SocketAddr;
use tracing::error;

use crate::api::error::{ServiceError, ERROR_MARKER};
use crate::api::routes::AppState;
use crate::security::audit::AuditRecord;
use crate::security::permission::SUPER_ADMIN_ID;

/// Authenticated subject id, attached to the request by the authentication
/// filter and read by everything downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub u64);

/// Logical route identifier, doubling as the permission token guarding the
/// endpoint. Routes without one carry no restriction.
#[derive(Debug, Clone, Copy)]
pub struct RouteName(pub &'static str);

/// Marks an endpoint for audit logging. Only marked endpoints produce
/// records.
#[derive(Debug, Clone, Copy)]
pub struct AuditMarker {
    pub description: &'static str,
    pub log_request_body: bool,
}

impl AuditMarker {
    pub fn new(description: &'static str) -> Self {
        Self {
            description,
            log_request_body: true,
        }
    }

    pub fn without_body(description: &'static str) -> Self {
        Self {
            description,
            log_request_body: false,
        }
    }
}

/// Largest request-body prefix an audit record retains. The request itself
/// is never cut down to this.
const MAX_AUDIT_BODY: usize = 64 * 1024;

/// Bearer credential from the Authorization header. Accepts a bare
/// credential for compatibility; any explicit scheme must be `Bearer`, and a
/// scheme with no credential is no credential.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = match value.split_once(char::is_whitespace) {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        Some(_) => return None,
        None if value.eq_ignore_ascii_case("bearer") => return None,
        None => value,
    };
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Caller address: `X-Real-IP`, then the first `X-Forwarded-For` entry, then
/// the transport peer address, in that order.
pub fn real_ip(headers: &HeaderMap, extensions: &Extensions) -> String {
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let ip = real_ip.trim();
        if !ip.is_empty() {
            return ip.to_string();
        }
    }

    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        let ip = forwarded.split(',').next().unwrap_or("").trim();
        if !ip.is_empty() {
            return ip.to_string();
        }
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}

/// Authentication filter: resolves the bearer credential to a subject id and
/// attaches it, or short-circuits with the Unauthorized envelope.
pub async fn authenticate(
    State((state, config_name)): State<(AppState, String)>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(credential) = bearer_token(request.headers()) else {
        return ServiceError::Unauthorized.into_response();
    };

    let user_id = state.tokens.verify(&credential, &config_name).await;
    if user_id == 0 {
        return ServiceError::Unauthorized.into_response();
    }

    request.extensions_mut().insert(CurrentUser(user_id));
    next.run(request).await
}

/// Permission filter: anonymous callers are rejected, the super-admin always
/// passes, and routes without a name carry no restriction.
pub async fn check_permission(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let user_id = request
        .extensions()
        .get::<CurrentUser>()
        .map(|user| user.0)
        .unwrap_or(0);

    if user_id == 0 {
        return ServiceError::Unauthorized.into_response();
    }

    if user_id != SUPER_ADMIN_ID {
        if let Some(RouteName(route)) = request.extensions().get::<RouteName>().copied() {
            match state.permissions.has_permission(user_id, route).await {
                Ok(true) => {}
                Ok(false) => return ServiceError::Forbidden.into_response(),
                Err(err) => return ServiceError::Internal(err).into_response(),
            }
        }
    }

    next.run(request).await
}

/// Audit filter: captures request metadata before the handler runs, then
/// writes exactly one record reflecting the outcome. A failed audit write is
/// logged operationally and never turns a successful operation into a failed
/// response.
pub async fn capture_audit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(marker) = request.extensions().get::<AuditMarker>().copied() else {
        return next.run(request).await;
    };

    let route = request
        .extensions()
        .get::<RouteName>()
        .map(|RouteName(name)| name.to_string())
        .unwrap_or_default();
    let user_id = request
        .extensions()
        .get::<CurrentUser>()
        .map(|user| user.0)
        .unwrap_or(0);
    let (username, nickname) = state.user_display(user_id).await;
    let method = request.method().to_string();
    let path = request.uri().to_string();
    let ip = real_ip(request.headers(), request.extensions());

    let (request, body) = if marker.log_request_body {
        buffer_body(request).await
    } else {
        (request, String::new())
    };

    let response = next.run(request).await;

    let success =
        response.status().is_success() && !response.headers().contains_key(ERROR_MARKER);

    let record = AuditRecord {
        user_id,
        username,
        nickname,
        path,
        route,
        method,
        ip,
        body,
        success,
        description: marker.description.to_string(),
        recorded_at: Utc::now(),
    };

    if let Err(err) = state.audit.append(record).await {
        error!(error = %err, "failed to append audit record");
    }

    response
}

/// Rebuild the request with its body buffered so the handler can still read
/// it. The handler always sees the complete body; the recorded text is
/// truncated to `MAX_AUDIT_BODY` and an unreadable body is recorded as
/// empty.
async fn buffer_body(request: Request) -> (Request, String) {
    let (parts, body) = request.into_parts();
    match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => {
            let recorded =
                String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_AUDIT_BODY)]).into_owned();
            (Request::from_parts(parts, Body::from(bytes)), recorded)
        }
        Err(_) => (Request::from_parts(parts, Body::empty()), String::new()),
    }
}

/// Filter-chain attachment points. Layers wrap bottom-up, so compose as
/// `.require_audit(..).require_permission(..).require_authentication(..)`
/// to run authentication first, then the permission check, with audit
/// capture closest to the handler.
pub trait RouterAuthExt {
    fn require_authentication(self, state: &AppState, config_name: &str) -> Self;
    fn require_permission(self, state: &AppState) -> Self;
    fn require_audit(self, state: &AppState) -> Self;
}

impl<S> RouterAuthExt for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn require_authentication(self, state: &AppState, config_name: &str) -> Self {
        self.route_layer(middleware::from_fn_with_state(
            (state.clone(), config_name.to_string()),
            authenticate,
        ))
    }

    fn require_permission(self, state: &AppState) -> Self {
        self.route_layer(middleware::from_fn_with_state(
            state.clone(),
            check_permission,
        ))
    }

    fn require_audit(self, state: &AppState) -> Self {
        self.route_layer(middleware::from_fn_with_state(state.clone(), capture_audit))
    }
}
