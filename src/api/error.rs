use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

use crate::api::response::{ApiResponse, ResponseCode};

/// Response header marking an error envelope. The audit filter's success
/// heuristic inspects this instead of the transport status, so it agrees
/// with the boundary's classification even though the two run at different
/// layers.
pub const ERROR_MARKER: &str = "x-admin-error";

/// Failure taxonomy for everything the filter chain and services can reject.
/// Matched exhaustively at the response boundary; the variant decides the
/// envelope code and what the caller is allowed to see.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Named business rule violation; its message is surfaced verbatim.
    #[error("{0}")]
    Business(String),
    #[error("{0}")]
    InvalidParams(String),
    #[error("not logged in or login expired")]
    Unauthorized,
    #[error("permission denied")]
    Forbidden,
    /// Storage/cache failures. Detail goes to the operational log only.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn code(&self) -> ResponseCode {
        match self {
            ServiceError::Business(_) => ResponseCode::Error,
            ServiceError::InvalidParams(_) => ResponseCode::InvalidParams,
            ServiceError::Unauthorized => ResponseCode::Unauthorized,
            ServiceError::Forbidden => ResponseCode::Forbidden,
            ServiceError::Internal(_) => ResponseCode::Error,
        }
    }
}

/// Attach the error marker to an already-built response.
pub fn mark_error(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(ERROR_MARKER, HeaderValue::from_static("true"));
    response
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let envelope = match &self {
            ServiceError::Business(message) => ApiResponse::error(ResponseCode::Error, Some(message)),
            ServiceError::InvalidParams(message) => {
                ApiResponse::error(ResponseCode::InvalidParams, Some(message))
            }
            ServiceError::Unauthorized => ApiResponse::error(ResponseCode::Unauthorized, None),
            ServiceError::Forbidden => ApiResponse::error(ResponseCode::Forbidden, None),
            ServiceError::Internal(err) => {
                error!(error = %err, "request failed with internal error");
                ApiResponse::error(ResponseCode::Error, None)
            }
        };

        mark_error((StatusCode::OK, Json(envelope)).into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        assert_eq!(
            ServiceError::Business("x".into()).code(),
            ResponseCode::Error
        );
        assert_eq!(
            ServiceError::InvalidParams("x".into()).code(),
            ResponseCode::InvalidParams
        );
        assert_eq!(ServiceError::Unauthorized.code(), ResponseCode::Unauthorized);
        assert_eq!(ServiceError::Forbidden.code(), ResponseCode::Forbidden);
        assert_eq!(
            ServiceError::Internal(anyhow::anyhow!("db down")).code(),
            ResponseCode::Error
        );
    }

    #[test]
    fn test_response_is_200_with_marker() {
        let response = ServiceError::Forbidden.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(ERROR_MARKER).unwrap(),
            &HeaderValue::from_static("true")
        );
    }

    #[test]
    fn test_internal_detail_not_leaked() {
        let response = ServiceError::Internal(anyhow::anyhow!("connection refused")).into_response();
        assert_eq!(response.status(), StatusCode::OK);
        // The body is built from the generic message, never the source error.
        let envelope = ApiResponse::error(ResponseCode::Error, None);
        assert_eq!(envelope.message, "operation failed");
    }
}
