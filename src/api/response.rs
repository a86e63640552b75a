use serde::{Deserialize, Serialize};

/// Fixed response code enumeration. Clients branch on `code`, never on the
/// transport status; every outcome ships as HTTP 200.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Success,
    Error,
    InvalidParams,
    Unauthorized,
    Forbidden,
}

impl ResponseCode {
    pub fn code(self) -> i32 {
        match self {
            ResponseCode::Success => 0,
            ResponseCode::Error => 1,
            ResponseCode::InvalidParams => 2,
            ResponseCode::Unauthorized => 1000,
            ResponseCode::Forbidden => 1001,
        }
    }

    pub fn default_message(self) -> &'static str {
        match self {
            ResponseCode::Success => "ok",
            ResponseCode::Error => "operation failed",
            ResponseCode::InvalidParams => "invalid parameters",
            ResponseCode::Unauthorized => "not logged in or login expired",
            ResponseCode::Forbidden => "permission denied",
        }
    }
}

/// Uniform response envelope: `{code, message, data}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T = serde_json::Value> {
    pub code: i32,
    pub message: String,
    pub data: Option<T>,
}

impl ApiResponse<serde_json::Value> {
    pub fn ok() -> Self {
        Self {
            code: ResponseCode::Success.code(),
            message: ResponseCode::Success.default_message().to_string(),
            data: None,
        }
    }

    pub fn error(code: ResponseCode, message: Option<&str>) -> Self {
        Self {
            code: code.code(),
            message: message
                .map(str::to_string)
                .unwrap_or_else(|| code.default_message().to_string()),
            data: None,
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn with_data(data: T) -> Self {
        Self {
            code: ResponseCode::Success.code(),
            message: ResponseCode::Success.default_message().to_string(),
            data: Some(data),
        }
    }
}
