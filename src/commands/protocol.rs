//! Command protocol types
//!
//! Wire format: line-delimited JSON over stdin/stdout.
//! - Requests have `id` + `method` + optional `params`
//! - Responses have `id` + `success` and either `data` or `error`
//! - Notifications have `method` + `params` but NO `id`

use serde::{Deserialize, Serialize};

use crate::security::SecurityError;
use crate::tunnel::TunnelError;

/// Incoming request
#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Outgoing response
#[derive(Debug, Serialize)]
pub struct Response {
    pub id: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

impl Response {
    pub fn ok(id: u64, data: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(id: u64, error: CommandError) -> Self {
        Self {
            id,
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Server-initiated notification (no `id`)
#[derive(Debug, Serialize)]
pub struct Notification {
    pub method: String,
    pub params: serde_json::Value,
}

/// Error object carried in a failed response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandError {
    pub code: String,
    pub message: String,
}

impl CommandError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new("MethodNotFound", format!("Unknown method: {}", method))
    }

    pub fn invalid_params(e: impl std::fmt::Display) -> Self {
        Self::new("InvalidParams", e.to_string())
    }

    pub fn internal(e: impl std::fmt::Display) -> Self {
        Self::new("InternalError", e.to_string())
    }
}

impl From<TunnelError> for CommandError {
    fn from(e: TunnelError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

impl From<SecurityError> for CommandError {
    fn from(e: SecurityError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}
