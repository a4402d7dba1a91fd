use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::session::SessionStoreError;

/// Classification shared by stream errors, tool failures and turn outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Api,
    Timeout,
    Parse,
    ToolCallArgsInvalid,
    SchemaValidation,
    PermissionDenied,
    ToolLoopLimitExceeded,
    Cancelled,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network_error",
            ErrorKind::Api => "api_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Parse => "parse_error",
            ErrorKind::ToolCallArgsInvalid => "tool_call_args_invalid",
            ErrorKind::SchemaValidation => "schema_validation_error",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::ToolLoopLimitExceeded => "tool_loop_limit_exceeded",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Storage => "storage_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum GemmisError {
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Tool registry error: {0}")]
    ToolRegistry(String),
    #[error("Session error: {0}")]
    SessionError(#[from] SessionStoreError),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for GemmisError {
    fn from(err: anyhow::Error) -> Self {
        GemmisError::Other(format!("{:#}", err))
    }
}

impl From<String> for GemmisError {
    fn from(msg: String) -> Self {
        GemmisError::Other(msg)
    }
}

impl From<&str> for GemmisError {
    fn from(msg: &str) -> Self {
        GemmisError::Other(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GemmisError>;
