mod builtins;
mod dynamic;
mod executor;
pub mod paths;
mod policy;
pub mod process;
mod registry;

pub use builtins::{builtin_tools, BUILTIN_TOOL_NAMES};
pub use dynamic::{create_dynamic_tool, template_args};
pub use executor::{truncate_output, ToolExecutor, PERMISSION_DENIED, SCHEMA_ERROR_PREFIX};
pub use policy::{AllowAll, Classification, ConfirmationPolicy, DenyAll, SensitivePatterns, Tier};
pub use registry::{ToolDescriptor, ToolRegistry};

use crate::config::{expand_env_var_in_string, ToolsConfig};
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<ToolOutput, String>> + Send>>;

/// Handlers receive owned arguments so the returned future is `'static`.
pub type ToolHandler = Arc<dyn Fn(Value, ToolSettings) -> ToolFuture + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub exit_code: Option<i32>,
    /// Set when the handler already cut output at its capture bound.
    pub truncated: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            exit_code: None,
            truncated: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub base_dir: PathBuf,
    pub max_file_size_bytes: u64,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl ToolSettings {
    pub fn from_config(config: &ToolsConfig) -> Self {
        let base_dir = config
            .base_dir
            .as_ref()
            .map(|s| expand_env_var_in_string(s))
            .and_then(|s| if s.is_empty() { None } else { Some(PathBuf::from(s)) })
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            base_dir,
            max_file_size_bytes: config.max_file_size_mb.saturating_mul(1024 * 1024),
            timeout: Duration::from_secs(config.timeout_secs),
            max_output_bytes: usize::try_from(config.max_output_bytes).unwrap_or(usize::MAX),
        }
    }
}
