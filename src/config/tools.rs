use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::defaults::{
    default_allow_absolute, default_custom_tool_enabled, default_max_file_size_mb,
    default_max_output_bytes, default_max_tool_rounds, default_restrict_to_base_dir,
    default_stdin_json, default_tool_timeout, default_tools_enabled, default_validation_kind,
    is_default_allow_absolute, is_default_restrict_to_base_dir, is_default_stdin_json,
};
use crate::tools::Tier;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default = "default_tools_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    /// Default per-call timeout for every tool, in seconds.
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
    /// Upper bound on the text a tool may hand back to the model.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: u64,
    #[serde(default)]
    pub base_dir: Option<String>,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    /// Overrides of the built-in safety tier, keyed by tool name.
    #[serde(default)]
    pub tiers: HashMap<String, Tier>,
    /// Extra regexes that mark a command-style call as sensitive.
    #[serde(default)]
    pub sensitive_patterns: Vec<String>,
    #[serde(default)]
    pub custom: Vec<CustomToolConfig>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: default_tools_enabled(),
            max_tool_rounds: default_max_tool_rounds(),
            timeout_secs: default_tool_timeout(),
            max_output_bytes: default_max_output_bytes(),
            base_dir: None,
            max_file_size_mb: default_max_file_size_mb(),
            tiers: HashMap::new(),
            sensitive_patterns: Vec::new(),
            custom: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CustomToolConfig {
    pub name: String,
    #[serde(default = "default_custom_tool_enabled")]
    pub enabled: bool,

    /// "script" or "command". Entries without a type must name a built-in tool.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,

    /// Unset means sensitive: configured commands ask before they run.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<Tier>,

    // Script tools
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_path: Option<String>,

    // Command tools
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_bytes: Option<u64>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Values support ${VAR} expansion.
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default = "default_stdin_json")]
    #[serde(skip_serializing_if = "is_default_stdin_json")]
    pub stdin_json: bool,

    #[serde(default = "default_restrict_to_base_dir")]
    #[serde(skip_serializing_if = "is_default_restrict_to_base_dir")]
    pub restrict_to_base_dir: bool,

    /// None auto-detects from path placeholders.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_double_dash: Option<bool>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_validations: Option<HashMap<String, TemplateValidation>>,
}

impl CustomToolConfig {
    /// A bare entry used to toggle or re-describe a built-in.
    pub fn is_builtin_override(&self) -> bool {
        self.r#type.is_none()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TemplateValidation {
    /// "path" | "string" | "number"
    #[serde(default = "default_validation_kind")]
    pub kind: String,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_patterns: Option<Vec<String>>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deny_patterns: Option<Vec<String>>,

    /// Path kind only.
    #[serde(default = "default_allow_absolute")]
    #[serde(skip_serializing_if = "is_default_allow_absolute")]
    pub allow_absolute: bool,
}
