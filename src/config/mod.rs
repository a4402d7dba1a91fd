mod api;
mod defaults;
mod tools;
mod validation;

use crate::api::ModelOptions;
use crate::cli::Args;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub use api::{normalize_base_url, ApiConfig, ApiSettings};
pub use defaults::*;
pub use tools::{CustomToolConfig, TemplateValidation, ToolsConfig};
pub use validation::{expand_env_var_in_string, expand_env_vars};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub context_length: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub context_messages: Option<usize>,
    #[serde(default)]
    pub verbose: Option<bool>,
}

/// On-disk configuration file, every field optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FileConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiSettings,
    pub model: String,
    pub system_prompt: String,
    pub persona: Option<String>,
    pub options: ModelOptions,
    pub session_dir: PathBuf,
    pub context_messages: usize,
    pub verbose: bool,
    pub tools_enabled: bool,
    pub auto_approve: bool,
    pub tools: ToolsConfig,
}

impl Config {
    pub fn from_env_and_args(args: &Args) -> Result<Self> {
        let file = FileConfig::load()?;
        Ok(Self::resolve(args, file, |key| env::var(key).ok()))
    }

    /// Merge sources with precedence CLI > environment > file > default.
    pub fn resolve<F>(args: &Args, file: FileConfig, env_lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| {
            env_lookup(key).map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        };

        let base_url = args
            .base_url
            .clone()
            .or_else(|| env_lookup("GEMMIS_BASE_URL"))
            .or(file.api.base_url.clone())
            .map(|url| normalize_base_url(&url))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let stream_timeout_secs = env_lookup("GEMMIS_STREAM_TIMEOUT")
            .and_then(|s| s.parse::<u64>().ok())
            .or(file.api.stream_timeout)
            .unwrap_or(DEFAULT_STREAM_TIMEOUT_SECS);

        let api = ApiSettings {
            base_url,
            api_key: env_lookup("GEMMIS_API_KEY").filter(|k| !k.is_empty()),
            stream_timeout_secs,
            connect_timeout_secs: file
                .api
                .connect_timeout
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        };

        let model = args
            .model
            .clone()
            .or_else(|| env_lookup("GEMMIS_MODEL"))
            .or(file.model.name.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let system_prompt = env_lookup("GEMMIS_SYSTEM_PROMPT")
            .or(file.model.system_prompt.clone())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        let options = ModelOptions {
            temperature: file.model.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            top_p: file.model.top_p.unwrap_or(DEFAULT_TOP_P),
            num_predict: file.model.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            num_ctx: file.model.context_length.unwrap_or(DEFAULT_CONTEXT_LENGTH),
        };

        let verbose = args.verbose
            || flag("GEMMIS_VERBOSE")
                .or(file.session.verbose)
                .unwrap_or(false);

        // --no-tools wins over everything else
        let tools_enabled = if args.no_tools {
            false
        } else {
            flag("GEMMIS_TOOLS_ENABLED").unwrap_or(file.tools.enabled)
        };

        let session_dir = file
            .session
            .dir
            .as_deref()
            .map(|dir| expand_home(&expand_env_var_in_string(dir)))
            .unwrap_or_else(default_session_dir);

        let mut tools = file.tools;
        if let Some(rounds) = args.max_tool_rounds {
            tools.max_tool_rounds = rounds;
        }

        Config {
            api,
            model,
            system_prompt,
            persona: file.model.persona,
            options,
            session_dir,
            context_messages: file
                .session
                .context_messages
                .unwrap_or(DEFAULT_CONTEXT_MESSAGES),
            verbose,
            tools_enabled,
            auto_approve: args.yes,
            tools,
        }
    }
}

pub fn default_session_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("gemmis").join("sessions"))
        .unwrap_or_else(|| PathBuf::from(".gemmis").join("sessions"))
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

impl FileConfig {
    pub fn load() -> Result<Self> {
        for path in Self::get_config_paths() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(FileConfig::default())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|s| s.to_str());
        if matches!(extension, Some("yaml") | Some("yml")) {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config file: {}", path.display()))
        } else {
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config file: {}", path.display()))
        }
    }

    pub fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from(".gemmis.yaml"),
            PathBuf::from(".gemmis.yml"),
            PathBuf::from(".gemmis.json"),
        ];

        if let Some(home_dir) = dirs::home_dir() {
            let config_dir = home_dir.join(".config").join("gemmis");
            paths.push(config_dir.join("gemmis.yaml"));
            paths.push(config_dir.join("gemmis.yml"));
            paths.push(config_dir.join("gemmis.json"));
        }

        paths
    }
}
