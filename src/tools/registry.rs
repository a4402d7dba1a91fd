use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use tracing::{debug, warn};

use super::builtins::{builtin_tools, BUILTIN_TOOL_NAMES};
use super::dynamic::create_dynamic_tool;
use super::policy::{SensitivePatterns, Tier};
use super::{ToolHandler, ToolSettings};
use crate::api::ToolSpec;
use crate::config::ToolsConfig;
use crate::error::{GemmisError, Result};

pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub tier: Tier,
    /// Command-style tools have their string arguments checked against the
    /// sensitive patterns.
    pub command_style: bool,
    /// Fixed part of a configured command line, checked the same way.
    pub static_command: Option<String>,
    pub timeout: Option<Duration>,
    pub max_output_bytes: Option<usize>,
    schema: Arc<JSONSchema>,
    handler: ToolHandler,
}

impl ToolDescriptor {
    /// Fails if `parameters` is not a valid JSON schema.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        tier: Tier,
        handler: ToolHandler,
    ) -> std::result::Result<Self, String> {
        let name = name.into();
        let schema = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&parameters)
            .map_err(|e| format!("Invalid input schema for tool '{}': {}", name, e))?;

        Ok(Self {
            name,
            description: description.into(),
            parameters,
            tier,
            command_style: false,
            static_command: None,
            timeout: None,
            max_output_bytes: None,
            schema: Arc::new(schema),
            handler,
        })
    }

    pub fn command_style(mut self, static_command: Option<String>) -> Self {
        self.command_style = true;
        self.static_command = static_command;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = Some(bytes);
        self
    }

    pub fn validate_arguments(&self, arguments: &Value) -> std::result::Result<(), String> {
        if let Err(errors) = self.schema.validate(arguments) {
            let messages: Vec<String> = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{}: {}", path, e)
                    }
                })
                .collect();
            return Err(messages.join("; "));
        }
        Ok(())
    }

    pub fn handler(&self) -> ToolHandler {
        Arc::clone(&self.handler)
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Every tool the model may call, resolved once at startup.
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDescriptor>,
    settings: ToolSettings,
    patterns: SensitivePatterns,
}

impl ToolRegistry {
    pub fn new(settings: ToolSettings, patterns: SensitivePatterns) -> Self {
        Self {
            tools: BTreeMap::new(),
            settings,
            patterns,
        }
    }

    /// Built-ins plus configured tools. Fails on any entry that cannot be
    /// turned into a runnable tool.
    pub fn from_config(config: &ToolsConfig) -> Result<Self> {
        let settings = ToolSettings::from_config(config);
        let patterns =
            SensitivePatterns::new(&config.sensitive_patterns).map_err(GemmisError::ToolRegistry)?;
        let mut registry = Self::new(settings, patterns);

        let mut builtin_overrides = HashMap::new();
        for entry in config.custom.iter().filter(|c| c.is_builtin_override()) {
            if !BUILTIN_TOOL_NAMES.contains(&entry.name.as_str()) {
                return Err(GemmisError::ToolRegistry(format!(
                    "Tool '{}' has no handler: it is not a built-in and declares no 'type'",
                    entry.name
                )));
            }
            builtin_overrides.insert(entry.name.as_str(), entry);
        }

        for mut tool in builtin_tools().map_err(GemmisError::ToolRegistry)? {
            if let Some(entry) = builtin_overrides.get(tool.name.as_str()) {
                if !entry.enabled {
                    debug!(tool = %tool.name, "built-in tool disabled by config");
                    continue;
                }
                if let Some(description) = &entry.description {
                    tool.description = description.clone();
                }
                if let Some(tier) = entry.sensitivity {
                    tool.tier = tier;
                }
            }
            registry.register(tool).map_err(GemmisError::ToolRegistry)?;
        }

        for entry in config.custom.iter().filter(|c| !c.is_builtin_override()) {
            if !entry.enabled {
                continue;
            }
            let tool = create_dynamic_tool(entry, &registry.settings)
                .map_err(GemmisError::ToolRegistry)?;
            registry.register(tool).map_err(GemmisError::ToolRegistry)?;
        }

        for (name, tier) in &config.tiers {
            match registry.tools.get_mut(name) {
                Some(tool) => tool.tier = *tier,
                None => warn!(tool = %name, "tier override for unregistered tool"),
            }
        }

        debug!(tools = ?registry.names(), "tool registry ready");
        Ok(registry)
    }

    pub fn register(&mut self, tool: ToolDescriptor) -> std::result::Result<(), String> {
        if self.tools.contains_key(&tool.name) {
            return Err(format!("Duplicate tool name '{}'", tool.name));
        }
        self.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    pub fn tier(&self, name: &str) -> Option<Tier> {
        self.tools.get(name).map(|tool| tool.tier)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas advertised to the model, sorted by name.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(ToolDescriptor::spec).collect()
    }

    pub fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    pub fn patterns(&self) -> &SensitivePatterns {
        &self.patterns
    }
}
