use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use regex::Regex;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use super::builtins::format_process_text;
use super::paths::{canonicalize_within_base_dir, is_option_like, safe_resolve_path};
use super::policy::Tier;
use super::process::{run_captured, ProcessOutput};
use super::registry::ToolDescriptor;
use super::{ToolFuture, ToolOutput, ToolSettings};
use crate::config::{expand_env_var_in_string, expand_env_vars, CustomToolConfig, TemplateValidation};

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").expect("valid placeholder pattern"))
}

fn path_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^(.*_)?(path|file|dir)(s)?$").expect("valid path key pattern"))
}

/// Turn a `type: command` or `type: script` entry into a registered tool.
pub fn create_dynamic_tool(
    tool_config: &CustomToolConfig,
    settings: &ToolSettings,
) -> Result<ToolDescriptor, String> {
    let tool_type = tool_config
        .r#type
        .as_deref()
        .ok_or_else(|| format!("Tool '{}' is missing 'type' field", tool_config.name))?;

    let description = tool_config
        .description
        .clone()
        .ok_or_else(|| format!("Tool '{}' is missing 'description' field", tool_config.name))?;

    let input_schema = tool_config
        .input_schema
        .clone()
        .ok_or_else(|| format!("Tool '{}' is missing 'input_schema' field", tool_config.name))?;

    let static_command = match tool_type {
        "script" => {
            let interpreter = tool_config.interpreter.as_ref().ok_or_else(|| {
                format!(
                    "Tool '{}' (type: script) requires 'interpreter' field",
                    tool_config.name
                )
            })?;
            if tool_config.script.is_none() && tool_config.script_path.is_none() {
                return Err(format!(
                    "Tool '{}' (type: script) requires either 'script' or 'script_path' field",
                    tool_config.name
                ));
            }
            let mut line = interpreter.clone();
            if let Some(script) = &tool_config.script {
                line.push('\n');
                line.push_str(script);
            }
            line
        }
        "command" => {
            let command = tool_config.command.as_ref().ok_or_else(|| {
                format!(
                    "Tool '{}' (type: command) requires 'command' field",
                    tool_config.name
                )
            })?;
            std::iter::once(command.as_str())
                .chain(tool_config.args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ")
        }
        other => {
            return Err(format!(
                "Tool '{}' has invalid type '{}' (must be 'script' or 'command')",
                tool_config.name, other
            ))
        }
    };

    // Validation regexes are compiled up front so a typo fails at startup.
    if let Some(validations) = &tool_config.template_validations {
        for (key, validation) in validations {
            for pattern in validation
                .allow_patterns
                .iter()
                .chain(validation.deny_patterns.iter())
                .flatten()
            {
                Regex::new(pattern).map_err(|e| {
                    format!(
                        "Tool '{}' has invalid pattern '{}' for '{}': {}",
                        tool_config.name, pattern, key, e
                    )
                })?;
            }
        }
    }

    let config = Arc::new(tool_config.clone());
    let handler_config = Arc::clone(&config);
    let handler = Arc::new(move |args: Value, settings: ToolSettings| -> ToolFuture {
        let config = Arc::clone(&handler_config);
        Box::pin(async move { execute_dynamic_tool(&config, &args, &settings).await })
    });

    let timeout = config.timeout_secs.map(Duration::from_secs).unwrap_or(settings.timeout);
    let max_output = config
        .max_output_bytes
        .map(|bytes| bytes as usize)
        .unwrap_or(settings.max_output_bytes);

    Ok(ToolDescriptor::new(
        config.name.clone(),
        description,
        input_schema,
        config.sensitivity.unwrap_or(Tier::Sensitive),
        handler,
    )?
    .command_style(Some(static_command))
    .with_timeout(timeout)
    .with_max_output_bytes(max_output))
}

fn output_bound(tool_config: &CustomToolConfig, settings: &ToolSettings) -> usize {
    tool_config
        .max_output_bytes
        .map(|bytes| bytes as usize)
        .unwrap_or(settings.max_output_bytes)
}

pub async fn execute_dynamic_tool(
    tool_config: &CustomToolConfig,
    arguments: &Value,
    settings: &ToolSettings,
) -> Result<ToolOutput, String> {
    match tool_config.r#type.as_deref() {
        Some("script") => execute_script(tool_config, arguments, settings).await,
        Some("command") => execute_command(tool_config, arguments, settings).await,
        other => Err(format!(
            "Unknown tool type '{}' for tool '{}'",
            other.unwrap_or("<none>"),
            tool_config.name
        )),
    }
}

fn resolve_working_dir(tool_config: &CustomToolConfig, settings: &ToolSettings) -> Result<PathBuf, String> {
    match &tool_config.working_dir {
        Some(wd) => safe_resolve_path(wd, &settings.base_dir),
        None => Ok(settings.base_dir.clone()),
    }
}

fn script_extension(interpreter: &str) -> &str {
    if interpreter.contains("python") {
        "py"
    } else if interpreter.contains("node") || interpreter.contains("bun") {
        "js"
    } else if interpreter.contains("bash") || interpreter.contains("sh") {
        "sh"
    } else if interpreter.contains("ruby") {
        "rb"
    } else {
        "txt"
    }
}

async fn execute_script(
    tool_config: &CustomToolConfig,
    arguments: &Value,
    settings: &ToolSettings,
) -> Result<ToolOutput, String> {
    let interpreter = tool_config.interpreter.as_ref().ok_or_else(|| {
        format!(
            "Tool '{}' (type: script) requires 'interpreter' field",
            tool_config.name
        )
    })?;

    let script_path = if let Some(inline_script) = &tool_config.script {
        let temp_dir = settings.base_dir.join(".gemmis-tools").join("tmp");
        fs::create_dir_all(&temp_dir)
            .map_err(|e| format!("Failed to create temp directory: {}", e))?;
        let temp_file = temp_dir.join(format!(
            "{}.{}",
            tool_config.name.replace('/', "_"),
            script_extension(interpreter)
        ));
        fs::write(&temp_file, inline_script)
            .map_err(|e| format!("Failed to write script file: {}", e))?;
        temp_file
    } else if let Some(path) = &tool_config.script_path {
        safe_resolve_path(path, &settings.base_dir)?
    } else {
        return Err(format!(
            "Tool '{}' (type: script) requires either 'script' (inline) or 'script_path' field",
            tool_config.name
        ));
    };

    let working_dir = resolve_working_dir(tool_config, settings)?;
    let env_vars = expand_env_vars(&tool_config.env);
    let args_json = serde_json::to_string(arguments)
        .map_err(|e| format!("Failed to serialize arguments: {}", e))?;

    debug!(
        tool = %tool_config.name,
        interpreter = %interpreter,
        script = %script_path.display(),
        cwd = %working_dir.display(),
        "running script tool"
    );

    let mut cmd = Command::new(interpreter);
    cmd.arg(&script_path).current_dir(&working_dir).envs(&env_vars);

    let start = Instant::now();
    let output = run_captured(cmd, Some(args_json), output_bound(tool_config, settings)).await?;
    Ok(finish("Script", &tool_config.name, output, start))
}

async fn execute_command(
    tool_config: &CustomToolConfig,
    arguments: &Value,
    settings: &ToolSettings,
) -> Result<ToolOutput, String> {
    let command = tool_config.command.as_ref().ok_or_else(|| {
        format!(
            "Tool '{}' (type: command) requires 'command' field",
            tool_config.name
        )
    })?;

    let working_dir = resolve_working_dir(tool_config, settings)?;
    let env_vars = expand_env_vars(&tool_config.env);
    let env_expanded_args: Vec<String> = tool_config
        .args
        .iter()
        .map(|arg| expand_env_var_in_string(arg))
        .collect();
    let templated_args = template_args(&env_expanded_args, arguments, tool_config, settings)?;

    debug!(
        tool = %tool_config.name,
        command = %command,
        args = ?templated_args,
        cwd = %working_dir.display(),
        "running command tool"
    );

    let mut cmd = Command::new(command);
    cmd.args(&templated_args)
        .current_dir(&working_dir)
        .envs(&env_vars);

    let stdin = if tool_config.stdin_json {
        Some(
            serde_json::to_string(arguments)
                .map_err(|e| format!("Failed to serialize arguments: {}", e))?,
        )
    } else {
        None
    };

    let start = Instant::now();
    let output = run_captured(cmd, stdin, output_bound(tool_config, settings)).await?;
    Ok(finish("Command", &tool_config.name, output, start))
}

fn finish(label: &str, name: &str, output: ProcessOutput, start: Instant) -> ToolOutput {
    debug!(
        tool = %name,
        exit_code = ?output.exit_code,
        duration_ms = start.elapsed().as_millis() as u64,
        output_bytes = output.stdout.len(),
        "tool process finished"
    );

    let text = if output.success() {
        if output.stdout.trim().is_empty() {
            format_process_text(&output.stdout, &output.stderr)
        } else {
            output.stdout.clone()
        }
    } else {
        format!(
            "{} exited with code {}: {}",
            label,
            output.exit_code.unwrap_or(-1),
            format_process_text(&output.stdout, &output.stderr)
        )
    };

    ToolOutput {
        text,
        exit_code: Some(output.exit_code.unwrap_or(-1)),
        truncated: output.dropped_bytes > 0,
    }
}

/// Replace `{{key}}` placeholders with validated argument values.
///
/// Placeholders are substituted once, so a value containing `{{...}}` is
/// never expanded again. A `--` is inserted before the first templated
/// argument when path placeholders are present (or when configured).
pub fn template_args(
    args: &[String],
    arguments: &Value,
    tool_config: &CustomToolConfig,
    settings: &ToolSettings,
) -> Result<Vec<String>, String> {
    let mut has_path_placeholders = false;
    let mut templated_args = Vec::with_capacity(args.len());
    let mut first_templated: Option<usize> = None;

    for (arg_idx, arg) in args.iter().enumerate() {
        let mut replacements: Vec<(usize, usize, String)> = Vec::new();

        for cap in placeholder_pattern().captures_iter(arg) {
            first_templated.get_or_insert(arg_idx);
            let Some(whole) = cap.get(0) else { continue };
            let key = &cap[1];

            // Missing keys stay as-is; schema validation covers required fields.
            let Some(value) = arguments.get(key) else { continue };
            let value_str = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                other => other.to_string(),
            };

            let validation = validation_policy(key, tool_config);
            if validation.kind == "path" {
                has_path_placeholders = true;
            }
            let validated = validate_and_transform_value(key, &value_str, &validation, tool_config, settings)?;
            replacements.push((whole.start(), whole.end(), validated));
        }

        let mut result = arg.clone();
        for (start, end, replacement) in replacements.into_iter().rev() {
            result.replace_range(start..end, &replacement);
        }
        templated_args.push(result);
    }

    let insert_double_dash = tool_config
        .insert_double_dash
        .unwrap_or(has_path_placeholders);

    if let (true, Some(index)) = (insert_double_dash, first_templated) {
        templated_args.insert(index, "--".to_string());
    }
    Ok(templated_args)
}

fn validation_policy(key: &str, tool_config: &CustomToolConfig) -> TemplateValidation {
    if let Some(validation) = tool_config
        .template_validations
        .as_ref()
        .and_then(|validations| validations.get(key))
    {
        return validation.clone();
    }

    TemplateValidation {
        kind: if path_key_pattern().is_match(key) {
            "path".to_string()
        } else {
            "string".to_string()
        },
        allow_patterns: None,
        deny_patterns: None,
        allow_absolute: false,
    }
}

fn validate_and_transform_value(
    key: &str,
    value: &str,
    validation: &TemplateValidation,
    tool_config: &CustomToolConfig,
    settings: &ToolSettings,
) -> Result<String, String> {
    match validation.kind.as_str() {
        "path" => {
            if is_option_like(value) {
                return Err(format!(
                    "Invalid path argument '{}': value '{}' looks like a command-line option",
                    key, value
                ));
            }
            if !tool_config.restrict_to_base_dir {
                return Ok(value.to_string());
            }
            if value.starts_with('/') && !validation.allow_absolute {
                return Err(format!(
                    "Invalid path argument '{}': absolute path '{}' is not allowed",
                    key, value
                ));
            }
            canonicalize_within_base_dir(value, &settings.base_dir)
                .map_err(|e| format!("Invalid path argument '{}': {}", key, e))
        }
        "number" => {
            value
                .parse::<f64>()
                .map_err(|_| format!("Invalid number argument '{}': '{}'", key, value))?;
            Ok(value.to_string())
        }
        _ => {
            if let Some(allow_patterns) = &validation.allow_patterns {
                let mut matched = false;
                for pattern in allow_patterns {
                    let re = Regex::new(pattern)
                        .map_err(|e| format!("Invalid allow_pattern regex '{}': {}", pattern, e))?;
                    if re.is_match(value) {
                        matched = true;
                        break;
                    }
                }
                if !matched {
                    return Err(format!(
                        "Invalid string argument '{}': value '{}' does not match any allow_pattern",
                        key, value
                    ));
                }
            }

            if let Some(deny_patterns) = &validation.deny_patterns {
                for pattern in deny_patterns {
                    let re = Regex::new(pattern)
                        .map_err(|e| format!("Invalid deny_pattern regex '{}': {}", pattern, e))?;
                    if re.is_match(value) {
                        return Err(format!(
                            "Invalid string argument '{}': value '{}' matches deny_pattern '{}'",
                            key, value, pattern
                        ));
                    }
                }
            }

            Ok(value.to_string())
        }
    }
}
