use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::policy::{Classification, ConfirmationPolicy};
use super::registry::ToolRegistry;
use crate::api::ToolSpec;
use crate::models::{ToolCall, ToolResult};

pub const PERMISSION_DENIED: &str = "permission denied";
pub const SCHEMA_ERROR_PREFIX: &str = "SchemaValidationError:";

/// Cut `text` to at most `max_bytes` on a char boundary, appending a note.
/// Returns the (possibly shortened) text and whether anything was cut.
pub fn truncate_output(text: String, max_bytes: usize) -> (String, bool) {
    if text.len() <= max_bytes {
        return (text, false);
    }
    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let total = text.len();
    let mut truncated = text;
    truncated.truncate(cut);
    truncated.push_str(&format!("\n[output truncated: {} of {} bytes shown]", cut, total));
    (truncated, true)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Validates, classifies, confirms and runs tool calls. Every path ends in a
/// [`ToolResult`]; nothing propagates out as an error or panic.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.specs()
    }

    /// Pure lookup in the tier table.
    pub fn classify(&self, name: &str) -> Classification {
        self.registry
            .tier(name)
            .map(Classification::from)
            .unwrap_or(Classification::Unknown)
    }

    /// The table tier, escalated to `Sensitive` when a command-style call
    /// carries a destructive pattern.
    pub fn classify_call(&self, call: &ToolCall) -> Classification {
        let base = self.classify(&call.name);
        if base != Classification::Safe {
            return base;
        }
        let Some(tool) = self.registry.get(&call.name) else {
            return Classification::Unknown;
        };
        if !tool.command_style {
            return base;
        }

        let patterns = self.registry.patterns();
        let static_match = tool
            .static_command
            .as_deref()
            .map(|line| patterns.is_match(line))
            .unwrap_or(false);
        if static_match || patterns.matches_value(&call.arguments_value()) {
            debug!(tool = %call.name, id = %call.id, "call escalated to sensitive by pattern");
            Classification::Sensitive
        } else {
            base
        }
    }

    pub async fn execute(&self, call: &ToolCall, policy: &dyn ConfirmationPolicy) -> ToolResult {
        let Some(tool) = self.registry.get(&call.name) else {
            warn!(tool = %call.name, id = %call.id, "model requested unknown tool");
            return ToolResult::error(&call.id, format!("unknown tool '{}'", call.name));
        };

        let arguments = call.arguments_value();
        if let Err(message) = tool.validate_arguments(&arguments) {
            debug!(tool = %call.name, id = %call.id, error = %message, "schema validation failed");
            return ToolResult::error(&call.id, format!("{} {}", SCHEMA_ERROR_PREFIX, message));
        }

        let classification = self.classify_call(call);
        if classification.needs_confirmation() && !policy.confirm(call, classification).await {
            info!(tool = %call.name, id = %call.id, "tool call denied");
            return ToolResult::error(&call.id, PERMISSION_DENIED);
        }

        let settings = self.registry.settings().clone();
        let limit = tool.timeout.unwrap_or(settings.timeout);
        let max_output = tool.max_output_bytes.unwrap_or(settings.max_output_bytes);
        let run = (tool.handler())(arguments, settings);

        info!(tool = %call.name, id = %call.id, ?classification, "running tool");
        let start = Instant::now();
        let outcome = timeout(limit, AssertUnwindSafe(run).catch_unwind()).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Err(_) => ToolResult::error(
                &call.id,
                format!("tool '{}' timed out after {} seconds", call.name, limit.as_secs()),
            ),
            Ok(Err(payload)) => ToolResult::error(
                &call.id,
                format!("tool '{}' panicked: {}", call.name, panic_message(payload.as_ref())),
            ),
            Ok(Ok(Err(message))) => ToolResult::error(&call.id, message),
            Ok(Ok(Ok(output))) => {
                let (text, cut) = truncate_output(output.text, max_output);
                ToolResult {
                    tool_call_id: call.id.clone(),
                    output: text,
                    is_error: output.exit_code.map(|code| code != 0).unwrap_or(false),
                    exit_code: output.exit_code,
                    truncated: cut || output.truncated,
                }
            }
        };

        info!(
            tool = %call.name,
            id = %call.id,
            is_error = result.is_error,
            truncated = result.truncated,
            elapsed_ms,
            "tool finished"
        );
        result
    }
}
