use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ToolCall;

/// Static safety tier of a registered tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Safe,
    Sensitive,
}

/// What the executor decided about a name or an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Safe,
    Sensitive,
    /// Not in the registry. Treated as sensitive.
    Unknown,
}

impl Classification {
    pub fn needs_confirmation(&self) -> bool {
        !matches!(self, Classification::Safe)
    }
}

impl From<Tier> for Classification {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::Safe => Classification::Safe,
            Tier::Sensitive => Classification::Sensitive,
        }
    }
}

/// Programs that create, delete or rewrite files, change ownership, escalate
/// privileges or terminate processes.
const DESTRUCTIVE_PROGRAMS: &[&str] = &[
    "rm", "rmdir", "shred", "unlink", "truncate", "mv", "cp", "mkdir", "touch", "tee", "ln",
    "install", "rsync", "dd", "mkfs", "format", "chmod", "chown", "chgrp", "sudo", "doas", "su",
    "kill", "killall", "pkill", "reboot", "shutdown", "halt", "poweroff",
];

/// `find` actions that delete files or run arbitrary programs.
const FIND_ACTION_PATTERN: &str = r"(?:^|[\s;&|(`/])find\s.*\s-(?:delete|exec|execdir|ok|okdir|fprint\w*)\b";

/// Interpreters handed inline code, which can do anything.
const INLINE_CODE_PATTERN: &str =
    r"(?:^|[\s;&|(`/])(?:sh|bash|zsh|dash|ksh|fish|python[0-9.]*|perl|ruby|node|php|lua)\s+(?:\S+\s+)*?-(?:c|e|E|r)\b";

/// Regex rules applied to the string arguments of command-style tools.
#[derive(Debug, Clone)]
pub struct SensitivePatterns {
    patterns: Vec<Regex>,
}

impl SensitivePatterns {
    /// Built-in destructive patterns plus `extra` user regexes.
    pub fn new(extra: &[String]) -> Result<Self, String> {
        let programs = DESTRUCTIVE_PROGRAMS.join("|");
        let builtin = format!(r"(?:^|[\s;&|(`/])(?:{})(?:\.\w+)?(?:\s|$|[;&|)`])", programs);
        let mut patterns = vec![
            Regex::new(&builtin).map_err(|e| format!("Invalid built-in pattern: {}", e))?,
            Regex::new(r">\s*/dev/(?:sd|nvme|hd)").map_err(|e| format!("Invalid built-in pattern: {}", e))?,
            Regex::new(FIND_ACTION_PATTERN).map_err(|e| format!("Invalid built-in pattern: {}", e))?,
            Regex::new(INLINE_CODE_PATTERN).map_err(|e| format!("Invalid built-in pattern: {}", e))?,
        ];
        for pattern in extra {
            patterns.push(
                Regex::new(pattern)
                    .map_err(|e| format!("Invalid sensitive_patterns regex '{}': {}", pattern, e))?,
            );
        }
        Ok(Self { patterns })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(text))
    }

    /// True if any string inside `value` matches.
    pub fn matches_value(&self, value: &Value) -> bool {
        match value {
            Value::String(text) => self.is_match(text),
            Value::Array(items) => items.iter().any(|item| self.matches_value(item)),
            Value::Object(map) => map.values().any(|item| self.matches_value(item)),
            _ => false,
        }
    }
}

/// Decides whether a sensitive or unknown call may run.
#[async_trait]
pub trait ConfirmationPolicy: Send + Sync {
    async fn confirm(&self, call: &ToolCall, classification: Classification) -> bool;
}

pub struct AllowAll;

#[async_trait]
impl ConfirmationPolicy for AllowAll {
    async fn confirm(&self, _call: &ToolCall, _classification: Classification) -> bool {
        true
    }
}

pub struct DenyAll;

#[async_trait]
impl ConfirmationPolicy for DenyAll {
    async fn confirm(&self, _call: &ToolCall, _classification: Classification) -> bool {
        false
    }
}
