use async_trait::async_trait;
use colored::*;
use std::io::{self, BufRead, Write};

use super::output::truncate_for_display;
use crate::models::ToolCall;
use crate::tools::{Classification, ConfirmationPolicy};

/// Asks on the terminal before a sensitive or unknown tool runs.
pub struct TerminalConfirm;

fn ask(prompt: String) -> bool {
    eprint!("{}", prompt);
    if io::stderr().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(0) | Err(_) => false,
        Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
    }
}

#[async_trait]
impl ConfirmationPolicy for TerminalConfirm {
    async fn confirm(&self, call: &ToolCall, classification: Classification) -> bool {
        let label = match classification {
            Classification::Unknown => "unknown tool",
            _ => "sensitive",
        };
        let prompt = format!(
            "\n{} {} {} {}\n{} ",
            "?".yellow().bold(),
            call.name.bold(),
            format!("({})", label).yellow(),
            truncate_for_display(&call.arguments_value().to_string(), 300).dimmed(),
            "Allow? [y/N]".bold()
        );
        // Denied if the prompt task itself fails.
        tokio::task::spawn_blocking(move || ask(prompt))
            .await
            .unwrap_or(false)
    }
}
