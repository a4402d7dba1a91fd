use colored::*;
use serde_json::Value;
use std::io::{self, Write};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::ErrorKind;
use crate::models::TurnOutcome;
use crate::orchestrator::UiEvent;
use crate::session::SessionSummary;

const ARGUMENT_PREVIEW_CHARS: usize = 120;

/// Shorten `text` to `max_chars` characters with a trailing ellipsis.
pub fn truncate_for_display(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

fn describe_failure(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Network => "could not reach the model backend",
        ErrorKind::Api => "the backend rejected the request",
        ErrorKind::Timeout => "the backend stopped responding",
        ErrorKind::Parse => "the backend sent a malformed response",
        ErrorKind::ToolLoopLimitExceeded => "the model kept calling tools without answering",
        ErrorKind::Storage => "the conversation could not be saved",
        _ => "the turn failed",
    }
}

/// Render one event. Returns true for the event that ends a turn.
pub fn render_event(event: &UiEvent, out: &mut impl Write) -> io::Result<bool> {
    match event {
        UiEvent::AssistantTextAppended(text) => {
            write!(out, "{}", text)?;
            out.flush()?;
            Ok(false)
        }
        UiEvent::ToolInvoked { name, arguments } => {
            let args = match arguments {
                Value::Object(map) if map.is_empty() => String::new(),
                other => truncate_for_display(&other.to_string(), ARGUMENT_PREVIEW_CHARS),
            };
            writeln!(out)?;
            writeln!(out, "{} {} {}", "⚙".cyan(), name.cyan().bold(), args.dimmed())?;
            Ok(false)
        }
        UiEvent::ToolCompleted { name, is_error } => {
            if *is_error {
                writeln!(out, "{} {}", "✗".red(), format!("{} failed", name).red())?;
            } else {
                writeln!(out, "{} {}", "✓".green(), name.dimmed())?;
            }
            Ok(false)
        }
        UiEvent::TurnFinished(TurnOutcome::Cancelled) => {
            writeln!(out)?;
            writeln!(out, "{}", "[cancelled]".yellow())?;
            Ok(true)
        }
        UiEvent::TurnFinished(_) => {
            writeln!(out)?;
            Ok(true)
        }
        UiEvent::TurnFailed(kind) => {
            writeln!(out)?;
            writeln!(
                out,
                "{} {} ({})",
                "Error:".red(),
                describe_failure(*kind),
                kind.as_str().dimmed()
            )?;
            Ok(true)
        }
    }
}

/// Drain events for one turn onto stdout.
pub async fn render_turn(rx: &mut UnboundedReceiver<UiEvent>) -> io::Result<()> {
    while let Some(event) = rx.recv().await {
        let mut stdout = io::stdout();
        if render_event(&event, &mut stdout)? {
            break;
        }
    }
    Ok(())
}

pub fn print_session_list(sessions: &[SessionSummary]) {
    if sessions.is_empty() {
        println!("{}", "No saved sessions.".dimmed());
        return;
    }
    for summary in sessions {
        println!(
            "{}  {}  {}",
            summary.meta.id.cyan(),
            summary.meta.name.bold(),
            format!(
                "{} messages, last active {}, model {}",
                summary.message_count,
                summary.last_activity.format("%Y-%m-%d %H:%M"),
                summary.meta.model
            )
            .dimmed()
        );
    }
}

pub fn print_tools(names: &[&str]) {
    if !names.is_empty() {
        eprintln!("{}", format!("Tools: {}", names.join(", ")).dimmed());
    }
}

pub fn print_error(message: impl std::fmt::Display) {
    eprintln!("{} {}", "Error:".red(), message);
}
