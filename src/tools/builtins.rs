use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::fs;
use tokio::process::Command;
use tracing::debug;

use super::paths::{resolve_for_write, safe_resolve_path, stringify_path};
use super::policy::Tier;
use super::process::run_captured;
use super::registry::ToolDescriptor;
use super::{ToolFuture, ToolOutput, ToolSettings};

pub const BUILTIN_TOOL_NAMES: &[&str] = &[
    "list_dir",
    "read_file",
    "write_file",
    "run_command",
    "list_processes",
    "find_large_files",
    "git_status",
    "time_now",
];

/// Programs `run_command` refuses outright, even with confirmation.
const BLOCKED_PROGRAMS: &[&str] = &["mkfs", "dd", "format", "fdisk", "parted"];

/// Files `write_file` never touches.
const PROTECTED_FILE_NAMES: &[&str] = &[
    ".bashrc",
    ".bash_profile",
    ".zshrc",
    ".zprofile",
    ".profile",
    ".login",
];

const MAX_DIR_ENTRIES: usize = 500;
const DEFAULT_PROCESS_LIMIT: u64 = 15;
const DEFAULT_LARGE_FILE_MB: f64 = 100.0;
const DEFAULT_LARGE_FILE_LIMIT: u64 = 20;
/// Directory entries `find_large_files` inspects before giving up.
const MAX_WALK_ENTRIES: usize = 50_000;

fn handler<F, Fut>(f: F) -> super::ToolHandler
where
    F: Fn(Value, ToolSettings) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<ToolOutput, String>> + Send + 'static,
{
    Arc::new(move |args, settings| -> ToolFuture { Box::pin(f(args, settings)) })
}

pub fn builtin_tools() -> Result<Vec<ToolDescriptor>, String> {
    Ok(vec![
        ToolDescriptor::new(
            "list_dir",
            "List files and directories in a directory, with kind and size. Limited to the base directory.",
            json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Directory to list, relative to the base directory. Defaults to '.'"
                    }
                },
                "additionalProperties": false
            }),
            Tier::Safe,
            handler(handle_list_dir),
        )?,
        ToolDescriptor::new(
            "read_file",
            "Read a UTF-8 text file. Limited to files within the base directory and under the size limit.",
            json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path to the file to read, relative to the base directory"
                    }
                },
                "required": ["path"],
                "additionalProperties": false
            }),
            Tier::Safe,
            handler(handle_read_file),
        )?,
        ToolDescriptor::new(
            "write_file",
            "Write text to a file inside the base directory, replacing it unless append is true.",
            json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path to the file to write, relative to the base directory"
                    },
                    "content": {
                        "type": "string",
                        "description": "Text to write"
                    },
                    "append": {
                        "type": "boolean",
                        "description": "Append instead of replacing"
                    }
                },
                "required": ["path", "content"],
                "additionalProperties": false
            }),
            Tier::Sensitive,
            handler(handle_write_file),
        )?,
        ToolDescriptor::new(
            "run_command",
            "Run a program with arguments (no shell: pipes, redirects and globs are not expanded) and return its output.",
            json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "Program followed by its arguments, e.g. 'ls -la src'"
                    },
                    "cwd": {
                        "type": "string",
                        "description": "Working directory relative to the base directory"
                    }
                },
                "required": ["command"],
                "additionalProperties": false
            }),
            Tier::Safe,
            handler(handle_run_command),
        )?
        .command_style(None),
        ToolDescriptor::new(
            "list_processes",
            "List running processes sorted by CPU usage.",
            json!({
                "type": "object",
                "properties": {
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 200,
                        "description": "How many processes to return (default 15)"
                    }
                },
                "additionalProperties": false
            }),
            Tier::Safe,
            handler(handle_list_processes),
        )?,
        ToolDescriptor::new(
            "find_large_files",
            "Find regular files larger than a size threshold under a directory, largest first. Symlinks are not followed.",
            json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Directory to search, relative to the base directory. Defaults to '.'"
                    },
                    "min_size_mb": {
                        "type": "number",
                        "minimum": 0,
                        "description": "Only report files larger than this many MiB (default 100)"
                    },
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 500,
                        "description": "How many files to return (default 20)"
                    }
                },
                "additionalProperties": false
            }),
            Tier::Safe,
            handler(handle_find_large_files),
        )?,
        ToolDescriptor::new(
            "git_status",
            "Show the branch, short status and unstaged diff summary of a git working tree.",
            json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Directory inside the repository, relative to the base directory. Defaults to '.'"
                    }
                },
                "additionalProperties": false
            }),
            Tier::Safe,
            handler(handle_git_status),
        )?,
        ToolDescriptor::new(
            "time_now",
            "Get the current date and time (UTC, RFC 3339).",
            json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
            Tier::Safe,
            handler(handle_time_now),
        )?,
    ])
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

async fn handle_list_dir(args: Value, settings: ToolSettings) -> Result<ToolOutput, String> {
    let path = str_arg(&args, "path").unwrap_or(".");
    let resolved = safe_resolve_path(path, &settings.base_dir)?;

    let mut reader = fs::read_dir(&resolved)
        .await
        .map_err(|e| format!("Failed to read directory '{}': {}", path, e))?;

    let mut entries = Vec::new();
    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|e| format!("Failed to read directory entry: {}", e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        let line = match entry.metadata().await {
            Ok(meta) if meta.is_dir() => format!("dir\t-\t{}/", name),
            Ok(meta) => format!("file\t{}\t{}", meta.len(), name),
            Err(_) => format!("?\t-\t{}", name),
        };
        entries.push((name, line));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    if entries.is_empty() {
        return Ok(ToolOutput::text(format!("{} is empty", stringify_path(&resolved)?)));
    }

    let total = entries.len();
    let mut text = entries
        .into_iter()
        .take(MAX_DIR_ENTRIES)
        .map(|(_, line)| line)
        .collect::<Vec<_>>()
        .join("\n");
    if total > MAX_DIR_ENTRIES {
        text.push_str(&format!("\n... {} more entries", total - MAX_DIR_ENTRIES));
    }
    Ok(ToolOutput::text(text))
}

async fn handle_read_file(args: Value, settings: ToolSettings) -> Result<ToolOutput, String> {
    let path = str_arg(&args, "path").ok_or("Missing 'path' argument")?;
    let resolved = safe_resolve_path(path, &settings.base_dir)?;

    let meta = fs::metadata(&resolved)
        .await
        .map_err(|e| format!("Failed to stat '{}': {}", path, e))?;
    if !meta.is_file() {
        return Err(format!("'{}' is not a regular file", path));
    }
    if meta.len() > settings.max_file_size_bytes {
        return Err(format!(
            "File too large: {} bytes (max: {} bytes)",
            meta.len(),
            settings.max_file_size_bytes
        ));
    }

    let bytes = fs::read(&resolved)
        .await
        .map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    String::from_utf8(bytes)
        .map(ToolOutput::text)
        .map_err(|_| format!("'{}' is not valid UTF-8 text", path))
}

fn is_protected(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == ".ssh")
        || path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| PROTECTED_FILE_NAMES.contains(&n))
            .unwrap_or(false)
}

async fn handle_write_file(args: Value, settings: ToolSettings) -> Result<ToolOutput, String> {
    let path = str_arg(&args, "path").ok_or("Missing 'path' argument")?;
    let content = str_arg(&args, "content").ok_or("Missing 'content' argument")?;
    let append = args.get("append").and_then(Value::as_bool).unwrap_or(false);

    if is_protected(Path::new(path)) {
        return Err(format!("Refusing to write protected file '{}'", path));
    }
    if content.len() as u64 > settings.max_file_size_bytes {
        return Err(format!(
            "Content too large: {} bytes (max: {} bytes)",
            content.len(),
            settings.max_file_size_bytes
        ));
    }

    let target = resolve_for_write(path, &settings.base_dir)?;
    if is_protected(&target) {
        return Err(format!("Refusing to write protected file '{}'", path));
    }

    if append {
        use tokio::io::AsyncWriteExt;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .await
            .map_err(|e| format!("Failed to open '{}': {}", path, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| format!("Failed to write '{}': {}", path, e))?;
    } else {
        fs::write(&target, content)
            .await
            .map_err(|e| format!("Failed to write '{}': {}", path, e))?;
    }

    Ok(ToolOutput::text(format!(
        "{} {} bytes to {}",
        if append { "Appended" } else { "Wrote" },
        content.len(),
        stringify_path(&target)?
    )))
}

fn program_name(program: &str) -> &str {
    let base = program.rsplit('/').next().unwrap_or(program);
    base.split('.').next().unwrap_or(base)
}

/// Joins stdout and stderr the way command results are shown to the model.
pub(crate) fn format_process_text(stdout: &str, stderr: &str) -> String {
    match (stdout.trim_end().is_empty(), stderr.trim_end().is_empty()) {
        (true, true) => "(no output)".to_string(),
        (false, true) => stdout.trim_end().to_string(),
        (true, false) => format!("[stderr]\n{}", stderr.trim_end()),
        (false, false) => format!("{}\n[stderr]\n{}", stdout.trim_end(), stderr.trim_end()),
    }
}

async fn handle_run_command(args: Value, settings: ToolSettings) -> Result<ToolOutput, String> {
    let line = str_arg(&args, "command").ok_or("Missing 'command' argument")?;
    let mut parts = line.split_whitespace();
    let program = parts.next().ok_or("Empty command")?;

    if BLOCKED_PROGRAMS.contains(&program_name(program)) {
        return Err(format!("Command '{}' is blocked", program_name(program)));
    }

    let cwd = match str_arg(&args, "cwd") {
        Some(dir) => safe_resolve_path(dir, &settings.base_dir)?,
        None => settings.base_dir.clone(),
    };

    let mut cmd = Command::new(program);
    cmd.args(parts).current_dir(&cwd);
    let output = run_captured(cmd, None, settings.max_output_bytes).await?;

    let body = format_process_text(&output.stdout, &output.stderr);
    let text = match output.exit_code {
        Some(0) => body,
        Some(code) => format!("Command exited with code {}\n{}", code, body),
        None => format!("Command terminated by signal\n{}", body),
    };

    Ok(ToolOutput {
        text,
        exit_code: Some(output.exit_code.unwrap_or(-1)),
        truncated: output.dropped_bytes > 0,
    })
}

struct ProcessRow {
    pid: String,
    user: String,
    cpu: f32,
    mem: f32,
    command: String,
}

fn parse_ps_output(stdout: &str) -> Vec<ProcessRow> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.to_string();
            let user = fields.next()?.to_string();
            let cpu = fields.next()?.parse().ok()?;
            let mem = fields.next()?.parse().ok()?;
            let command = fields.collect::<Vec<_>>().join(" ");
            Some(ProcessRow {
                pid,
                user,
                cpu,
                mem,
                command,
            })
        })
        .collect()
}

async fn handle_list_processes(args: Value, settings: ToolSettings) -> Result<ToolOutput, String> {
    let limit = args
        .get("limit")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_PROCESS_LIMIT) as usize;

    let mut cmd = Command::new("ps");
    cmd.args(["-eo", "pid,user,pcpu,pmem,comm"]);
    let output = run_captured(cmd, None, settings.max_output_bytes.max(256 * 1024)).await?;
    if !output.success() {
        return Err(format!("ps failed: {}", output.stderr.trim()));
    }

    let mut rows = parse_ps_output(&output.stdout);
    rows.sort_by(|a, b| b.cpu.total_cmp(&a.cpu));

    let mut text = format!("{:>7} {:<12} {:>5} {:>5} COMMAND", "PID", "USER", "%CPU", "%MEM");
    for row in rows.iter().take(limit) {
        text.push_str(&format!(
            "\n{:>7} {:<12} {:>5.1} {:>5.1} {}",
            row.pid, row.user, row.cpu, row.mem, row.command
        ));
    }
    Ok(ToolOutput::text(text))
}

fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

async fn handle_find_large_files(args: Value, settings: ToolSettings) -> Result<ToolOutput, String> {
    let path = str_arg(&args, "path").unwrap_or(".");
    let root = safe_resolve_path(path, &settings.base_dir)?;
    if !fs::metadata(&root).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(format!("Directory not found: {}", path));
    }

    let min_mb = args
        .get("min_size_mb")
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_LARGE_FILE_MB)
        .max(0.0);
    let threshold = (min_mb * 1024.0 * 1024.0) as u64;
    let limit = args
        .get("limit")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_LARGE_FILE_LIMIT) as usize;

    let mut pending = vec![root.clone()];
    let mut found: Vec<(u64, String)> = Vec::new();
    let mut visited = 0usize;
    let mut exhausted = false;

    'walk: while let Some(dir) = pending.pop() {
        let mut reader = match fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };
        while let Ok(Some(entry)) = reader.next_entry().await {
            visited += 1;
            if visited > MAX_WALK_ENTRIES {
                exhausted = true;
                break 'walk;
            }
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                let Ok(meta) = entry.metadata().await else {
                    continue;
                };
                if meta.len() > threshold {
                    let full = entry.path();
                    let shown = full.strip_prefix(&root).unwrap_or(&full).display().to_string();
                    found.push((meta.len(), shown));
                }
            }
        }
    }

    if found.is_empty() {
        let mut text = format!("No files larger than {} MiB under {}", min_mb, stringify_path(&root)?);
        if exhausted {
            text.push_str(&format!(" (stopped after {} entries)", MAX_WALK_ENTRIES));
        }
        return Ok(ToolOutput::text(text));
    }

    found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    let total = found.len();
    let mut text = found
        .iter()
        .take(limit)
        .map(|(size, shown)| format!("{}\t{}", human_size(*size), shown))
        .collect::<Vec<_>>()
        .join("\n");
    if total > limit {
        text.push_str(&format!("\n... {} more files", total - limit));
    }
    if exhausted {
        text.push_str(&format!("\n(stopped after {} entries)", MAX_WALK_ENTRIES));
    }
    Ok(ToolOutput::text(text))
}

fn git_command(cwd: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_OPTIONAL_LOCKS", "0");
    cmd
}

async fn handle_git_status(args: Value, settings: ToolSettings) -> Result<ToolOutput, String> {
    let cwd = match str_arg(&args, "path") {
        Some(dir) => safe_resolve_path(dir, &settings.base_dir)?,
        None => settings.base_dir.clone(),
    };
    let limit = settings.max_output_bytes;

    let inside = run_captured(git_command(&cwd, &["rev-parse", "--is-inside-work-tree"]), None, limit).await?;
    if !inside.success() {
        return Err(format!("'{}' is not inside a git repository", stringify_path(&cwd)?));
    }

    let status = run_captured(git_command(&cwd, &["status", "--short", "--branch"]), None, limit).await?;
    if !status.success() {
        return Err(format!("git status failed: {}", status.stderr.trim()));
    }
    let diff = run_captured(git_command(&cwd, &["diff", "--stat"]), None, limit).await?;

    let mut text = status.stdout.trim_end().to_string();
    let stat = diff.stdout.trim_end();
    text.push_str("\n\n");
    text.push_str(if stat.is_empty() { "No unstaged changes" } else { stat });

    Ok(ToolOutput {
        text,
        exit_code: Some(0),
        truncated: status.dropped_bytes > 0 || diff.dropped_bytes > 0,
    })
}

async fn handle_time_now(_args: Value, _settings: ToolSettings) -> Result<ToolOutput, String> {
    Ok(ToolOutput::text(Utc::now().to_rfc3339()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ps_rows_parse_and_skip_header() {
        let rows = parse_ps_output(
            "  PID USER      %CPU %MEM COMMAND\n    1 root       0.0  0.1 init\n  42 alice     12.5  3.0 cargo build\n",
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].pid, "42");
        assert_eq!(rows[1].command, "cargo build");
        assert!((rows[1].cpu - 12.5).abs() < f32::EPSILON);
    }

    #[test]
    fn blocked_program_matches_path_and_suffix() {
        assert_eq!(program_name("/sbin/mkfs.ext4"), "mkfs");
        assert_eq!(program_name("dd"), "dd");
        assert_eq!(program_name("ls"), "ls");
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(4096), "4.0 KiB");
        assert_eq!(human_size(3 * 1024 * 1024 / 2), "1.5 MiB");
    }

    #[test]
    fn protected_files_are_detected() {
        assert!(is_protected(Path::new(".bashrc")));
        assert!(is_protected(Path::new("home/.ssh/authorized_keys")));
        assert!(!is_protected(Path::new("notes/profile.txt")));
    }
}
