use gemmis::config::ToolsConfig;
use gemmis::models::ToolCall;
use gemmis::tools::{
    truncate_output, AllowAll, Classification, DenyAll, SensitivePatterns, Tier, ToolDescriptor,
    ToolExecutor, ToolFuture, ToolOutput, ToolRegistry, ToolSettings, PERMISSION_DENIED,
    SCHEMA_ERROR_PREFIX,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn tools_config(base_dir: &Path) -> ToolsConfig {
    ToolsConfig {
        base_dir: Some(base_dir.to_string_lossy().into_owned()),
        ..Default::default()
    }
}

fn executor_for(config: &ToolsConfig) -> ToolExecutor {
    ToolExecutor::new(Arc::new(ToolRegistry::from_config(config).unwrap()))
}

fn executor(base_dir: &Path) -> ToolExecutor {
    executor_for(&tools_config(base_dir))
}

fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall::new(id, name, arguments.as_object().cloned().unwrap_or_default())
}

fn settings(base_dir: &Path) -> ToolSettings {
    ToolSettings {
        base_dir: base_dir.to_path_buf(),
        max_file_size_bytes: 1024,
        timeout: Duration::from_secs(5),
        max_output_bytes: 4096,
    }
}

fn explode(reason: &str) -> Result<ToolOutput, String> {
    panic!("{}", reason)
}

#[tokio::test]
async fn test_read_file_success() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("test.txt"), "Hello, world!").unwrap();

    // Safe tools never reach the policy.
    let result = executor(temp_dir.path())
        .execute(&call("c1", "read_file", json!({"path": "test.txt"})), &DenyAll)
        .await;

    assert!(!result.is_error);
    assert_eq!(result.tool_call_id, "c1");
    assert_eq!(result.output, "Hello, world!");
}

#[tokio::test]
async fn test_read_file_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let result = executor(temp_dir.path())
        .execute(&call("c1", "read_file", json!({"path": "nonexistent.txt"})), &AllowAll)
        .await;

    assert!(result.is_error);
    assert!(result.output.contains("Failed to resolve path"));
}

#[tokio::test]
async fn test_read_file_too_large() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("big.txt"), vec![b'a'; 2 * 1024 * 1024]).unwrap();

    let result = executor(temp_dir.path())
        .execute(&call("c1", "read_file", json!({"path": "big.txt"})), &AllowAll)
        .await;

    assert!(result.is_error);
    assert!(result.output.contains("File too large"));
}

#[tokio::test]
async fn test_read_file_rejects_traversal() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("base");
    fs::create_dir_all(&base).unwrap();
    fs::write(temp_dir.path().join("secret.txt"), "secret").unwrap();

    let result = executor(&base)
        .execute(&call("c1", "read_file", json!({"path": "../secret.txt"})), &AllowAll)
        .await;

    assert!(result.is_error);
    assert!(result.output.contains("escapes base directory"));
}

#[tokio::test]
async fn test_list_dir_reports_kind_and_size() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("b.txt"), "12345").unwrap();
    fs::create_dir(temp_dir.path().join("a_dir")).unwrap();

    let result = executor(temp_dir.path())
        .execute(&call("c1", "list_dir", json!({})), &DenyAll)
        .await;

    assert!(!result.is_error);
    let lines: Vec<&str> = result.output.lines().collect();
    assert_eq!(lines, vec!["dir\t-\ta_dir/", "file\t5\tb.txt"]);
}

#[tokio::test]
async fn test_write_file_denied_leaves_no_file() {
    let temp_dir = TempDir::new().unwrap();
    let result = executor(temp_dir.path())
        .execute(
            &call("w1", "write_file", json!({"path": "out.txt", "content": "data"})),
            &DenyAll,
        )
        .await;

    assert!(result.is_error);
    assert_eq!(result.output, PERMISSION_DENIED);
    assert!(!temp_dir.path().join("out.txt").exists());
}

#[tokio::test]
async fn test_write_file_allowed_then_append() {
    let temp_dir = TempDir::new().unwrap();
    let executor = executor(temp_dir.path());

    let first = executor
        .execute(
            &call("w1", "write_file", json!({"path": "out.txt", "content": "one"})),
            &AllowAll,
        )
        .await;
    assert!(!first.is_error, "{}", first.output);

    let second = executor
        .execute(
            &call(
                "w2",
                "write_file",
                json!({"path": "out.txt", "content": "two", "append": true}),
            ),
            &AllowAll,
        )
        .await;
    assert!(second.output.starts_with("Appended 3 bytes"));
    assert_eq!(fs::read_to_string(temp_dir.path().join("out.txt")).unwrap(), "onetwo");
}

#[tokio::test]
async fn test_write_file_refuses_protected_names() {
    let temp_dir = TempDir::new().unwrap();
    let result = executor(temp_dir.path())
        .execute(
            &call("w1", "write_file", json!({"path": ".bashrc", "content": "x"})),
            &AllowAll,
        )
        .await;

    assert!(result.is_error);
    assert!(result.output.contains("protected"));
    assert!(!temp_dir.path().join(".bashrc").exists());
}

#[test]
fn test_classify_is_a_pure_table_lookup() {
    let temp_dir = TempDir::new().unwrap();
    let executor = executor(temp_dir.path());

    for _ in 0..2 {
        assert_eq!(executor.classify("read_file"), Classification::Safe);
        assert_eq!(executor.classify("write_file"), Classification::Sensitive);
        assert_eq!(executor.classify("does_not_exist"), Classification::Unknown);
    }
    assert!(Classification::Unknown.needs_confirmation());
    assert!(!Classification::Safe.needs_confirmation());
}

#[test]
fn test_destructive_command_escalates_to_sensitive() {
    let temp_dir = TempDir::new().unwrap();
    let executor = executor(temp_dir.path());

    let benign = call("r1", "run_command", json!({"command": "ls -la"}));
    let destructive = call("r2", "run_command", json!({"command": "rm -rf build"}));
    let sudo = call("r3", "run_command", json!({"command": "/usr/bin/sudo ls"}));

    assert_eq!(executor.classify_call(&benign), Classification::Safe);
    assert_eq!(executor.classify_call(&destructive), Classification::Sensitive);
    assert_eq!(executor.classify_call(&sudo), Classification::Sensitive);

    for line in [
        "cp /dev/null victim.txt",
        "touch created.txt",
        "mkdir -p out/dir",
        "tee notes.txt",
        "find . -name victim.txt -delete",
        "find . -type f -exec rm {} ;",
        "sh -c ls",
        "bash --norc -c ls",
        "python3 -c print(1)",
        "perl -e unlink",
    ] {
        let escalated = call("r5", "run_command", json!({"command": line}));
        assert_eq!(
            executor.classify_call(&escalated),
            Classification::Sensitive,
            "{} was not escalated",
            line
        );
    }
    for line in ["find . -name '*.rs'", "git status", "cat Cargo.toml", "python3 --version"] {
        let plain = call("r6", "run_command", json!({"command": line}));
        assert_eq!(executor.classify_call(&plain), Classification::Safe, "{} was escalated", line);
    }

    // Not command-style, so file contents never escalate.
    let read = call("r4", "read_file", json!({"path": "rm -rf"}));
    assert_eq!(executor.classify_call(&read), Classification::Safe);
}

#[tokio::test]
async fn test_denied_destructive_command_does_not_run() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("keep.txt"), "keep").unwrap();

    let result = executor(temp_dir.path())
        .execute(
            &call("r1", "run_command", json!({"command": "rm keep.txt"})),
            &DenyAll,
        )
        .await;

    assert_eq!(result.output, PERMISSION_DENIED);
    assert!(temp_dir.path().join("keep.txt").exists());
}

#[tokio::test]
async fn test_denied_copy_and_find_delete_leave_files_alone() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("victim.txt"), "precious").unwrap();
    fs::write(temp_dir.path().join("victim2.txt"), "precious").unwrap();
    let executor = executor(temp_dir.path());

    for (id, line) in [
        ("c1", "cp /dev/null victim.txt"),
        ("c2", "find . -name victim2.txt -delete"),
        ("c3", "touch created.txt"),
    ] {
        let result = executor
            .execute(&call(id, "run_command", json!({"command": line})), &DenyAll)
            .await;
        assert_eq!(result.output, PERMISSION_DENIED, "{} ran", line);
    }

    assert_eq!(fs::read_to_string(temp_dir.path().join("victim.txt")).unwrap(), "precious");
    assert!(temp_dir.path().join("victim2.txt").exists());
    assert!(!temp_dir.path().join("created.txt").exists());
}

#[tokio::test]
async fn test_user_sensitive_patterns_apply() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = tools_config(temp_dir.path());
    config.sensitive_patterns = vec![r"\bgit\s+push\b".to_string()];
    let executor = executor_for(&config);

    let push = call("r1", "run_command", json!({"command": "git push origin main"}));
    assert_eq!(executor.classify_call(&push), Classification::Sensitive);
}

#[test]
fn test_invalid_sensitive_pattern_fails_startup() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = tools_config(temp_dir.path());
    config.sensitive_patterns = vec!["(unclosed".to_string()];

    let err = ToolRegistry::from_config(&config).err().unwrap();
    assert!(err.to_string().contains("sensitive_patterns"));
}

#[tokio::test]
async fn test_run_command_reports_exit_code() {
    let temp_dir = TempDir::new().unwrap();
    let executor = executor(temp_dir.path());

    let ok = executor
        .execute(&call("r1", "run_command", json!({"command": "echo hi there"})), &AllowAll)
        .await;
    assert!(!ok.is_error);
    assert_eq!(ok.exit_code, Some(0));
    assert_eq!(ok.output, "hi there");

    let failed = executor
        .execute(&call("r2", "run_command", json!({"command": "false"})), &AllowAll)
        .await;
    assert!(failed.is_error);
    assert_eq!(failed.exit_code, Some(1));
    assert!(failed.output.starts_with("Command exited with code 1"));
}

#[tokio::test]
async fn test_run_command_blocks_disk_tools_even_when_allowed() {
    let temp_dir = TempDir::new().unwrap();
    let result = executor(temp_dir.path())
        .execute(
            &call("r1", "run_command", json!({"command": "dd if=/dev/zero of=x"})),
            &AllowAll,
        )
        .await;

    assert!(result.is_error);
    assert!(result.output.contains("blocked"));
    assert!(!temp_dir.path().join("x").exists());
}

#[tokio::test]
async fn test_schema_violation_is_reported_without_running() {
    let temp_dir = TempDir::new().unwrap();
    let executor = executor(temp_dir.path());

    let missing = executor
        .execute(&call("s1", "read_file", json!({})), &AllowAll)
        .await;
    assert!(missing.is_error);
    assert!(missing.output.starts_with(SCHEMA_ERROR_PREFIX));

    let wrong_type = executor
        .execute(
            &call("s2", "write_file", json!({"path": "x.txt", "content": 5})),
            &AllowAll,
        )
        .await;
    assert!(wrong_type.output.starts_with(SCHEMA_ERROR_PREFIX));
    assert!(!temp_dir.path().join("x.txt").exists());
}

#[tokio::test]
async fn test_unknown_tool_is_an_error_result() {
    let temp_dir = TempDir::new().unwrap();
    let result = executor(temp_dir.path())
        .execute(&call("u1", "launch_rockets", json!({})), &AllowAll)
        .await;

    assert!(result.is_error);
    assert_eq!(result.tool_call_id, "u1");
    assert!(result.output.contains("unknown tool 'launch_rockets'"));
}

#[tokio::test]
async fn test_timeout_and_panic_become_results() {
    let temp_dir = TempDir::new().unwrap();
    let mut registry = ToolRegistry::new(
        settings(temp_dir.path()),
        SensitivePatterns::new(&[]).unwrap(),
    );

    let slow = ToolDescriptor::new(
        "slow",
        "Sleeps for a long time",
        json!({"type": "object"}),
        Tier::Safe,
        Arc::new(|_args: Value, _settings: ToolSettings| -> ToolFuture {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(ToolOutput::text("late"))
            })
        }),
    )
    .unwrap()
    .with_timeout(Duration::from_millis(50));
    let broken = ToolDescriptor::new(
        "broken",
        "Panics",
        json!({"type": "object"}),
        Tier::Safe,
        Arc::new(|_args: Value, _settings: ToolSettings| -> ToolFuture {
            Box::pin(async { explode("tool exploded") })
        }),
    )
    .unwrap();
    registry.register(slow).unwrap();
    registry.register(broken).unwrap();
    let executor = ToolExecutor::new(Arc::new(registry));

    let timed_out = executor.execute(&call("t1", "slow", json!({})), &AllowAll).await;
    assert!(timed_out.is_error);
    assert!(timed_out.output.contains("timed out"));

    let panicked = executor.execute(&call("t2", "broken", json!({})), &AllowAll).await;
    assert!(panicked.is_error);
    assert!(panicked.output.contains("tool exploded"));
}

#[tokio::test]
async fn test_large_output_is_truncated() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("long.txt"), "x".repeat(200)).unwrap();
    let mut config = tools_config(temp_dir.path());
    config.max_output_bytes = 64;

    let result = executor_for(&config)
        .execute(&call("c1", "read_file", json!({"path": "long.txt"})), &AllowAll)
        .await;

    assert!(!result.is_error);
    assert!(result.truncated);
    assert!(result.output.starts_with(&"x".repeat(64)));
    assert!(result.output.contains("[output truncated: 64 of 200 bytes shown]"));
}

#[test]
fn test_truncate_output_respects_char_boundaries() {
    let (text, cut) = truncate_output("ééé".to_string(), 3);
    assert!(cut);
    assert!(text.starts_with("é\n"));

    let (text, cut) = truncate_output("short".to_string(), 10);
    assert!(!cut);
    assert_eq!(text, "short");
}

#[test]
fn test_builtin_overrides_and_tier_table() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = tools_config(temp_dir.path());
    config.custom = vec![
        serde_json::from_value(json!({"name": "run_command", "enabled": false})).unwrap(),
        serde_json::from_value(json!({"name": "time_now", "description": "Clock"})).unwrap(),
    ];
    config.tiers = HashMap::from([("read_file".to_string(), Tier::Sensitive)]);

    let registry = ToolRegistry::from_config(&config).unwrap();
    assert!(registry.get("run_command").is_none());
    assert_eq!(registry.get("time_now").unwrap().description, "Clock");
    assert_eq!(registry.tier("read_file"), Some(Tier::Sensitive));

    let names: Vec<String> = registry.specs().into_iter().map(|spec| spec.name).collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

#[test]
fn test_huge_size_limits_saturate() {
    let config = ToolsConfig {
        max_file_size_mb: u64::MAX,
        max_output_bytes: u64::MAX,
        ..tools_config(Path::new("/tmp"))
    };
    let settings = ToolSettings::from_config(&config);
    assert_eq!(settings.max_file_size_bytes, u64::MAX);
    assert_eq!(settings.max_output_bytes, usize::MAX);

    let config = ToolsConfig {
        max_file_size_mb: 2,
        ..tools_config(Path::new("/tmp"))
    };
    assert_eq!(ToolSettings::from_config(&config).max_file_size_bytes, 2 * 1024 * 1024);
}

#[tokio::test]
async fn test_find_large_files_lists_largest_first() {
    let temp_dir = TempDir::new().unwrap();
    let nested = temp_dir.path().join("logs").join("old");
    fs::create_dir_all(&nested).unwrap();
    fs::write(temp_dir.path().join("small.txt"), "tiny").unwrap();
    fs::write(temp_dir.path().join("medium.bin"), vec![0u8; 4096]).unwrap();
    fs::write(nested.join("big.bin"), vec![0u8; 8192]).unwrap();

    let executor = executor(temp_dir.path());
    let result = executor
        .execute(
            &call("f1", "find_large_files", json!({"min_size_mb": 0.001})),
            &DenyAll,
        )
        .await;

    assert!(!result.is_error, "{}", result.output);
    let lines: Vec<&str> = result.output.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], format!("8.0 KiB\t{}", Path::new("logs").join("old").join("big.bin").display()));
    assert_eq!(lines[1], "4.0 KiB\tmedium.bin");

    let limited = executor
        .execute(
            &call("f2", "find_large_files", json!({"min_size_mb": 0, "limit": 1})),
            &DenyAll,
        )
        .await;
    assert!(limited.output.ends_with("... 2 more files"), "{}", limited.output);

    let none = executor
        .execute(&call("f3", "find_large_files", json!({})), &DenyAll)
        .await;
    assert!(none.output.starts_with("No files larger than 100 MiB"), "{}", none.output);
}

#[tokio::test]
async fn test_find_large_files_stays_inside_base_dir() {
    let temp_dir = TempDir::new().unwrap();
    let base_dir = temp_dir.path().join("base");
    fs::create_dir_all(&base_dir).unwrap();

    let result = executor(&base_dir)
        .execute(&call("f1", "find_large_files", json!({"path": ".."})), &DenyAll)
        .await;
    assert!(result.is_error);
    assert!(result.output.contains("escapes base directory"), "{}", result.output);
}

fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn test_git_status_reports_untracked_files() {
    if !git_available() {
        return;
    }
    let temp_dir = TempDir::new().unwrap();
    let repo = temp_dir.path().join("repo");
    fs::create_dir_all(&repo).unwrap();
    let init = std::process::Command::new("git")
        .args(["init", "-q"])
        .current_dir(&repo)
        .status()
        .unwrap();
    assert!(init.success());
    fs::write(repo.join("notes.txt"), "draft").unwrap();

    let executor = executor(temp_dir.path());
    assert_eq!(executor.classify("git_status"), Classification::Safe);

    let result = executor
        .execute(&call("g1", "git_status", json!({"path": "repo"})), &DenyAll)
        .await;
    assert!(!result.is_error, "{}", result.output);
    assert!(result.output.starts_with("## "), "{}", result.output);
    assert!(result.output.contains("?? notes.txt"), "{}", result.output);
    assert!(result.output.ends_with("No unstaged changes"), "{}", result.output);

    fs::create_dir_all(temp_dir.path().join("plain")).unwrap();
    let outside = executor
        .execute(&call("g2", "git_status", json!({"path": "plain"})), &DenyAll)
        .await;
    assert!(outside.is_error);
    assert!(outside.output.contains("not inside a git repository"), "{}", outside.output);
}
