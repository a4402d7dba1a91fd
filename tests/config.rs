use clap::Parser;
use gemmis::api::{ChatRequest, ModelOptions, ToolSpec};
use gemmis::cli::Args;
use gemmis::config::{
    normalize_base_url, Config, FileConfig, DEFAULT_BASE_URL, DEFAULT_MODEL,
    DEFAULT_STREAM_TIMEOUT_SECS,
};
use gemmis::models::{Message, ToolCall, ToolResult};
use gemmis::tools::Tier;
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use tempfile::TempDir;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

fn no_env(_key: &str) -> Option<String> {
    None
}

const YAML_CONFIG: &str = r#"
api:
  base_url: http://gpu-box:11434/
  stream_timeout: 30
model:
  name: llama3.2:3b
  persona: pirate
  temperature: 0.7
  max_tokens: 512
session:
  dir: /tmp/gemmis-test-sessions
  context_messages: 12
tools:
  max_tool_rounds: 3
  tiers:
    run_command: sensitive
  sensitive_patterns:
    - "git\\s+push"
  custom:
    - name: run_command
      enabled: false
    - name: word_count
      type: command
      description: Count words in a file
      command: wc
      args: ["-w", "{{path}}"]
      input_schema:
        type: object
        properties:
          path:
            type: string
        required: [path]
"#;

#[test]
fn test_defaults_without_any_source() {
    let args = Args::parse_from(["gemmis"]);
    let config = Config::resolve(&args, FileConfig::default(), no_env);

    assert_eq!(config.api.base_url, DEFAULT_BASE_URL);
    assert_eq!(config.api.chat_endpoint(), "http://localhost:11434/api/chat");
    assert_eq!(config.api.stream_timeout_secs, DEFAULT_STREAM_TIMEOUT_SECS);
    assert_eq!(config.model, DEFAULT_MODEL);
    assert!(config.tools_enabled);
    assert!(!config.auto_approve);
    assert_eq!(config.tools.max_tool_rounds, 5);
    assert_eq!(config.context_messages, 50);
    assert!(config.api.api_key.is_none());
}

#[test]
fn test_yaml_file_is_loaded() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("gemmis.yaml");
    fs::write(&path, YAML_CONFIG).unwrap();

    let file = FileConfig::load_from(&path).unwrap();
    let config = Config::resolve(&Args::parse_from(["gemmis"]), file, no_env);

    assert_eq!(config.api.base_url, "http://gpu-box:11434");
    assert_eq!(config.api.stream_timeout_secs, 30);
    assert_eq!(config.model, "llama3.2:3b");
    assert_eq!(config.persona.as_deref(), Some("pirate"));
    assert!((config.options.temperature - 0.7).abs() < f32::EPSILON);
    assert_eq!(config.options.num_predict, 512);
    assert_eq!(config.session_dir.to_str(), Some("/tmp/gemmis-test-sessions"));
    assert_eq!(config.context_messages, 12);
    assert_eq!(config.tools.max_tool_rounds, 3);
    assert_eq!(config.tools.tiers.get("run_command"), Some(&Tier::Sensitive));
    assert_eq!(config.tools.custom.len(), 2);
    assert!(!config.tools.custom[0].enabled);
    assert_eq!(config.tools.custom[1].args, vec!["-w", "{{path}}"]);
}

#[test]
fn test_json_file_is_loaded() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join(".gemmis.json");
    fs::write(&path, r#"{"model": {"name": "qwen2.5"}, "tools": {"enabled": false}}"#).unwrap();

    let config = Config::resolve(
        &Args::parse_from(["gemmis"]),
        FileConfig::load_from(&path).unwrap(),
        no_env,
    );
    assert_eq!(config.model, "qwen2.5");
    assert!(!config.tools_enabled);
}

#[test]
fn test_malformed_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("gemmis.yaml");
    fs::write(&path, "model: [unclosed").unwrap();

    let err = FileConfig::load_from(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse YAML config file"));
}

#[test]
fn test_precedence_cli_over_env_over_file() {
    let file: FileConfig = serde_yaml::from_str(YAML_CONFIG).unwrap();
    let env = env_from(&[
        ("GEMMIS_MODEL", "env-model"),
        ("GEMMIS_BASE_URL", "http://env-host:11434/api/chat"),
        ("GEMMIS_STREAM_TIMEOUT", "45"),
        ("GEMMIS_API_KEY", "secret"),
    ]);

    let from_env = Config::resolve(&Args::parse_from(["gemmis"]), file.clone(), &env);
    assert_eq!(from_env.model, "env-model");
    assert_eq!(from_env.api.base_url, "http://env-host:11434");
    assert_eq!(from_env.api.stream_timeout_secs, 45);
    assert_eq!(from_env.api.api_key.as_deref(), Some("secret"));

    let args = Args::parse_from([
        "gemmis",
        "-m",
        "cli-model",
        "--base-url",
        "http://cli-host:1234",
        "--max-tool-rounds",
        "9",
        "-y",
    ]);
    let from_cli = Config::resolve(&args, file, &env);
    assert_eq!(from_cli.model, "cli-model");
    assert_eq!(from_cli.api.base_url, "http://cli-host:1234");
    assert_eq!(from_cli.tools.max_tool_rounds, 9);
    assert!(from_cli.auto_approve);
}

#[test]
fn test_no_tools_flag_wins() {
    let env = env_from(&[("GEMMIS_TOOLS_ENABLED", "true")]);
    let args = Args::parse_from(["gemmis", "--no-tools"]);
    let config = Config::resolve(&args, FileConfig::default(), env);
    assert!(!config.tools_enabled);

    let env = env_from(&[("GEMMIS_TOOLS_ENABLED", "0")]);
    let config = Config::resolve(&Args::parse_from(["gemmis"]), FileConfig::default(), env);
    assert!(!config.tools_enabled);
}

#[test]
fn test_normalize_base_url() {
    assert_eq!(normalize_base_url("http://localhost:11434/"), "http://localhost:11434");
    assert_eq!(normalize_base_url("http://localhost:11434/api/chat"), "http://localhost:11434");
    assert_eq!(normalize_base_url("http://localhost:11434/api"), "http://localhost:11434");
    assert_eq!(normalize_base_url(" http://host "), "http://host");
}

#[test]
fn test_args_one_shot_prompt() {
    let args = Args::parse_from(["gemmis", "-n", "what", "time", "is", "it"]);
    assert!(args.new_session);
    assert_eq!(args.one_shot_prompt().as_deref(), Some("what time is it"));
    assert!(Args::parse_from(["gemmis"]).one_shot_prompt().is_none());
}

#[test]
fn test_request_wire_format() {
    let call = ToolCall::new("c1", "read_file", json!({"path": "a.txt"}).as_object().cloned().unwrap());
    let result = ToolResult::error("c1", "missing");
    let request = ChatRequest {
        model: "gemma3:4b".to_string(),
        messages: vec![
            Message::system("sys"),
            Message::user("read a.txt"),
            Message::assistant("", vec![call]),
            Message::tool(&result),
        ],
        tools: vec![ToolSpec {
            name: "read_file".to_string(),
            description: "Read a file".to_string(),
            parameters: json!({"type": "object"}),
        }],
        options: ModelOptions {
            temperature: 0.5,
            top_p: 0.9,
            num_predict: 100,
            num_ctx: 4096,
        },
    };

    let body = serde_json::to_value(request.to_wire()).unwrap();
    assert_eq!(body["model"], "gemma3:4b");
    assert_eq!(body["stream"], true);
    assert_eq!(body["options"]["num_predict"], 100);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][2]["tool_calls"][0]["function"]["name"], "read_file");
    assert_eq!(
        body["messages"][2]["tool_calls"][0]["function"]["arguments"],
        json!({"path": "a.txt"})
    );
    assert_eq!(body["messages"][3]["role"], "tool");
    assert_eq!(body["messages"][3]["tool_call_id"], "c1");
    assert_eq!(body["tools"][0]["type"], "function");
    assert_eq!(body["tools"][0]["function"]["name"], "read_file");
    assert!(body["messages"][1].get("tool_calls").is_none());
}
