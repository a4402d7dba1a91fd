pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "gemma3:4b";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are GEMMIS, a concise terminal assistant running on the user's machine. \
When the user asks for something concrete about their system or files, use the available tools first and answer from their results.";
pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_TOP_P: f32 = 0.9;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
pub const DEFAULT_CONTEXT_LENGTH: u32 = 4096;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_CONTEXT_MESSAGES: usize = 50;

pub fn default_tools_enabled() -> bool {
    true
}

pub fn default_custom_tool_enabled() -> bool {
    true
}

pub fn default_max_tool_rounds() -> usize {
    5
}

pub fn default_max_file_size_mb() -> u64 {
    1
}

pub fn default_tool_timeout() -> u64 {
    30
}

pub fn default_max_output_bytes() -> u64 {
    65_536
}

pub fn default_stdin_json() -> bool {
    false
}

pub fn is_default_stdin_json(value: &bool) -> bool {
    *value == default_stdin_json()
}

pub fn default_restrict_to_base_dir() -> bool {
    true
}

pub fn is_default_restrict_to_base_dir(value: &bool) -> bool {
    *value == default_restrict_to_base_dir()
}

pub fn default_validation_kind() -> String {
    "string".to_string()
}

pub fn default_allow_absolute() -> bool {
    false
}

pub fn is_default_allow_absolute(value: &bool) -> bool {
    *value == default_allow_absolute()
}
