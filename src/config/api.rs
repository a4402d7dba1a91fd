use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    /// Idle-read timeout for the response stream, in seconds.
    #[serde(default)]
    pub stream_timeout: Option<u64>,
    #[serde(default)]
    pub connect_timeout: Option<u64>,
}

/// Resolved settings for the HTTP backend.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub stream_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl ApiSettings {
    pub fn chat_endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    pub fn tags_endpoint(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }
}

/// Strip trailing slashes and a pasted `/api/chat` suffix so endpoints can be derived.
pub fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    trimmed
        .strip_suffix("/api/chat")
        .or_else(|| trimmed.strip_suffix("/api"))
        .unwrap_or(trimmed)
        .to_string()
}
