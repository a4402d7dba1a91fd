use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::events::{EventStream, StreamEvent, EVENT_CHANNEL_CAPACITY};
use crate::api::models::ChatRequest;
use crate::api::streaming::pump_events;
use crate::config::ApiSettings;
use crate::error::{ErrorKind, GemmisError, Result};

/// Anything that can turn a [`ChatRequest`] into a stream of events.
pub trait ChatBackend: Send + Sync {
    /// Starts the exchange and returns immediately. Every failure, including
    /// cancellation, arrives as a final `StreamError` event.
    fn send(&self, request: ChatRequest, cancel: CancellationToken) -> EventStream;
}

/// HTTP client for an Ollama-compatible `/api/chat` endpoint.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    settings: ApiSettings,
}

impl ChatClient {
    pub fn new(settings: ApiSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = &settings.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e| {
                    GemmisError::ConfigError(format!("Invalid authorization header: {}", e))
                })?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()?;

        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &ApiSettings {
        &self.settings
    }

    /// Reachability check against `/api/tags`.
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .http
            .get(self.settings.tags_endpoint())
            .timeout(Duration::from_secs(self.settings.connect_timeout_secs))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(GemmisError::ApiError {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }
}

impl ChatBackend for ChatClient {
    fn send(&self, request: ChatRequest, cancel: CancellationToken) -> EventStream {
        let (tx, stream) = EventStream::channel(EVENT_CHANNEL_CAPACITY);
        let http = self.http.clone();
        let endpoint = self.settings.chat_endpoint();
        let idle_timeout = Duration::from_secs(self.settings.stream_timeout_secs);

        tokio::spawn(async move {
            run_exchange(http, endpoint, request, idle_timeout, tx, cancel).await;
        });

        stream
    }
}

async fn run_exchange(
    http: reqwest::Client,
    endpoint: String,
    request: ChatRequest,
    idle_timeout: Duration,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) {
    info!(
        model = %request.model,
        messages = request.messages.len(),
        tools = request.tools.len(),
        "sending chat request"
    );
    let body = request.to_wire();

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            let _ = tx
                .send(StreamEvent::error(ErrorKind::Cancelled, "cancelled before the response started"))
                .await;
            return;
        }
        result = timeout(idle_timeout, http.post(&endpoint).json(&body).send()) => result,
    };

    let failure = match response {
        Err(_) => StreamEvent::error(
            ErrorKind::Timeout,
            format!("no response within {} seconds", idle_timeout.as_secs()),
        ),
        Ok(Err(err)) => {
            let kind = if err.is_timeout() {
                ErrorKind::Timeout
            } else {
                ErrorKind::Network
            };
            warn!(error = %err, %kind, "chat request failed");
            StreamEvent::error(kind, format!("request to {} failed: {}", endpoint, err))
        }
        Ok(Ok(response)) if !response.status().is_success() => {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "chat request rejected");
            StreamEvent::error(ErrorKind::Api, format!("HTTP {}: {}", status, text))
        }
        Ok(Ok(response)) => {
            debug!(status = response.status().as_u16(), "streaming response");
            pump_events(response.bytes_stream(), tx, idle_timeout, cancel).await;
            return;
        }
    };

    let _ = tx.send(failure).await;
}
