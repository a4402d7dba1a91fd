use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{ChatBackend, ChatRequest, ModelOptions, StreamEvent};
use crate::config::Config;
use crate::error::ErrorKind;
use crate::models::{Message, NewSession, SessionMeta, ToolCall, ToolResult, TurnMarker, TurnOutcome};
use crate::session::{context_window, SessionStore, SessionStoreError};
use crate::tools::{ConfirmationPolicy, ToolExecutor};

pub const CANCELLED_BEFORE_EXECUTION: &str = "cancelled before execution";
pub const LOOP_LIMIT_NOT_EXECUTED: &str = "not executed: tool loop limit exceeded";

/// Incremental display events for whatever renders the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    AssistantTextAppended(String),
    ToolInvoked { name: String, arguments: Value },
    ToolCompleted { name: String, is_error: bool },
    /// Done or Cancelled.
    TurnFinished(TurnOutcome),
    TurnFailed(ErrorKind),
}

#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub model: String,
    pub system_prompt: String,
    pub persona: Option<String>,
    pub options: ModelOptions,
    pub max_tool_rounds: usize,
    pub context_messages: usize,
}

impl TurnSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            persona: config.persona.clone(),
            options: config.options.clone(),
            max_tool_rounds: config.tools.max_tool_rounds,
            context_messages: config.context_messages,
        }
    }

    fn system_message(&self) -> Message {
        match &self.persona {
            Some(persona) => Message::system(format!(
                "{}\n\nRespond in the voice of the '{}' persona.",
                self.system_prompt, persona
            )),
            None => Message::system(self.system_prompt.clone()),
        }
    }
}

/// A session held in memory for the duration of one or more turns.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub meta: SessionMeta,
    pub messages: Vec<Message>,
}

struct TurnEnd {
    outcome: TurnOutcome,
    detail: Option<String>,
}

impl TurnEnd {
    fn new(outcome: TurnOutcome) -> Self {
        Self {
            outcome,
            detail: None,
        }
    }

    fn failed(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            outcome: TurnOutcome::Failed(kind),
            detail: Some(detail.into()),
        }
    }
}

/// Drives one user turn: stream, run tools, feed results back, persist.
pub struct Orchestrator {
    backend: Arc<dyn ChatBackend>,
    executor: ToolExecutor,
    store: Arc<dyn SessionStore>,
    settings: TurnSettings,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        executor: ToolExecutor,
        store: Arc<dyn SessionStore>,
        settings: TurnSettings,
    ) -> Self {
        Self {
            backend,
            executor,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &TurnSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn start_session(&self, name: Option<String>) -> Result<ActiveSession, SessionStoreError> {
        let meta = self.store.create_session(NewSession {
            name,
            model: self.settings.model.clone(),
            persona: self.settings.persona.clone(),
        })?;
        info!(session_id = %meta.id, "started session");
        Ok(ActiveSession {
            meta,
            messages: Vec::new(),
        })
    }

    pub fn resume_session(&self, id: &str) -> Result<ActiveSession, SessionStoreError> {
        let transcript = self.store.load_transcript(id)?;
        let messages = transcript.messages();
        info!(session_id = %id, messages = messages.len(), "resumed session");
        Ok(ActiveSession {
            meta: transcript.meta,
            messages,
        })
    }

    /// Run a full turn for `user_text`. Always writes a turn marker and sends
    /// exactly one `TurnFinished`/`TurnFailed` event.
    pub async fn run_turn(
        &self,
        session: &mut ActiveSession,
        user_text: &str,
        policy: &dyn ConfirmationPolicy,
        sink: &UnboundedSender<UiEvent>,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let mut end = match self.drive(session, user_text, policy, sink, cancel).await {
            Ok(end) => end,
            Err(err) => {
                error!(session_id = %session.meta.id, error = %err, "failed to persist turn");
                TurnEnd::failed(ErrorKind::Storage, err.to_string())
            }
        };

        let marker = TurnMarker::new(end.outcome, end.detail.clone());
        let id = session.meta.id.clone();
        let appended = self
            .persist(move |store| store.append_marker(&id, &marker))
            .await;
        if let Err(err) = appended {
            error!(session_id = %session.meta.id, error = %err, "failed to persist turn marker");
            if end.outcome != TurnOutcome::Failed(ErrorKind::Storage) {
                end = TurnEnd::failed(ErrorKind::Storage, err.to_string());
            }
        }

        info!(session_id = %session.meta.id, outcome = ?end.outcome, detail = ?end.detail, "turn ended");
        let event = match end.outcome {
            TurnOutcome::Failed(kind) => UiEvent::TurnFailed(kind),
            outcome => UiEvent::TurnFinished(outcome),
        };
        let _ = sink.send(event);
        end.outcome
    }

    /// Store writes end in an fsync, so they run on the blocking pool.
    async fn persist<F>(&self, write: F) -> Result<(), SessionStoreError>
    where
        F: FnOnce(&dyn SessionStore) -> Result<(), SessionStoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || write(store.as_ref()))
            .await
            .map_err(|err| SessionStoreError::TaskFailed {
                detail: err.to_string(),
            })?
    }

    async fn record(&self, session: &mut ActiveSession, message: Message) -> Result<(), SessionStoreError> {
        let id = session.meta.id.clone();
        let stored = message.clone();
        self.persist(move |store| store.append_message(&id, &stored))
            .await?;
        session.messages.push(message);
        Ok(())
    }

    /// Give every call in `calls` a synthetic error result.
    async fn record_unexecuted(
        &self,
        session: &mut ActiveSession,
        calls: &[ToolCall],
        reason: &str,
    ) -> Result<(), SessionStoreError> {
        for call in calls {
            self.record(session, Message::tool(&ToolResult::error(&call.id, reason)))
                .await?;
        }
        Ok(())
    }

    fn build_request(&self, history: &[Message], tools_offered: bool) -> ChatRequest {
        let window = context_window(history, self.settings.context_messages.max(1));
        let mut messages = Vec::with_capacity(window.len() + 1);
        messages.push(self.settings.system_message());
        messages.extend_from_slice(window);

        ChatRequest {
            model: self.settings.model.clone(),
            messages,
            tools: if tools_offered {
                self.executor.specs()
            } else {
                Vec::new()
            },
            options: self.settings.options.clone(),
        }
    }

    async fn drive(
        &self,
        session: &mut ActiveSession,
        user_text: &str,
        policy: &dyn ConfirmationPolicy,
        sink: &UnboundedSender<UiEvent>,
        cancel: &CancellationToken,
    ) -> Result<TurnEnd, SessionStoreError> {
        let session_id = session.meta.id.clone();
        self.record(session, Message::user(user_text)).await?;

        let mut rounds = 0usize;
        loop {
            if cancel.is_cancelled() {
                return Ok(TurnEnd::new(TurnOutcome::Cancelled));
            }

            debug!(session_id = %session_id, round = rounds, state = "streaming", "requesting completion");
            let request = self.build_request(&session.messages, !self.executor.registry().is_empty());
            let mut stream = self.backend.send(request, cancel.clone());

            let mut text = String::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            let mut failure: Option<(ErrorKind, String)> = None;
            let mut completed = false;

            while let Some(event) = stream.next().await {
                match event {
                    StreamEvent::TokenDelta(delta) => {
                        text.push_str(&delta);
                        let _ = sink.send(UiEvent::AssistantTextAppended(delta));
                    }
                    StreamEvent::ToolCallStart { id, name } => {
                        debug!(id = %id, tool = %name, "tool call started");
                    }
                    StreamEvent::ToolCallArgsDelta { .. } => {}
                    StreamEvent::ToolCallComplete(call) => calls.push(call),
                    StreamEvent::MessageDone { finish_reason } => {
                        debug!(finish_reason = %finish_reason, calls = calls.len(), "message complete");
                        completed = true;
                        break;
                    }
                    StreamEvent::StreamError {
                        kind: ErrorKind::ToolCallArgsInvalid,
                        detail,
                    } => {
                        warn!(detail = %detail, "dropping tool call with invalid arguments");
                    }
                    StreamEvent::StreamError { kind, detail } => {
                        failure = Some((kind, detail));
                        break;
                    }
                }
            }

            if !completed && failure.is_none() {
                failure = Some((ErrorKind::Network, "stream closed before completion".to_string()));
            }

            if let Some((kind, detail)) = failure {
                if !text.is_empty() {
                    self.record(session, Message::assistant(text, Vec::new())).await?;
                }
                if kind == ErrorKind::Cancelled || cancel.is_cancelled() {
                    return Ok(TurnEnd::new(TurnOutcome::Cancelled));
                }
                warn!(session_id = %session_id, %kind, detail = %detail, "stream failed");
                return Ok(TurnEnd::failed(kind, detail));
            }

            debug!(session_id = %session_id, state = "tool_pending", calls = calls.len());
            if calls.is_empty() {
                self.record(session, Message::assistant(text, Vec::new())).await?;
                return Ok(TurnEnd::new(TurnOutcome::Done));
            }

            self.record(session, Message::assistant(text, calls.clone())).await?;

            if rounds >= self.settings.max_tool_rounds {
                self.record_unexecuted(session, &calls, LOOP_LIMIT_NOT_EXECUTED).await?;
                return Ok(TurnEnd::failed(
                    ErrorKind::ToolLoopLimitExceeded,
                    format!("model kept requesting tools after {} rounds", rounds),
                ));
            }
            rounds += 1;

            debug!(session_id = %session_id, state = "executing", round = rounds);
            for (index, call) in calls.iter().enumerate() {
                if cancel.is_cancelled() {
                    self.record_unexecuted(session, &calls[index..], CANCELLED_BEFORE_EXECUTION).await?;
                    return Ok(TurnEnd::new(TurnOutcome::Cancelled));
                }

                let _ = sink.send(UiEvent::ToolInvoked {
                    name: call.name.clone(),
                    arguments: call.arguments_value(),
                });
                let result = self.executor.execute(call, policy).await;
                let _ = sink.send(UiEvent::ToolCompleted {
                    name: call.name.clone(),
                    is_error: result.is_error,
                });
                self.record(session, Message::tool(&result)).await?;
            }
        }
    }
}
