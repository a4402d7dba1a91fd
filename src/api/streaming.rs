use std::collections::{HashMap, HashSet};
use std::error::Error as StdError;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::events::StreamEvent;
use crate::api::models::{ChatChunk, ToolCallDelta};
use crate::error::ErrorKind;
use crate::models::ToolCall;

struct PendingCall {
    /// Id as sent by the backend, used to match later fragments.
    wire_id: Option<String>,
    id: String,
    name: String,
    arguments: String,
    announced: bool,
}

/// Turns NDJSON lines of an `/api/chat` stream into [`StreamEvent`]s.
///
/// Tool-call arguments are buffered per call and only parsed once the
/// backend signals the message is complete.
#[derive(Default)]
pub struct ChunkDecoder {
    buffer: Vec<u8>,
    pending: Vec<PendingCall>,
    by_index: HashMap<usize, usize>,
    used_ids: HashSet<String>,
    finished: bool,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed raw body bytes. Returns true once a terminal event was produced.
    pub fn push_bytes(&mut self, bytes: &[u8], out: &mut Vec<StreamEvent>) -> bool {
        if self.finished {
            return true;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if self.push_raw_line(&line[..line.len() - 1], out) {
                return true;
            }
        }
        false
    }

    fn push_raw_line(&mut self, raw: &[u8], out: &mut Vec<StreamEvent>) -> bool {
        match std::str::from_utf8(raw) {
            Ok(line) => self.push_line(line, out),
            Err(err) => self.fail(ErrorKind::Parse, format!("stream line is not UTF-8: {}", err), out),
        }
    }

    /// Decode one complete line. Returns true once a terminal event was produced.
    pub fn push_line(&mut self, line: &str, out: &mut Vec<StreamEvent>) -> bool {
        if self.finished {
            return true;
        }
        let line = line.trim();
        if line.is_empty() {
            return false;
        }

        let chunk: ChatChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(err) => {
                return self.fail(ErrorKind::Parse, format!("malformed stream line: {}", err), out)
            }
        };

        if let Some(message) = chunk.error {
            return self.fail(ErrorKind::Api, message, out);
        }

        if let Some(message) = chunk.message {
            if let Some(content) = message.content.filter(|c| !c.is_empty()) {
                out.push(StreamEvent::TokenDelta(content));
            }
            for (position, delta) in message.tool_calls.into_iter().enumerate() {
                self.apply_delta(position, delta, out);
            }
        }

        if chunk.done {
            self.finalize_calls(out);
            out.push(StreamEvent::MessageDone {
                finish_reason: chunk.done_reason.unwrap_or_else(|| "stop".to_string()),
            });
            self.finished = true;
            return true;
        }

        false
    }

    /// End of body. Pending calls are finalized as if `done` had arrived.
    pub fn finish(&mut self, out: &mut Vec<StreamEvent>) {
        if self.finished {
            return;
        }
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            if self.push_raw_line(&rest, out) {
                return;
            }
        }
        self.finalize_calls(out);
        out.push(StreamEvent::MessageDone {
            finish_reason: "eof".to_string(),
        });
        self.finished = true;
    }

    fn fail(&mut self, kind: ErrorKind, detail: String, out: &mut Vec<StreamEvent>) -> bool {
        if !self.pending.is_empty() {
            debug!(dropped = self.pending.len(), "dropping unfinished tool calls");
        }
        self.pending.clear();
        out.push(StreamEvent::error(kind, detail));
        self.finished = true;
        true
    }

    fn slot_for(&mut self, position: usize, delta: &ToolCallDelta) -> Option<usize> {
        if let Some(index) = delta.index {
            return self.by_index.get(&index).copied();
        }
        if let Some(wire_id) = &delta.id {
            if let Some(slot) = self
                .pending
                .iter()
                .position(|call| call.wire_id.as_deref() == Some(wire_id.as_str()))
            {
                return Some(slot);
            }
        }
        // A named call without index or known id starts a new call.
        if delta.id.is_some() || delta.function.name.is_some() {
            return None;
        }
        if position < self.pending.len() {
            Some(position)
        } else {
            None
        }
    }

    fn unique_id(&mut self, wire_id: Option<&str>) -> String {
        let base = match wire_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("call_{}", self.pending.len()),
        };
        let mut id = base.clone();
        let mut suffix = 1;
        while self.used_ids.contains(&id) {
            id = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        self.used_ids.insert(id.clone());
        id
    }

    fn apply_delta(&mut self, position: usize, delta: ToolCallDelta, out: &mut Vec<StreamEvent>) {
        let slot = match self.slot_for(position, &delta) {
            Some(slot) => slot,
            None => {
                let id = self.unique_id(delta.id.as_deref());
                self.pending.push(PendingCall {
                    wire_id: delta.id.clone(),
                    id,
                    name: String::new(),
                    arguments: String::new(),
                    announced: false,
                });
                let slot = self.pending.len() - 1;
                if let Some(index) = delta.index {
                    self.by_index.insert(index, slot);
                }
                slot
            }
        };

        let call = &mut self.pending[slot];
        if let Some(name) = delta.function.name.filter(|n| !n.is_empty()) {
            call.name.push_str(&name);
        }
        if !call.announced && !call.name.is_empty() {
            call.announced = true;
            out.push(StreamEvent::ToolCallStart {
                id: call.id.clone(),
                name: call.name.clone(),
            });
        }

        let fragment = match delta.function.arguments {
            None | Some(Value::Null) => return,
            Some(Value::String(text)) => {
                call.arguments.push_str(&text);
                text
            }
            Some(whole) => {
                // A structured value is the complete argument set.
                let text = whole.to_string();
                call.arguments = text.clone();
                text
            }
        };
        if !fragment.is_empty() {
            out.push(StreamEvent::ToolCallArgsDelta {
                id: call.id.clone(),
                fragment,
            });
        }
    }

    fn finalize_calls(&mut self, out: &mut Vec<StreamEvent>) {
        for call in self.pending.drain(..) {
            if call.name.is_empty() {
                out.push(StreamEvent::error(
                    ErrorKind::ToolCallArgsInvalid,
                    format!("tool call {} has no function name", call.id),
                ));
                continue;
            }

            let text = call.arguments.trim();
            let parsed = if text.is_empty() {
                Ok(Value::Object(Default::default()))
            } else {
                serde_json::from_str::<Value>(text)
            };

            match parsed {
                Ok(Value::Object(arguments)) => {
                    out.push(StreamEvent::ToolCallComplete(ToolCall::new(
                        call.id, call.name, arguments,
                    )));
                }
                Ok(other) => out.push(StreamEvent::error(
                    ErrorKind::ToolCallArgsInvalid,
                    format!(
                        "arguments for tool call {} ({}) are not a JSON object: {}",
                        call.id, call.name, other
                    ),
                )),
                Err(err) => out.push(StreamEvent::error(
                    ErrorKind::ToolCallArgsInvalid,
                    format!(
                        "arguments for tool call {} ({}) are not valid JSON: {}",
                        call.id, call.name, err
                    ),
                )),
            }
        }
        self.by_index.clear();
    }
}

/// Classify a body read failure. Reqwest timeouts map to `Timeout`.
fn transport_error_kind<E>(err: &E) -> ErrorKind
where
    E: StdError + 'static,
{
    match (err as &(dyn StdError + 'static)).downcast_ref::<reqwest::Error>() {
        Some(err) if err.is_timeout() => ErrorKind::Timeout,
        _ => ErrorKind::Network,
    }
}

async fn forward(tx: &mpsc::Sender<StreamEvent>, events: &mut Vec<StreamEvent>) -> bool {
    for event in events.drain(..) {
        if tx.send(event).await.is_err() {
            return false;
        }
    }
    true
}

/// Drive a response body through a [`ChunkDecoder`] into `tx`.
///
/// Stops at the first terminal event, when the receiver is dropped, when no
/// bytes arrive within `idle_timeout`, or when `cancel` fires.
pub async fn pump_events<S, E>(
    body: S,
    tx: mpsc::Sender<StreamEvent>,
    idle_timeout: Duration,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Bytes, E>>,
    E: StdError + 'static,
{
    let mut body = Box::pin(body);
    let mut decoder = ChunkDecoder::new();
    let mut events = Vec::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("stream cancelled");
                let _ = tx.send(StreamEvent::error(ErrorKind::Cancelled, "cancelled by user")).await;
                return;
            }
            next = timeout(idle_timeout, body.next()) => next,
        };

        match next {
            Err(_) => {
                warn!(secs = idle_timeout.as_secs(), "stream idle timeout");
                events.push(StreamEvent::error(
                    ErrorKind::Timeout,
                    format!("no data received for {} seconds", idle_timeout.as_secs()),
                ));
                forward(&tx, &mut events).await;
                return;
            }
            Ok(None) => {
                decoder.finish(&mut events);
                forward(&tx, &mut events).await;
                return;
            }
            Ok(Some(Err(err))) => {
                events.push(StreamEvent::error(transport_error_kind(&err), err.to_string()));
                forward(&tx, &mut events).await;
                return;
            }
            Ok(Some(Ok(bytes))) => {
                let done = decoder.push_bytes(&bytes, &mut events);
                if !forward(&tx, &mut events).await || done {
                    return;
                }
            }
        }
    }
}
