use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::error::ErrorKind;
use crate::models::ToolCall;

pub const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TokenDelta(String),
    ToolCallStart { id: String, name: String },
    ToolCallArgsDelta { id: String, fragment: String },
    ToolCallComplete(ToolCall),
    MessageDone { finish_reason: String },
    StreamError { kind: ErrorKind, detail: String },
}

impl StreamEvent {
    pub fn error(kind: ErrorKind, detail: impl Into<String>) -> Self {
        StreamEvent::StreamError {
            kind,
            detail: detail.into(),
        }
    }

    /// True for the event that ends a sequence. A rejected tool call does not.
    pub fn is_terminal(&self) -> bool {
        match self {
            StreamEvent::MessageDone { .. } => true,
            StreamEvent::StreamError { kind, .. } => *kind != ErrorKind::ToolCallArgsInvalid,
            _ => false,
        }
    }
}

/// Single-pass sequence of [`StreamEvent`]s fed by a bounded channel.
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
}

impl EventStream {
    pub fn channel(capacity: usize) -> (mpsc::Sender<StreamEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }

    /// A stream that replays a fixed list of events.
    pub fn from_events(events: Vec<StreamEvent>) -> Self {
        let (tx, stream) = Self::channel(events.len().max(1));
        for event in events {
            // Capacity covers every event, so this cannot fail.
            let _ = tx.try_send(event);
        }
        stream
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
