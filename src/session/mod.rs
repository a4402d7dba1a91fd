mod error;
mod filesystem;
mod schema;
mod storage;

pub use error::SessionStoreError;
pub use filesystem::JsonlSessionStore;
pub use schema::{JsonLine, SessionHeader, SessionSummary, Transcript, TranscriptEntry};
pub use storage::SessionStore;

use crate::models::{Message, Role};

/// The most recent `limit` messages, moved forward so the window never opens
/// on a tool result whose originating assistant message was cut off.
pub fn context_window(messages: &[Message], limit: usize) -> &[Message] {
    let mut start = messages.len().saturating_sub(limit);
    while start < messages.len() && messages[start].role == Role::Tool {
        start += 1;
    }
    &messages[start..]
}
