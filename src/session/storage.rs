use super::error::SessionStoreError;
use super::schema::{SessionSummary, Transcript};
use crate::models::{Message, NewSession, SessionMeta, TurnMarker};

/// Durable, append-only conversation history.
///
/// Implementations must keep records in insertion order and serialize appends
/// to the same session.
pub trait SessionStore: Send + Sync {
    fn create_session(&self, new: NewSession) -> Result<SessionMeta, SessionStoreError>;

    fn append_message(&self, id: &str, message: &Message) -> Result<(), SessionStoreError>;

    fn append_marker(&self, id: &str, marker: &TurnMarker) -> Result<(), SessionStoreError>;

    /// Messages in insertion order. Markers are not included.
    fn load_session(&self, id: &str) -> Result<Vec<Message>, SessionStoreError> {
        Ok(self.load_transcript(id)?.messages())
    }

    fn load_transcript(&self, id: &str) -> Result<Transcript, SessionStoreError>;

    /// Summaries sorted by most recent activity first.
    fn list_sessions(&self) -> Result<Vec<SessionSummary>, SessionStoreError>;

    fn delete_session(&self, id: &str) -> Result<(), SessionStoreError>;

    fn most_recent(&self) -> Result<Option<SessionSummary>, SessionStoreError> {
        Ok(self.list_sessions()?.into_iter().next())
    }
}
