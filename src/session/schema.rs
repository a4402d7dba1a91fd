use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Message, SessionMeta, TurnMarker};

pub const SESSION_FORMAT_VERSION: u32 = 1;

/// First line of every session file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHeader {
    pub version: u32,
    pub id: String,
    pub name: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SessionHeader {
    #[must_use]
    pub fn v1(meta: &SessionMeta) -> Self {
        Self {
            version: SESSION_FORMAT_VERSION,
            id: meta.id.clone(),
            name: meta.name.clone(),
            model: meta.model.clone(),
            persona: meta.persona.clone(),
            created_at: meta.created_at,
        }
    }

    #[must_use]
    pub fn into_meta(self) -> SessionMeta {
        SessionMeta {
            id: self.id,
            name: self.name,
            model: self.model,
            persona: self.persona,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonLine {
    Session(SessionHeader),
    Message(Message),
    Marker(TurnMarker),
}

/// A persisted record after the header, in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEntry {
    Message(Message),
    Marker(TurnMarker),
}

impl TranscriptEntry {
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            TranscriptEntry::Message(message) => message.created_at,
            TranscriptEntry::Marker(marker) => marker.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub meta: SessionMeta,
    pub entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn messages(&self) -> Vec<Message> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                TranscriptEntry::Message(message) => Some(message.clone()),
                TranscriptEntry::Marker(_) => None,
            })
            .collect()
    }

    pub fn markers(&self) -> Vec<&TurnMarker> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                TranscriptEntry::Marker(marker) => Some(marker),
                TranscriptEntry::Message(_) => None,
            })
            .collect()
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.entries
            .last()
            .map(TranscriptEntry::created_at)
            .unwrap_or(self.meta.created_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub meta: SessionMeta,
    pub message_count: usize,
    pub last_activity: DateTime<Utc>,
}
