use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::SessionStoreError;
use super::schema::{
    JsonLine, SessionHeader, SessionSummary, Transcript, TranscriptEntry, SESSION_FORMAT_VERSION,
};
use super::storage::SessionStore;
use crate::models::{Message, NewSession, SessionMeta, TurnMarker};

const SESSION_FILE_EXTENSION: &str = "jsonl";

#[derive(Default)]
struct AppendState {
    /// Set once a torn tail left by an earlier process has been cut off.
    tail_checked: bool,
}

/// One JSON-lines file per session under `root`.
pub struct JsonlSessionStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<AppendState>>>>,
}

impl JsonlSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_path(&self, id: &str) -> Result<PathBuf, SessionStoreError> {
        validate_session_id(id)?;
        Ok(self
            .root
            .join(format!("{}.{}", id, SESSION_FILE_EXTENSION)))
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<AppendState>> {
        let mut locks = lock_ignoring_poison(&self.locks);
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(AppendState::default())))
            .clone()
    }

    fn append_line(&self, id: &str, line: &JsonLine) -> Result<(), SessionStoreError> {
        let path = self.session_path(id)?;
        let mut encoded = serde_json::to_string(line)
            .map_err(|source| SessionStoreError::json_serialize(&path, source))?;
        encoded.push('\n');

        let lock = self.lock_for(id);
        let mut state = lock_ignoring_poison(&lock);

        if !path.exists() {
            return Err(SessionStoreError::NotFound { id: id.to_string() });
        }

        if !state.tail_checked {
            repair_torn_tail(&path)?;
            state.tail_checked = true;
        }

        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|source| SessionStoreError::io("opening session file for append", &path, source))?;
        file.write_all(encoded.as_bytes())
            .map_err(|source| SessionStoreError::io("appending to session file", &path, source))?;
        file.sync_data()
            .map_err(|source| SessionStoreError::io("syncing session file", &path, source))?;

        Ok(())
    }
}

impl SessionStore for JsonlSessionStore {
    fn create_session(&self, new: NewSession) -> Result<SessionMeta, SessionStoreError> {
        fs::create_dir_all(&self.root)
            .map_err(|source| SessionStoreError::io("creating session directory", &self.root, source))?;

        let created_at = Utc::now();
        let meta = SessionMeta {
            id: Uuid::new_v4().to_string(),
            name: new
                .name
                .unwrap_or_else(|| format!("Session {}", created_at.format("%Y-%m-%d %H:%M"))),
            model: new.model,
            persona: new.persona,
            created_at,
        };

        let path = self.session_path(&meta.id)?;
        let mut encoded = serde_json::to_string(&JsonLine::Session(SessionHeader::v1(&meta)))
            .map_err(|source| SessionStoreError::json_serialize(&path, source))?;
        encoded.push('\n');

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| SessionStoreError::io("creating session file", &path, source))?;
        file.write_all(encoded.as_bytes())
            .map_err(|source| SessionStoreError::io("writing session header", &path, source))?;
        file.sync_data()
            .map_err(|source| SessionStoreError::io("syncing session file", &path, source))?;

        // A fresh file has no torn tail to repair.
        lock_ignoring_poison(&self.lock_for(&meta.id)).tail_checked = true;

        debug!(session_id = %meta.id, path = %path.display(), "created session");
        Ok(meta)
    }

    fn append_message(&self, id: &str, message: &Message) -> Result<(), SessionStoreError> {
        self.append_line(id, &JsonLine::Message(message.clone()))
    }

    fn append_marker(&self, id: &str, marker: &TurnMarker) -> Result<(), SessionStoreError> {
        self.append_line(id, &JsonLine::Marker(marker.clone()))
    }

    fn load_transcript(&self, id: &str) -> Result<Transcript, SessionStoreError> {
        let path = self.session_path(id)?;
        let lock = self.lock_for(id);
        let _guard = lock_ignoring_poison(&lock);
        read_transcript(&path, id)
    }

    fn list_sessions(&self) -> Result<Vec<SessionSummary>, SessionStoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SessionStoreError::io("listing session directory", &self.root, source))
            }
        };

        let mut summaries = Vec::new();
        for entry in entries.filter_map(|entry| entry.ok()) {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(SESSION_FILE_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            match self.load_transcript(id) {
                Ok(transcript) => summaries.push(SessionSummary {
                    message_count: transcript.messages().len(),
                    last_activity: transcript.last_activity(),
                    meta: transcript.meta,
                }),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable session"),
            }
        }

        summaries.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| b.meta.created_at.cmp(&a.meta.created_at))
        });
        Ok(summaries)
    }

    fn delete_session(&self, id: &str) -> Result<(), SessionStoreError> {
        let path = self.session_path(id)?;
        let lock = self.lock_for(id);
        let _guard = lock_ignoring_poison(&lock);

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == IoErrorKind::NotFound => {
                return Err(SessionStoreError::NotFound { id: id.to_string() })
            }
            Err(source) => {
                return Err(SessionStoreError::io("deleting session file", &path, source))
            }
        }

        lock_ignoring_poison(&self.locks).remove(id);
        debug!(session_id = %id, "deleted session");
        Ok(())
    }
}

fn validate_session_id(id: &str) -> Result<(), SessionStoreError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SessionStoreError::InvalidSessionId { id: id.to_string() })
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Splits file content into `(line_number, text)` pairs for complete lines,
/// plus whether an unterminated tail was present.
fn complete_lines(content: &str) -> (Vec<(usize, &str)>, bool) {
    let torn = !content.is_empty() && !content.ends_with('\n');
    let mut lines: Vec<(usize, &str)> = content
        .split('\n')
        .enumerate()
        .map(|(index, line)| (index + 1, line))
        .collect();
    // Either the empty remainder after the final newline or the torn tail.
    lines.pop();
    (lines, torn)
}

fn read_transcript(path: &Path, id: &str) -> Result<Transcript, SessionStoreError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == IoErrorKind::NotFound => {
            return Err(SessionStoreError::NotFound { id: id.to_string() })
        }
        Err(source) => return Err(SessionStoreError::io("reading session file", path, source)),
    };

    let (lines, torn) = complete_lines(&content);
    if torn {
        warn!(path = %path.display(), "ignoring torn final line");
    }

    let mut header: Option<SessionHeader> = None;
    let mut entries = Vec::new();
    let last_line = lines.last().map(|(number, _)| *number);

    for (line_number, line) in lines {
        if line.trim().is_empty() {
            continue;
        }

        let parsed = match serde_json::from_str::<JsonLine>(line) {
            Ok(parsed) => parsed,
            Err(_) if Some(line_number) == last_line && line_number > 1 => {
                warn!(path = %path.display(), line = line_number, "ignoring unparsable final line");
                break;
            }
            Err(source) => return Err(SessionStoreError::json_line(path, line_number, source)),
        };

        match (line_number, parsed) {
            (1, JsonLine::Session(parsed_header)) => {
                if parsed_header.version != SESSION_FORMAT_VERSION {
                    return Err(SessionStoreError::UnsupportedVersion {
                        path: path.to_path_buf(),
                        line: line_number,
                        found: parsed_header.version,
                    });
                }
                header = Some(parsed_header);
            }
            (1, _) => {
                return Err(SessionStoreError::InvalidHeaderRecord {
                    path: path.to_path_buf(),
                    line: line_number,
                })
            }
            (_, JsonLine::Session(_)) => {
                return Err(SessionStoreError::InvalidEntryRecord {
                    path: path.to_path_buf(),
                    line: line_number,
                })
            }
            (_, JsonLine::Message(message)) => entries.push(TranscriptEntry::Message(message)),
            (_, JsonLine::Marker(marker)) => entries.push(TranscriptEntry::Marker(marker)),
        }
    }

    let header = header.ok_or_else(|| SessionStoreError::MissingHeader {
        path: path.to_path_buf(),
    })?;

    Ok(Transcript {
        meta: header.into_meta(),
        entries,
    })
}

/// Cuts an unterminated or unparsable final record so the next append starts
/// on a clean line.
fn repair_torn_tail(path: &Path) -> Result<(), SessionStoreError> {
    let content = fs::read_to_string(path)
        .map_err(|source| SessionStoreError::io("reading session file", path, source))?;

    let mut keep = content.rfind('\n').map(|index| index + 1).unwrap_or(0);

    let complete = &content[..keep];
    let last_start = complete[..complete.len().saturating_sub(1)]
        .rfind('\n')
        .map(|index| index + 1)
        .unwrap_or(0);
    let last_line = complete[last_start..].trim_end_matches('\n');
    if last_start > 0
        && !last_line.trim().is_empty()
        && serde_json::from_str::<JsonLine>(last_line).is_err()
    {
        keep = last_start;
    }

    if keep < content.len() {
        warn!(
            path = %path.display(),
            dropped_bytes = content.len() - keep,
            "truncating torn tail before append"
        );
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|source| SessionStoreError::io("opening session file for repair", path, source))?;
        file.set_len(keep as u64)
            .map_err(|source| SessionStoreError::io("truncating torn tail", path, source))?;
    }

    Ok(())
}
