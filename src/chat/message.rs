// Chat records and the in-memory message log

use crate::chat::error::{ChatError, ChatResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

/// Largest attachment a client may declare (10 MiB).
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// Informational pointer to an earlier message.
///
/// The author and snippet are cached by the client when replying, so the
/// reference stays readable even after the target is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRef {
    pub reply_to: u64,
    pub reply_username: Option<String>,
    pub reply_message: Option<String>,
}

/// Attachment metadata plus the base64 payload as the client sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    pub file_id: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub file_data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_category: Option<String>,
}

/// What kind of chat record this is; serialized as the `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessageKind {
    User,
    File(FileAttachment),
}

/// A stored chat record. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: u64,
    pub username: String,
    /// Chat text, or the optional caption of a file.
    pub message: String,
    pub is_admin: bool,
    pub timestamp: u64,
    #[serde(flatten)]
    pub reply: Option<ReplyRef>,
    #[serde(flatten)]
    pub kind: MessageKind,
}

impl Message {
    pub fn attachment(&self) -> Option<&FileAttachment> {
        match &self.kind {
            MessageKind::File(file) => Some(file),
            MessageKind::User => None,
        }
    }
}

/// A message that has not been assigned an id yet
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub username: String,
    pub message: String,
    pub is_admin: bool,
    pub reply: Option<ReplyRef>,
    pub kind: MessageKind,
}

/// Decoded attachment handed to the download route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

struct LogState {
    entries: Vec<Arc<Message>>,
    next_id: u64,
}

/// Append-only chat history with delete-by-id.
///
/// Ids come from a single counter that is never reset or rewound, so a
/// deleted id is never handed out again.
pub struct MessageLog {
    state: RwLock<LogState>,
}

impl MessageLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LogState {
                entries: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// Assign the next id, stamp the draft and append it
    pub async fn append(&self, draft: MessageDraft) -> Arc<Message> {
        let mut state = self.state.write().await;

        let id = state.next_id;
        state.next_id += 1;

        let message = Arc::new(Message {
            id,
            username: draft.username,
            message: draft.message,
            is_admin: draft.is_admin,
            timestamp: now_millis(),
            reply: draft.reply,
            kind: draft.kind,
        });

        state.entries.push(message.clone());
        message
    }

    /// Point-in-time copy of the whole history, in id order
    pub async fn snapshot(&self) -> Vec<Arc<Message>> {
        let state = self.state.read().await;
        state.entries.clone()
    }

    /// Remove the message with this id. Returns whether anything was removed.
    pub async fn delete(&self, id: u64) -> bool {
        let mut state = self.state.write().await;
        match state.entries.iter().position(|m| m.id == id) {
            Some(index) => {
                state.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of stored messages
    pub async fn len(&self) -> usize {
        let state = self.state.read().await;
        state.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Find the file message carrying this client-supplied file id
    pub async fn find_file(&self, file_id: &str) -> Option<Arc<Message>> {
        let state = self.state.read().await;
        state
            .entries
            .iter()
            .find(|m| matches!(m.attachment(), Some(f) if f.file_id == file_id))
            .cloned()
    }

    /// Look up an attachment for download and decode its payload
    pub async fn lookup_file(&self, file_id: &str) -> ChatResult<Option<StoredFile>> {
        let Some(message) = self.find_file(file_id).await else {
            return Ok(None);
        };
        let Some(file) = message.attachment() else {
            return Ok(None);
        };

        let bytes = decode_payload(&file.file_data)
            .ok_or_else(|| ChatError::CorruptPayload(file.file_id.clone()))?;

        Ok(Some(StoredFile {
            file_name: file.file_name.clone(),
            mime_type: file.file_type.clone(),
            bytes,
        }))
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a base64 payload, accepting an optional `data:<mime>;base64,` prefix.
fn decode_payload(data: &str) -> Option<Vec<u8>> {
    let encoded = match data.strip_prefix("data:") {
        Some(rest) => rest.split_once(";base64,")?.1,
        None => data,
    };
    STANDARD.decode(encoded.trim()).ok()
}
