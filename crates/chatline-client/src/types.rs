//! Core types for chat conversations

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

/// Prefix for client-generated message ids.
///
/// Server-assigned ids never start with this, so an optimistic entry can
/// always be told apart from a persisted one.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    /// The backend persists assistant turns as `"bot"`.
    #[serde(alias = "bot")]
    Assistant,
}

impl Sender {
    /// Get the sender as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
        }
    }
}

/// Lifecycle of a message in the transcript.
///
/// Only an assistant placeholder ever passes through `Pending` and
/// `Accumulating`. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageState {
    /// Placeholder created, nothing received yet
    Pending,
    /// At least one fragment appended
    Accumulating,
    /// Stream finished normally (also every server-loaded message)
    #[default]
    Completed,
    /// Stream failed or was cancelled
    Failed,
}

impl MessageState {
    /// Whether the message is still receiving fragments
    pub fn is_streaming(self) -> bool {
        matches!(self, MessageState::Pending | MessageState::Accumulating)
    }

    /// Whether the message can no longer be mutated
    pub fn is_terminal(self) -> bool {
        !self.is_streaming()
    }
}

/// File metadata attached to a user message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Original file name
    pub name: String,
    /// Size in bytes
    #[serde(default)]
    pub size: u64,
    /// MIME type
    #[serde(rename = "type", default)]
    pub mime_type: String,
    /// Name the backend stored the upload under; absent until upload completes
    #[serde(
        rename = "uploadedPath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub server_path: Option<String>,
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub sender: Sender,
    #[serde(default)]
    pub text: String,
    #[serde(with = "timestamp", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "file", default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    /// Local lifecycle; messages loaded from the server are `Completed`
    #[serde(skip)]
    pub state: MessageState,
    /// User-facing error for `Failed` messages
    #[serde(skip)]
    pub error: Option<String>,
}

impl Message {
    /// Create an optimistic user message with a temporary id
    pub fn user(text: impl Into<String>, attachment: Option<Attachment>) -> Self {
        Self {
            id: temporary_id(),
            sender: Sender::User,
            text: text.into(),
            timestamp: Utc::now(),
            attachment,
            state: MessageState::Completed,
            error: None,
        }
    }

    /// Create an empty assistant placeholder awaiting stream events
    pub fn assistant_placeholder() -> Self {
        Self {
            id: temporary_id(),
            sender: Sender::Assistant,
            text: String::new(),
            timestamp: Utc::now(),
            attachment: None,
            state: MessageState::Pending,
            error: None,
        }
    }

    /// Whether this message still receives stream fragments
    pub fn is_streaming(&self) -> bool {
        self.state.is_streaming()
    }

    /// Whether this message carries a client-generated id
    pub fn is_temporary(&self) -> bool {
        is_temporary_id(&self.id)
    }
}

/// Generate a fresh client-side message id
pub fn temporary_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4())
}

/// Check whether an id was generated client-side
pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// A full conversation as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub pinned: bool,
}

/// Conversation list entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub preview: String,
    #[serde(default)]
    pub pinned: bool,
}

/// Body of a chat request (streaming and non-streaming)
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<Attachment>,
}

/// Response of the upload endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct UploadReceipt {
    /// Stored name, used as `Attachment::server_path`
    pub filename: String,
    #[serde(rename = "originalName", default)]
    pub original_name: Option<String>,
}

/// A file on local disk about to be attached to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

impl LocalFile {
    /// Stat a file and derive its attachment metadata
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Not a file: {}", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let mime_type = guess_mime_type(&name).to_string();

        Ok(Self {
            path,
            name,
            size: metadata.len(),
            mime_type,
        })
    }

    /// Attachment metadata before the upload has completed
    pub fn to_attachment(&self) -> Attachment {
        Attachment {
            name: self.name.clone(),
            size: self.size,
            mime_type: self.mime_type.clone(),
            server_path: None,
        }
    }
}

/// Best-effort MIME type from a file extension
pub fn guess_mime_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "py" | "c" | "cpp" | "h" | "java" | "rb" | "php" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        _ => "application/octet-stream",
    }
}

/// Parse a backend timestamp.
///
/// Accepts RFC 3339 as well as naive ISO-8601 without an offset, which is
/// taken to be UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc())
}

mod timestamp {
    use super::*;
    use serde::{Serializer, de};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_timestamp(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}")))
    }
}

/// Older backend revisions used numeric (epoch millis) message ids.
fn deserialize_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(d)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}
