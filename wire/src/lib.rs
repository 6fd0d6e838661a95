//! Shared message schema for the upload and chat realtime endpoints.
//!
//! This crate owns the JSON representation exchanged with the backend over
//! WebSocket text frames. Inbound payloads are kept flexible
//! (`serde_json::Value`) inside an [`Envelope`] until a feature service asks
//! for its typed view, so one malformed feature payload never poisons the
//! transport-level dispatch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Close code for an orderly shutdown; suppresses reconnection.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when the socket drops without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Error returned while decoding inbound messages or building endpoint URLs.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The text frame was not valid JSON.
    #[error("invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),
    /// The message decoded, but not to a JSON object.
    #[error("message is not a JSON object")]
    NotAnObject,
    /// The API base URL has a scheme we cannot map to a WebSocket scheme.
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    /// A status string did not match any known status for the payload kind.
    #[error("unexpected status `{0}`")]
    UnexpectedStatus(String),
}

// =============================================================================
// STATUS
// =============================================================================

/// Dispatch key carried by every inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// File accepted and queued by the server.
    Waiting,
    /// Server-side preprocessing of a file.
    Processing,
    /// File bytes are being stored.
    Uploading,
    /// File stored; analysis not yet started.
    Uploaded,
    /// File content is being indexed.
    Analyzing,
    /// File finished successfully.
    Complete,
    /// File was already present on the server.
    Exists,
    /// Server-reported failure.
    Error,
    /// Chat reply is still streaming.
    InProgress,
    /// Chat reply finished.
    Completed,
    /// Generic progress message inferred from `action: "progress"`.
    Progress,
    /// Any status string this client does not know.
    Unknown,
}

impl Status {
    /// Parse a status string, ignoring ASCII case.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        const KNOWN: [(&str, Status); 11] = [
            ("waiting", Status::Waiting),
            ("processing", Status::Processing),
            ("uploading", Status::Uploading),
            ("uploaded", Status::Uploaded),
            ("analyzing", Status::Analyzing),
            ("complete", Status::Complete),
            ("exists", Status::Exists),
            ("error", Status::Error),
            ("in_progress", Status::InProgress),
            ("completed", Status::Completed),
            ("progress", Status::Progress),
        ];
        let raw = raw.trim();
        KNOWN
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(raw))
            .map_or(Self::Unknown, |(_, status)| *status)
    }

    /// Wire spelling of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Processing => "processing",
            Self::Uploading => "uploading",
            Self::Uploaded => "uploaded",
            Self::Analyzing => "analyzing",
            Self::Complete => "complete",
            Self::Exists => "exists",
            Self::Error => "error",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Progress => "progress",
            Self::Unknown => "unknown",
        }
    }
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// One parsed inbound message: its dispatch key plus the raw JSON object.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Dispatch key derived from `status`, `type` or `action`.
    pub status: Status,
    /// Full JSON object as received.
    pub payload: Value,
}

impl Envelope {
    /// Parse a text frame into an envelope.
    ///
    /// The dispatch key is taken from `status`, then `type`, and finally
    /// inferred as [`Status::Progress`] when `action == "progress"`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Json`] for malformed text and
    /// [`WireError::NotAnObject`] when the JSON is not an object.
    pub fn parse(text: &str) -> Result<Self, WireError> {
        let payload = serde_json::from_str::<Value>(text)?;
        let Some(map) = payload.as_object() else {
            return Err(WireError::NotAnObject);
        };

        let status = ["status", "type"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(Status::parse)
            .or_else(|| {
                (map.get("action").and_then(Value::as_str) == Some("progress")).then_some(Status::Progress)
            })
            .unwrap_or(Status::Unknown);

        Ok(Self { status, payload })
    }

    /// Typed view of an upload progress message.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Json`] when required fields are missing or mistyped.
    pub fn upload_progress(&self) -> Result<UploadProgress, WireError> {
        Ok(UploadProgress::deserialize(&self.payload)?)
    }

    /// Typed view of a chat progress message.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Json`] when required fields are missing or mistyped.
    pub fn chat_progress(&self) -> Result<ChatProgress, WireError> {
        Ok(ChatProgress::deserialize(&self.payload)?)
    }

    /// Human-readable error text carried by the message, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        ["error", "message", "detail"]
            .iter()
            .find_map(|key| self.payload.get(*key).and_then(Value::as_str))
    }
}

// =============================================================================
// UPLOAD
// =============================================================================

/// Per-file status within an upload batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum FileStatus {
    #[default]
    Waiting,
    Processing,
    Uploading,
    Uploaded,
    Analyzing,
    Complete,
    Exists,
    Error,
}

impl FileStatus {
    /// Terminal statuses end progress for a file.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Exists | Self::Error)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Processing => "processing",
            Self::Uploading => "uploading",
            Self::Uploaded => "uploaded",
            Self::Analyzing => "analyzing",
            Self::Complete => "complete",
            Self::Exists => "exists",
            Self::Error => "error",
        }
    }
}

impl TryFrom<String> for FileStatus {
    type Error = WireError;

    fn try_from(raw: String) -> Result<Self, WireError> {
        match Status::parse(&raw) {
            Status::Waiting => Ok(Self::Waiting),
            Status::Processing => Ok(Self::Processing),
            Status::Uploading => Ok(Self::Uploading),
            Status::Uploaded => Ok(Self::Uploaded),
            Status::Analyzing => Ok(Self::Analyzing),
            Status::Complete | Status::Completed => Ok(Self::Complete),
            Status::Exists => Ok(Self::Exists),
            Status::Error => Ok(Self::Error),
            _ => Err(WireError::UnexpectedStatus(raw)),
        }
    }
}

/// Inbound progress for one file of a batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadProgress {
    pub status: FileStatus,
    pub filename: String,
    #[serde(default)]
    pub progress_percent: f64,
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub current_file: Option<u32>,
    #[serde(default)]
    pub total_files: Option<u32>,
    #[serde(default, alias = "message")]
    pub error: Option<String>,
}

/// Outbound request that starts a batch upload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Always `"upload"`.
    pub action: String,
    pub user_id: String,
    pub files: Vec<UploadFile>,
    pub total_files: usize,
}

impl UploadRequest {
    #[must_use]
    pub fn new(user_id: impl Into<String>, files: Vec<UploadFile>) -> Self {
        let total_files = files.len();
        Self {
            action: "upload".to_owned(),
            user_id: user_id.into(),
            files,
            total_files,
        }
    }
}

/// One staged file inside an [`UploadRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFile {
    pub filename: String,
    /// Base64 content without a `data:` URI prefix.
    pub content: String,
    pub content_type: String,
}

// =============================================================================
// CHAT
// =============================================================================

/// Lifecycle of one chat reply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum ChatStatus {
    #[default]
    InProgress,
    Completed,
    Error,
}

impl TryFrom<String> for ChatStatus {
    type Error = WireError;

    fn try_from(raw: String) -> Result<Self, WireError> {
        match Status::parse(&raw) {
            Status::InProgress | Status::Progress => Ok(Self::InProgress),
            Status::Completed | Status::Complete => Ok(Self::Completed),
            Status::Error => Ok(Self::Error),
            _ => Err(WireError::UnexpectedStatus(raw)),
        }
    }
}

/// Inbound progress for a chat reply.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatProgress {
    pub status: ChatStatus,
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub content: Vec<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub pdf_ids: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ChatProgress {
    /// True for the final message of a reply, signalled either by status or by step.
    #[must_use]
    pub fn is_completion(&self) -> bool {
        self.status == ChatStatus::Completed
            || self
                .step
                .as_deref()
                .is_some_and(|step| step.eq_ignore_ascii_case("completed"))
    }
}

/// Outbound chat message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub content: String,
    pub faiss_index_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub pdf_ids: Vec<String>,
}

// =============================================================================
// ENDPOINTS
// =============================================================================

/// Build `ws(s)://<host>/ws/<endpoint>?token=<token>` from an HTTP(S) or WS(S) base URL.
///
/// # Errors
///
/// Returns [`WireError::InvalidBaseUrl`] for any other scheme.
pub fn endpoint_url(base_url: &str, endpoint: &str, token: &str) -> Result<String, WireError> {
    let trimmed = base_url.trim_end_matches('/');
    let endpoint = endpoint.trim_matches('/');

    let (scheme, rest) = if let Some(rest) = trimmed.strip_prefix("http://") {
        ("ws", rest)
    } else if let Some(rest) = trimmed.strip_prefix("https://") {
        ("wss", rest)
    } else if let Some(rest) = trimmed.strip_prefix("ws://") {
        ("ws", rest)
    } else if let Some(rest) = trimmed.strip_prefix("wss://") {
        ("wss", rest)
    } else {
        return Err(WireError::InvalidBaseUrl(base_url.to_owned()));
    };

    Ok(format!("{scheme}://{rest}/ws/{endpoint}?token={token}"))
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
