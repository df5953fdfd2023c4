//! Outbound message data model
//!
//! Types shared between callers and the per-session dispatch workers. A
//! session's queue is an append-only list: entries are never removed, only
//! transitioned through `pending → processing → completed | failed`, which
//! keeps completed and failed sends inspectable for status reporting.

pub mod dispatch;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::limiter::AdmissionDenied;

/// Unique identifier for a queued message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// What kind of payload a message carries. Each kind maps to a distinct
/// transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Document,
    Sticker,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
            Self::Document => write!(f, "document"),
            Self::Sticker => write!(f, "sticker"),
        }
    }
}

/// Lifecycle status of a queued message.
///
/// Transitions are monotonic along `pending → processing → {completed,
/// pending (retry), failed}` and are performed only by the owning session's
/// single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Caller-supplied description of a send. Validated and turned into a
/// [`QueuedMessage`] by `enqueue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDraft {
    /// Recipient identifier (chat or contact id)
    pub recipient: String,
    /// Body text; doubles as the caption for media kinds
    pub body: String,
    pub kind: MessageKind,
    /// Whether the recipient is a group chat
    #[serde(default)]
    pub is_group: bool,
    /// Media reference (URL or handle); required for image/document/sticker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    /// Filename shown to the recipient; required for document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl MessageDraft {
    /// A plain text message
    pub fn text(recipient: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            body: body.into(),
            kind: MessageKind::Text,
            is_group: false,
            media_ref: None,
            file_name: None,
        }
    }

    /// An image with an optional caption in `body`
    pub fn image(
        recipient: impl Into<String>,
        media_ref: impl Into<String>,
        caption: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            body: caption.into(),
            kind: MessageKind::Image,
            is_group: false,
            media_ref: Some(media_ref.into()),
            file_name: None,
        }
    }

    /// A document attachment delivered under `file_name`
    pub fn document(
        recipient: impl Into<String>,
        media_ref: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            body: String::new(),
            kind: MessageKind::Document,
            is_group: false,
            media_ref: Some(media_ref.into()),
            file_name: Some(file_name.into()),
        }
    }

    /// A sticker
    pub fn sticker(recipient: impl Into<String>, media_ref: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            body: String::new(),
            kind: MessageKind::Sticker,
            is_group: false,
            media_ref: Some(media_ref.into()),
            file_name: None,
        }
    }

    /// Mark the recipient as a group chat
    pub fn to_group(mut self) -> Self {
        self.is_group = true;
        self
    }
}

/// One outbound send request, tracked from enqueue to terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: MessageId,
    pub session_id: String,
    pub recipient: String,
    pub body: String,
    pub kind: MessageKind,
    pub is_group: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub status: MessageStatus,
    /// Failed delivery attempts so far
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    /// Error from the most recent failed attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueuedMessage {
    pub fn new(session_id: impl Into<String>, draft: MessageDraft) -> Self {
        Self {
            id: MessageId::new(),
            session_id: session_id.into(),
            recipient: draft.recipient,
            body: draft.body,
            kind: draft.kind,
            is_group: draft.is_group,
            media_ref: draft.media_ref,
            file_name: draft.file_name,
            status: MessageStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            last_error: None,
        }
    }
}

/// Aggregate per-session counters, maintained incrementally alongside
/// individual status transitions so status queries stay O(1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounters {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Point-in-time snapshot of a session's queue. The message list is a
/// defensive copy; readers never interleave with the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub queue: Vec<QueuedMessage>,
}

/// Successful enqueue outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueReceipt {
    pub message_id: MessageId,
    /// Length of the session's queue after the append
    pub queue_position: usize,
}

/// Errors surfaced synchronously from queue operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("recipient must not be empty")]
    EmptyRecipient,

    #[error("{0} messages require a media reference")]
    MissingMediaRef(MessageKind),

    #[error("document messages require a file name")]
    MissingFileName,

    #[error(transparent)]
    RateLimited(#[from] AdmissionDenied),
}
