//! Transport client seam
//!
//! Contract for the external collaborator that performs actual network
//! delivery and reports connection-state changes. The dispatch core never
//! touches the wire itself; everything flows through this trait, which
//! makes the worker loop and lifecycle manager testable against mocks.

use async_trait::async_trait;
use std::sync::Arc;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors surfaced by the transport collaborator.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("session not connected: {0}")]
    NotConnected(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// A connection-state transition reported by the transport.
///
/// Fired once per transition, not polled. The lifecycle manager consumes
/// these via its `on_connected` / `on_disconnected` / `on_connecting`
/// handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected {
        session_id: String,
        /// External identity (e.g. phone number) yielded by the connection,
        /// when the transport knows it.
        identity: Option<String>,
    },
    Disconnected {
        session_id: String,
    },
    Connecting {
        session_id: String,
    },
}

/// Outbound delivery and session-control operations.
///
/// Each message kind maps to a distinct call with kind-specific required
/// fields: a media reference for image/document/sticker, a filename
/// additionally for document. Timeout semantics for an individual send are
/// the transport's concern; the worker loop imposes none of its own.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Whether a live transport-level session exists under this id.
    async fn session_exists(&self, session_id: &str) -> bool;

    /// Show a typing indicator to the recipient for roughly `duration_ms`.
    async fn send_typing(
        &self,
        session_id: &str,
        recipient: &str,
        duration_ms: u64,
        is_group: bool,
    ) -> TransportResult<()>;

    /// Send a plain text message.
    async fn send_text(
        &self,
        session_id: &str,
        recipient: &str,
        body: &str,
        is_group: bool,
    ) -> TransportResult<()>;

    /// Send an image with an optional caption in `body`.
    async fn send_image(
        &self,
        session_id: &str,
        recipient: &str,
        media_ref: &str,
        caption: &str,
        is_group: bool,
    ) -> TransportResult<()>;

    /// Send a document attachment under the given filename.
    async fn send_document(
        &self,
        session_id: &str,
        recipient: &str,
        media_ref: &str,
        file_name: &str,
        is_group: bool,
    ) -> TransportResult<()>;

    /// Send a sticker.
    async fn send_sticker(
        &self,
        session_id: &str,
        recipient: &str,
        media_ref: &str,
        is_group: bool,
    ) -> TransportResult<()>;

    /// Tear down the live transport session, disconnecting it.
    async fn delete_session(&self, session_id: &str) -> TransportResult<()>;
}

/// Type-erased transport for storage
pub type DynTransport = Arc<dyn TransportClient>;
