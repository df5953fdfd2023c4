//! Session identity records and the persistence seam
//!
//! A [`SessionAccount`] ties an opaque session id to the external identity
//! (phone number) its connection authenticates as. Records live behind the
//! [`SessionStore`] trait — persistence is an external collaborator; the
//! in-memory implementation here backs tests and single-process setups.

pub mod lifecycle;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    #[default]
    Disconnected,
    Connecting,
    /// Fatal transport failure, including the losing side of an identity
    /// collision
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Persisted identity record for one session.
///
/// Invariant: at most one account with status `connected` holds a given
/// normalized identity at any time. The lifecycle manager enforces this
/// both before connection (`validate_creation`) and after (`on_connected`
/// collision teardown).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAccount {
    pub session_id: String,
    /// Normalized external identity, set once the connection authenticates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionAccount {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            phone_number: None,
            status: ConnectionStatus::Disconnected,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Normalize an external identity to its digit string.
///
/// Strips `+`, spaces, dashes, and any other non-digit characters so
/// differently formatted renderings of the same number collide. Returns
/// `None` when nothing usable remains.
pub fn normalize_identity(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// Errors from the persistence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session store error: {0}")]
    Backend(String),
}

/// Persistence seam for session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<SessionAccount>, StoreError>;

    async fn upsert(&self, account: SessionAccount) -> Result<(), StoreError>;

    /// Idempotent; deleting a missing record is not an error.
    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<SessionAccount>, StoreError>;

    /// The connected account holding this normalized identity, if any.
    async fn find_connected_by_identity(
        &self,
        identity: &str,
    ) -> Result<Option<SessionAccount>, StoreError>;
}

/// Type-erased store for storage
pub type DynSessionStore = Arc<dyn SessionStore>;

/// In-memory store keyed by session id.
#[derive(Default)]
pub struct MemorySessionStore {
    accounts: RwLock<HashMap<String, SessionAccount>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionAccount>, StoreError> {
        Ok(self.accounts.read().get(session_id).cloned())
    }

    async fn upsert(&self, account: SessionAccount) -> Result<(), StoreError> {
        self.accounts
            .write()
            .insert(account.session_id.clone(), account);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.accounts.write().remove(session_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionAccount>, StoreError> {
        Ok(self.accounts.read().values().cloned().collect())
    }

    async fn find_connected_by_identity(
        &self,
        identity: &str,
    ) -> Result<Option<SessionAccount>, StoreError> {
        Ok(self
            .accounts
            .read()
            .values()
            .find(|a| {
                a.status == ConnectionStatus::Connected
                    && a.phone_number.as_deref() == Some(identity)
            })
            .cloned())
    }
}
