//! Session lifecycle manager
//!
//! Tracks connect/disconnect/connecting state per session and enforces the
//! deduplication invariant: at most one connected session per normalized
//! external identity. Transitions are driven by transport connection
//! callbacks; the guard runs both before any connection attempt
//! (`validate_creation`) and again after connect (`on_connected`), where a
//! detected race tears down the losing session instead of leaving two
//! sessions claiming one identity.

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::sessions::{
    normalize_identity, ConnectionStatus, DynSessionStore, SessionAccount, StoreError,
};
use crate::transport::{ConnectionEvent, DynTransport, TransportError};

/// Lifecycle operation errors.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("identity {identity} is already connected on session {existing_session}")]
    IdentityConflict {
        identity: String,
        existing_session: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Outcome of the pre-connection deduplication guard.
#[derive(Debug, Clone, Serialize)]
pub struct CreationCheck {
    pub can_create: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Session already holding the id or identity, when the check fails
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_session: Option<String>,
}

impl CreationCheck {
    fn allowed() -> Self {
        Self {
            can_create: true,
            reason: None,
            existing_session: None,
        }
    }

    fn denied(reason: impl Into<String>, existing_session: impl Into<String>) -> Self {
        Self {
            can_create: false,
            reason: Some(reason.into()),
            existing_session: Some(existing_session.into()),
        }
    }
}

/// Connect/disconnect state machine over the session store and transport.
pub struct LifecycleManager {
    store: DynSessionStore,
    transport: DynTransport,
}

impl LifecycleManager {
    pub fn new(store: DynSessionStore, transport: DynTransport) -> Self {
        Self { store, transport }
    }

    /// Deduplication guard; must run before any transport connection
    /// attempt.
    ///
    /// Rejects when a transport-level session already exists under this id,
    /// when a persisted account with this id is already connected, or when
    /// the supplied identity normalizes to one another session already
    /// holds while connected.
    pub async fn validate_creation(
        &self,
        session_id: &str,
        identity: Option<&str>,
    ) -> Result<CreationCheck, LifecycleError> {
        if self.transport.session_exists(session_id).await {
            return Ok(CreationCheck::denied(
                format!("transport session {session_id} already exists"),
                session_id,
            ));
        }

        if let Some(account) = self.store.get(session_id).await? {
            if account.status == ConnectionStatus::Connected {
                return Ok(CreationCheck::denied(
                    format!("session {session_id} is already connected"),
                    session_id,
                ));
            }
        }

        if let Some(normalized) = identity.and_then(normalize_identity) {
            if let Some(holder) = self.store.find_connected_by_identity(&normalized).await? {
                if holder.session_id != session_id {
                    return Ok(CreationCheck::denied(
                        format!(
                            "identity {normalized} is already connected on session {}",
                            holder.session_id
                        ),
                        holder.session_id,
                    ));
                }
            }
        }

        Ok(CreationCheck::allowed())
    }

    /// The connected account currently holding this identity, if any.
    pub async fn check_existing(
        &self,
        identity: &str,
    ) -> Result<Option<SessionAccount>, LifecycleError> {
        let Some(normalized) = normalize_identity(identity) else {
            return Ok(None);
        };
        Ok(self.store.find_connected_by_identity(&normalized).await?)
    }

    /// Transport reports this session connected, optionally with the
    /// identity it authenticated as.
    ///
    /// When the identity turns out to be held by a *different* connected
    /// session, two sessions raced to the same identity: the newly
    /// connected one is force-disconnected at the transport layer, its
    /// record is marked `error`, and the conflict is surfaced to the
    /// caller.
    pub async fn on_connected(
        &self,
        session_id: &str,
        identity: Option<&str>,
    ) -> Result<(), LifecycleError> {
        let normalized = identity.and_then(normalize_identity);

        if let Some(ref normalized) = normalized {
            if let Some(holder) = self.store.find_connected_by_identity(normalized).await? {
                if holder.session_id != session_id {
                    error!(
                        session = %session_id,
                        identity = %normalized,
                        existing = %holder.session_id,
                        "identity collision after connect, tearing down new session"
                    );
                    if let Err(e) = self.transport.delete_session(session_id).await {
                        warn!(session = %session_id, error = %e, "teardown of conflicting session failed");
                    }
                    let mut account = self
                        .store
                        .get(session_id)
                        .await?
                        .unwrap_or_else(|| SessionAccount::new(session_id));
                    account.status = ConnectionStatus::Error;
                    account.updated_at = Utc::now();
                    self.store.upsert(account).await?;
                    return Err(LifecycleError::IdentityConflict {
                        identity: normalized.clone(),
                        existing_session: holder.session_id,
                    });
                }
            }
        }

        let mut account = self
            .store
            .get(session_id)
            .await?
            .unwrap_or_else(|| SessionAccount::new(session_id));
        account.status = ConnectionStatus::Connected;
        if normalized.is_some() {
            account.phone_number = normalized;
        }
        account.updated_at = Utc::now();
        self.store.upsert(account).await?;
        info!(session = %session_id, "session connected");
        Ok(())
    }

    /// Transport reports this session disconnected. A missing record is
    /// expected when the transport session was started outside this
    /// manager; it is logged, not escalated.
    pub async fn on_disconnected(&self, session_id: &str) -> Result<(), LifecycleError> {
        self.update_status(session_id, ConnectionStatus::Disconnected)
            .await
    }

    /// Transport reports this session reconnecting.
    pub async fn on_connecting(&self, session_id: &str) -> Result<(), LifecycleError> {
        self.update_status(session_id, ConnectionStatus::Connecting)
            .await
    }

    /// Route a transport connection event to the matching handler.
    pub async fn handle_event(&self, event: ConnectionEvent) -> Result<(), LifecycleError> {
        match event {
            ConnectionEvent::Connected {
                session_id,
                identity,
            } => self.on_connected(&session_id, identity.as_deref()).await,
            ConnectionEvent::Disconnected { session_id } => {
                self.on_disconnected(&session_id).await
            }
            ConnectionEvent::Connecting { session_id } => self.on_connecting(&session_id).await,
        }
    }

    async fn update_status(
        &self,
        session_id: &str,
        status: ConnectionStatus,
    ) -> Result<(), LifecycleError> {
        let Some(mut account) = self.store.get(session_id).await? else {
            warn!(session = %session_id, %status, "connection event for unknown session, ignoring");
            return Ok(());
        };
        account.status = status;
        account.updated_at = Utc::now();
        self.store.upsert(account).await?;
        info!(session = %session_id, %status, "session status updated");
        Ok(())
    }

    /// Tear down and delete every non-connected record idle longer than
    /// `max_age_hours`. Connected records are never touched regardless of
    /// age. Returns how many records were removed.
    pub async fn cleanup_inactive(&self, max_age_hours: i64) -> Result<usize, LifecycleError> {
        let cutoff = Utc::now() - Duration::hours(max_age_hours);
        let mut removed = 0;

        for account in self.store.list().await? {
            if account.status == ConnectionStatus::Connected {
                continue;
            }
            if account.updated_at > cutoff {
                continue;
            }
            info!(
                session = %account.session_id,
                status = %account.status,
                "removing inactive session"
            );
            if self.transport.session_exists(&account.session_id).await {
                if let Err(e) = self.transport.delete_session(&account.session_id).await {
                    warn!(session = %account.session_id, error = %e, "transport teardown failed during cleanup");
                }
            }
            self.store.delete(&account.session_id).await?;
            removed += 1;
        }

        Ok(removed)
    }

    /// Tear down the live transport session (if any) and delete the
    /// persisted record. Idempotent.
    pub async fn delete(&self, session_id: &str) -> Result<(), LifecycleError> {
        if self.transport.session_exists(session_id).await {
            self.transport.delete_session(session_id).await?;
        }
        self.store.delete(session_id).await?;
        info!(session = %session_id, "session deleted");
        Ok(())
    }
}
