//! Errors surfaced by pool operations.

use protocol::ErrorKind;
use thiserror::Error;

use super::{GroupId, SessionId};

/// Errors that can occur during pool operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Establishing the remote connection or shell channel failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The private key or its passphrase could not be used.
    #[error("invalid credential: {0}")]
    Credential(String),

    /// The group, or the session within it, does not exist.
    #[error("{}", not_found_message(.group_id, .session_id))]
    SessionNotFound {
        /// Group that was looked up.
        group_id: GroupId,
        /// Session that was looked up, if the group existed.
        session_id: Option<SessionId>,
    },

    /// The shell channel is gone.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

fn not_found_message(group_id: &GroupId, session_id: &Option<SessionId>) -> String {
    match session_id {
        Some(session_id) => format!("session not found: {} in group {}", session_id, group_id),
        None => format!("no sessions for group: {}", group_id),
    }
}

impl PoolError {
    /// Returns the serializable kind used in structured responses.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::Connection(_) => ErrorKind::ConnectionError,
            PoolError::Credential(_) => ErrorKind::CredentialError,
            PoolError::SessionNotFound { .. } => ErrorKind::SessionNotFound,
            PoolError::ChannelClosed(_) => ErrorKind::ChannelClosed,
        }
    }

    pub(crate) fn group_not_found(group_id: &str) -> Self {
        PoolError::SessionNotFound {
            group_id: group_id.to_string(),
            session_id: None,
        }
    }

    pub(crate) fn session_not_found(group_id: &str, session_id: &str) -> Self {
        PoolError::SessionNotFound {
            group_id: group_id.to_string(),
            session_id: Some(session_id.to_string()),
        }
    }
}
