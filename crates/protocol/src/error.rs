//! Error kinds shared with the web layer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Serializable discriminant of every caller-facing pool failure.
///
/// The web layer turns a typed pool error into a structured response; the
/// kind is what lets a client tell the failures apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Network or authentication failure while establishing the connection.
    ConnectionError,
    /// Malformed private key or wrong passphrase.
    CredentialError,
    /// Unknown group or session id.
    SessionNotFound,
    /// Write after the shell channel was torn down.
    ChannelClosed,
}

impl ErrorKind {
    /// Returns true if the client can fix the request and try again.
    pub fn is_client_correctable(&self) -> bool {
        matches!(self, ErrorKind::SessionNotFound | ErrorKind::CredentialError)
    }

    /// Returns the stable name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectionError => "ConnectionError",
            ErrorKind::CredentialError => "CredentialError",
            ErrorKind::SessionNotFound => "SessionNotFound",
            ErrorKind::ChannelClosed => "ChannelClosed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
