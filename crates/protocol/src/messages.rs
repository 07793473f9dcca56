//! Value objects exchanged between the session pool and the web layer.
//!
//! Everything here is serialized as camelCase JSON, which is what the browser
//! side of the HTTP/hub layer expects.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Name of the real-time event carrying one chunk of shell output.
pub const SHELL_OUTPUT_EVENT: &str = "ShellOutput";

/// Default SSH port used when a request omits one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Builds the listener destination for a session: `"{group_id}:{session_id}"`.
pub fn listener_destination(group_id: &str, session_id: &str) -> String {
    format!("{}:{}", group_id, session_id)
}

// ============================================================================
// Connect
// ============================================================================

/// The remote host a session connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellTarget {
    /// Human readable label chosen by the user.
    #[serde(default)]
    pub display_name: String,
    /// Host name or address.
    pub host: String,
    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login name on the remote host.
    pub username: String,
    /// Expected host key fingerprint in OpenSSH `SHA256:...` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl ShellTarget {
    /// Creates a target with the default port and no pinned fingerprint.
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            display_name: host.clone(),
            host,
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            fingerprint: None,
        }
    }

    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Credential material carried by a connect request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum Credential {
    /// Password authentication.
    Password {
        /// The plaintext password.
        password: String,
    },
    /// Public key authentication with an OpenSSH or PEM encoded private key.
    PrivateKey {
        /// The encoded private key.
        key: String,
        /// Passphrase protecting the key, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
}

// Secrets never end up in logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password { .. } => f.write_str("Password(<redacted>)"),
            Credential::PrivateKey { passphrase, .. } => f
                .debug_struct("PrivateKey")
                .field("key", &"<redacted>")
                .field("has_passphrase", &passphrase.is_some())
                .finish(),
        }
    }
}

/// Request to open a new pooled shell session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    /// Where to connect.
    pub target: ShellTarget,
    /// How to authenticate.
    pub credential: Credential,
}

// ============================================================================
// Session metadata
// ============================================================================

/// Lifecycle status of a pooled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// The connection and shell channel are being opened.
    ///
    /// The pool never reports this: a session is published only once its
    /// shell is open. The web layer uses it for a connect still in flight.
    Connecting,
    /// The shell is live.
    Connected,
    /// The connection has been released.
    Disconnected,
}

impl SessionStatus {
    /// Returns the status string reported to clients.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Connecting => "Connecting",
            SessionStatus::Connected => "Connected",
            SessionStatus::Disconnected => "Disconnected",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public metadata of a pooled session. Never contains credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Process-unique session identifier.
    pub session_id: String,
    /// Display name of the target.
    pub display_name: String,
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Remote user.
    pub username: String,
    /// Session start as Unix epoch milliseconds.
    pub started_at_ms: u64,
    /// Status string, e.g. `"Connected"`.
    pub status: String,
}

// ============================================================================
// Output
// ============================================================================

/// A destructive fetch from a session's output buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferedOutput {
    /// Concatenated chunks in arrival order.
    pub output: String,
    /// Number of buffer entries drained.
    pub lines: usize,
}

impl BufferedOutput {
    /// Returns true if nothing was drained.
    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }
}

/// Real-time push event addressed to every listener of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellOutput {
    /// Event name, always [`SHELL_OUTPUT_EVENT`].
    pub event: String,
    /// Listener group, `"{group_id}:{session_id}"`.
    pub destination: String,
    /// One raw text chunk.
    pub payload: String,
}

impl ShellOutput {
    /// Creates a `ShellOutput` event for a destination.
    pub fn new(destination: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            event: SHELL_OUTPUT_EVENT.to_string(),
            destination: destination.into(),
            payload: payload.into(),
        }
    }
}

// ============================================================================
// Response envelope
// ============================================================================

/// Outcome category of a [`ServerResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusResult {
    /// The operation succeeded.
    Successful,
    /// The request was rejected (client-correctable).
    Failed,
    /// The operation raised an error.
    Exception,
}

/// Structured response returned by the web layer for every pool operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerResponse<T> {
    /// Outcome category.
    pub status_result: StatusResult,
    /// Error kind, present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Human readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_message: Option<String>,
    /// Payload, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<T>,
}

impl<T> ServerResponse<T> {
    /// A successful response carrying `value`.
    pub fn success(value: T) -> Self {
        Self {
            status_result: StatusResult::Successful,
            error_kind: None,
            extra_message: None,
            response: Some(value),
        }
    }

    /// A rejected request without an error kind (e.g. no web session yet).
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status_result: StatusResult::Failed,
            error_kind: None,
            extra_message: Some(message.into()),
            response: None,
        }
    }

    /// A failure built from a typed pool error.
    ///
    /// Client-correctable kinds map to [`StatusResult::Failed`], the rest to
    /// [`StatusResult::Exception`].
    pub fn from_error(kind: ErrorKind, message: impl Into<String>) -> Self {
        let status_result = if kind.is_client_correctable() {
            StatusResult::Failed
        } else {
            StatusResult::Exception
        };
        Self {
            status_result,
            error_kind: Some(kind),
            extra_message: Some(message.into()),
            response: None,
        }
    }

    /// Returns true for [`StatusResult::Successful`].
    pub fn is_success(&self) -> bool {
        self.status_result == StatusResult::Successful
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_destination() {
        assert_eq!(listener_destination("g1", "abc"), "g1:abc");
    }

    #[test]
    fn test_connect_request_from_browser_json() {
        let json = r#"{
            "target": {"host": "example.org", "username": "root"},
            "credential": {"method": "privateKey", "key": "-----BEGIN", "passphrase": "pw"}
        }"#;
        let request: ConnectRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.target.port, DEFAULT_SSH_PORT);
        assert_eq!(request.target.display_name, "");
        assert!(request.target.fingerprint.is_none());
        assert_eq!(
            request.credential,
            Credential::PrivateKey {
                key: "-----BEGIN".to_string(),
                passphrase: Some("pw".to_string()),
            }
        );
    }

    #[test]
    fn test_password_credential_tag() {
        let credential = Credential::Password {
            password: "hunter2".to_string(),
        };
        let value = serde_json::to_value(&credential).unwrap();
        assert_eq!(value["method"], "password");
        assert_eq!(value["password"], "hunter2");
    }

    #[test]
    fn test_credential_debug_redacts_secrets() {
        let password = Credential::Password {
            password: "hunter2".to_string(),
        };
        let key = Credential::PrivateKey {
            key: "SECRET-KEY".to_string(),
            passphrase: Some("SECRET-PASS".to_string()),
        };

        assert!(!format!("{:?}", password).contains("hunter2"));
        let debug = format!("{:?}", key);
        assert!(!debug.contains("SECRET-KEY"));
        assert!(!debug.contains("SECRET-PASS"));
        assert!(debug.contains("has_passphrase: true"));
    }

    #[test]
    fn test_shell_output_event_name() {
        let event = ShellOutput::new("g:s", "ok\n");
        assert_eq!(event.event, SHELL_OUTPUT_EVENT);
        assert_eq!(event.destination, "g:s");
        assert_eq!(event.payload, "ok\n");
    }

    #[test]
    fn test_buffered_output_empty() {
        assert!(BufferedOutput::default().is_empty());
    }

    #[test]
    fn test_session_status_strings() {
        assert_eq!(SessionStatus::Connected.to_string(), "Connected");
        assert_eq!(SessionStatus::Disconnected.as_str(), "Disconnected");

        let pending: SessionStatus = serde_json::from_str("\"Connecting\"").unwrap();
        assert_eq!(pending, SessionStatus::Connecting);
        assert_eq!(pending.as_str(), "Connecting");
    }

    #[test]
    fn test_server_response_success_shape() {
        let response = ServerResponse::success(true);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["statusResult"], "Successful");
        assert_eq!(value["response"], true);
        assert!(value.get("errorKind").is_none());
    }

    #[test]
    fn test_server_response_from_error() {
        let not_found: ServerResponse<()> =
            ServerResponse::from_error(ErrorKind::SessionNotFound, "no such session");
        assert_eq!(not_found.status_result, StatusResult::Failed);
        assert_eq!(not_found.error_kind, Some(ErrorKind::SessionNotFound));

        let connect: ServerResponse<()> =
            ServerResponse::from_error(ErrorKind::ConnectionError, "refused");
        assert_eq!(connect.status_result, StatusResult::Exception);
        assert!(!connect.is_success());
    }
}
