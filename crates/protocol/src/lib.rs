//! # WebSSH Protocol Library
//!
//! Value objects shared between the session pool and the HTTP/hub layer
//! that fronts it.
//!
//! ## Overview
//!
//! - **Requests**: [`ConnectRequest`] with its [`ShellTarget`] and [`Credential`]
//! - **Metadata**: [`SessionInfo`] and [`SessionStatus`]
//! - **Output**: [`BufferedOutput`] for polling clients and [`ShellOutput`]
//!   for real-time listeners
//! - **Envelope**: [`ServerResponse`] wrapping every result, with an
//!   [`ErrorKind`] on failure
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ErrorKind, ServerResponse, ShellOutput, listener_destination};
//!
//! let destination = listener_destination("visitor-1", "session-1");
//! let event = ShellOutput::new(destination, "ok\n");
//! assert_eq!(event.destination, "visitor-1:session-1");
//!
//! let response: ServerResponse<()> =
//!     ServerResponse::from_error(ErrorKind::SessionNotFound, "no such session");
//! assert!(!response.is_success());
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Request, metadata, output and envelope types
//! - [`error`]: Error kinds

pub mod error;
pub mod messages;

pub use error::ErrorKind;
pub use messages::{
    listener_destination, BufferedOutput, ConnectRequest, Credential, ServerResponse,
    SessionInfo, SessionStatus, ShellOutput, ShellTarget, StatusResult, DEFAULT_SSH_PORT,
    SHELL_OUTPUT_EVENT,
};
