//! Session pool.
//!
//! A [`SessionPool`] holds [`SessionGroup`]s keyed by group ID, each holding
//! [`Session`]s keyed by session ID. Output of every session flows through
//! the relay to either an attached real-time listener or the session's
//! bounded buffer. An [`IdleReaper`] evicts idle and dead sessions and drops
//! empty groups.

pub mod buffer;
pub mod error;
pub mod group;
pub mod pool;
pub mod reaper;
pub mod relay;
#[allow(clippy::module_inception)]
pub mod session;

/// Identifier of a client group, issued by the web session layer.
pub type GroupId = String;

/// Unique identifier of a session.
pub type SessionId = String;

pub use buffer::OutputBuffer;
pub use error::PoolError;
pub use group::SessionGroup;
pub use pool::{command_bytes, SessionPool};
pub use reaper::{IdleReaper, SweepReport, SWEEP_INTERVAL};
pub use relay::{relay, Delivery, DeliveryError, OutputSink, OutputState, PushError, Utf8Decoder};
pub use session::Session;

pub(crate) use session::lock;
