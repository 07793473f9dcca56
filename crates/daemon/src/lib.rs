//! # WebSSH Daemon Library
//!
//! This crate holds the session pool behind the WebSSH backend: many
//! browser clients, each grouped under a stable group ID, drive independent
//! interactive SSH shells whose connections live here on their behalf.
//!
//! ## Overview
//!
//! - **Session Pool**: connect, send input, fetch or push output, probe
//!   liveness, disconnect, and list-and-prune sessions per group
//! - **Output Relay**: every output chunk is either pushed to an attached
//!   real-time listener or kept in a bounded per-session buffer
//! - **Idle Reaper**: a cancellable periodic sweep that evicts idle and dead
//!   sessions and drops empty groups
//! - **Transport**: an SSH connector built on `russh`, behind a
//!   message-passing boundary
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          SessionPool                             │
//! │   groups: DashMap<GroupId, SessionGroup>                         │
//! │                                                                  │
//! │  ┌───────────────────┐   ┌───────────────────┐   ┌────────────┐  │
//! │  │  SessionGroup     │   │  SessionGroup     │   │ IdleReaper │  │
//! │  │  ┌─────────────┐  │   │  ┌─────────────┐  │   └────────────┘  │
//! │  │  │  Session    │──┼─┐ │  │  Session    │  │                   │
//! │  │  └─────────────┘  │ │ │  └─────────────┘  │                   │
//! │  └───────────────────┘ │ └───────────────────┘                   │
//! └────────────────────────┼─────────────────────────────────────────┘
//!                          │ ChannelEvent                ┌───────────┐
//!          ShellConnector ─┴─▶ pump ─▶ relay ─┬─ push ──▶│ OutputSink│
//!                                             └─ buffer  └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use daemon::{Config, ListenerHub, SessionPool, SshConnector};
//! use protocol::{ConnectRequest, Credential, ShellTarget};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let hub = Arc::new(ListenerHub::new(config.pool.listener_capacity));
//!     let pool = Arc::new(SessionPool::new(&config, SshConnector::new(), hub));
//!     pool.start_reaper();
//!
//!     let info = pool
//!         .connect(
//!             "browser-1",
//!             ConnectRequest {
//!                 target: ShellTarget::new("example.com", "alice"),
//!                 credential: Credential::Password {
//!                     password: "secret".to_string(),
//!                 },
//!             },
//!         )
//!         .await?;
//!
//!     pool.send_input("browser-1", &info.session_id, "ls\n").await?;
//!     let output = pool.get_buffered_output("browser-1", &info.session_id)?;
//!     println!("{}", output.output);
//!
//!     pool.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: Session pool, groups, relay, and reaper
//! - [`transport`]: Connection-library boundary and SSH connector
//! - [`listeners`]: In-process real-time listener hub

pub mod config;
pub mod listeners;
pub mod session;
pub mod transport;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export session types for convenience
pub use session::{
    Delivery, DeliveryError, GroupId, IdleReaper, OutputSink, PoolError, PushError, Session,
    SessionGroup, SessionId, SessionPool, SweepReport,
};

// Re-export transport types for convenience
pub use transport::{
    AuthMethod, ChannelEvent, LinkControl, MemoryConnector, ShellConnector, ShellHandle,
    ShellOptions, SshConnector,
};

// Re-export listener types for convenience
pub use listeners::{ListenerHub, ListenerId, ListenerStats};
