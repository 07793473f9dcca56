//! Boundary to the remote-shell connection library.
//!
//! The pool never talks to the library directly. A [`ShellConnector`] opens a
//! connection plus an interactive shell channel and hands back a
//! [`ShellHandle`], which is a pair of message channels:
//!
//! ```text
//!   pool side (ShellHandle)                 driver side (ShellEndpoint)
//!   ───────────────────────                 ───────────────────────────
//!   write(data) ── WriteRequest + ack ────▶ input.recv()  → channel write
//!   events.recv() ◀── ChannelEvent ──────── emit(..)      ← data callback
//!   release()  ──── CancellationToken ────▶ released()    → close connection
//! ```
//!
//! The driver owns the real connection and channel. Nothing on the pool side
//! blocks on it except for the write acknowledgement.

pub mod credential;
pub mod memory;
pub mod ssh;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use protocol::ShellTarget;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::TerminalConfig;
use crate::session::PoolError;

pub use credential::AuthMethod;
pub use memory::{LinkControl, MemoryConnector};
pub use ssh::SshConnector;

/// Capacity of the event channel between a driver and its session.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the write request channel.
const INPUT_CHANNEL_CAPACITY: usize = 64;

/// Something the shell channel reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Raw bytes arrived on the channel.
    Data(Vec<u8>),
    /// The connection reported an error. The session is torn down after it.
    Error(String),
    /// The remote side closed the channel or the connection.
    Closed,
}

/// Raw bytes to write to the channel, acknowledged once written.
#[derive(Debug)]
pub struct WriteRequest {
    /// Bytes to write verbatim.
    pub data: Vec<u8>,
    /// Completion of the write.
    pub ack: oneshot::Sender<Result<(), String>>,
}

/// Shell channel parameters passed to the connector.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellOptions {
    /// Terminal type and initial geometry.
    pub terminal: TerminalConfig,
    /// Upper bound for establishing the connection.
    pub connect_timeout: Duration,
}

/// Liveness shared between a handle and its driver.
#[derive(Debug)]
struct LinkState {
    connected: AtomicBool,
    release: CancellationToken,
}

/// Pool side of an open shell.
#[derive(Debug)]
pub struct ShellHandle {
    input: mpsc::Sender<WriteRequest>,
    events: Option<mpsc::Receiver<ChannelEvent>>,
    link: Arc<LinkState>,
}

/// Driver side of an open shell.
#[derive(Debug)]
pub struct ShellEndpoint {
    /// Write requests from the pool.
    pub input: mpsc::Receiver<WriteRequest>,
    events: mpsc::Sender<ChannelEvent>,
    link: Arc<LinkState>,
}

impl ShellHandle {
    /// Creates a connected handle/endpoint pair.
    pub fn pair() -> (ShellHandle, ShellEndpoint) {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let link = Arc::new(LinkState {
            connected: AtomicBool::new(true),
            release: CancellationToken::new(),
        });

        let handle = ShellHandle {
            input: input_tx,
            events: Some(events_rx),
            link: Arc::clone(&link),
        };
        let endpoint = ShellEndpoint {
            input: input_rx,
            events: events_tx,
            link,
        };
        (handle, endpoint)
    }

    /// Live-connection probe.
    pub fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst) && !self.link.release.is_cancelled()
    }

    /// Takes the event receiver. Only the first call returns it.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ChannelEvent>> {
        self.events.take()
    }

    /// Writes raw bytes and waits for the driver to acknowledge them.
    pub async fn write(&self, data: Vec<u8>) -> Result<(), PoolError> {
        if !self.is_connected() {
            return Err(PoolError::ChannelClosed("connection is not live".to_string()));
        }

        let (ack, done) = oneshot::channel();
        self.input
            .send(WriteRequest { data, ack })
            .await
            .map_err(|_| PoolError::ChannelClosed("shell channel has ended".to_string()))?;

        done.await
            .map_err(|_| PoolError::ChannelClosed("write was dropped".to_string()))?
            .map_err(PoolError::ChannelClosed)
    }

    /// Asks the driver to close the channel and connection.
    pub fn release(&self) {
        self.link.connected.store(false, Ordering::SeqCst);
        self.link.release.cancel();
    }
}

impl Drop for ShellHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl ShellEndpoint {
    /// Delivers an event to the session.
    ///
    /// Returns false once the session side is gone.
    pub async fn emit(&self, event: ChannelEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Marks the connection as no longer live.
    pub fn mark_disconnected(&self) {
        self.link.connected.store(false, Ordering::SeqCst);
    }

    /// Returns true once the pool has released the session.
    pub fn is_released(&self) -> bool {
        self.link.release.is_cancelled()
    }

    /// Completes when the pool releases the session.
    pub async fn released(&self) {
        self.link.release.cancelled().await
    }

    /// Token cancelled when the pool releases the session.
    pub fn release_token(&self) -> CancellationToken {
        self.link.release.clone()
    }
}

/// Opens remote shells.
///
/// Implementations establish the connection, authenticate, open an
/// interactive shell channel with the given geometry, and spawn whatever
/// drives the returned [`ShellEndpoint`].
pub trait ShellConnector: Send + Sync + 'static {
    /// Opens a connection and shell channel for `target`.
    fn open(
        &self,
        target: &ShellTarget,
        auth: AuthMethod,
        options: &ShellOptions,
    ) -> impl Future<Output = Result<ShellHandle, PoolError>> + Send;
}
