//! A single pooled remote shell.
//!
//! A session owns its [`ShellHandle`] exclusively and keeps the output that
//! no listener has taken yet. Output arrives through a pump task that reads
//! the handle's event channel, decodes it, and hands it to the relay.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use protocol::{listener_destination, BufferedOutput, SessionInfo, SessionStatus, ShellTarget};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::group::SessionGroup;
use super::relay::{relay, Delivery, OutputSink, OutputState, Utf8Decoder};
use super::{GroupId, PoolError, SessionId};
use crate::transport::{ChannelEvent, ShellHandle};

/// Locks a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One live remote shell plus its undelivered output.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    group_id: GroupId,
    target: ShellTarget,
    started_at_ms: u64,
    shell: ShellHandle,
    output: Mutex<OutputState>,
    last_access: Mutex<Instant>,
}

impl Session {
    /// Wraps an open shell.
    ///
    /// Returns the session and the receiver its pump task must consume.
    pub fn new(
        group_id: &str,
        target: ShellTarget,
        mut shell: ShellHandle,
        buffer_capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<ChannelEvent>), PoolError> {
        let events = shell
            .take_events()
            .ok_or_else(|| PoolError::Connection("shell events already taken".to_string()))?;

        let session = Session {
            id: Uuid::new_v4().to_string(),
            group_id: group_id.to_string(),
            target,
            started_at_ms: unix_millis(),
            shell,
            output: Mutex::new(OutputState::new(buffer_capacity)),
            last_access: Mutex::new(Instant::now()),
        };
        Ok((session, events))
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the ID of the owning group.
    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    /// Real-time destination of this session's output.
    pub fn destination(&self) -> String {
        listener_destination(&self.group_id, &self.id)
    }

    /// Live-connection probe. Does not count as activity.
    pub fn is_connected(&self) -> bool {
        self.shell.is_connected()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> SessionStatus {
        if self.is_connected() {
            SessionStatus::Connected
        } else {
            SessionStatus::Disconnected
        }
    }

    /// Records activity now.
    pub fn touch(&self) {
        *lock(&self.last_access) = Instant::now();
    }

    /// Time of the last input or successful liveness check.
    pub fn last_access(&self) -> Instant {
        *lock(&self.last_access)
    }

    /// Returns true if the session has been idle longer than `max_idle` at
    /// `now`, or its connection is gone.
    pub fn is_expired(&self, now: Instant, max_idle: Duration) -> bool {
        !self.is_connected() || now.saturating_duration_since(self.last_access()) > max_idle
    }

    /// Writes raw bytes to the shell channel.
    pub async fn send_input(&self, data: Vec<u8>) -> Result<(), PoolError> {
        self.touch();
        self.shell.write(data).await
    }

    /// Drains buffered output, bounded by entry count and text length.
    pub fn fetch_output(&self, max_entries: usize, max_bytes: usize) -> BufferedOutput {
        lock(&self.output).buffer.drain(max_entries, max_bytes)
    }

    /// Flips the listener flag without draining.
    pub fn set_listener(&self, attached: bool) {
        lock(&self.output).listener_attached = attached;
    }

    /// Returns true while a real-time listener is attached.
    pub fn has_listener(&self) -> bool {
        lock(&self.output).listener_attached
    }

    /// Drains the whole buffer and attaches a listener in one step, so the
    /// returned history and subsequent pushes neither overlap nor leave a gap.
    pub fn attach_listener(&self) -> BufferedOutput {
        let mut output = lock(&self.output);
        let history = output.buffer.drain_all();
        output.listener_attached = true;
        history
    }

    /// Number of buffered entries.
    pub fn buffered_len(&self) -> usize {
        lock(&self.output).buffer.len()
    }

    /// Number of entries evicted by buffer overflow.
    pub fn dropped_len(&self) -> u64 {
        lock(&self.output).buffer.dropped()
    }

    /// Delivers one decoded chunk through the relay.
    pub fn deliver(&self, sink: &dyn OutputSink, chunk: String) -> Delivery {
        let destination = self.destination();
        let mut output = lock(&self.output);
        relay(&mut output, sink, &destination, chunk)
    }

    /// Public metadata. Never includes credential material.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            display_name: self.target.display_name.clone(),
            host: self.target.host.clone(),
            port: self.target.port,
            username: self.target.username.clone(),
            started_at_ms: self.started_at_ms,
            status: self.status().to_string(),
        }
    }

    /// Closes the channel and connection.
    pub fn release(&self) {
        self.shell.release();
    }
}

/// Spawns the task that moves channel events into the session.
///
/// The task holds only weak references, so a removed session is dropped
/// right away and the task ends when its event channel closes.
pub fn spawn_pump(
    session: &Arc<Session>,
    group: &Arc<SessionGroup>,
    sink: Arc<dyn OutputSink>,
    events: mpsc::Receiver<ChannelEvent>,
) -> tokio::task::JoinHandle<()> {
    let session = Arc::downgrade(session);
    let group = Arc::downgrade(group);
    tokio::spawn(pump(session, group, sink, events))
}

async fn pump(
    session: Weak<Session>,
    group: Weak<SessionGroup>,
    sink: Arc<dyn OutputSink>,
    mut events: mpsc::Receiver<ChannelEvent>,
) {
    let mut decoder = Utf8Decoder::new();
    let mut degraded = false;

    while let Some(event) = events.recv().await {
        let Some(current) = session.upgrade() else {
            break;
        };

        match event {
            ChannelEvent::Data(bytes) => {
                let text = decoder.decode(&bytes);
                if text.is_empty() {
                    continue;
                }
                match current.deliver(sink.as_ref(), text) {
                    Delivery::Degraded(e) if !degraded => {
                        degraded = true;
                        tracing::debug!(
                            session_id = %current.id(),
                            group_id = %current.group_id(),
                            error = %e,
                            "Push failed, buffering output"
                        );
                    }
                    Delivery::Pushed => degraded = false,
                    _ => {}
                }
            }
            ChannelEvent::Error(message) => {
                tracing::warn!(
                    session_id = %current.id(),
                    group_id = %current.group_id(),
                    error = %message,
                    "Shell connection reported an error"
                );
                flush_decoder(&current, sink.as_ref(), &mut decoder);
                current.deliver(sink.as_ref(), diagnostic(&message));
                remove_from_group(&group, &current);
                break;
            }
            ChannelEvent::Closed => {
                tracing::info!(
                    session_id = %current.id(),
                    group_id = %current.group_id(),
                    "Shell channel closed by remote"
                );
                flush_decoder(&current, sink.as_ref(), &mut decoder);
                remove_from_group(&group, &current);
                break;
            }
        }
    }
}

fn flush_decoder(session: &Session, sink: &dyn OutputSink, decoder: &mut Utf8Decoder) {
    let rest = decoder.finish();
    if !rest.is_empty() {
        session.deliver(sink, rest);
    }
}

fn remove_from_group(group: &Weak<SessionGroup>, session: &Session) {
    if let Some(group) = group.upgrade() {
        group.remove(session.id());
    } else {
        session.release();
    }
}

/// Synthetic chunk reporting a connection failure to whoever reads next.
fn diagnostic(message: &str) -> String {
    format!("\r\n[connection error: {}]\r\n", message)
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
