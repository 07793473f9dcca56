//! The session pool.
//!
//! Groups are created lazily on the first successful connect and dropped by
//! the idle reaper once empty. Group creation and session insertion happen
//! under the group map's entry guard, and the reaper only removes a group
//! through `remove_if(is_empty)`, so a concurrent connect never lands in a
//! group that was just dropped.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use protocol::{BufferedOutput, ConnectRequest, SessionInfo};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::group::SessionGroup;
use super::reaper::{IdleReaper, SweepReport};
use super::relay::OutputSink;
use super::session::{spawn_pump, Session};
use super::{GroupId, PoolError};
use crate::config::{Config, PoolConfig, TerminalConfig};
use crate::transport::{AuthMethod, ShellConnector, ShellOptions};

/// Prefix of a line-mode command that stands for a control character.
const CONTROL_PREFIX: &str = "ctrl + ";

const SHUT_DOWN: &str = "session pool is shut down";

/// Pool of remote shell sessions keyed by group and session ID.
pub struct SessionPool<C: ShellConnector> {
    config: PoolConfig,
    terminal: TerminalConfig,
    connector: C,
    sink: Arc<dyn OutputSink>,
    groups: DashMap<GroupId, Arc<SessionGroup>>,
    reaper: IdleReaper,
    shutdown: CancellationToken,
}

impl<C: ShellConnector> SessionPool<C> {
    /// Creates an empty pool. The reaper is not started; see
    /// [`SessionPool::start_reaper`].
    pub fn new(config: &Config, connector: C, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            config: config.pool.clone(),
            terminal: config.terminal.clone(),
            connector,
            sink,
            groups: DashMap::new(),
            reaper: IdleReaper::new(config.pool.idle_timeout()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns the connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Opens a new session in `group_id`, creating the group if needed.
    ///
    /// Credential material is decoded before any connection attempt. On
    /// failure nothing is inserted and the group map is left untouched.
    pub async fn connect(
        &self,
        group_id: &str,
        request: ConnectRequest,
    ) -> Result<SessionInfo, PoolError> {
        if self.shutdown.is_cancelled() {
            return Err(PoolError::Connection(SHUT_DOWN.to_string()));
        }

        let ConnectRequest { target, credential } = request;
        let auth = AuthMethod::from_credential(&credential).inspect_err(|e| {
            tracing::warn!(group_id = %group_id, host = %target.host, error = %e, "Rejected credential");
        })?;

        let options = ShellOptions {
            terminal: self.terminal.clone(),
            connect_timeout: self.config.idle_timeout(),
        };
        let opened = tokio::time::timeout(
            options.connect_timeout,
            self.connector.open(&target, auth, &options),
        )
        .await
        .unwrap_or_else(|_| {
            Err(PoolError::Connection(format!(
                "timed out after {}s connecting to {}:{}",
                options.connect_timeout.as_secs(),
                target.host,
                target.port
            )))
        });

        let shell = match opened {
            Ok(shell) => shell,
            Err(e) => {
                tracing::warn!(
                    group_id = %group_id,
                    host = %target.host,
                    port = target.port,
                    error = %e,
                    "Failed to open shell"
                );
                return Err(e);
            }
        };

        let (session, events) = Session::new(group_id, target, shell, self.config.max_queue_count)?;
        let session = Arc::new(session);

        // Shutdown cancels before it clears the groups.
        let group = {
            let entry = self.groups.entry(group_id.to_string());
            if self.shutdown.is_cancelled() {
                session.release();
                tracing::info!(
                    group_id = %group_id,
                    session_id = %session.id(),
                    "Released shell opened during shutdown"
                );
                return Err(PoolError::Connection(SHUT_DOWN.to_string()));
            }
            let entry = entry.or_insert_with(|| Arc::new(SessionGroup::new(group_id)));
            entry.value().insert(Arc::clone(&session));
            Arc::clone(entry.value())
        };
        spawn_pump(&session, &group, Arc::clone(&self.sink), events);

        tracing::info!(
            group_id = %group_id,
            session_id = %session.id(),
            sessions = group.len(),
            "Created new session"
        );

        Ok(session.info())
    }

    /// Writes raw bytes to a session's channel, without any line-ending
    /// translation.
    pub async fn send_input(
        &self,
        group_id: &str,
        session_id: &str,
        data: impl Into<Vec<u8>>,
    ) -> Result<(), PoolError> {
        let session = self.session(group_id, session_id)?;
        session.send_input(data.into()).await
    }

    /// Writes a line-mode command.
    ///
    /// `"ctrl + <letter>"` sends the matching control character; anything
    /// else is sent followed by a carriage return.
    pub async fn run_command(
        &self,
        group_id: &str,
        session_id: &str,
        command: &str,
    ) -> Result<(), PoolError> {
        let session = self.session(group_id, session_id)?;
        session.send_input(command_bytes(command)).await
    }

    /// Drains buffered output, at most `max_lines_per_fetch` entries and
    /// roughly `max_output_length` bytes.
    pub fn get_buffered_output(
        &self,
        group_id: &str,
        session_id: &str,
    ) -> Result<BufferedOutput, PoolError> {
        let session = self.session(group_id, session_id)?;
        Ok(session.fetch_output(self.config.max_lines_per_fetch, self.config.max_output_length))
    }

    /// Probes the session's connection. A live connection counts as activity.
    pub fn is_connected(&self, group_id: &str, session_id: &str) -> Result<bool, PoolError> {
        let session = self.session(group_id, session_id)?;
        let connected = session.is_connected();
        if connected {
            session.touch();
        }
        Ok(connected)
    }

    /// Removes and releases a session.
    ///
    /// Unknown session IDs in an existing group are not an error.
    pub fn disconnect(&self, group_id: &str, session_id: &str) -> Result<bool, PoolError> {
        let group = self.group(group_id)?;
        if group.remove(session_id) {
            tracing::debug!(group_id = %group_id, session_id = %session_id, "Disconnected by request");
        }
        Ok(true)
    }

    /// Lists live sessions of a group, releasing the ones whose connection
    /// is gone. An unknown group yields an empty list.
    pub fn list_active_and_prune(&self, group_id: &str) -> Vec<SessionInfo> {
        let Some(group) = self.groups.get(group_id).map(|g| Arc::clone(g.value())) else {
            return Vec::new();
        };

        let mut active = Vec::new();
        for session in group.sessions() {
            if session.is_connected() {
                active.push(session.info());
            } else {
                group.remove(session.id());
            }
        }
        active
    }

    /// Attaches or detaches the real-time listener without draining.
    pub fn set_active_listener(
        &self,
        group_id: &str,
        session_id: &str,
        attached: bool,
    ) -> Result<(), PoolError> {
        let session = self.session(group_id, session_id)?;
        session.set_listener(attached);
        tracing::debug!(group_id = %group_id, session_id = %session_id, attached, "Listener state changed");
        Ok(())
    }

    /// Attaches a listener, returning everything buffered so far.
    ///
    /// Later output is pushed. Nothing is both returned here and pushed.
    pub fn attach_listener(
        &self,
        group_id: &str,
        session_id: &str,
    ) -> Result<BufferedOutput, PoolError> {
        let session = self.session(group_id, session_id)?;
        if !session.is_connected() {
            return Err(PoolError::ChannelClosed(format!(
                "session {} is not connected",
                session_id
            )));
        }
        Ok(session.attach_listener())
    }

    /// Detaches the listener; output is buffered again.
    pub fn detach_listener(&self, group_id: &str, session_id: &str) -> Result<(), PoolError> {
        self.set_active_listener(group_id, session_id, false)
    }

    /// Number of entries waiting in a session's buffer. Does not drain.
    pub fn buffered_count(&self, group_id: &str, session_id: &str) -> Result<usize, PoolError> {
        Ok(self.session(group_id, session_id)?.buffered_len())
    }

    /// Number of entries a session's buffer has evicted on overflow.
    pub fn dropped_count(&self, group_id: &str, session_id: &str) -> Result<u64, PoolError> {
        Ok(self.session(group_id, session_id)?.dropped_len())
    }

    /// Total sessions across all groups.
    pub fn session_count(&self) -> usize {
        self.groups.iter().map(|g| g.value().len()).sum()
    }

    /// Number of groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Runs one reaper sweep as of `now`.
    pub fn sweep_at(&self, now: Instant) -> SweepReport {
        self.reaper.sweep_at(self, now)
    }

    /// Starts the idle reaper. It stops on [`SessionPool::shutdown`] or when
    /// the pool is dropped.
    pub fn start_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        self.reaper
            .clone()
            .spawn(Arc::downgrade(self), self.shutdown.child_token())
    }

    /// Stops the reaper and releases every session. Later connects fail.
    pub fn shutdown(&self) {
        self.shutdown.cancel();

        let mut released = 0;
        for group in self.group_snapshot() {
            released += group.clear();
        }
        self.groups.clear();

        tracing::info!(released, "Session pool shut down");
    }

    /// Returns true once [`SessionPool::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Snapshot of the current groups.
    pub(crate) fn group_snapshot(&self) -> Vec<Arc<SessionGroup>> {
        self.groups
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Drops a group if it is still empty.
    pub(crate) fn remove_group_if_empty(&self, group_id: &str) -> bool {
        let removed = self
            .groups
            .remove_if(group_id, |_, group| group.is_empty())
            .is_some();
        if removed {
            tracing::info!(group_id = %group_id, "Removed empty group");
        }
        removed
    }

    fn group(&self, group_id: &str) -> Result<Arc<SessionGroup>, PoolError> {
        self.groups
            .get(group_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PoolError::group_not_found(group_id))
    }

    fn session(&self, group_id: &str, session_id: &str) -> Result<Arc<Session>, PoolError> {
        self.group(group_id)?
            .get(session_id)
            .ok_or_else(|| PoolError::session_not_found(group_id, session_id))
    }
}

impl<C: ShellConnector> Drop for SessionPool<C> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Translates a line-mode command to the bytes written to the channel.
pub fn command_bytes(command: &str) -> Vec<u8> {
    if let Some(rest) = command.strip_prefix(CONTROL_PREFIX) {
        if let [letter @ b'a'..=b'z'] = rest.to_ascii_lowercase().as_bytes() {
            return vec![letter - b'a' + 1];
        }
    }

    let mut bytes = Vec::with_capacity(command.len() + 1);
    bytes.extend_from_slice(command.as_bytes());
    bytes.push(b'\r');
    bytes
}
