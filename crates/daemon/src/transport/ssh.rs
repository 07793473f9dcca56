//! SSH connector built on `russh`.
//!
//! Each opened shell gets one driver task that owns the `russh` session and
//! channel. It forwards channel data to the pool as [`ChannelEvent`]s and
//! writes pool input to the channel, until either side goes away.

use std::sync::Arc;
use std::time::Duration;

use protocol::ShellTarget;
use russh::client::{self, Handle, Msg};
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey};
use russh::{Channel, ChannelMsg, Disconnect};

use super::{AuthMethod, ChannelEvent, ShellConnector, ShellEndpoint, ShellHandle, ShellOptions, WriteRequest};
use crate::session::PoolError;

/// Interval between SSH keepalive requests.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Opens interactive shells over SSH.
#[derive(Debug, Clone)]
pub struct SshConnector {
    keepalive_interval: Duration,
}

impl SshConnector {
    /// Creates a connector with the default keepalive interval.
    pub fn new() -> Self {
        Self {
            keepalive_interval: KEEPALIVE_INTERVAL,
        }
    }

    /// Overrides the keepalive interval.
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

/// Host key policy: accept anything unless a fingerprint was pinned.
struct HostKeyCheck {
    host: String,
    expected: Option<String>,
}

impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let Some(expected) = self.expected.as_deref() else {
            return Ok(true);
        };

        let actual = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        if fingerprints_match(expected, &actual) {
            Ok(true)
        } else {
            tracing::warn!(
                host = %self.host,
                expected = %expected,
                actual = %actual,
                "Server host key does not match pinned fingerprint"
            );
            Ok(false)
        }
    }
}

/// Compares fingerprints, tolerating a missing `SHA256:` prefix and
/// trailing base64 padding on the pinned value.
fn fingerprints_match(expected: &str, actual: &str) -> bool {
    let normalize = |s: &str| {
        let s = s.trim();
        let s = s.strip_prefix("SHA256:").unwrap_or(s);
        s.trim_end_matches('=').to_string()
    };
    normalize(expected) == normalize(actual)
}

impl ShellConnector for SshConnector {
    async fn open(
        &self,
        target: &ShellTarget,
        auth: AuthMethod,
        options: &ShellOptions,
    ) -> Result<ShellHandle, PoolError> {
        let config = Arc::new(client::Config {
            keepalive_interval: Some(self.keepalive_interval),
            ..Default::default()
        });
        let handler = HostKeyCheck {
            host: target.host.clone(),
            expected: target.fingerprint.clone(),
        };

        let mut session = client::connect(config, (target.host.as_str(), target.port), handler)
            .await
            .map_err(|e| PoolError::Connection(e.to_string()))?;

        let channel = match open_shell(&mut session, target, auth, options).await {
            Ok(channel) => channel,
            Err(e) => {
                // Release the half-built connection before reporting.
                let _ = session
                    .disconnect(Disconnect::ByApplication, "", "en")
                    .await;
                return Err(e);
            }
        };

        let (handle, endpoint) = ShellHandle::pair();
        tokio::spawn(drive(session, channel, endpoint));

        tracing::debug!(
            host = %target.host,
            port = target.port,
            username = %target.username,
            "Opened SSH shell channel"
        );

        Ok(handle)
    }
}

/// Authenticates and opens an interactive shell channel.
async fn open_shell(
    session: &mut Handle<HostKeyCheck>,
    target: &ShellTarget,
    auth: AuthMethod,
    options: &ShellOptions,
) -> Result<Channel<Msg>, PoolError> {
    let method = auth.method_name();
    let result = match auth {
        AuthMethod::Password(password) => {
            session
                .authenticate_password(target.username.clone(), password)
                .await
        }
        AuthMethod::PublicKey(key) => {
            let hash_alg = session
                .best_supported_rsa_hash()
                .await
                .map_err(|e| PoolError::Connection(e.to_string()))?
                .flatten();
            session
                .authenticate_publickey(
                    target.username.clone(),
                    PrivateKeyWithHashAlg::new(key, hash_alg),
                )
                .await
        }
    }
    .map_err(|e| PoolError::Connection(e.to_string()))?;

    if !result.success() {
        return Err(PoolError::Connection(format!(
            "{} authentication rejected for {}@{}",
            method, target.username, target.host
        )));
    }

    let channel = session
        .channel_open_session()
        .await
        .map_err(|e| PoolError::Connection(e.to_string()))?;

    let terminal = &options.terminal;
    channel
        .request_pty(
            false,
            &terminal.terminal_type,
            terminal.cols,
            terminal.rows,
            terminal.width_px,
            terminal.height_px,
            &[],
        )
        .await
        .map_err(|e| PoolError::Connection(e.to_string()))?;
    channel
        .request_shell(false)
        .await
        .map_err(|e| PoolError::Connection(e.to_string()))?;

    Ok(channel)
}

/// Pumps bytes between the SSH channel and the pool until either side ends.
async fn drive(session: Handle<HostKeyCheck>, mut channel: Channel<Msg>, mut endpoint: ShellEndpoint) {
    let released = endpoint.release_token();

    let failure = loop {
        tokio::select! {
            _ = released.cancelled() => break None,
            request = endpoint.input.recv() => match request {
                Some(WriteRequest { data, ack }) => match channel.data(&data[..]).await {
                    Ok(()) => {
                        let _ = ack.send(Ok(()));
                    }
                    Err(e) => {
                        let message = e.to_string();
                        let _ = ack.send(Err(message.clone()));
                        break Some(message);
                    }
                },
                None => break None,
            },
            message = channel.wait() => match message {
                Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                    if !endpoint.emit(ChannelEvent::Data(data.to_vec())).await {
                        break None;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    tracing::debug!(exit_status, "Remote shell exited");
                }
                Some(ChannelMsg::Close) | None => break None,
                Some(_) => {}
            },
        }
    };

    endpoint.mark_disconnected();
    if !endpoint.is_released() {
        if let Some(message) = failure {
            let _ = endpoint.emit(ChannelEvent::Error(message)).await;
        }
        let _ = endpoint.emit(ChannelEvent::Closed).await;
    }

    let _ = channel.close().await;
    if let Err(e) = session
        .disconnect(Disconnect::ByApplication, "", "en")
        .await
    {
        tracing::trace!(error = %e, "SSH disconnect after channel end");
    }
}
