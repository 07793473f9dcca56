//! In-process connector with a scriptable fake shell.
//!
//! Every opened shell is driven by a task that acknowledges writes, records
//! them, optionally echoes them back, and obeys a [`LinkControl`] so callers
//! can inject output, errors, and connection loss.

use std::sync::{Arc, Mutex};

use protocol::ShellTarget;
use tokio::sync::mpsc;

use super::{AuthMethod, ChannelEvent, ShellConnector, ShellEndpoint, ShellHandle, ShellOptions};
use crate::session::{lock, PoolError};

/// Command sent to a fake shell's driver.
#[derive(Debug)]
enum Control {
    Output(Vec<u8>),
    Fail(String),
    Close,
    Silence,
}

/// Remote control of one opened fake shell.
#[derive(Debug, Clone)]
pub struct LinkControl {
    target: ShellTarget,
    control: mpsc::UnboundedSender<Control>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl LinkControl {
    /// Target the shell was opened for.
    pub fn target(&self) -> &ShellTarget {
        &self.target
    }

    /// Makes the shell produce output.
    pub fn output(&self, data: impl AsRef<[u8]>) {
        let _ = self.control.send(Control::Output(data.as_ref().to_vec()));
    }

    /// Reports a connection error, then ends the shell.
    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.control.send(Control::Fail(message.into()));
    }

    /// Closes the shell from the remote side.
    pub fn close(&self) {
        let _ = self.control.send(Control::Close);
    }

    /// Drops the connection without reporting it.
    pub fn go_silent(&self) {
        let _ = self.control.send(Control::Silence);
    }

    /// Every byte written to the shell so far.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.written).clone()
    }
}

#[derive(Debug, Default)]
struct Inner {
    links: Mutex<Vec<LinkControl>>,
    fail_next: Mutex<Option<PoolError>>,
}

/// Connector that opens fake in-process shells.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    echo: bool,
    inner: Arc<Inner>,
}

impl MemoryConnector {
    /// Creates a connector whose shells stay silent unless told otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connector whose shells echo every write back as output.
    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    /// Makes the next `open` fail with `error`.
    pub fn fail_next(&self, error: PoolError) {
        *lock(&self.inner.fail_next) = Some(error);
    }

    /// Number of shells opened so far.
    pub fn opened(&self) -> usize {
        lock(&self.inner.links).len()
    }

    /// Control of the `index`-th opened shell.
    pub fn link(&self, index: usize) -> Option<LinkControl> {
        lock(&self.inner.links).get(index).cloned()
    }

    /// Control of the most recently opened shell.
    pub fn last_link(&self) -> Option<LinkControl> {
        lock(&self.inner.links).last().cloned()
    }
}

impl ShellConnector for MemoryConnector {
    async fn open(
        &self,
        target: &ShellTarget,
        _auth: AuthMethod,
        _options: &ShellOptions,
    ) -> Result<ShellHandle, PoolError> {
        if let Some(error) = lock(&self.inner.fail_next).take() {
            return Err(error);
        }

        let (handle, endpoint) = ShellHandle::pair();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let written = Arc::new(Mutex::new(Vec::new()));

        lock(&self.inner.links).push(LinkControl {
            target: target.clone(),
            control: control_tx,
            written: Arc::clone(&written),
        });

        tokio::spawn(drive(endpoint, control_rx, written, self.echo));
        Ok(handle)
    }
}

async fn drive(
    mut endpoint: ShellEndpoint,
    mut control: mpsc::UnboundedReceiver<Control>,
    written: Arc<Mutex<Vec<u8>>>,
    echo: bool,
) {
    let released = endpoint.release_token();

    loop {
        tokio::select! {
            _ = released.cancelled() => break,
            request = endpoint.input.recv() => {
                let Some(request) = request else { break };
                lock(&written).extend_from_slice(&request.data);
                let _ = request.ack.send(Ok(()));
                if echo && !endpoint.emit(ChannelEvent::Data(request.data)).await {
                    break;
                }
            }
            command = control.recv() => match command {
                Some(Control::Output(data)) => {
                    if !endpoint.emit(ChannelEvent::Data(data)).await {
                        break;
                    }
                }
                Some(Control::Fail(message)) => {
                    endpoint.mark_disconnected();
                    let _ = endpoint.emit(ChannelEvent::Error(message)).await;
                    break;
                }
                Some(Control::Close) => {
                    endpoint.mark_disconnected();
                    let _ = endpoint.emit(ChannelEvent::Closed).await;
                    break;
                }
                Some(Control::Silence) => {
                    endpoint.mark_disconnected();
                    break;
                }
                None => break,
            },
        }
    }

    endpoint.mark_disconnected();
}
