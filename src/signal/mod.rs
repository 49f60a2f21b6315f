//! Forwards process-wide termination signals to one managed child.
//!
//! Each child gets its own registration, so several children can be managed
//! side by side without sharing a global listener.

use std::io;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::process::ProcessController;

/// Listener tied to one child. It ends after forwarding one notification,
/// when the child exits, or when the bridge is dropped.
///
/// Subscribing installs tokio's process-wide handler for SIGINT and SIGTERM
/// (console control events on Windows). The handler stays installed after the
/// last bridge is gone: from then on those signals are swallowed instead of
/// terminating the parent. Resetting the action to `SIG_DFL` behind tokio's
/// back would break its signal registry, so a parent that wants the default
/// behavior back has to listen for the signals and exit itself.
#[derive(Debug)]
pub struct SignalBridge {
    _release: oneshot::Sender<()>,
}

impl SignalBridge {
    /// Subscribes immediately; the returned bridge is already listening.
    pub fn register(controller: ProcessController) -> io::Result<Self> {
        let mut notifications = Notifications::subscribe()?;
        let (release, released) = oneshot::channel::<()>();

        tokio::spawn(async move {
            tokio::select! {
                name = notifications.recv() => {
                    info!(signal = name, pid = ?controller.pid(), "forwarding termination to child");
                    if let Err(err) = controller.terminate().await {
                        warn!(error = %err, "failed to terminate child after {name}");
                    }
                }
                _ = controller.exited() => {
                    debug!(pid = ?controller.pid(), "child exited, releasing signal bridge");
                }
                _ = released => {}
            }
        });

        Ok(Self { _release: release })
    }
}

#[cfg(unix)]
struct Notifications {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Notifications {
    fn subscribe() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

#[cfg(windows)]
struct Notifications {
    ctrl_c: tokio::signal::windows::CtrlC,
    ctrl_break: tokio::signal::windows::CtrlBreak,
    ctrl_close: tokio::signal::windows::CtrlClose,
}

#[cfg(windows)]
impl Notifications {
    fn subscribe() -> io::Result<Self> {
        use tokio::signal::windows::{ctrl_break, ctrl_c, ctrl_close};

        Ok(Self {
            ctrl_c: ctrl_c()?,
            ctrl_break: ctrl_break()?,
            ctrl_close: ctrl_close()?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.ctrl_c.recv() => "CTRL_C",
            _ = self.ctrl_break.recv() => "CTRL_BREAK",
            _ = self.ctrl_close.recv() => "CTRL_CLOSE",
        }
    }
}
