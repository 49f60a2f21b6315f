//! Per-child supervisor task.
//!
//! The task is the only owner of the [`Child`]. Signal delivery, forced kills
//! and reaping all happen inside it, so a signal can never reach a pid that was
//! already reaped and the exit status is published exactly once.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use super::{ExitOutcome, TerminationOutcome};
use crate::error::{ProcessError, Result};

type Ack = oneshot::Sender<io::Result<()>>;

enum Control {
    Graceful(Ack),
    Kill(Ack),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExitRecord {
    outcome: ExitOutcome,
    forced: bool,
}

type ExitSlot = Option<std::result::Result<ExitRecord, Arc<io::Error>>>;

#[derive(Debug)]
struct Shared {
    pid: Option<u32>,
    control: mpsc::UnboundedSender<Control>,
    exit: watch::Receiver<ExitSlot>,
    terminate_timeout: Duration,
}

/// Cloneable control side of a running child.
#[derive(Debug, Clone)]
pub struct ProcessController {
    inner: Arc<Shared>,
}

impl ProcessController {
    /// Hands `child` to a new supervisor task.
    pub(crate) fn start(child: Child, terminate_timeout: Duration) -> Self {
        let pid = child.id();
        let (control, requests) = mpsc::unbounded_channel();
        let (exit_tx, exit) = watch::channel(None);
        tokio::spawn(supervise(child, requests, exit_tx));
        Self {
            inner: Arc::new(Shared {
                pid,
                control,
                exit,
                terminate_timeout,
            }),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    pub fn has_exited(&self) -> bool {
        self.inner.exit.borrow().is_some()
    }

    /// Resolves once the child has been reaped.
    pub async fn exited(&self) {
        let mut exit = self.inner.exit.clone();
        let _ = exit.wait_for(Option::is_some).await;
    }

    pub async fn wait(&self) -> Result<ExitOutcome> {
        Ok(self.exit_record().await?.outcome)
    }

    /// Graceful stop, then a forced kill if the child outlives the timeout.
    pub async fn terminate(&self) -> Result<TerminationOutcome> {
        if self.has_exited() {
            return self.finished().await;
        }

        match self.request(Control::Graceful).await {
            None | Some(Ok(())) => {}
            Some(Err(err)) if cfg!(windows) => {
                // A child without a console cannot receive CTRL_BREAK.
                warn!(pid = ?self.pid(), error = %err, "graceful stop unavailable, killing");
                return self.force_kill().await;
            }
            Some(Err(err)) => return Err(ProcessError::terminate("send graceful stop", err)),
        }

        let timeout = self.inner.terminate_timeout;
        match tokio::time::timeout(timeout, self.exited()).await {
            Ok(()) => self.finished().await,
            Err(_) => {
                warn!(pid = ?self.pid(), ?timeout, "child ignored graceful stop, killing");
                self.force_kill().await
            }
        }
    }

    async fn force_kill(&self) -> Result<TerminationOutcome> {
        if let Some(Err(err)) = self.request(Control::Kill).await {
            return Err(ProcessError::terminate("force kill", err));
        }
        self.finished().await
    }

    async fn finished(&self) -> Result<TerminationOutcome> {
        let record = self.exit_record().await?;
        Ok(TerminationOutcome::Finished {
            outcome: record.outcome,
            forced: record.forced,
        })
    }

    /// `None` when the supervisor is gone, which means the child was reaped.
    async fn request(&self, make: fn(Ack) -> Control) -> Option<io::Result<()>> {
        let (ack, reply) = oneshot::channel();
        self.inner.control.send(make(ack)).ok()?;
        reply.await.ok()
    }

    async fn exit_record(&self) -> Result<ExitRecord> {
        let mut exit = self.inner.exit.clone();
        let slot = exit
            .wait_for(Option::is_some)
            .await
            .map(|slot| slot.clone())
            .ok()
            .flatten();
        match slot {
            Some(Ok(record)) => Ok(record),
            Some(Err(err)) => Err(ProcessError::wait(
                "reap child",
                io::Error::new(err.kind(), err.to_string()),
            )),
            None => Err(ProcessError::wait(
                "supervisor",
                io::Error::other("supervisor stopped without an exit status"),
            )),
        }
    }
}

async fn supervise(
    mut child: Child,
    mut requests: mpsc::UnboundedReceiver<Control>,
    exit: watch::Sender<ExitSlot>,
) {
    let pid = child.id();
    let mut forced = false;
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(request) = requests.recv() => match request {
                Control::Graceful(ack) => {
                    let _ = ack.send(graceful_stop(&child));
                }
                Control::Kill(ack) => {
                    forced = true;
                    let _ = ack.send(child.start_kill());
                }
            },
        }
    };

    let record = status
        .map(|status| ExitRecord {
            outcome: classify(status, forced),
            forced,
        })
        .map_err(Arc::new);
    match &record {
        Ok(record) => debug!(pid = ?pid, outcome = ?record.outcome, forced, "child reaped"),
        Err(err) => warn!(error = %err, "waiting on child failed"),
    }
    let _ = exit.send(Some(record));
}

#[cfg(unix)]
fn graceful_stop(child: &Child) -> io::Result<()> {
    let pid = child
        .id()
        .and_then(|pid| i32::try_from(pid).ok())
        .ok_or_else(|| io::Error::other("child has no pid"))?;
    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(windows)]
fn graceful_stop(child: &Child) -> io::Result<()> {
    use windows_sys::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};

    let pid = child.id().ok_or_else(|| io::Error::other("child has no pid"))?;
    if unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) } == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Death by signal is `KilledBySignal`; any exit code is `Exited`.
#[cfg(unix)]
fn classify(status: std::process::ExitStatus, _forced: bool) -> ExitOutcome {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => ExitOutcome::Exited(code),
        (None, signal) => ExitOutcome::KilledBySignal { signal },
    }
}

/// `TerminateProcess` leaves exit code 1, which a program can also return on
/// its own. Only a kill issued by this supervisor counts as `KilledBySignal`.
#[cfg(windows)]
fn classify(status: std::process::ExitStatus, forced: bool) -> ExitOutcome {
    match status.code() {
        Some(1) if forced => ExitOutcome::KilledBySignal { signal: None },
        Some(code) => ExitOutcome::Exited(code),
        None => ExitOutcome::KilledBySignal { signal: None },
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::Instant;
    use tokio::process::Command;

    fn sh(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn wait_reports_exit_code() {
        let controller = ProcessController::start(sh("exit 7"), Duration::from_secs(5));
        assert_eq!(controller.wait().await.unwrap(), ExitOutcome::Exited(7));
        assert!(controller.has_exited());
    }

    #[tokio::test]
    async fn stubborn_child_is_killed_after_timeout() {
        let controller = ProcessController::start(
            sh("trap '' TERM; while :; do sleep 0.05; done"),
            Duration::from_millis(300),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        let outcome = controller.terminate().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(
            outcome,
            TerminationOutcome::Finished {
                outcome: ExitOutcome::KilledBySignal {
                    signal: Some(libc::SIGKILL)
                },
                forced: true,
            }
        );
    }

    #[tokio::test]
    async fn concurrent_wait_and_terminate_agree() {
        let controller = ProcessController::start(sh("sleep 30"), Duration::from_secs(5));
        let (waited, terminated) = tokio::join!(controller.wait(), controller.terminate());
        let waited = waited.unwrap();
        assert_eq!(
            terminated.unwrap(),
            TerminationOutcome::Finished {
                outcome: waited,
                forced: false
            }
        );
        assert_eq!(
            waited,
            ExitOutcome::KilledBySignal {
                signal: Some(libc::SIGTERM)
            }
        );
    }
}
