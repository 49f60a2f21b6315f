//! Interpreter process management (startup/IO/lifecycle).

use std::collections::HashMap;
use std::io::{self, PipeWriter, Write};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use crate::bootstrap::{self, BootstrapInput, Prepared};
use crate::error::{ProcessError, Result};
use crate::signal::SignalBridge;
use crate::transport::{DescriptorTransport, ExtraChannel, PlatformTransport};

pub mod python;
mod run;
mod supervisor;

pub use run::{
    read_combined, read_command_stdout, read_stdout, run_script_file, script_from_file,
    CapturedOutput,
};
pub use supervisor::ProcessController;

pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The child exited on its own with this code.
    Exited(i32),
    /// The child was forcibly terminated. `signal` is known on POSIX only.
    KilledBySignal { signal: Option<i32> },
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Exited(0))
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitOutcome::Exited(code) => Some(*code),
            ExitOutcome::KilledBySignal { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// There was no process to stop.
    NotStarted,
    /// The child is gone. `forced` is set when the graceful stop timed out and
    /// the child had to be killed.
    ///
    /// On Windows `forced: true` is the usual result: a child spawned without
    /// a console cannot receive CTRL_BREAK, so termination goes straight to
    /// `TerminateProcess`.
    Finished { outcome: ExitOutcome, forced: bool },
}

/// Everything needed to launch one child.
#[derive(Debug)]
pub struct SpawnRequest {
    pub executable: PathBuf,
    pub input: BootstrapInput,
    /// Passed through verbatim to the child program.
    pub args: Vec<String>,
    /// Merged on top of the inherited environment.
    pub env: HashMap<String, String>,
    /// Appended after the bootstrap channels.
    pub extra_channels: Vec<ExtraChannel>,
    pub terminate_timeout: Duration,
}

impl SpawnRequest {
    pub fn new(executable: impl Into<PathBuf>, input: BootstrapInput) -> Self {
        Self {
            executable: executable.into(),
            input,
            args: Vec::new(),
            env: HashMap::new(),
            extra_channels: Vec::new(),
            terminate_timeout: DEFAULT_TERMINATE_TIMEOUT,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: HashMap<String, String>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn extra_channel(mut self, channel: impl Into<ExtraChannel>) -> Self {
        self.extra_channels.push(channel.into());
        self
    }

    pub fn terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }
}

/// A running child with its standard streams.
///
/// The streams are handed out by taking them; dropping the handle closes
/// whatever was not taken. The child keeps being supervised (and reaped) even
/// after the handle is dropped.
pub struct ChildProcessHandle {
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
    /// Child-visible identifiers of every extra channel, bootstrap ones first.
    pub channel_ids: Vec<String>,
    controller: Option<ProcessController>,
    writers: Vec<JoinHandle<Result<()>>>,
    _signals: Option<SignalBridge>,
}

impl ChildProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.controller.as_ref().and_then(ProcessController::pid)
    }

    /// A cloneable control side, for waiting or terminating from other tasks.
    pub fn controller(&self) -> Option<ProcessController> {
        self.controller.clone()
    }

    /// Blocks until the child exits.
    pub async fn wait(&self) -> Result<ExitOutcome> {
        match &self.controller {
            Some(controller) => controller.wait().await,
            None => Err(ProcessError::NotStarted),
        }
    }

    /// Graceful stop with escalation to a kill. Safe to repeat and to run
    /// alongside [`wait`](Self::wait).
    pub async fn terminate(&self) -> Result<TerminationOutcome> {
        match &self.controller {
            Some(controller) => controller.terminate().await,
            None => Ok(TerminationOutcome::NotStarted),
        }
    }

    /// Waits for the bootstrap writers and reports the first write failure.
    pub async fn bootstrap_finished(&mut self) -> Result<()> {
        let mut first_error = None;
        for writer in self.writers.drain(..) {
            let outcome = match writer.await {
                Ok(outcome) => outcome,
                Err(err) => Err(ProcessError::bootstrap_write(
                    "writer task",
                    io::Error::other(err.to_string()),
                )),
            };
            if let Err(err) = outcome {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Launches `request.executable` with the bootstrap wired in.
///
/// Returns as soon as the OS process exists; the bootstrap payloads are
/// written in the background.
pub async fn spawn(request: SpawnRequest) -> Result<ChildProcessHandle> {
    spawn_with(request, &PlatformTransport::default())
}

fn spawn_with(request: SpawnRequest, transport: &dyn DescriptorTransport) -> Result<ChildProcessHandle> {
    let SpawnRequest {
        executable,
        input,
        args,
        env,
        extra_channels,
        terminate_timeout,
    } = request;

    let executable = python::resolve_executable(&executable).map_err(|e| {
        ProcessError::spawn(format!("locate interpreter {}", executable.display()), e)
    })?;
    let prepared = Prepared::from_input(input)?;

    let mut readers = Vec::with_capacity(prepared.channel_count() + extra_channels.len());
    let mut writers = Vec::with_capacity(prepared.channel_count());
    for _ in 0..prepared.channel_count() {
        let (reader, writer) =
            io::pipe().map_err(|e| ProcessError::spawn("create bootstrap pipe", e))?;
        readers.push(ExtraChannel::from(reader));
        writers.push(writer);
    }
    readers.extend(extra_channels);

    let mut cmd = Command::new(&executable);
    let wired = transport.wire(&mut cmd, readers)?;
    let stages = prepared.into_stages(&wired.ids);

    cmd.args(python::interpreter_args(&stages.primary))
        .args(bootstrap::startup_args(&wired.ids, &args))
        .envs(&env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| ProcessError::spawn(format!("launch {}", executable.display()), e))?;
    drop(cmd);
    let channel_ids = wired.ids.clone();
    wired.release();

    let (stdin, stdout, stderr) = match take_stdio(&mut child) {
        Ok(stdio) => stdio,
        Err(e) => {
            let _ = child.start_kill();
            return Err(ProcessError::spawn("capture standard streams", e));
        }
    };
    info!(
        pid = ?child.id(),
        executable = %executable.display(),
        channels = ?channel_ids,
        "interpreter started"
    );

    let writers = writers
        .into_iter()
        .zip(stages.payloads)
        .enumerate()
        .map(|(index, (writer, payload))| {
            tokio::task::spawn_blocking(move || write_stage(index, writer, payload))
        })
        .collect();

    let controller = ProcessController::start(child, terminate_timeout);
    let signals = match SignalBridge::register(controller.clone()) {
        Ok(bridge) => Some(bridge),
        Err(err) => {
            warn!(error = %err, "termination signals will not reach the child");
            None
        }
    };

    Ok(ChildProcessHandle {
        stdin: Some(stdin),
        stdout: Some(stdout),
        stderr: Some(stderr),
        channel_ids,
        controller: Some(controller),
        writers,
        _signals: signals,
    })
}

fn take_stdio(child: &mut Child) -> io::Result<(ChildStdin, ChildStdout, ChildStderr)> {
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::other("no stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("no stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("no stderr"))?;
    Ok((stdin, stdout, stderr))
}

/// Writes one payload and closes the channel, which is the child's EOF.
/// A child that dies first turns this into a broken pipe instead of a hang.
fn write_stage(index: usize, mut writer: PipeWriter, payload: Vec<u8>) -> Result<()> {
    if let Err(err) = writer.write_all(&payload) {
        warn!(channel = index, error = %err, "bootstrap write failed");
        return Err(ProcessError::bootstrap_write(
            format!("write bootstrap channel {index}"),
            err,
        ));
    }
    drop(writer);
    trace!(channel = index, bytes = payload.len(), "bootstrap channel closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{Module, ProgramBundle};
    use crate::transport::WiredChannels;
    use std::fs::File;
    use std::time::Instant;
    use tokio::io::{AsyncBufReadExt, BufReader};

    /// Relays the first channel through a pipe that stays open for `hold`
    /// after the parent closes its end.
    struct DelayedFirstChannel {
        hold: Duration,
    }

    impl DescriptorTransport for DelayedFirstChannel {
        fn wire(&self, cmd: &mut Command, mut channels: Vec<ExtraChannel>) -> Result<WiredChannels> {
            let mut upstream = File::from(channels.remove(0));
            let (relay_r, mut relay_w) =
                io::pipe().map_err(|e| ProcessError::wire("create relay pipe", e))?;
            let hold = self.hold;
            std::thread::spawn(move || {
                let _ = io::copy(&mut upstream, &mut relay_w);
                std::thread::sleep(hold);
            });
            channels.insert(0, relay_r.into());
            PlatformTransport::default().wire(cmd, channels)
        }
    }

    #[tokio::test]
    async fn missing_interpreter_is_a_spawn_error() {
        let request = SpawnRequest::new(
            "/no/such/interpreter",
            BootstrapInput::Script("pass".into()),
        );
        let err = spawn(request).await.err().unwrap();
        assert_eq!(err.phase(), crate::error::Phase::Spawn);
    }

    #[tokio::test]
    async fn unset_process_never_blocks() {
        let handle = ChildProcessHandle {
            stdin: None,
            stdout: None,
            stderr: None,
            channel_ids: Vec::new(),
            controller: None,
            writers: Vec::new(),
            _signals: None,
        };
        assert_eq!(handle.terminate().await.unwrap(), TerminationOutcome::NotStarted);
        assert!(matches!(handle.wait().await, Err(ProcessError::NotStarted)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bundle_is_not_read_before_stage_one_closes() {
        let Some(python) = python::locate() else {
            println!("python interpreter not found, skipping");
            return;
        };
        let hold = Duration::from_secs(2);
        let program = ProgramBundle::new(
            "app",
            "/app",
            Module::new("__main__", "main.py", "print('ready')\n"),
        );
        let request = SpawnRequest::new(python, BootstrapInput::Program(program));

        let started = Instant::now();
        let mut handle = spawn_with(request, &DelayedFirstChannel { hold }).unwrap();
        let mut lines = BufReader::new(handle.stdout.take().unwrap()).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("ready"));
        assert!(started.elapsed() >= hold);

        assert_eq!(handle.wait().await.unwrap(), ExitOutcome::Exited(0));
        handle.bootstrap_finished().await.unwrap();
    }
}
