//! Run-to-completion helpers built on [`spawn`](super::spawn).

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{self, AsyncRead, AsyncReadExt};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tracing::debug;

use super::{spawn, ChildProcessHandle, ExitOutcome, SpawnRequest};
use crate::bootstrap::BootstrapInput;
use crate::error::{BundleError, ProcessError, Result};

/// What a finished child printed, next to how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub outcome: ExitOutcome,
    /// Lossily decoded as UTF-8.
    pub output: String,
}

/// A script request whose code is the contents of `path`.
pub fn script_from_file(executable: impl Into<PathBuf>, path: impl AsRef<Path>) -> Result<SpawnRequest> {
    let path = path.as_ref();
    let script = fs::read_to_string(path).map_err(|source| BundleError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(SpawnRequest::new(executable, BootstrapInput::Script(script)))
}

/// Runs `request` to completion and returns its stdout. Stderr is discarded.
pub async fn read_stdout(request: SpawnRequest) -> Result<CapturedOutput> {
    let mut handle = started(request).await?;
    let (stdout, stderr) = streams(&mut handle)?;

    let (output, _) = tokio::try_join!(read_to_end(stdout), drain(stderr))
        .map_err(|e| ProcessError::wait("read child output", e))?;
    finish(handle, output).await
}

/// Runs `request` to completion and returns stdout and stderr interleaved in
/// the order the chunks arrived.
pub async fn read_combined(request: SpawnRequest) -> Result<CapturedOutput> {
    let mut handle = started(request).await?;
    let (stdout, stderr) = streams(&mut handle)?;

    let output = interleave(stdout, stderr)
        .await
        .map_err(|e| ProcessError::wait("read child output", e))?;
    finish(handle, output).await
}

/// Runs the script at `path` with the child's output forwarded to ours.
///
/// The child is bound to this process: SIGINT/SIGTERM (or the console events
/// on Windows) received here stop it as well. A non-zero exit is not an
/// error; inspect the returned outcome.
pub async fn run_script_file<I, S>(
    executable: impl Into<PathBuf>,
    path: impl AsRef<Path>,
    args: I,
) -> Result<ExitOutcome>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let request = script_from_file(executable, path)?.args(args);
    let mut handle = started(request).await?;
    let (mut stdout, mut stderr) = streams(&mut handle)?;
    let (mut our_stdout, mut our_stderr) = (io::stdout(), io::stderr());

    tokio::try_join!(
        io::copy(&mut stdout, &mut our_stdout),
        io::copy(&mut stderr, &mut our_stderr),
    )
    .map_err(|e| ProcessError::wait("forward child output", e))?;
    let outcome = handle.wait().await?;
    settle_bootstrap(&mut handle).await;
    Ok(outcome)
}

/// Runs an arbitrary program, without any bootstrap, and returns its stdout.
/// Used for things like `--version` queries.
pub async fn read_command_stdout<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| ProcessError::spawn(format!("run {}", program.to_string_lossy()), e))?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Spawns with stdin already closed, so a script reading it sees EOF.
async fn started(request: SpawnRequest) -> Result<ChildProcessHandle> {
    let mut handle = spawn(request).await?;
    drop(handle.stdin.take());
    Ok(handle)
}

fn streams(handle: &mut ChildProcessHandle) -> Result<(ChildStdout, ChildStderr)> {
    let missing = |name: &str| ProcessError::wait("read child output", std::io::Error::other(name));
    let stdout = handle.stdout.take().ok_or_else(|| missing("stdout already taken"))?;
    let stderr = handle.stderr.take().ok_or_else(|| missing("stderr already taken"))?;
    Ok((stdout, stderr))
}

async fn finish(mut handle: ChildProcessHandle, output: Vec<u8>) -> Result<CapturedOutput> {
    let outcome = handle.wait().await?;
    settle_bootstrap(&mut handle).await;
    Ok(CapturedOutput {
        outcome,
        output: String::from_utf8_lossy(&output).into_owned(),
    })
}

/// A child that exits without reading its code fails the write; the exit
/// outcome already tells the caller what happened.
async fn settle_bootstrap(handle: &mut ChildProcessHandle) {
    if let Err(err) = handle.bootstrap_finished().await {
        debug!(error = %err, "bootstrap did not complete");
    }
}

async fn read_to_end(mut reader: impl AsyncRead + Unpin) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

async fn drain(mut reader: impl AsyncRead + Unpin) -> std::io::Result<u64> {
    io::copy(&mut reader, &mut io::sink()).await
}

async fn interleave(mut stdout: ChildStdout, mut stderr: ChildStderr) -> std::io::Result<Vec<u8>> {
    let mut combined = Vec::new();
    let mut out_chunk = [0u8; 4096];
    let mut err_chunk = [0u8; 4096];
    let (mut out_open, mut err_open) = (true, true);

    while out_open || err_open {
        tokio::select! {
            read = stdout.read(&mut out_chunk), if out_open => match read? {
                0 => out_open = false,
                n => combined.extend_from_slice(&out_chunk[..n]),
            },
            read = stderr.read(&mut err_chunk), if err_open => match read? {
                0 => err_open = false,
                n => combined.extend_from_slice(&err_chunk[..n]),
            },
        }
    }
    Ok(combined)
}
