use std::io;
use std::os::fd::{AsRawFd, RawFd};

use tokio::process::Command;

use super::{DescriptorTransport, ExtraChannel, WiredChannels};
use crate::error::{ProcessError, Result};

/// Descriptor number of the first extra channel in the child.
pub const FIRST_EXTRA_FD: RawFd = 3;

/// Inherited descriptors `3, 4, ..` installed between fork and exec.
#[derive(Debug, Default, Clone, Copy)]
pub struct FdInheritance;

impl DescriptorTransport for FdInheritance {
    fn wire(&self, cmd: &mut Command, channels: Vec<ExtraChannel>) -> Result<WiredChannels> {
        check_descriptor_budget(channels.len())?;

        let sources: Vec<RawFd> = channels.iter().map(AsRawFd::as_raw_fd).collect();
        let ids = (FIRST_EXTRA_FD..)
            .take(sources.len())
            .map(|fd| fd.to_string())
            .collect();

        if !sources.is_empty() {
            // Allocated up front: the hook runs after fork and must not allocate.
            let mut scratch = vec![-1; sources.len()];
            unsafe {
                cmd.pre_exec(move || install(&sources, &mut scratch));
            }
        }

        Ok(WiredChannels::new(ids, channels))
    }
}

/// Moves every source above the target range first so a source sitting on a
/// target number is never clobbered, then `dup2`s them into place. `dup2`
/// clears close-on-exec on the targets; the scratch copies keep it.
fn install(sources: &[RawFd], scratch: &mut [RawFd]) -> io::Result<()> {
    let floor = FIRST_EXTRA_FD + sources.len() as RawFd;
    for (slot, &fd) in scratch.iter_mut().zip(sources) {
        let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, floor) };
        if dup < 0 {
            return Err(io::Error::last_os_error());
        }
        *slot = dup;
    }
    for (target, &fd) in (FIRST_EXTRA_FD..).zip(scratch.iter()) {
        if unsafe { libc::dup2(fd, target) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// The child needs the targets plus a scratch copy of each below the soft
/// `RLIMIT_NOFILE`.
fn check_descriptor_budget(count: usize) -> Result<()> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0 {
        return Err(ProcessError::wire(
            "query descriptor limit",
            io::Error::last_os_error(),
        ));
    }
    let needed = FIRST_EXTRA_FD as u64 + 2 * count as u64;
    if limit.rlim_cur != libc::RLIM_INFINITY && needed > limit.rlim_cur as u64 {
        return Err(ProcessError::wire(
            format!("{count} channels need {needed} descriptors"),
            io::Error::other(format!("RLIMIT_NOFILE is {}", limit.rlim_cur)),
        ));
    }
    Ok(())
}
