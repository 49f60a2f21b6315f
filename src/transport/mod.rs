//! Passing extra pipe read ends into a child at spawn time.
//!
//! POSIX children receive them as numbered descriptors right after stdio,
//! Windows children as inheritable handles. Either way the child learns the
//! identifiers from its argument list.

use std::fs::File;
use std::io::PipeReader;

use tokio::process::Command;

use crate::error::Result;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::{FdInheritance as PlatformTransport, FIRST_EXTRA_FD};
#[cfg(windows)]
pub use windows::HandleInheritance as PlatformTransport;

#[cfg(unix)]
type NativeChannel = std::os::fd::OwnedFd;
#[cfg(windows)]
type NativeChannel = std::os::windows::io::OwnedHandle;

/// A readable endpoint destined for the child.
#[derive(Debug)]
pub struct ExtraChannel(NativeChannel);

impl From<PipeReader> for ExtraChannel {
    fn from(reader: PipeReader) -> Self {
        Self(reader.into())
    }
}

impl From<File> for ExtraChannel {
    fn from(file: File) -> Self {
        Self(file.into())
    }
}

impl From<ExtraChannel> for File {
    fn from(channel: ExtraChannel) -> Self {
        File::from(channel.0)
    }
}

#[cfg(unix)]
impl std::os::fd::AsRawFd for ExtraChannel {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        std::os::fd::AsRawFd::as_raw_fd(&self.0)
    }
}

#[cfg(windows)]
impl std::os::windows::io::AsRawHandle for ExtraChannel {
    fn as_raw_handle(&self) -> std::os::windows::io::RawHandle {
        std::os::windows::io::AsRawHandle::as_raw_handle(&self.0)
    }
}

/// Channels wired into a command that has not been spawned yet.
///
/// Holds the parent's copies of the read ends; they have to stay open until
/// the child is spawned and should be closed right after.
#[derive(Debug)]
pub struct WiredChannels {
    pub ids: Vec<String>,
    parent_copies: Vec<ExtraChannel>,
}

impl WiredChannels {
    pub(crate) fn new(ids: Vec<String>, parent_copies: Vec<ExtraChannel>) -> Self {
        Self { ids, parent_copies }
    }

    /// Closes the parent's copies so that EOF and broken pipes reach the right side.
    pub fn release(self) {
        drop(self.parent_copies);
    }
}

pub trait DescriptorTransport: Send + Sync {
    /// Arranges for `channels` to be open in the child spawned from `cmd`, and
    /// returns one child-visible identifier per channel, in order.
    ///
    /// On error every channel has already been closed.
    fn wire(&self, cmd: &mut Command, channels: Vec<ExtraChannel>) -> Result<WiredChannels>;
}
