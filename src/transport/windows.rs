use std::io;
use std::os::windows::io::AsRawHandle;

use tokio::process::Command;
use windows_sys::Win32::Foundation::{SetHandleInformation, HANDLE, HANDLE_FLAG_INHERIT};
use windows_sys::Win32::System::Threading::{CREATE_NEW_PROCESS_GROUP, CREATE_NO_WINDOW};

use super::{DescriptorTransport, ExtraChannel, WiredChannels};
use crate::error::{ProcessError, Result};

/// Handles marked inheritable and passed to the child by value.
///
/// The child gets its own process group so a graceful CTRL_BREAK can target it
/// alone, and no console window.
#[derive(Debug, Default, Clone, Copy)]
pub struct HandleInheritance;

impl DescriptorTransport for HandleInheritance {
    fn wire(&self, cmd: &mut Command, channels: Vec<ExtraChannel>) -> Result<WiredChannels> {
        let mut ids = Vec::with_capacity(channels.len());
        for channel in &channels {
            let handle = channel.as_raw_handle();
            let ok = unsafe {
                SetHandleInformation(handle as HANDLE, HANDLE_FLAG_INHERIT, HANDLE_FLAG_INHERIT)
            };
            if ok == 0 {
                return Err(ProcessError::wire(
                    "mark handle inheritable",
                    io::Error::last_os_error(),
                ));
            }
            ids.push((handle as usize).to_string());
        }
        cmd.creation_flags(CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP);
        Ok(WiredChannels::new(ids, channels))
    }
}
