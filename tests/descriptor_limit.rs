//! Lives in its own test binary: it lowers the process-wide RLIMIT_NOFILE.
#![cfg(unix)]

use std::io::{self, Write};

use bootpipe::{DescriptorTransport, ExtraChannel, Phase, PlatformTransport};
use tokio::process::Command;

fn nofile() -> libc::rlimit {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    assert_eq!(unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) }, 0);
    limit
}

fn set_nofile(limit: &libc::rlimit) {
    assert_eq!(unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, limit) }, 0);
}

#[test]
fn too_many_channels_fail_to_wire_and_are_closed() {
    const CHANNELS: usize = 20;

    let mut readers: Vec<ExtraChannel> = Vec::with_capacity(CHANNELS);
    let mut writers = Vec::with_capacity(CHANNELS);
    for _ in 0..CHANNELS {
        let (reader, writer) = io::pipe().unwrap();
        readers.push(reader.into());
        writers.push(writer);
    }

    let original = nofile();
    // Enough for one channel fewer than requested: 3 + 2 * (n - 1) + 1.
    let lowered = libc::rlimit {
        rlim_cur: (3 + 2 * CHANNELS - 1) as libc::rlim_t,
        rlim_max: original.rlim_max,
    };
    set_nofile(&lowered);

    let mut cmd = Command::new("true");
    let wired = PlatformTransport::default().wire(&mut cmd, readers);
    set_nofile(&original);

    let err = wired.unwrap_err();
    assert_eq!(err.phase(), Phase::Wire);
    assert!(err.to_string().contains("20 channels"), "{err}");

    for (index, mut writer) in writers.into_iter().enumerate() {
        let write = writer.write_all(b"x");
        let err = write.expect_err(&format!("channel {index} still has a reader"));
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
