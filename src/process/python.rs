//! Python-specific launch details: interpreter flags and executable lookup.

use std::env;
use std::io;
use std::path::{Path, PathBuf};

/// Name looked up on `PATH` when no interpreter is configured.
pub fn default_executable() -> &'static str {
    if cfg!(windows) {
        "python"
    } else {
        "python3"
    }
}

/// Arguments preceding the bootstrap argv: unbuffered stdio and the stage-one
/// snippet as inline code. `-c` also ends the interpreter's option list.
pub fn interpreter_args(primary: &str) -> [String; 3] {
    ["-u".to_string(), "-c".to_string(), primary.to_string()]
}

/// Resolves `program` the way a shell would: paths are checked directly, bare
/// names are searched on `PATH`.
///
/// Doing this in the parent turns a missing interpreter into a spawn error
/// instead of a child that exits with 127.
pub fn resolve_executable(program: impl AsRef<Path>) -> io::Result<PathBuf> {
    let program = program.as_ref();
    if program.components().count() > 1 || program.is_absolute() {
        return if program.is_file() {
            Ok(program.to_path_buf())
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", program.display()),
            ))
        };
    }

    let path = env::var_os("PATH").unwrap_or_default();
    for dir in env::split_paths(&path) {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if cfg!(windows) && program.extension().is_none() {
            let candidate = candidate.with_extension("exe");
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} not found on PATH", program.display()),
    ))
}

/// The default interpreter, if one is installed.
pub fn locate() -> Option<PathBuf> {
    resolve_executable(default_executable()).ok()
}
