//! Error taxonomy shared by the bundle codec and the process lifecycle.

use std::fmt;
use std::io;

use thiserror::Error;

/// Failures while building, encoding or decoding a [`crate::bundle::ProgramBundle`].
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("malformed bundle payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("module '{module}' carries invalid base64 source: {source}")]
    Base64 {
        module: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("duplicate package '{0}' in bundle")]
    DuplicatePackage(String),

    #[error("duplicate module '{module}' in package '{package}'")]
    DuplicateModule { package: String, module: String },

    #[error("failed to read module source {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// The lifecycle phase an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Spawn,
    Wire,
    BootstrapWrite,
    Wait,
    Terminate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Spawn => "spawn",
            Phase::Wire => "wire",
            Phase::BootstrapWrite => "bootstrap-write",
            Phase::Wait => "wait",
            Phase::Terminate => "terminate",
        };
        f.write_str(name)
    }
}

pub type Result<T> = std::result::Result<T, ProcessError>;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("spawn: {context}: {source}")]
    Spawn {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("wire: {context}: {source}")]
    Wire {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("bootstrap-write: {context}: {source}")]
    BootstrapWrite {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("wait: {context}: {source}")]
    Wait {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("terminate: {context}: {source}")]
    Terminate {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("wait: process was never started")]
    NotStarted,

    #[error("spawn: {0}")]
    Bundle(#[from] BundleError),
}

impl ProcessError {
    pub fn phase(&self) -> Phase {
        match self {
            ProcessError::Spawn { .. } | ProcessError::Bundle(_) => Phase::Spawn,
            ProcessError::Wire { .. } => Phase::Wire,
            ProcessError::BootstrapWrite { .. } => Phase::BootstrapWrite,
            ProcessError::Wait { .. } | ProcessError::NotStarted => Phase::Wait,
            ProcessError::Terminate { .. } => Phase::Terminate,
        }
    }

    pub(crate) fn spawn(context: impl Into<String>, source: io::Error) -> Self {
        ProcessError::Spawn {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn wire(context: impl Into<String>, source: io::Error) -> Self {
        ProcessError::Wire {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn bootstrap_write(context: impl Into<String>, source: io::Error) -> Self {
        ProcessError::BootstrapWrite {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn wait(context: impl Into<String>, source: io::Error) -> Self {
        ProcessError::Wait {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn terminate(context: impl Into<String>, source: io::Error) -> Self {
        ProcessError::Terminate {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failing_phase() {
        let err = ProcessError::wire(
            "too many channels",
            io::Error::new(io::ErrorKind::Other, "limit 8"),
        );
        assert_eq!(err.phase(), Phase::Wire);
        assert!(err.to_string().starts_with("wire: too many channels"));

        let err = ProcessError::from(BundleError::DuplicatePackage("util".into()));
        assert_eq!(err.phase(), Phase::Spawn);
        assert!(err.to_string().contains("duplicate package 'util'"));
    }
}
