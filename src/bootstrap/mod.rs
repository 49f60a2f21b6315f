//! Two-stage bootstrap code handed to the child interpreter.
//!
//! Stage one is a single line passed on the command line. It reads the first
//! bootstrap channel to EOF and executes what it finds there. For a program
//! bundle that is the stage-two script, which reads the encoded bundle from the
//! second channel and materializes it.

use crate::bundle::{self, ProgramBundle};
use crate::error::BundleError;

/// Bumped whenever the stage-two template or its argv contract changes.
pub const BOOTSTRAP_VERSION: u32 = 1;

/// Exit code of a child whose stage-two payload could not be decoded.
pub const DECODE_FAILURE_EXIT_CODE: i32 = 3;

const SECONDARY_TEMPLATE: &str = include_str!("secondary.py");

/// What the child should run.
#[derive(Debug, Clone)]
pub enum BootstrapInput {
    /// A single script, executed directly by stage one.
    Script(String),
    /// A structured bundle, materialized by stage two.
    Program(ProgramBundle),
    /// Bundle bytes already produced by [`bundle::encode`]. Sent unchanged.
    Encoded(Vec<u8>),
}

/// Everything the launcher writes: the stage-one argument and one payload per
/// bootstrap channel, in channel order.
#[derive(Debug)]
pub(crate) struct Stages {
    pub primary: String,
    pub payloads: Vec<Vec<u8>>,
}

/// Payloads that do not depend on child-visible ids, computed before spawning
/// so encoding failures never leave a child behind.
#[derive(Debug)]
pub(crate) enum Prepared {
    Script(Vec<u8>),
    Program(Vec<u8>),
}

impl Prepared {
    pub fn from_input(input: BootstrapInput) -> Result<Self, BundleError> {
        Ok(match input {
            BootstrapInput::Script(script) => Prepared::Script(script.into_bytes()),
            BootstrapInput::Program(program) => Prepared::Program(bundle::encode(&program)?),
            BootstrapInput::Encoded(bytes) => Prepared::Program(bytes),
        })
    }

    /// Number of bootstrap channels this input needs.
    pub fn channel_count(&self) -> usize {
        match self {
            Prepared::Script(_) => 1,
            Prepared::Program(_) => 2,
        }
    }

    /// `ids` are the child-visible identifiers of the bootstrap channels.
    pub fn into_stages(self, ids: &[String]) -> Stages {
        match self {
            Prepared::Script(script) => Stages {
                primary: primary_snippet(&ids[0]),
                payloads: vec![script],
            },
            Prepared::Program(payload) => Stages {
                primary: primary_snippet(&ids[0]),
                payloads: vec![secondary_script(&ids[1]).into_bytes(), payload],
            },
        }
    }
}

/// Stage-one code: read channel `id` to EOF and execute it.
pub fn primary_snippet(id: &str) -> String {
    if cfg!(windows) {
        format!(
            "import os,msvcrt;exec(compile(os.fdopen(msvcrt.open_osfhandle({id},os.O_RDONLY),'rb').read(),'<bootpipe>','exec'))"
        )
    } else {
        format!("import os;exec(compile(os.fdopen({id},'rb').read(),'<bootpipe>','exec'))")
    }
}

/// Stage-two code reading the encoded bundle from channel `id`.
pub fn secondary_script(id: &str) -> String {
    SECONDARY_TEMPLATE
        .replace("@BOOTSTRAP_VERSION@", &BOOTSTRAP_VERSION.to_string())
        .replace("@DECODE_FAILURE_EXIT_CODE@", &DECODE_FAILURE_EXIT_CODE.to_string())
        .replace("@PROGRAM_CHANNEL@", id)
}

/// Arguments following the interpreter's own flags:
/// `<count> <id_1> .. <id_n> <caller args..>`.
pub fn startup_args(ids: &[String], caller_args: &[String]) -> Vec<String> {
    let mut args = Vec::with_capacity(1 + ids.len() + caller_args.len());
    args.push(ids.len().to_string());
    args.extend(ids.iter().cloned());
    args.extend(caller_args.iter().cloned());
    args
}
