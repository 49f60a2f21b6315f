//! Launch and supervise interpreter processes whose code arrives over
//! inherited pipes instead of temporary files.

pub mod bootstrap;
pub mod bundle;
pub mod config;
pub mod error;
pub mod process;
pub mod signal;
pub mod transport;

pub use bootstrap::BootstrapInput;
pub use bundle::{Module, Package, ProgramBundle};
pub use error::{BundleError, Phase, ProcessError};
pub use process::{
    read_combined, read_stdout, run_script_file, spawn, CapturedOutput, ChildProcessHandle,
    ExitOutcome, ProcessController, SpawnRequest, TerminationOutcome,
};
pub use transport::{DescriptorTransport, ExtraChannel, PlatformTransport};
