use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "bootpipe", about = "Run Python programs bootstrapped over inherited pipes", version)]
pub struct Cli {
    /// Interpreter to launch (overrides BOOTPIPE_PYTHON).
    #[arg(long, global = true)]
    pub python: Option<PathBuf>,

    /// Extra environment variable for the child, as KEY=VALUE. Repeatable.
    #[arg(short = 'e', long = "env", global = true, value_parser = parse_key_value, action = clap::ArgAction::Append)]
    pub env: Vec<(String, String)>,

    /// Seconds to wait after a graceful stop before killing the child.
    #[arg(long = "terminate-timeout", global = true)]
    pub terminate_timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Bundle a main module and packages, then run it.
    Run {
        /// Entry module source file.
        main: PathBuf,

        /// Package to ship along, as NAME=DIR. Repeatable; order is kept.
        #[arg(short = 'p', long = "package", value_parser = parse_key_value, action = clap::ArgAction::Append)]
        packages: Vec<(String, String)>,

        /// Program name seen by the child as sys.argv[0].
        #[arg(long)]
        name: Option<String>,

        /// Arguments for the program.
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Run a single script without bundling.
    Exec {
        script: PathBuf,

        /// Arguments for the script.
        #[arg(last = true)]
        args: Vec<String>,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
