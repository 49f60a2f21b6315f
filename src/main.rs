mod cli;

use std::time::Duration;

use anyhow::{Context, Result};
use bootpipe::config::Config;
use bootpipe::{spawn, BootstrapInput, ExitOutcome, Module, Package, ProgramBundle, SpawnRequest};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let cfg = Config::load();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let interpreter = args.python.clone().unwrap_or_else(|| cfg.interpreter());
    let timeout = args
        .terminate_timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| cfg.terminate_timeout());

    let (input, program_args) = match args.command {
        cli::Command::Run { main, packages, name, args: program_args } => {
            let entry = Module::from_path("__main__", &main)
                .with_context(|| format!("reading {}", main.display()))?;
            let base = main
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            let name = name.unwrap_or_else(|| main.to_string_lossy().into_owned());
            let mut bundle = ProgramBundle::new(name, base, entry);
            for (pkg_name, dir) in packages {
                let package = Package::from_dir(&pkg_name, &dir)
                    .with_context(|| format!("bundling package {pkg_name} from {dir}"))?;
                bundle.add_package(package)?;
            }
            (BootstrapInput::Program(bundle), program_args)
        }
        cli::Command::Exec { script, args: program_args } => {
            let text = std::fs::read_to_string(&script)
                .with_context(|| format!("reading {}", script.display()))?;
            (BootstrapInput::Script(text), program_args)
        }
    };

    let request = SpawnRequest::new(interpreter, input)
        .args(program_args)
        .envs(args.env.into_iter().collect())
        .terminate_timeout(timeout);
    let mut child = spawn(request).await.context("starting interpreter")?;

    // Pump our stdio through the child's.
    if let Some(mut stdin) = child.stdin.take() {
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut tokio::io::stdin(), &mut stdin).await;
            let _ = stdin.shutdown().await;
        });
    }
    let stdout = child.stdout.take().map(|mut out| {
        tokio::spawn(async move { tokio::io::copy(&mut out, &mut tokio::io::stdout()).await })
    });
    let stderr = child.stderr.take().map(|mut err| {
        tokio::spawn(async move { tokio::io::copy(&mut err, &mut tokio::io::stderr()).await })
    });

    let outcome = child.wait().await.context("waiting for interpreter")?;
    for pump in [stdout, stderr].into_iter().flatten() {
        let _ = pump.await;
    }
    if let Err(err) = child.bootstrap_finished().await {
        tracing::debug!(error = %err, "bootstrap did not complete");
    }

    let code = match outcome {
        ExitOutcome::Exited(code) => code,
        ExitOutcome::KilledBySignal { signal: Some(signal) } => 128 + signal,
        ExitOutcome::KilledBySignal { signal: None } => 1,
    };
    std::process::exit(code);
}
