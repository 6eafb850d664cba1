#![allow(clippy::print_stdout)]

use anyhow::Context;
use clap::Parser;
use tether_backend::{FsBackend, MemoryBackend};
use tether_cli::args::{Cli, Command};
use tether_cli::commands::{self, SoakPlan};
use tether_logger::Logger;
use tether_proxy::ProxySettings;
use tokio::task::spawn_blocking;

#[tether_runtime::main(tooling)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings =
        ProxySettings::load(cli.config.as_deref()).context("Critical: Configuration is malformed")?;
    settings.verbosity = settings.verbosity.saturating_add(cli.verbose).min(3);

    let _log = Logger::builder().name(env!("CARGO_PKG_NAME")).verbosity(settings.verbosity).init()?;

    let handshake = settings.handshake();
    let report = match cli.command {
        Command::Check { root, size } => {
            let root = root.unwrap_or_else(|| settings.root.clone());
            let backend = FsBackend::open(root.clone())
                .await
                .with_context(|| format!("Failed to open backend root {}", root.display()))?;
            spawn_blocking(move || commands::check(backend, &handshake, size)).await??
        },
        Command::Soak { root, iterations, size, files, memory } => {
            let plan = SoakPlan { iterations, size, files };
            if memory {
                let backend = MemoryBackend::new();
                spawn_blocking(move || commands::soak(backend, &handshake, plan)).await??
            } else {
                let root = root.unwrap_or_else(|| settings.root.clone());
                let backend = FsBackend::open(root.clone())
                    .await
                    .with_context(|| format!("Failed to open backend root {}", root.display()))?;
                spawn_blocking(move || commands::soak(backend, &handshake, plan)).await??
            }
        },
    };

    println!("{report}");
    Ok(())
}
