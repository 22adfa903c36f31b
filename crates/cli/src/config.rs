//! Top-level arguments and process setup.

use crate::commands::Command;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "maze-replica")]
#[command(about = "Peer-replicated treasure maze with primary-backup failover")]
pub struct CliConfig {
    /// Log filter used when `RUST_LOG` is unset
    #[arg(long, global = true, default_value = "info")]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    /// Install logging, start the runtime and run the chosen command.
    ///
    /// The `replica_*_total` counters go through the `metrics` facade only.
    /// No recorder is installed here, so they are dropped unless an embedding
    /// process installs one.
    pub fn run(self) -> anyhow::Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&self.log)),
            )
            .with_writer(std::io::stderr)
            .init();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.command.execute())
    }
}
