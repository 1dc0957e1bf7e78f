mod cavity;
mod client;
mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cavity::CavityMonitor;
use error::ErrorMonitor;

#[derive(Debug, Parser)]
#[command(name = "stcl-monitor")]
struct Args {
    #[command(subcommand)]
    command: MonitorCommand,
}

#[derive(Debug, Subcommand)]
enum MonitorCommand {
    /// Subscribe to a node's channel-0 trace.
    Cavity {
        #[arg(long)]
        node: String,
        #[arg(long, default_value_t = false)]
        filter: bool,
        #[arg(long)]
        json_out: Option<PathBuf>,
    },
    /// Subscribe to a node's per-step error snapshot.
    Error {
        #[arg(long)]
        node: String,
        #[arg(long, default_value_t = 10.0)]
        t_min: f64,
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match args.command {
        MonitorCommand::Cavity { node, filter, json_out } => {
            CavityMonitor::new(node, filter, json_out)?.run().await
        }
        MonitorCommand::Error { node, t_min, save } => ErrorMonitor::new(node, t_min, save).run().await,
    }
}
