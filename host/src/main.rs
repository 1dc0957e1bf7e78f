mod commands;
mod connection;
mod monitor_supervisor;
mod settings;
mod topology;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::Host;
use settings::SettingsStore;
use stcl_types::model::NodeSettings;
use topology::Topology;

/// Orchestrates a fleet of `stcl-node` processes sharing one or more cavities.
#[derive(Debug, Parser)]
#[command(name = "stcl-host")]
struct Args {
    /// Topology file describing node labels, addresses and roles.
    #[arg(long)]
    config: PathBuf,

    /// Overrides the settings directory (else `STCL_SETTINGS_DIR`, else
    /// `dirs::config_dir()/stcl`).
    #[arg(long)]
    settings_dir: Option<PathBuf>,

    /// Path to the `stcl-monitor` binary.
    #[arg(long, default_value = "stcl-monitor")]
    monitor_binary: String,

    #[command(subcommand)]
    command: HostCommand,
}

#[derive(Debug, Subcommand)]
enum HostCommand {
    StartScan {
        label: String,
    },
    StartLock {
        label: String,
    },
    StopLoop {
        label: String,
    },
    Acquire {
        label: String,
    },
    AcquireChN {
        label: String,
        ch: usize,
        n: usize,
    },
    ShowCurrent {
        label: String,
    },
    StartMonitor {
        label: String,
        #[arg(long, default_value_t = false)]
        filter: bool,
    },
    StartErrorMonitor {
        label: String,
        #[arg(long, default_value_t = 10.0)]
        t_min: f64,
    },
    UpdateSetting {
        label: String,
        settings_file: PathBuf,
    },
    SetDec {
        label: String,
        dec: u32,
    },
    Close,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let topology = Topology::load(&args.config)?;
    let store = SettingsStore::resolve(args.settings_dir)?;
    let mut host = Host::new(topology, store, args.monitor_binary);

    match args.command {
        HostCommand::StartScan { label } => print_result(host.start_scan(&label).await),
        HostCommand::StartLock { label } => print_result(host.start_lock(&label).await),
        HostCommand::StopLoop { label } => print_result(host.stop_loop(&label).await),
        HostCommand::Acquire { label } => print_result(host.acquire(&label).await),
        HostCommand::AcquireChN { label, ch, n } => {
            print_result(host.acquire_ch_n(&label, ch, n).await.map(serde_json::Value::Array))
        }
        HostCommand::ShowCurrent { label } => print_result(host.show_current(&label).await),
        HostCommand::StartMonitor { label, filter } => {
            host.start_monitor(&label, filter).await?;
            println!("monitor started for {label}");
            Ok(())
        }
        HostCommand::StartErrorMonitor { label, t_min } => {
            host.start_error_monitor(&label, t_min).await?;
            println!("error monitor started for {label}");
            Ok(())
        }
        HostCommand::UpdateSetting { label, settings_file } => {
            let raw = std::fs::read_to_string(&settings_file)?;
            let new: NodeSettings = serde_json::from_str(&raw)?;
            print_result(host.update_setting(&label, new).await)
        }
        HostCommand::SetDec { label, dec } => print_result(host.set_dec(&label, dec).await),
        HostCommand::Close => {
            host.close().await?;
            println!("closed");
            Ok(())
        }
    }
}

fn print_result(result: anyhow::Result<serde_json::Value>) -> anyhow::Result<()> {
    match result {
        Ok(value) => {
            println!("{value}");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
