mod acquisition;
mod dispatch;
mod lock_engine;
mod peak_finders;
mod pid;
mod server;
mod transport;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use stcl_types::constants::DEFAULT_PRIMARY_PORT;
use stcl_types::model::{MasterConfig, MasterReference, NodeSettings, PeakFinderConfig, PidConfig};

use acquisition::SyntheticCavity;
use lock_engine::LockEngine;
use server::NodeServer;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Scan,
    Lock,
    Monitor,
    ExtScan,
}

/// Acquisition/generation node for one cavity lock.
#[derive(Debug, Parser)]
#[command(name = "stcl-node")]
struct Args {
    #[arg(long, value_enum)]
    role: RoleArg,

    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    #[arg(long, default_value_t = DEFAULT_PRIMARY_PORT)]
    port: u16,

    /// Seed for the synthetic cavity backend used while no real acquisition
    /// board is attached.
    #[arg(long, default_value_t = 1)]
    seed: u64,
}

/// A placeholder configuration a node starts with before the host's first
/// `update_settings` arrives. Never persisted; the real ranges/lockpoints
/// live in the host's per-node settings files.
fn placeholder_settings(role: RoleArg) -> NodeSettings {
    let master_ref = MasterReference { range: [[0.0, 0.08], [0.09, 0.12]], lockpoint: 0.1 };
    match role {
        RoleArg::Scan => NodeSettings::Scan {
            master: MasterConfig {
                range: master_ref.range,
                lockpoint: master_ref.lockpoint,
                pid: PidConfig { p: 0.0, i: 0.0, d: 0.0, i_val: 0.0, limit: [-1.0, 1.0] },
                peak_finder: PeakFinderConfig::default(),
                dec: 16,
            },
        },
        RoleArg::Lock => NodeSettings::Lock { master: master_ref, slave1: None, slave2: None },
        RoleArg::Monitor => NodeSettings::Monitor { master: master_ref, slave1: None, slave2: None },
        RoleArg::ExtScan => NodeSettings::ExtScan,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    if matches!(args.role, RoleArg::ExtScan) {
        info!("ext_scan role performs no network I/O; nothing to run");
        return Ok(());
    }

    let settings = placeholder_settings(args.role);
    let base_master = match &settings {
        NodeSettings::Scan { master } => [master.lockpoint - 0.05, master.lockpoint + 0.02],
        NodeSettings::Lock { master, .. } | NodeSettings::Monitor { master, .. } => {
            [master.lockpoint - 0.05, master.lockpoint + 0.02]
        }
        NodeSettings::ExtScan => [0.3, 1.8],
    };

    let cavity = SyntheticCavity::new(args.seed, base_master);
    let engine = LockEngine::new(cavity, settings);
    let server = NodeServer::new(engine, args.bind, args.port);
    server.run().await
}
