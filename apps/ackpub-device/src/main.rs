use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ackpub_cloud_sim::SimulatedCloud;
use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use tracing::{error, info, warn};

mod config;
mod device;

use crate::config::DeviceConfig;
use crate::device::{Device, DeviceSettings};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (.toml, or .env for ACKPUB_* variables)
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Stop after this many publish attempts
    #[arg(long, short = 'n')]
    count: Option<u64>,
    /// Start with the simulated cloud disconnected
    #[arg(long)]
    offline: bool,
    /// Fraction of simulated transmissions that are lost
    #[arg(long, env = "ACKPUB_LOSS")]
    loss: Option<f64>,
}

#[tokio::main]
async fn main() {
    let filter = std::env::var("ACKPUB_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let mut config = match DeviceConfig::new(cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to load config: {err}");
            std::process::exit(1);
        }
    };
    if cli.offline {
        config.start_connected = false;
    }
    if let Some(loss) = cli.loss {
        config.loss_probability = loss;
    }

    let cloud = match SimulatedCloud::start(config.cloud_config()) {
        Ok(cloud) => cloud,
        Err(err) => {
            error!("failed to start simulated cloud: {err}");
            std::process::exit(1);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let _ = flag::register(SIGTERM, Arc::clone(&shutdown));
    let _ = flag::register(SIGINT, Arc::clone(&shutdown));

    let device = Device::new(
        cloud,
        config.binder_config(),
        DeviceSettings {
            event_name: config.event_name.clone(),
            payload_prefix: config.payload_prefix.clone(),
            publish_interval: config.publish_interval,
            max_publishes: cli.count,
        },
    );

    let report = device.run(shutdown).await;
    info!(
        published = report.published,
        skipped_offline = report.skipped_offline,
        succeeded = report.succeeded,
        failed = report.failed,
        "done"
    );
    if let Some(code) = report.last_error {
        warn!(%code, "last publish error");
    }
}
