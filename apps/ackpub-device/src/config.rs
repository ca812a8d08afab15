use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use ackpub_cloud_sim::SimulatedCloudConfig;
use ackpub_core::PublishFlags;
use ackpub_node::{BinderConfig, OverlapPolicy};
use ackpub_transport::CloudLimits;

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    pub event_name: String,
    #[serde(with = "humantime_serde")]
    pub publish_interval: Duration,
    /// Payload is `<prefix>=<counter>`.
    pub payload_prefix: String,
    pub default_ttl: u32,
    pub default_flags: PublishFlags,
    pub overlap_policy: OverlapPolicy,
    #[serde(with = "humantime_serde")]
    pub ack_latency: Duration,
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,
    pub loss_probability: f64,
    pub max_attempts: u32,
    pub queue_capacity: usize,
    pub start_connected: bool,
    pub seed: Option<u64>,
    pub max_event_name_len: usize,
    pub max_payload_bytes: usize,
}

impl DeviceConfig {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("event_name", "testEvent")?
            .set_default("publish_interval", "60s")?
            .set_default("payload_prefix", "counter")?
            .set_default("default_ttl", 60)?
            .set_default("default_flags", "PRIVATE | WITH_ACK")?
            .set_default("overlap_policy", "reject")?
            .set_default("ack_latency", "150ms")?
            .set_default("ack_timeout", "20s")?
            .set_default("loss_probability", 0.0)?
            .set_default("max_attempts", 3)?
            .set_default("queue_capacity", 8)?
            .set_default("start_connected", true)?
            .set_default("seed", None::<u64>)?
            .set_default("max_event_name_len", 64)?
            .set_default("max_payload_bytes", 1024)?;

        if let Some(path) = config_path {
            if path.extension().and_then(|ext| ext.to_str()) == Some("env") {
                // .env files feed the ACKPUB_* environment source below.
                match dotenvy::from_path(&path) {
                    Ok(_) => tracing::info!("loaded environment from {}", path.display()),
                    Err(err) => {
                        tracing::warn!("failed to load .env from {}: {}", path.display(), err)
                    }
                }
            } else {
                builder = builder.add_source(File::from(path));
            }
        }

        builder = builder.add_source(Environment::with_prefix("ACKPUB").try_parsing(true));

        builder.build()?.try_deserialize()
    }

    pub fn binder_config(&self) -> BinderConfig {
        BinderConfig {
            default_ttl: self.default_ttl,
            default_flags: self.default_flags,
            overlap_policy: self.overlap_policy,
        }
    }

    pub fn cloud_config(&self) -> SimulatedCloudConfig {
        SimulatedCloudConfig {
            limits: CloudLimits {
                max_event_name_len: self.max_event_name_len,
                max_payload_bytes: self.max_payload_bytes,
            },
            queue_capacity: self.queue_capacity,
            ack_latency: self.ack_latency,
            ack_timeout: self.ack_timeout,
            loss_probability: self.loss_probability,
            max_attempts: self.max_attempts,
            seed: self.seed,
            start_connected: self.start_connected,
        }
    }
}
