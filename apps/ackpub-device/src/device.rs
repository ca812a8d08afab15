use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ackpub_core::ResultCode;
use ackpub_node::{completion_channel, BinderConfig, Completion, CompletionTable, PublishCallback};
use ackpub_transport::SendPrimitive;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub event_name: String,
    pub payload_prefix: String,
    pub publish_interval: Duration,
    /// Stop after this many publish attempts, once their completions arrive.
    pub max_publishes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Published { counter: u64 },
    Offline,
}

/// Totals reported when the loop exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceReport {
    pub published: u64,
    pub skipped_offline: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub last_error: Option<ResultCode>,
}

impl DeviceReport {
    fn record(&mut self, completion: &Completion) {
        if completion.code.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            self.last_error = Some(completion.code);
        }
    }

    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed
    }
}

/// Periodic publisher: every interval, if the cloud is up, publishes
/// `<prefix>=<counter>` and logs the completion when it comes back.
pub struct Device<P: SendPrimitive> {
    binder: PublishCallback<P>,
    completions: UnboundedReceiver<Completion>,
    settings: DeviceSettings,
    counter: u64,
    report: DeviceReport,
}

impl<P: SendPrimitive> Device<P> {
    pub fn new(primitive: P, binder_config: BinderConfig, settings: DeviceSettings) -> Self {
        let (handler, completions) = completion_channel();
        let binder = PublishCallback::new(CompletionTable::shared(), primitive, binder_config)
            .with_handler(handler);
        Self {
            binder,
            completions,
            settings,
            counter: 0,
            report: DeviceReport::default(),
        }
    }

    /// One pass of the publish loop body.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.binder.primitive().is_connected() {
            self.report.skipped_offline += 1;
            debug!("cloud not connected; skipping publish");
            return TickOutcome::Offline;
        }

        self.counter += 1;
        let payload = format!("{}={}", self.settings.payload_prefix, self.counter);
        info!(event = %self.settings.event_name, payload = %payload, "about to publish");
        self.report.published += 1;
        self.binder
            .publish_with_data(&self.settings.event_name, payload, None);
        TickOutcome::Published {
            counter: self.counter,
        }
    }

    /// Runs until `shutdown` is raised or the publish limit is reached and
    /// every completion for it has arrived.
    pub async fn run(mut self, shutdown: Arc<AtomicBool>) -> DeviceReport {
        info!(
            event = %self.settings.event_name,
            interval = ?self.settings.publish_interval,
            limit = ?self.settings.max_publishes,
            "device loop started"
        );
        let mut next_publish = Instant::now();

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("shutdown requested");
                break;
            }
            if self.limit_reached() && self.report.completed() >= self.report.published {
                break;
            }

            tokio::select! {
                _ = sleep_until(next_publish), if !self.limit_reached() => {
                    if let TickOutcome::Published { counter } = self.tick() {
                        debug!(counter, in_flight = self.binder.is_in_progress(), "publish issued");
                    }
                    next_publish = Instant::now() + self.settings.publish_interval;
                }
                maybe = self.completions.recv() => match maybe {
                    Some(completion) => self.on_completion(completion),
                    None => break,
                },
                _ = sleep(SHUTDOWN_POLL) => {}
            }
        }

        if self.binder.is_in_progress() {
            warn!("exiting with a publish still in flight");
        }
        info!(
            published = self.report.published,
            succeeded = self.report.succeeded,
            failed = self.report.failed,
            "device loop stopped"
        );
        self.report
    }

    fn limit_reached(&self) -> bool {
        self.settings
            .max_publishes
            .is_some_and(|max| self.report.published + self.report.skipped_offline >= max)
    }

    fn on_completion(&mut self, completion: Completion) {
        info!(code = %completion.code, "callback called");
        if !completion.code.is_success() {
            let health = self.binder.primitive().health_snapshot();
            warn!(
                code = %completion.code,
                retransmissions = health.retransmissions,
                timed_out = health.timed_out,
                "publish failed"
            );
        }
        self.report.record(&completion);
    }
}
