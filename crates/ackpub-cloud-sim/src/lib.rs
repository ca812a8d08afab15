//! Simulated cloud send primitive for ackpub.
//!
//! This crate provides a `SendPrimitive` implementation backed by a worker
//! thread that models link latency, packet loss, retransmission and the
//! acknowledgement deadline. Completions are delivered from the worker
//! thread, never from the caller of `attempt_send`.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ackpub_core::{PublishFlags, PublishOutcome, PublishRequest, ResultCode};
use ackpub_transport::{
    CloudHealthSnapshot, CloudLimits, CompletionTicket, RejectReason, SendPrimitive,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SimulatedCloudConfig {
    pub limits: CloudLimits,
    /// Requests that may wait behind the one being transmitted.
    pub queue_capacity: usize,
    /// Round trip for one transmission and its acknowledgement.
    pub ack_latency: Duration,
    /// Deadline for an acknowledged publish, spread across all attempts.
    pub ack_timeout: Duration,
    /// Chance in `[0.0, 1.0]` that a single transmission is lost.
    pub loss_probability: f64,
    /// Transmissions per acknowledged publish, including the first.
    pub max_attempts: u32,
    /// Fixed RNG seed for reproducible loss patterns.
    pub seed: Option<u64>,
    pub start_connected: bool,
}

impl Default for SimulatedCloudConfig {
    fn default() -> Self {
        Self {
            limits: CloudLimits::default(),
            queue_capacity: 8,
            ack_latency: Duration::from_millis(150),
            ack_timeout: Duration::from_secs(20),
            loss_probability: 0.0,
            max_attempts: 3,
            seed: None,
            start_connected: true,
        }
    }
}

impl SimulatedCloudConfig {
    pub fn validate(&self) -> Result<(), SimulatedCloudError> {
        if !(0.0..=1.0).contains(&self.loss_probability) {
            return Err(SimulatedCloudError::InvalidConfig(
                "loss_probability must be within [0.0, 1.0]",
            ));
        }
        if self.max_attempts == 0 {
            return Err(SimulatedCloudError::InvalidConfig(
                "max_attempts must be at least 1",
            ));
        }
        if self.queue_capacity == 0 {
            return Err(SimulatedCloudError::InvalidConfig(
                "queue_capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SimulatedCloudError {
    #[error("invalid simulated cloud config: {0}")]
    InvalidConfig(&'static str),
    #[error("failed to spawn cloud worker: {0}")]
    Spawn(#[from] std::io::Error),
}

struct Job {
    request: PublishRequest,
    ticket: CompletionTicket,
}

#[derive(Debug, Default)]
struct SimulatedCloudMetrics {
    accepted: AtomicU64,
    rejected: AtomicU64,
    acknowledged: AtomicU64,
    timed_out: AtomicU64,
    failed: AtomicU64,
    retransmissions: AtomicU64,
    queued: AtomicU64,
    last_error: AtomicI32,
}

impl SimulatedCloudMetrics {
    fn record(&self, code: ResultCode) {
        match code.outcome() {
            PublishOutcome::Delivered => self.acknowledged.fetch_add(1, Ordering::Relaxed),
            PublishOutcome::TimedOut => self.timed_out.fetch_add(1, Ordering::Relaxed),
            PublishOutcome::Failed => self.failed.fetch_add(1, Ordering::Relaxed),
        };
        if !code.is_success() {
            self.last_error.store(code.0, Ordering::Relaxed);
        }
    }
}

/// Send primitive that completes requests from a background worker.
pub struct SimulatedCloud {
    limits: CloudLimits,
    job_tx: tokio_mpsc::Sender<Job>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
    metrics: Arc<SimulatedCloudMetrics>,
}

impl SimulatedCloud {
    pub fn start(config: SimulatedCloudConfig) -> Result<Self, SimulatedCloudError> {
        config.validate()?;

        let (job_tx, job_rx) = tokio_mpsc::channel::<Job>(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let connected = Arc::new(AtomicBool::new(config.start_connected));
        let metrics = Arc::new(SimulatedCloudMetrics::default());

        let worker_connected = Arc::clone(&connected);
        let worker_metrics = Arc::clone(&metrics);
        let worker_config = config.clone();
        let worker = thread::Builder::new()
            .name("ackpub-cloud-sim".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(err) => {
                        error!(%err, "cloud worker runtime failed to start");
                        worker_connected.store(false, Ordering::Relaxed);
                        cancel_queued(job_rx, &worker_metrics);
                        return;
                    }
                };
                runtime.block_on(run_cloud_worker(
                    worker_config,
                    worker_connected,
                    worker_metrics,
                    job_rx,
                    shutdown_rx,
                ));
            })?;

        info!(
            queue_capacity = config.queue_capacity,
            max_attempts = config.max_attempts,
            "simulated cloud started"
        );

        Ok(Self {
            limits: config.limits,
            job_tx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(worker)),
            connected,
            metrics,
        })
    }

    /// Simulates the link going up or down.
    ///
    /// New requests are rejected while down; transmissions already in flight
    /// count as lost until the link returns.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    /// Stops the worker and waits for it. The request being transmitted and
    /// everything still queued complete with `CANCELLED`; later sends are
    /// rejected.
    ///
    /// Called from a completion handler (on the worker itself) this only
    /// signals the worker; it does not wait.
    pub fn shutdown(&self) {
        let shutdown_tx = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            // Released from a completion handler; the worker exits on its own
            // once the handler returns.
            debug!("simulated cloud released on its worker; skipping join");
            return;
        }
        if worker.join().is_err() {
            error!("cloud worker panicked");
        }
        info!("simulated cloud stopped");
    }

    fn admit(&self, request: PublishRequest, ticket: CompletionTicket) -> Result<(), RejectReason> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(RejectReason::NotConnected);
        }
        self.limits.validate(&request)?;

        let token = ticket.token();
        let event = request.event_name.clone();
        self.metrics.queued.fetch_add(1, Ordering::Relaxed);
        self.job_tx
            .try_send(Job { request, ticket })
            .map_err(|err| {
                self.metrics.queued.fetch_sub(1, Ordering::Relaxed);
                match err {
                    tokio_mpsc::error::TrySendError::Full(_) => RejectReason::QueueFull,
                    tokio_mpsc::error::TrySendError::Closed(_) => RejectReason::Closed,
                }
            })?;
        debug!(%token, event = %event, "simulated cloud accepted request");
        Ok(())
    }
}

impl Drop for SimulatedCloud {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SendPrimitive for SimulatedCloud {
    fn attempt_send(
        &self,
        request: PublishRequest,
        ticket: CompletionTicket,
    ) -> Result<(), RejectReason> {
        match self.admit(request, ticket) {
            Ok(()) => {
                self.metrics.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(reason) => {
                self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(%reason, "simulated cloud rejected request");
                Err(reason)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn health_snapshot(&self) -> CloudHealthSnapshot {
        let last_error = self.metrics.last_error.load(Ordering::Relaxed);
        CloudHealthSnapshot {
            accepted: self.metrics.accepted.load(Ordering::Relaxed),
            rejected: self.metrics.rejected.load(Ordering::Relaxed),
            acknowledged: self.metrics.acknowledged.load(Ordering::Relaxed),
            timed_out: self.metrics.timed_out.load(Ordering::Relaxed),
            failed: self.metrics.failed.load(Ordering::Relaxed),
            retransmissions: self.metrics.retransmissions.load(Ordering::Relaxed),
            queued: self.metrics.queued.load(Ordering::Relaxed),
            last_error: (last_error != 0).then_some(ResultCode(last_error)),
        }
    }
}

async fn run_cloud_worker(
    config: SimulatedCloudConfig,
    connected: Arc<AtomicBool>,
    metrics: Arc<SimulatedCloudMetrics>,
    mut job_rx: tokio_mpsc::Receiver<Job>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    loop {
        let job = tokio::select! {
            _ = &mut shutdown_rx => break,
            maybe_job = job_rx.recv() => match maybe_job {
                Some(job) => job,
                None => break,
            },
        };
        metrics.queued.fetch_sub(1, Ordering::Relaxed);

        let Job { request, ticket } = job;
        let token = ticket.token();
        let code = tokio::select! {
            _ = &mut shutdown_rx => {
                metrics.record(ResultCode::CANCELLED);
                ticket.complete(ResultCode::CANCELLED, None);
                break;
            }
            code = transmit(request.flags, &config, &connected, &metrics, &mut rng) => code,
        };

        debug!(%token, %code, event = %request.event_name, "simulated cloud completed request");
        metrics.record(code);
        ticket.complete(code, None);
    }

    connected.store(false, Ordering::Relaxed);
    cancel_queued(job_rx, &metrics);
}

/// Runs one publish through the simulated link and returns its result code.
async fn transmit(
    flags: PublishFlags,
    config: &SimulatedCloudConfig,
    connected: &AtomicBool,
    metrics: &SimulatedCloudMetrics,
    rng: &mut StdRng,
) -> ResultCode {
    if !flags.requires_ack() {
        sleep(config.ack_latency).await;
        return ResultCode::NONE;
    }

    let slot = config.ack_timeout / config.max_attempts;
    for attempt in 0..config.max_attempts {
        if attempt > 0 {
            metrics.retransmissions.fetch_add(1, Ordering::Relaxed);
            debug!(attempt, "retransmitting unacknowledged publish");
        }
        let lost = !connected.load(Ordering::Relaxed) || rng.gen_bool(config.loss_probability);
        if !lost && config.ack_latency < slot {
            sleep(config.ack_latency).await;
            return ResultCode::NONE;
        }
        sleep(slot).await;
    }
    ResultCode::TIMEOUT
}

/// Completes everything still queued with `CANCELLED` so no accepted ticket
/// is left without a delivery.
fn cancel_queued(mut job_rx: tokio_mpsc::Receiver<Job>, metrics: &SimulatedCloudMetrics) {
    job_rx.close();
    while let Ok(job) = job_rx.try_recv() {
        metrics.queued.fetch_sub(1, Ordering::Relaxed);
        metrics.record(ResultCode::CANCELLED);
        job.ticket.complete(ResultCode::CANCELLED, None);
    }
}
