//! Job consumption loop.
//!
//! The consumer pulls campaign jobs from a `JobSource` and hands each one to
//! a `JobHandler`, one at a time, until its cancellation token is raised.
//! Jobs are acknowledged once handled, whether the run succeeded or failed,
//! so one broken campaign never blocks the queue. A run interrupted by
//! shutdown is released instead, making the job visible to the next worker.
//!
//! A job whose campaign lease is held by another worker is neither
//! acknowledged nor released: it stays hidden until its visibility timeout
//! passes and is retried then. While a run is in progress the consumer
//! extends the job's visibility every `heartbeat_interval` so a long
//! campaign is never handed to a second worker.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use herald_core::{CampaignJob, Clock, JobId};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{ErrorCategory, Result},
    processor::RunOutcome,
    DEFAULT_ERROR_BACKOFF_SECONDS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_VISIBILITY_TIMEOUT_SECONDS,
};

/// A job taken from the queue, invisible to other consumers until it is
/// acknowledged, released, or its visibility timeout passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedJob {
    /// Queue id used for acknowledgement.
    pub job_id: JobId,
    /// Job payload.
    pub job: CampaignJob,
    /// Delivery attempt, starting at 1.
    pub attempt: i32,
}

/// Queue the consumer reads from.
pub trait JobSource: Send + Sync + 'static {
    /// Takes the next available job, if any.
    fn receive(&self) -> Pin<Box<dyn Future<Output = Result<Option<ReceivedJob>>> + Send + '_>>;

    /// Removes a handled job from the queue.
    fn acknowledge(&self, job_id: JobId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns an unfinished job to the queue immediately.
    fn release(&self, job_id: JobId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Pushes the job's visibility timeout forward from now.
    fn extend(&self, job_id: JobId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Handles one campaign job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs the job; `cancel` is raised when the worker shuts down.
    async fn handle(&self, job: &CampaignJob, cancel: &CancellationToken) -> Result<RunOutcome>;
}

/// Consumer loop timing.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Wait before polling an empty queue again.
    pub poll_interval: Duration,

    /// Wait after a queue error.
    pub error_backoff: Duration,

    /// How often a running job's visibility is extended. Must be well below
    /// the queue's visibility timeout.
    pub heartbeat_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            error_backoff: Duration::from_secs(DEFAULT_ERROR_BACKOFF_SECONDS),
            heartbeat_interval: Duration::from_secs(DEFAULT_VISIBILITY_TIMEOUT_SECONDS / 3),
        }
    }
}

/// Counters for consumer monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Jobs taken from the queue.
    pub jobs_received: u64,
    /// Jobs whose handler returned an outcome.
    pub jobs_completed: u64,
    /// Jobs whose handler returned an error.
    pub jobs_failed: u64,
    /// Jobs handed back to the queue on shutdown.
    pub jobs_released: u64,
    /// Jobs left on the queue because another worker held the lease.
    pub jobs_deferred: u64,
}

/// Pulls jobs and dispatches them to a handler.
pub struct JobConsumer {
    source: Arc<dyn JobSource>,
    config: ConsumerConfig,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
    stats: Arc<RwLock<ConsumerStats>>,
}

impl JobConsumer {
    /// Creates a consumer stopped by `cancellation_token`.
    pub fn new(
        source: Arc<dyn JobSource>,
        config: ConsumerConfig,
        clock: Arc<dyn Clock>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            source,
            config,
            clock,
            cancellation_token,
            stats: Arc::new(RwLock::new(ConsumerStats::default())),
        }
    }

    /// Snapshot of the consumer counters.
    pub async fn stats(&self) -> ConsumerStats {
        self.stats.read().await.clone()
    }

    /// Shared handle to the consumer counters.
    pub fn stats_handle(&self) -> Arc<RwLock<ConsumerStats>> {
        self.stats.clone()
    }

    /// Consumes jobs until cancelled.
    pub async fn consume(&self, handler: &dyn JobHandler) -> Result<()> {
        info!("job consumer starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                info!("job consumer received shutdown signal");
                break;
            }

            match self.source.receive().await {
                Ok(Some(received)) => {
                    if !self.dispatch(handler, received).await {
                        break;
                    }
                },
                Ok(None) => {
                    tokio::select! {
                        () = self.clock.sleep(self.config.poll_interval) => {}
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
                Err(error) => {
                    error!(error = %error, "failed to receive job");
                    tokio::select! {
                        () = self.clock.sleep(self.config.error_backoff) => {}
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        info!("job consumer stopped");
        Ok(())
    }

    /// Runs one job. Returns `false` when the consumer should stop.
    async fn dispatch(&self, handler: &dyn JobHandler, received: ReceivedJob) -> bool {
        let campaign_id = received.job.campaign_id;
        self.stats.write().await.jobs_received += 1;

        debug!(
            job_id = %received.job_id,
            campaign_id = %campaign_id,
            attempt = received.attempt,
            "received campaign job"
        );

        match self.run_with_heartbeat(handler, &received).await {
            Ok(RunOutcome::Cancelled) => {
                info!(campaign_id = %campaign_id, "run interrupted, releasing job");
                if let Err(error) = self.source.release(received.job_id).await {
                    warn!(job_id = %received.job_id, error = %error, "failed to release job");
                }
                self.stats.write().await.jobs_released += 1;
                return false;
            },
            Ok(RunOutcome::LeaseHeld) => {
                info!(
                    campaign_id = %campaign_id,
                    job_id = %received.job_id,
                    "campaign leased elsewhere, leaving job for retry after visibility timeout"
                );
                self.stats.write().await.jobs_deferred += 1;
                return true;
            },
            Ok(outcome) => {
                info!(campaign_id = %campaign_id, outcome = ?outcome, "campaign job handled");
                self.stats.write().await.jobs_completed += 1;
            },
            Err(error) => {
                error!(
                    campaign_id = %campaign_id,
                    error = %error,
                    category = %ErrorCategory::from(&error),
                    "campaign job failed"
                );
                self.stats.write().await.jobs_failed += 1;
            },
        }

        if let Err(error) = self.source.acknowledge(received.job_id).await {
            warn!(job_id = %received.job_id, error = %error, "failed to acknowledge job");
        }

        true
    }

    /// Runs the handler, extending the job's visibility while it works.
    async fn run_with_heartbeat(
        &self,
        handler: &dyn JobHandler,
        received: &ReceivedJob,
    ) -> Result<RunOutcome> {
        let mut run = handler.handle(&received.job, &self.cancellation_token);

        loop {
            tokio::select! {
                biased;
                outcome = &mut run => return outcome,
                () = self.clock.sleep(self.config.heartbeat_interval) => {
                    match self.source.extend(received.job_id).await {
                        Ok(()) => debug!(job_id = %received.job_id, "job visibility extended"),
                        Err(error) => warn!(
                            job_id = %received.job_id,
                            error = %error,
                            "failed to extend job visibility"
                        ),
                    }
                },
            }
        }
    }
}
