//! Worker lifecycle: spawns the job consumer and stops it gracefully.

use std::{sync::Arc, time::Duration};

use herald_core::Clock;
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    consumer::{ConsumerConfig, ConsumerStats, JobConsumer, JobHandler, JobSource},
    error::{DeliveryError, Result},
    DEFAULT_SHUTDOWN_TIMEOUT_SECONDS,
};

/// Worker settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Consumer loop timing.
    pub consumer: ConsumerConfig,

    /// Maximum time to wait for the in-flight campaign to stop.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            consumer: ConsumerConfig::default(),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECONDS),
        }
    }
}

/// Runs one job consumer on a background task.
///
/// Call `shutdown()` before dropping; a dropped worker that is still running
/// is cancelled without waiting.
pub struct CampaignWorker {
    source: Arc<dyn JobSource>,
    handler: Arc<dyn JobHandler>,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
    cancellation_token: CancellationToken,
    stats: Arc<RwLock<ConsumerStats>>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl CampaignWorker {
    /// Creates a stopped worker.
    pub fn new(
        source: Arc<dyn JobSource>,
        handler: Arc<dyn JobHandler>,
        clock: Arc<dyn Clock>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            source,
            handler,
            clock,
            config,
            cancellation_token: CancellationToken::new(),
            stats: Arc::new(RwLock::new(ConsumerStats::default())),
            handle: None,
        }
    }

    /// Spawns the consumer task and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns `InternalError` if the worker is already running or was shut
    /// down.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(DeliveryError::internal("campaign worker already started"));
        }
        if self.cancellation_token.is_cancelled() {
            return Err(DeliveryError::internal("campaign worker was cancelled"));
        }

        info!(
            poll_interval = ?self.config.consumer.poll_interval,
            shutdown_timeout = ?self.config.shutdown_timeout,
            "starting campaign worker"
        );

        let consumer = JobConsumer::new(
            self.source.clone(),
            self.config.consumer.clone(),
            self.clock.clone(),
            self.cancellation_token.clone(),
        );
        self.stats = consumer.stats_handle();

        let handler = self.handler.clone();
        let handle = tokio::spawn(async move {
            let result = consumer.consume(handler.as_ref()).await;

            if let Err(ref error) = result {
                error!(error = %error, "job consumer terminated with error");
            }

            result
        });

        self.handle = Some(handle);
        Ok(())
    }

    /// Whether the consumer task is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Consumer counters.
    pub async fn stats(&self) -> ConsumerStats {
        self.stats.read().await.clone()
    }

    /// Token that stops the worker when raised.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Stops the consumer and waits for the in-flight campaign to yield.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if the consumer does not stop in time, or
    /// `InternalError` if the consumer task panicked.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down campaign worker");
        self.cancellation_token.cancel();

        let Some(handle) = self.handle.take() else {
            info!("campaign worker was not started, shutdown completed immediately");
            return Ok(());
        };

        let timeout = self.config.shutdown_timeout;
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => {
                info!("campaign worker stopped");
                result
            },
            Ok(Err(join_error)) => {
                error!(error = %join_error, "job consumer task panicked");
                Err(DeliveryError::internal(format!("consumer task failed: {join_error}")))
            },
            Err(_elapsed) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "campaign worker shutdown timed out"
                );
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }
}

impl Drop for CampaignWorker {
    fn drop(&mut self) {
        let running = self.handle.as_ref().is_some_and(|handle| !handle.is_finished());

        if running && !self.cancellation_token.is_cancelled() {
            self.cancellation_token.cancel();
            warn!("CampaignWorker dropped while running; call shutdown() to stop it gracefully");
        }
    }
}
