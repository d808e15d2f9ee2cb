//! Lifecycle tests for the campaign worker.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use herald_core::{CampaignJob, CampaignStatus};
use herald_delivery::{
    queue::mock::MemoryJobQueue, CampaignWorker, DeliveryError, JobHandler, RunOutcome,
    WorkerConfig,
};
use herald_testing::{CampaignBuilder, TestEnv};
use tokio_util::sync::CancellationToken;

/// Handler that ignores cancellation and never returns.
struct StuckHandler;

#[async_trait]
impl JobHandler for StuckHandler {
    async fn handle(
        &self,
        _job: &CampaignJob,
        _cancel: &CancellationToken,
    ) -> herald_delivery::Result<RunOutcome> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn worker_processes_queued_campaign() -> Result<()> {
    let env = TestEnv::new();
    let seeded = env.seed(CampaignBuilder::with_defaults().recipients(3)).await;
    let queue = Arc::new(MemoryJobQueue::new());
    queue.enqueue(seeded.id()).await;

    let mut worker = CampaignWorker::new(
        queue.clone(),
        Arc::new(env.processor()),
        env.clock_handle(),
        WorkerConfig::default(),
    );
    worker.start()?;
    assert!(worker.is_running());

    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.acknowledged().await.is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await?;

    assert_eq!(worker.stats().await.jobs_completed, 1);
    worker.shutdown().await?;

    assert_eq!(
        env.store.campaign(seeded.id()).await.map(|c| c.status),
        Some(CampaignStatus::Completed)
    );

    Ok(())
}

#[tokio::test]
async fn shutdown_without_start_succeeds() -> Result<()> {
    let env = TestEnv::new();
    let worker = CampaignWorker::new(
        Arc::new(MemoryJobQueue::new()),
        Arc::new(env.processor()),
        env.clock_handle(),
        WorkerConfig::default(),
    );

    worker.shutdown().await?;

    Ok(())
}

#[tokio::test]
async fn starting_twice_is_rejected() -> Result<()> {
    let env = TestEnv::new();
    let mut worker = CampaignWorker::new(
        Arc::new(MemoryJobQueue::new()),
        Arc::new(env.processor()),
        env.clock_handle(),
        WorkerConfig::default(),
    );

    worker.start()?;
    assert!(matches!(worker.start(), Err(DeliveryError::InternalError { .. })));

    worker.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn shutdown_times_out_when_run_does_not_yield() -> Result<()> {
    let env = TestEnv::new();
    let seeded = env.seed(CampaignBuilder::with_defaults().recipients(1)).await;
    let queue = Arc::new(MemoryJobQueue::new());
    queue.enqueue(seeded.id()).await;

    let config =
        WorkerConfig { shutdown_timeout: Duration::from_millis(50), ..WorkerConfig::default() };
    let mut worker =
        CampaignWorker::new(queue.clone(), Arc::new(StuckHandler), env.clock_handle(), config);
    worker.start()?;

    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.pending_len().await > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await?;

    let result = worker.shutdown().await;
    assert!(matches!(result, Err(DeliveryError::ShutdownTimeout { .. })));

    Ok(())
}

#[tokio::test]
async fn dropping_running_worker_cancels_it() -> Result<()> {
    let env = TestEnv::new();
    let mut worker = CampaignWorker::new(
        Arc::new(MemoryJobQueue::new()),
        Arc::new(env.processor()),
        env.clock_handle(),
        WorkerConfig::default(),
    );
    worker.start()?;
    let token = worker.cancellation_token();

    drop(worker);

    assert!(token.is_cancelled());
    Ok(())
}
