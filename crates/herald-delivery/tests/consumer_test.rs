//! Integration tests for the job consumer loop.
//!
//! Drives the consumer with the in-memory queue and a real processor over
//! the mock store, checking acknowledgement, release on shutdown, deferral
//! of leased campaigns, visibility heartbeats, and recovery from queue
//! errors.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use herald_core::{
    CampaignCounters, CampaignId, CampaignJob, CampaignStatus, Clock, RecipientStatus,
};
use herald_delivery::{
    queue::mock::MemoryJobQueue, ConsumerConfig, ConsumerStats, JobConsumer, JobHandler,
    RunOutcome,
};
use herald_testing::{CampaignBuilder, TestClock, TestEnv};
use tokio_util::sync::CancellationToken;

fn consumer(env: &TestEnv, queue: &Arc<MemoryJobQueue>, token: &CancellationToken) -> JobConsumer {
    JobConsumer::new(queue.clone(), ConsumerConfig::default(), env.clock_handle(), token.clone())
}

/// Handler whose run lasts until the virtual clock reaches `duration`.
struct LongRunHandler {
    clock: TestClock,
    duration: Duration,
}

#[async_trait]
impl JobHandler for LongRunHandler {
    async fn handle(
        &self,
        _job: &CampaignJob,
        _cancel: &CancellationToken,
    ) -> herald_delivery::Result<RunOutcome> {
        while self.clock.elapsed() < self.duration {
            tokio::task::yield_now().await;
        }
        Ok(RunOutcome::Completed { counters: CampaignCounters::default() })
    }
}

/// Runs the consumer until `acknowledged` jobs have been acknowledged, then
/// raises the token.
async fn consume_until_acknowledged(
    consumer: &JobConsumer,
    handler: &dyn JobHandler,
    queue: &MemoryJobQueue,
    token: &CancellationToken,
    acknowledged: usize,
) -> Result<()> {
    let watcher = async {
        while queue.acknowledged().await.len() < acknowledged {
            tokio::task::yield_now().await;
        }
        token.cancel();
    };

    let (result, ()) = tokio::join!(consumer.consume(handler), watcher);
    Ok(result?)
}

#[tokio::test]
async fn acknowledges_completed_and_failed_jobs() -> Result<()> {
    let env = TestEnv::new();
    let seeded = env.seed(CampaignBuilder::with_defaults().recipients(2)).await;
    let queue = Arc::new(MemoryJobQueue::new());
    let good = queue.enqueue(seeded.id()).await;
    let missing = queue.enqueue(CampaignId::new()).await;

    let token = CancellationToken::new();
    let consumer = consumer(&env, &queue, &token);
    let processor = env.processor();

    consume_until_acknowledged(&consumer, &processor, &queue, &token, 2).await?;

    assert_eq!(queue.acknowledged().await, vec![good, missing]);
    assert!(queue.released().await.is_empty());
    assert_eq!(
        consumer.stats().await,
        ConsumerStats {
            jobs_received: 2,
            jobs_completed: 1,
            jobs_failed: 1,
            jobs_released: 0,
            jobs_deferred: 0,
        }
    );
    assert_eq!(
        env.store.campaign(seeded.id()).await.map(|c| c.status),
        Some(CampaignStatus::Completed)
    );

    Ok(())
}

#[tokio::test]
async fn interrupted_run_releases_job_for_next_worker() -> Result<()> {
    let env = TestEnv::new();
    let seeded = env.seed(CampaignBuilder::with_defaults().recipients(3)).await;
    let queue = Arc::new(MemoryJobQueue::new());
    let job_id = queue.enqueue(seeded.id()).await;

    let first_token = CancellationToken::new();
    env.gateway.cancel_after(1, first_token.clone()).await;
    let first = consumer(&env, &queue, &first_token);
    let processor = env.processor();

    first.consume(&processor).await?;

    assert_eq!(queue.released().await, vec![job_id]);
    assert!(queue.acknowledged().await.is_empty());
    assert_eq!(queue.pending_len().await, 1);
    assert_eq!(first.stats().await.jobs_released, 1);
    assert_eq!(
        env.store.campaign(seeded.id()).await.map(|c| c.status),
        Some(CampaignStatus::Processing)
    );

    let second_token = CancellationToken::new();
    let second = consumer(&env, &queue, &second_token);
    consume_until_acknowledged(&second, &processor, &queue, &second_token, 1).await?;

    assert_eq!(queue.acknowledged().await, vec![job_id]);
    assert_eq!(env.gateway.send_count().await, 3, "resumed run sends only the remaining recipients");
    assert_eq!(
        env.store.campaign(seeded.id()).await.map(|c| c.status),
        Some(CampaignStatus::Completed)
    );

    Ok(())
}

#[tokio::test]
async fn queue_errors_back_off_and_recover() -> Result<()> {
    let env = TestEnv::new();
    let seeded = env.seed(CampaignBuilder::with_defaults()).await;
    let queue = Arc::new(MemoryJobQueue::new());
    queue.enqueue(seeded.id()).await;
    queue.fail_receives(2).await;

    let token = CancellationToken::new();
    let consumer = consumer(&env, &queue, &token);
    let processor = env.processor();

    consume_until_acknowledged(&consumer, &processor, &queue, &token, 1).await?;

    assert_eq!(consumer.stats().await.jobs_completed, 1);
    assert!(env.clock.elapsed() >= Duration::from_secs(10), "two error backoffs of 5s");

    Ok(())
}

#[tokio::test]
async fn cancelled_consumer_takes_no_jobs() -> Result<()> {
    let env = TestEnv::new();
    let seeded = env.seed(CampaignBuilder::with_defaults().recipients(1)).await;
    let queue = Arc::new(MemoryJobQueue::new());
    queue.enqueue(seeded.id()).await;

    let token = CancellationToken::new();
    token.cancel();
    let consumer = consumer(&env, &queue, &token);

    consumer.consume(&env.processor()).await?;

    assert_eq!(queue.pending_len().await, 1);
    assert_eq!(consumer.stats().await, ConsumerStats::default());
    assert_eq!(env.gateway.send_count().await, 0);

    Ok(())
}

#[tokio::test]
async fn leased_campaign_job_is_left_for_retry() -> Result<()> {
    let env = TestEnv::new();
    let seeded = env.seed(CampaignBuilder::with_defaults().recipients(3)).await;
    env.store
        .set_lease(seeded.id(), "herald-other", env.clock.now_utc() + ChronoDuration::days(1))
        .await;
    let queue = Arc::new(MemoryJobQueue::new());
    queue.enqueue(seeded.id()).await;

    let token = CancellationToken::new();
    let consumer = consumer(&env, &queue, &token);
    let processor = env.processor();

    let watcher = async {
        while consumer.stats().await.jobs_deferred < 1 {
            tokio::task::yield_now().await;
        }
        token.cancel();
    };
    let (result, ()) = tokio::join!(consumer.consume(&processor), watcher);
    result?;

    assert!(queue.acknowledged().await.is_empty(), "job must survive for the lease holder");
    assert!(queue.released().await.is_empty(), "job stays hidden until its visibility timeout");
    assert_eq!(queue.in_flight_len().await, 1);
    assert_eq!(consumer.stats().await.jobs_completed, 0);

    let campaign = env.store.campaign(seeded.id()).await.expect("campaign exists");
    assert_eq!(campaign.status, CampaignStatus::Queued);
    assert_eq!(campaign.lease_owner.as_deref(), Some("herald-other"));

    let recipients = env.store.recipients(seeded.id()).await;
    assert_eq!(recipients.len(), 3);
    assert!(recipients.iter().all(|r| r.status == RecipientStatus::Pending));
    assert_eq!(env.gateway.send_count().await, 0);

    Ok(())
}

#[tokio::test]
async fn long_run_extends_job_visibility() -> Result<()> {
    let env = TestEnv::new();
    let queue = Arc::new(MemoryJobQueue::new());
    let job_id = queue.enqueue(CampaignId::new()).await;

    let token = CancellationToken::new();
    let config = ConsumerConfig {
        heartbeat_interval: Duration::from_secs(600),
        ..ConsumerConfig::default()
    };
    let consumer = JobConsumer::new(queue.clone(), config, env.clock_handle(), token.clone());
    let handler =
        LongRunHandler { clock: env.clock.clone(), duration: Duration::from_secs(3600) };

    consume_until_acknowledged(&consumer, &handler, &queue, &token, 1).await?;

    let extended = queue.extended().await;
    assert!(!extended.is_empty(), "visibility extended while the run was in progress");
    assert!(extended.iter().all(|id| *id == job_id));
    assert_eq!(queue.acknowledged().await, vec![job_id]);
    assert_eq!(consumer.stats().await.jobs_completed, 1);

    Ok(())
}
