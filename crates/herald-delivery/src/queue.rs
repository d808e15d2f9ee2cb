//! Campaign job queues.
//!
//! `PgJobQueue` keeps jobs in the `campaign_jobs` table. A claimed job is
//! hidden for the visibility timeout; if the worker dies before
//! acknowledging it, the job becomes visible again and another worker picks
//! it up. `mock::MemoryJobQueue` gives tests the same contract in memory.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use herald_core::{storage::Storage, CampaignId, Clock, JobId};

use crate::{
    consumer::{JobSource, ReceivedJob},
    error::{DeliveryError, Result},
    DEFAULT_VISIBILITY_TIMEOUT_SECONDS,
};

/// PostgreSQL-backed job queue.
pub struct PgJobQueue {
    storage: Arc<Storage>,
    clock: Arc<dyn Clock>,
    visibility_timeout: Duration,
}

impl PgJobQueue {
    /// Creates a queue with the default visibility timeout.
    pub fn new(storage: Arc<Storage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            visibility_timeout: Duration::from_secs(DEFAULT_VISIBILITY_TIMEOUT_SECONDS),
        }
    }

    /// Sets how long a claimed job stays hidden.
    #[must_use]
    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    /// Enqueues a start job for a campaign.
    pub async fn enqueue(&self, campaign_id: CampaignId) -> Result<JobId> {
        Ok(self.storage.campaign_jobs.enqueue(campaign_id).await?)
    }

    fn hidden_until(&self) -> Result<chrono::DateTime<chrono::Utc>> {
        let timeout = chrono::Duration::from_std(self.visibility_timeout).map_err(|e| {
            DeliveryError::configuration(format!("invalid visibility timeout: {e}"))
        })?;
        Ok(self.clock.now_utc() + timeout)
    }
}

impl JobSource for PgJobQueue {
    fn receive(&self) -> Pin<Box<dyn Future<Output = Result<Option<ReceivedJob>>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now_utc();
            let locked_until = self.hidden_until()?;

            let claimed = self.storage.campaign_jobs.claim_next(now, locked_until).await?;

            Ok(claimed.map(|job| ReceivedJob {
                job_id: job.id,
                job: job.payload.0,
                attempt: job.attempts,
            }))
        })
    }

    fn acknowledge(&self, job_id: JobId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { Ok(storage.campaign_jobs.delete(job_id).await?) })
    }

    fn release(&self, job_id: JobId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { Ok(storage.campaign_jobs.release(job_id).await?) })
    }

    fn extend(&self, job_id: JobId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let locked_until = self.hidden_until()?;
            Ok(self.storage.campaign_jobs.extend(job_id, locked_until).await?)
        })
    }
}

pub mod mock {
    //! In-memory job queue for tests.

    use std::{collections::VecDeque, future::Future, pin::Pin, sync::Arc};

    use herald_core::{CampaignId, CampaignJob, JobId};
    use tokio::sync::RwLock;

    use crate::{
        consumer::{JobSource, ReceivedJob},
        error::{DeliveryError, Result},
    };

    /// FIFO queue that records acknowledgements, releases and visibility
    /// extensions.
    ///
    /// Released jobs go back to the front of the queue with their attempt
    /// count kept.
    #[derive(Default)]
    pub struct MemoryJobQueue {
        pending: Arc<RwLock<VecDeque<ReceivedJob>>>,
        in_flight: Arc<RwLock<Vec<ReceivedJob>>>,
        acknowledged: Arc<RwLock<Vec<JobId>>>,
        released: Arc<RwLock<Vec<JobId>>>,
        extended: Arc<RwLock<Vec<JobId>>>,
        receive_failures: Arc<RwLock<usize>>,
    }

    impl MemoryJobQueue {
        /// Creates an empty queue.
        pub fn new() -> Self {
            Self::default()
        }

        /// Adds a job for `campaign_id`.
        pub async fn enqueue(&self, campaign_id: CampaignId) -> JobId {
            let job_id = JobId::new();
            self.pending.write().await.push_back(ReceivedJob {
                job_id,
                job: CampaignJob { campaign_id },
                attempt: 0,
            });
            job_id
        }

        /// Makes the next `count` receives fail.
        pub async fn fail_receives(&self, count: usize) {
            *self.receive_failures.write().await = count;
        }

        /// Jobs waiting to be received.
        pub async fn pending_len(&self) -> usize {
            self.pending.read().await.len()
        }

        /// Jobs received but neither acknowledged nor released.
        pub async fn in_flight_len(&self) -> usize {
            self.in_flight.read().await.len()
        }

        /// Jobs acknowledged so far.
        pub async fn acknowledged(&self) -> Vec<JobId> {
            self.acknowledged.read().await.clone()
        }

        /// Jobs released so far.
        pub async fn released(&self) -> Vec<JobId> {
            self.released.read().await.clone()
        }

        /// One entry per visibility extension, in order.
        pub async fn extended(&self) -> Vec<JobId> {
            self.extended.read().await.clone()
        }
    }

    impl JobSource for MemoryJobQueue {
        fn receive(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<Option<ReceivedJob>>> + Send + '_>> {
            Box::pin(async move {
                {
                    let mut failures = self.receive_failures.write().await;
                    if *failures > 0 {
                        *failures -= 1;
                        return Err(DeliveryError::database("queue unavailable"));
                    }
                }

                let Some(mut job) = self.pending.write().await.pop_front() else {
                    return Ok(None);
                };
                job.attempt += 1;
                self.in_flight.write().await.push(job);
                Ok(Some(job))
            })
        }

        fn acknowledge(
            &self,
            job_id: JobId,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                self.in_flight.write().await.retain(|job| job.job_id != job_id);
                self.acknowledged.write().await.push(job_id);
                Ok(())
            })
        }

        fn release(&self, job_id: JobId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                let job = {
                    let mut in_flight = self.in_flight.write().await;
                    let position = in_flight.iter().position(|job| job.job_id == job_id);
                    position.map(|index| in_flight.remove(index))
                };
                if let Some(job) = job {
                    self.pending.write().await.push_front(job);
                }
                self.released.write().await.push(job_id);
                Ok(())
            })
        }

        fn extend(&self, job_id: JobId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                self.extended.write().await.push(job_id);
                Ok(())
            })
        }
    }
}
