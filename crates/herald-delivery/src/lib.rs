//! Campaign delivery worker for bulk template messaging.
//!
//! This crate turns queued campaign jobs into outbound template messages.
//! A `JobConsumer` pulls jobs from a `JobSource`, and the `CampaignProcessor`
//! walks each campaign's pending recipients, resolving contacts, calling the
//! provider gateway, recording outcomes, and publishing progress snapshots.
//!
//! # Architecture
//!
//! One campaign runs at a time per worker, and a campaign is only ever
//! processed by the worker that holds its lease:
//!
//! 1. **Claim Job** - Consumer takes the next job from the queue
//! 2. **Acquire Lease** - Processor claims the campaign for this worker
//! 3. **Prepare** - Template, account, and pending recipients are loaded
//! 4. **Deliver** - Each recipient is sent in order, paced by a rate limiter
//! 5. **Finish** - Campaign moves to `completed` unless an operator stopped it
//!
//! # Key Features
//!
//! - **Cooperative Stop** - Campaign status is polled before every recipient,
//!   so pause and cancel take effect between sends
//! - **Idempotent Counters** - Counts are recomputed from recipient rows
//! - **Pluggable Seams** - Store, gateway, publisher, limiter, and clock are
//!   all traits with in-memory test doubles
//! - **Graceful Shutdown** - In-flight campaigns stop between recipients and
//!   their jobs return to the queue
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use herald_core::{storage::Storage, NoOpPublisher, RealClock};
//! use herald_delivery::{
//!     CampaignProcessor, CampaignWorker, CloudApiGateway, PgJobQueue, PostgresCampaignStore,
//!     ProcessorConfig, RateLimitConfig, WorkerConfig,
//! };
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool) -> herald_delivery::Result<()> {
//! let storage = Arc::new(Storage::new(pool));
//! let clock = Arc::new(RealClock::new());
//!
//! let processor = CampaignProcessor::new(
//!     Arc::new(PostgresCampaignStore::new(storage.clone())),
//!     Arc::new(CloudApiGateway::with_defaults()?),
//!     Arc::new(NoOpPublisher::new()),
//!     RateLimitConfig::default().build(clock.clone())?,
//!     clock.clone(),
//!     ProcessorConfig::default(),
//! );
//! let queue = Arc::new(PgJobQueue::new(storage, clock.clone()));
//!
//! let mut worker = CampaignWorker::new(queue, Arc::new(processor), clock, WorkerConfig::default());
//! worker.start()?;
//! worker.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod consumer;
pub mod contacts;
pub mod error;
pub mod gateway;
pub mod processor;
pub mod queue;
pub mod rate_limit;
pub mod stats;
pub mod storage;
pub mod template;
pub mod worker;

pub use consumer::{
    ConsumerConfig, ConsumerStats, JobConsumer, JobHandler, JobSource, ReceivedJob,
};
pub use contacts::{normalize_phone, ContactResolver};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use gateway::{CloudApiGateway, GatewayConfig, MessageGateway, TemplateSendRequest};
pub use processor::{CampaignProcessor, ProcessorConfig, RunOutcome};
pub use queue::PgJobQueue;
pub use rate_limit::{
    FixedIntervalLimiter, RateLimitConfig, RateLimiter, TokenBucketLimiter, UnlimitedLimiter,
};
pub use stats::{BroadcastPublisher, PgNotifyPublisher};
pub use storage::{CampaignStore, PostgresCampaignStore};
pub use template::MAX_TEMPLATE_PARAMS;
pub use worker::{CampaignWorker, WorkerConfig};

/// Default provider request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Default pause between successive sends in milliseconds.
pub const DEFAULT_SEND_INTERVAL_MS: u64 = 100;

/// Default lifetime of a campaign processing lease in seconds.
pub const DEFAULT_LEASE_TTL_SECONDS: u64 = 300;

/// Default wait between empty queue polls in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default backoff after a queue error in seconds.
pub const DEFAULT_ERROR_BACKOFF_SECONDS: u64 = 5;

/// Default time a claimed job stays invisible to other workers in seconds.
pub const DEFAULT_VISIBILITY_TIMEOUT_SECONDS: u64 = 900;

/// Default time allowed for the worker to stop in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;
