//! Test infrastructure for deterministic campaign runs.
//!
//! Bundles the in-memory store, a scripted gateway, a recording publisher,
//! and a virtual clock into a `TestEnv`, so integration tests can run a full
//! campaign, pause or cancel it mid-flight, and assert on every write without
//! a database or network.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::sync::Arc;

pub use herald_core::TestClock;
use herald_core::Clock;
pub use herald_delivery::storage::mock::{FailPoint, MockCampaignStore};
use herald_delivery::{
    CampaignProcessor, FixedIntervalLimiter, ProcessorConfig, RateLimiter,
    DEFAULT_SEND_INTERVAL_MS,
};

pub mod fixtures;
pub mod gateway;
pub mod publisher;

pub use fixtures::{CampaignBuilder, SeededCampaign};
pub use gateway::ScriptedGateway;
pub use publisher::RecordingPublisher;

/// Lease owner used by processors built from a `TestEnv`.
pub const TEST_WORKER_ID: &str = "herald-test-worker";

/// In-memory environment for processor tests.
pub struct TestEnv {
    /// Store holding campaigns, recipients, contacts, and messages.
    pub store: Arc<MockCampaignStore>,
    /// Gateway recording requests and returning scripted results.
    pub gateway: Arc<ScriptedGateway>,
    /// Publisher recording every snapshot.
    pub publisher: Arc<RecordingPublisher>,
    /// Virtual clock shared by the processor and its rate limiter.
    pub clock: TestClock,
}

impl TestEnv {
    /// Creates an empty environment.
    pub fn new() -> Self {
        Self {
            store: Arc::new(MockCampaignStore::new()),
            gateway: Arc::new(ScriptedGateway::new()),
            publisher: Arc::new(RecordingPublisher::new()),
            clock: TestClock::new(),
        }
    }

    /// Processor configuration used by `processor()`.
    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig { worker_id: TEST_WORKER_ID.to_string(), ..ProcessorConfig::default() }
    }

    /// Processor with the default fixed-interval pacing on the virtual clock.
    pub fn processor(&self) -> CampaignProcessor {
        let limiter = Arc::new(FixedIntervalLimiter::new(
            std::time::Duration::from_millis(DEFAULT_SEND_INTERVAL_MS),
            self.clock_handle(),
        ));
        self.processor_with(self.processor_config(), limiter)
    }

    /// Processor with a custom configuration and limiter.
    pub fn processor_with(
        &self,
        config: ProcessorConfig,
        limiter: Arc<dyn RateLimiter>,
    ) -> CampaignProcessor {
        CampaignProcessor::new(
            self.store.clone(),
            self.gateway.clone(),
            self.publisher.clone(),
            limiter,
            self.clock_handle(),
            config,
        )
    }

    /// Shared handle to the virtual clock.
    pub fn clock_handle(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }

    /// Seeds a campaign with its template, account, and recipients.
    pub async fn seed(&self, builder: CampaignBuilder) -> SeededCampaign {
        builder.seed(&self.store).await
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
