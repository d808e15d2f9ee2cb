//! Campaign progress events and publisher traits.
//!
//! The processor emits a `CampaignStatsUpdate` after every recipient and once
//! more when a run completes or fails. Publishers fan these snapshots out to
//! dashboards and other observers.
//!
//! # Event Flow
//!
//! ```text
//! ┌───────────────────┐  CampaignStatsUpdate  ┌────────────────────┐
//! │ CampaignProcessor │ ─────────────────────▶│ MulticastPublisher │
//! └───────────────────┘                       └────────────────────┘
//!                                                 │            │
//!                                                 ▼            ▼
//!                                       ┌───────────────┐ ┌──────────────┐
//!                                       │ pg_notify     │ │ in-process   │
//!                                       │ channel       │ │ broadcast    │
//!                                       └───────────────┘ └──────────────┘
//! ```
//!
//! Publishing is best effort. A publisher that cannot deliver a snapshot
//! logs and drops it; the next snapshot carries the full counts anyway.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::{CampaignCounters, CampaignId, CampaignStatus, OrganizationId};

/// Snapshot of a campaign's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStatsUpdate {
    /// Campaign being reported.
    pub campaign_id: CampaignId,

    /// Organization that owns the campaign, used for routing to observers.
    pub organization_id: OrganizationId,

    /// Campaign status at the time of the snapshot.
    pub status: CampaignStatus,

    /// Recipients accepted by the gateway.
    pub sent_count: i32,

    /// Delivery receipts received. The worker always reports zero.
    pub delivered_count: i32,

    /// Read receipts received. The worker always reports zero.
    pub read_count: i32,

    /// Recipients that failed.
    pub failed_count: i32,
}

impl CampaignStatsUpdate {
    /// Builds a snapshot from the worker's counters.
    pub fn new(
        campaign_id: CampaignId,
        organization_id: OrganizationId,
        status: CampaignStatus,
        counters: CampaignCounters,
    ) -> Self {
        Self {
            campaign_id,
            organization_id,
            status,
            sent_count: counters.sent,
            delivered_count: 0,
            read_count: 0,
            failed_count: counters.failed,
        }
    }
}

/// Receiver of campaign progress snapshots.
///
/// Implementations must not propagate failures back to the processor: a
/// snapshot that cannot be delivered is logged and discarded.
#[async_trait::async_trait]
pub trait StatsPublisher: Send + Sync + std::fmt::Debug {
    /// Publishes one snapshot.
    async fn publish(&self, update: CampaignStatsUpdate);
}

/// Publisher that discards every snapshot.
#[derive(Debug, Default)]
pub struct NoOpPublisher;

impl NoOpPublisher {
    /// Creates a new no-op publisher.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl StatsPublisher for NoOpPublisher {
    async fn publish(&self, _update: CampaignStatsUpdate) {}
}

/// Forwards each snapshot to every registered publisher concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastPublisher {
    publishers: Vec<Arc<dyn StatsPublisher>>,
}

impl MulticastPublisher {
    /// Creates a multicast publisher with no subscribers.
    pub fn new() -> Self {
        Self { publishers: Vec::new() }
    }

    /// Adds a downstream publisher.
    pub fn add_publisher(&mut self, publisher: Arc<dyn StatsPublisher>) {
        self.publishers.push(publisher);
    }

    /// Returns the number of registered publishers.
    pub fn publisher_count(&self) -> usize {
        self.publishers.len()
    }
}

#[async_trait::async_trait]
impl StatsPublisher for MulticastPublisher {
    async fn publish(&self, update: CampaignStatsUpdate) {
        let futures = self.publishers.iter().map(|publisher| {
            let update = update.clone();
            async move {
                publisher.publish(update).await;
            }
        });

        futures::future::join_all(futures).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug)]
    struct CountingPublisher {
        count: Arc<AtomicUsize>,
    }

    impl CountingPublisher {
        fn new() -> (Self, Arc<AtomicUsize>) {
            let count = Arc::new(AtomicUsize::new(0));
            (Self { count: count.clone() }, count)
        }
    }

    #[async_trait::async_trait]
    impl StatsPublisher for CountingPublisher {
        async fn publish(&self, _update: CampaignStatsUpdate) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn snapshot() -> CampaignStatsUpdate {
        CampaignStatsUpdate::new(
            CampaignId::new(),
            OrganizationId::new(),
            CampaignStatus::Processing,
            CampaignCounters::new(2, 1),
        )
    }

    #[tokio::test]
    async fn multicast_forwards_to_all_publishers() {
        let mut multicast = MulticastPublisher::new();
        let (first, first_count) = CountingPublisher::new();
        let (second, second_count) = CountingPublisher::new();
        multicast.add_publisher(Arc::new(first));
        multicast.add_publisher(Arc::new(second));

        assert_eq!(multicast.publisher_count(), 2);

        multicast.publish(snapshot()).await;

        assert_eq!(first_count.load(Ordering::SeqCst), 1);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_multicast_is_a_no_op() {
        MulticastPublisher::new().publish(snapshot()).await;
        NoOpPublisher::new().publish(snapshot()).await;
    }

    #[test]
    fn receipt_counts_are_zero() {
        let update = snapshot();
        assert_eq!(update.sent_count, 2);
        assert_eq!(update.failed_count, 1);
        assert_eq!(update.delivered_count, 0);
        assert_eq!(update.read_count, 0);
    }

    #[test]
    fn serializes_with_string_ids_and_snake_case_status() {
        let value = serde_json::to_value(snapshot()).unwrap();
        assert!(value["campaign_id"].is_string());
        assert_eq!(value["status"], "processing");
        assert_eq!(value["sent_count"], 2);
    }
}
