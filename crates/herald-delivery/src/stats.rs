//! Stats publishers for campaign progress snapshots.
//!
//! `PgNotifyPublisher` pushes each snapshot to a PostgreSQL `NOTIFY` channel
//! so dashboard services listening on the database see progress live.
//! `BroadcastPublisher` serves observers in the same process.

use std::sync::Arc;

use async_trait::async_trait;
use herald_core::{CampaignStatsUpdate, StatsPublisher};
use sqlx::PgPool;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default `NOTIFY` channel for campaign snapshots.
pub const DEFAULT_STATS_CHANNEL: &str = "campaign_stats";

/// Publishes snapshots as JSON through `pg_notify`.
#[derive(Debug, Clone)]
pub struct PgNotifyPublisher {
    pool: Arc<PgPool>,
    channel: String,
}

impl PgNotifyPublisher {
    /// Creates a publisher on the default channel.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self::with_channel(pool, DEFAULT_STATS_CHANNEL)
    }

    /// Creates a publisher on a custom channel.
    pub fn with_channel(pool: Arc<PgPool>, channel: impl Into<String>) -> Self {
        Self { pool, channel: channel.into() }
    }

    /// Channel snapshots are sent on.
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl StatsPublisher for PgNotifyPublisher {
    async fn publish(&self, update: CampaignStatsUpdate) {
        let payload = match serde_json::to_string(&update) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(campaign_id = %update.campaign_id, error = %error, "failed to encode stats update");
                return;
            },
        };

        if let Err(error) = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(&payload)
            .execute(&*self.pool)
            .await
        {
            warn!(
                campaign_id = %update.campaign_id,
                channel = %self.channel,
                error = %error,
                "failed to publish stats update"
            );
        }
    }
}

/// Fans snapshots out to in-process subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<CampaignStatsUpdate>,
}

impl BroadcastPublisher {
    /// Creates a publisher buffering up to `capacity` snapshots per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to future snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<CampaignStatsUpdate> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl StatsPublisher for BroadcastPublisher {
    async fn publish(&self, update: CampaignStatsUpdate) {
        // Err only means nobody is subscribed.
        if self.sender.send(update).is_err() {
            debug!("no stats subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use herald_core::{CampaignCounters, CampaignId, CampaignStatus, OrganizationId};

    use super::*;

    fn snapshot(status: CampaignStatus) -> CampaignStatsUpdate {
        CampaignStatsUpdate::new(
            CampaignId::new(),
            OrganizationId::new(),
            status,
            CampaignCounters::new(1, 0),
        )
    }

    #[tokio::test]
    async fn broadcast_delivers_to_subscribers() {
        let publisher = BroadcastPublisher::new(8);
        let mut first = publisher.subscribe();
        let mut second = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 2);

        let update = snapshot(CampaignStatus::Processing);
        publisher.publish(update.clone()).await;

        assert_eq!(first.recv().await.unwrap(), update);
        assert_eq!(second.recv().await.unwrap(), update);
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_fine() {
        let publisher = BroadcastPublisher::new(8);
        publisher.publish(snapshot(CampaignStatus::Completed)).await;
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn pg_notify_uses_configured_channel() {
        let pool = PgPool::connect_lazy("postgres://localhost/herald").unwrap();
        let publisher = PgNotifyPublisher::with_channel(Arc::new(pool), "ops_stats");
        assert_eq!(publisher.channel(), "ops_stats");
    }
}
