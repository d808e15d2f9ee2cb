//! Publisher that keeps every snapshot for assertions.

use async_trait::async_trait;
use herald_core::{CampaignStatsUpdate, CampaignStatus, StatsPublisher};
use tokio::sync::RwLock;

/// Records published snapshots in order.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    updates: RwLock<Vec<CampaignStatsUpdate>>,
}

impl RecordingPublisher {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All snapshots in publish order.
    pub async fn updates(&self) -> Vec<CampaignStatsUpdate> {
        self.updates.read().await.clone()
    }

    /// Status of each snapshot in publish order.
    pub async fn statuses(&self) -> Vec<CampaignStatus> {
        self.updates.read().await.iter().map(|u| u.status).collect()
    }

    /// Most recent snapshot.
    pub async fn last(&self) -> Option<CampaignStatsUpdate> {
        self.updates.read().await.last().cloned()
    }
}

#[async_trait]
impl StatsPublisher for RecordingPublisher {
    async fn publish(&self, update: CampaignStatsUpdate) {
        self.updates.write().await.push(update);
    }
}
