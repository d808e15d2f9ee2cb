//! Property-based tests for core domain types.

use std::str::FromStr;

use herald_core::{
    CampaignCounters, CampaignId, CampaignStatsUpdate, CampaignStatus, OrganizationId,
    RecipientStatus,
};
use proptest::prelude::*;

fn campaign_status() -> impl Strategy<Value = CampaignStatus> {
    prop_oneof![
        Just(CampaignStatus::Queued),
        Just(CampaignStatus::Processing),
        Just(CampaignStatus::Completed),
        Just(CampaignStatus::Failed),
        Just(CampaignStatus::Paused),
        Just(CampaignStatus::Cancelled),
    ]
}

fn recipient_status() -> impl Strategy<Value = RecipientStatus> {
    prop_oneof![
        Just(RecipientStatus::Pending),
        Just(RecipientStatus::Sent),
        Just(RecipientStatus::Failed),
    ]
}

proptest! {
    /// Counting outcomes one at a time matches a direct count.
    #[test]
    fn counters_match_terminal_statuses(statuses in prop::collection::vec(recipient_status(), 0..200)) {
        let mut counters = CampaignCounters::default();
        for status in &statuses {
            counters.record(*status);
        }

        let sent = statuses.iter().filter(|s| **s == RecipientStatus::Sent).count() as i32;
        let failed = statuses.iter().filter(|s| **s == RecipientStatus::Failed).count() as i32;
        prop_assert_eq!(counters, CampaignCounters::new(sent, failed));
        prop_assert!(counters.processed() <= statuses.len() as i32);
    }

    /// Status text round-trips through the database representation.
    #[test]
    fn campaign_status_text_round_trips(status in campaign_status()) {
        prop_assert_eq!(CampaignStatus::from_str(status.as_str()).unwrap(), status);
        prop_assert_eq!(status.to_string(), status.as_str());
    }

    /// A status is never both startable and a stop request.
    #[test]
    fn startable_and_stop_requested_are_disjoint(status in campaign_status()) {
        prop_assert!(!(status.is_startable() && status.is_stop_requested()));
    }

    /// Snapshots always report zero receipts and carry the worker counts.
    #[test]
    fn snapshots_report_no_receipts(
        status in campaign_status(),
        sent in 0i32..10_000,
        failed in 0i32..10_000,
    ) {
        let update = CampaignStatsUpdate::new(
            CampaignId::new(),
            OrganizationId::new(),
            status,
            CampaignCounters::new(sent, failed),
        );

        prop_assert_eq!(update.delivered_count, 0);
        prop_assert_eq!(update.read_count, 0);
        prop_assert_eq!((update.sent_count, update.failed_count), (sent, failed));

        let json = serde_json::to_value(&update).unwrap();
        prop_assert_eq!(json["status"].as_str(), Some(status.as_str()));
    }
}
