//! Property-based tests for campaign runs and template handling.
//!
//! Campaign properties run the real processor over the mock store with
//! arbitrary gateway outcomes and operator stop points, and check the
//! invariants any run must keep: counters match recipient rows, processing
//! order is creation order, and a stop leaves a clean pending suffix.

use std::time::Duration;

use herald_core::{CampaignStatus, RecipientStatus, TemplateParams};
use herald_delivery::{
    template::{body_parameters, render_body},
    DeliveryError, RunOutcome,
};
use herald_testing::{CampaignBuilder, TestEnv};
use proptest::prelude::*;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

fn params_strategy() -> impl Strategy<Value = TemplateParams> {
    prop::collection::btree_map(
        (1usize..15).prop_map(|i| i.to_string()),
        "[a-zA-Z0-9 #]{0,12}".prop_map(Value::String),
        0..8,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every recipient ends terminal and the counters match the rows.
    #[test]
    fn completed_run_counters_match_recipient_rows(
        failures in prop::collection::vec(any::<bool>(), 0..12),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let env = TestEnv::new();
            let seeded = env.seed(CampaignBuilder::with_defaults().recipients(failures.len())).await;
            for (recipient, fail) in seeded.recipients.iter().zip(&failures) {
                if *fail {
                    env.gateway
                        .fail_phone(recipient.phone_number.clone(), DeliveryError::server_error(500, "boom"))
                        .await;
                }
            }

            let outcome = env.processor().process(seeded.id(), &CancellationToken::new()).await.unwrap();

            let expected_failed = failures.iter().filter(|f| **f).count() as i32;
            let expected_sent = failures.len() as i32 - expected_failed;
            let RunOutcome::Completed { counters } = outcome else {
                return Err(TestCaseError::fail(format!("unexpected outcome {outcome:?}")));
            };
            prop_assert_eq!(counters.sent, expected_sent);
            prop_assert_eq!(counters.failed, expected_failed);

            let recipients = env.store.recipients(seeded.id()).await;
            prop_assert!(recipients.iter().all(|r| r.status != RecipientStatus::Pending));

            let campaign = env.store.campaign(seeded.id()).await.unwrap();
            prop_assert_eq!(campaign.status, CampaignStatus::Completed);
            prop_assert_eq!(campaign.sent_count + campaign.failed_count, failures.len() as i32);

            prop_assert_eq!(env.clock.elapsed(), Duration::from_millis(100) * failures.len() as u32);

            let processed: Vec<i32> = env
                .publisher
                .updates()
                .await
                .iter()
                .map(|u| u.sent_count + u.failed_count)
                .collect();
            prop_assert!(processed.windows(2).all(|w| w[0] <= w[1]), "snapshot counts never go down");

            Ok(())
        })?;
    }

    /// A stop after `k` recipients leaves exactly the first `k` terminal.
    #[test]
    fn stop_leaves_terminal_prefix_and_pending_suffix(
        total in 1usize..10,
        stop_fraction in 0.0f64..1.0,
        cancel in any::<bool>(),
    ) {
        let stop_after = ((total as f64) * stop_fraction) as usize;
        let stop_after = stop_after.clamp(1, total);
        let status = if cancel { CampaignStatus::Cancelled } else { CampaignStatus::Paused };

        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let env = TestEnv::new();
            let seeded = env.seed(CampaignBuilder::with_defaults().recipients(total)).await;
            env.store.change_status_after(seeded.id(), stop_after, status).await;

            let outcome = env.processor().process(seeded.id(), &CancellationToken::new()).await.unwrap();
            prop_assert_eq!(outcome, RunOutcome::Stopped { status });

            let recipients = env.store.recipients(seeded.id()).await;
            let (done, rest) = recipients.split_at(stop_after);
            prop_assert!(done.iter().all(|r| r.status == RecipientStatus::Sent));
            prop_assert!(rest.iter().all(|r| r.status == RecipientStatus::Pending));

            let expected: Vec<String> = done.iter().map(|r| r.phone_number.clone()).collect();
            prop_assert_eq!(env.gateway.sent_to().await, expected);

            Ok(())
        })?;
    }

    /// Body parameters are the present indices within the cap, in order.
    #[test]
    fn body_parameters_respect_cap_and_order(params in params_strategy(), max in 0usize..12) {
        let values = body_parameters(&params, max);

        let expected: Vec<String> = (1..=max)
            .filter_map(|i| params.get(&i.to_string()))
            .map(|v| v.as_str().unwrap_or_default().to_string())
            .collect();
        prop_assert_eq!(values, expected);
    }

    /// Rendering a body without placeholders never changes it.
    #[test]
    fn render_without_placeholders_is_identity(body in "[^{}]{0,64}", params in params_strategy()) {
        prop_assert_eq!(render_body(&body, &params, 10), body);
    }

    /// Every present parameter within the cap is substituted.
    #[test]
    fn render_substitutes_present_placeholders(params in params_strategy()) {
        let body: String = (1..=10).map(|i| format!("[{{{{{i}}}}}]")).collect();
        let rendered = render_body(&body, &params, 10);

        for i in 1..=10 {
            let placeholder = format!("{{{{{i}}}}}");
            match params.get(&i.to_string()) {
                Some(Value::String(text)) => {
                    let expected = format!("[{text}]");
                    prop_assert!(rendered.contains(&expected));
                },
                _ => prop_assert!(rendered.contains(&placeholder)),
            }
        }
    }
}
