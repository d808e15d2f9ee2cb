//! Campaign run state machine.
//!
//! A run takes a campaign from `queued` (or a previously interrupted
//! `processing`) through every pending recipient, in creation order, and
//! finishes it as `completed`. Operators can pause or cancel a campaign at
//! any time; the processor sees the change before the next recipient and
//! stops without touching the remaining rows.
//!
//! Setup failures (missing template or account, unreadable recipients) mark
//! the campaign `failed` and are returned as errors. Per-recipient failures
//! are recorded on the recipient and the run continues.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use herald_core::{
    Account, Campaign, CampaignCounters, CampaignId, CampaignJob, CampaignStatsUpdate,
    CampaignStatus, Clock, Message, MessageDirection, MessageId, MessageStatus, MessageType,
    Recipient, RecipientStatus, RecipientUpdate, StatsPublisher, Template,
};
use serde_json::json;
use sqlx::types::Json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    consumer::JobHandler,
    contacts::{ContactResolver, CONTACT_FAILURE_MESSAGE},
    error::{DeliveryError, ErrorCategory, Result},
    gateway::{MessageGateway, TemplateSendRequest},
    rate_limit::RateLimiter,
    storage::CampaignStore,
    template::{self, MAX_TEMPLATE_PARAMS},
    DEFAULT_LEASE_TTL_SECONDS,
};

/// Processor settings.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Lease owner recorded on campaigns this worker processes.
    pub worker_id: String,

    /// Highest positional template parameter sent and rendered.
    pub max_template_params: usize,

    /// Lease lifetime; renewed before every recipient.
    pub lease_ttl: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("herald-{}", Uuid::new_v4()),
            max_template_params: MAX_TEMPLATE_PARAMS,
            lease_ttl: Duration::from_secs(DEFAULT_LEASE_TTL_SECONDS),
        }
    }
}

/// How a run ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every pending recipient was attempted and the campaign is `completed`.
    Completed {
        /// Final counters.
        counters: CampaignCounters,
    },
    /// An operator paused or cancelled the campaign mid-run.
    Stopped {
        /// Status found on the campaign.
        status: CampaignStatus,
    },
    /// The campaign was not in a startable status, e.g. a duplicate job for
    /// a finished campaign.
    Skipped {
        /// Status found on the campaign.
        status: CampaignStatus,
    },
    /// Another worker holds the campaign lease.
    LeaseHeld,
    /// Another worker took the lease over mid-run.
    LeaseLost,
    /// The worker is shutting down; the campaign stays `processing`.
    Cancelled,
}

struct Prepared {
    template: Template,
    account: Account,
    recipients: Vec<Recipient>,
}

enum Setup {
    Ready(Prepared),
    /// The status moved out of `queued`/`processing` before the start was
    /// written.
    NotStarted(CampaignStatus),
}

/// Processes one campaign at a time.
pub struct CampaignProcessor {
    store: Arc<dyn CampaignStore>,
    gateway: Arc<dyn MessageGateway>,
    publisher: Arc<dyn StatsPublisher>,
    limiter: Arc<dyn RateLimiter>,
    clock: Arc<dyn Clock>,
    contacts: ContactResolver,
    config: ProcessorConfig,
}

impl CampaignProcessor {
    /// Creates a processor over the given collaborators.
    pub fn new(
        store: Arc<dyn CampaignStore>,
        gateway: Arc<dyn MessageGateway>,
        publisher: Arc<dyn StatsPublisher>,
        limiter: Arc<dyn RateLimiter>,
        clock: Arc<dyn Clock>,
        config: ProcessorConfig,
    ) -> Self {
        let contacts = ContactResolver::new(store.clone());
        Self { store, gateway, publisher, limiter, clock, contacts, config }
    }

    /// Processor configuration.
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Runs a campaign to completion, stop, or cancellation.
    ///
    /// # Errors
    ///
    /// Returns `CampaignNotFound` for an unknown campaign, the setup error
    /// after marking the campaign `failed`, or a database error when the
    /// lease or the final transition cannot be written.
    pub async fn process(
        &self,
        campaign_id: CampaignId,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let span = info_span!(
            "campaign_run",
            campaign_id = %campaign_id,
            worker_id = %self.config.worker_id
        );

        self.run_campaign(campaign_id, cancel).instrument(span).await
    }

    async fn run_campaign(
        &self,
        campaign_id: CampaignId,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let campaign = self
            .store
            .find_campaign(campaign_id)
            .await?
            .ok_or_else(|| DeliveryError::campaign_not_found(campaign_id))?;

        if !campaign.status.is_startable() {
            info!(status = %campaign.status, "campaign not startable, skipping");
            return Ok(RunOutcome::Skipped { status: campaign.status });
        }

        if !self.take_lease(campaign_id).await? {
            info!("campaign lease held by another worker");
            return Ok(RunOutcome::LeaseHeld);
        }

        let result = self.run(&campaign, cancel).await;

        if let Err(error) =
            self.store.release_lease(campaign_id, self.config.worker_id.clone()).await
        {
            warn!(error = %error, "failed to release campaign lease");
        }

        result
    }

    async fn run(&self, campaign: &Campaign, cancel: &CancellationToken) -> Result<RunOutcome> {
        let prepared = match self.prepare(campaign).await {
            Ok(Setup::Ready(prepared)) => prepared,
            Ok(Setup::NotStarted(status)) if status.is_stop_requested() => {
                info!(status = %status, "campaign stopped by operator during setup");
                return Ok(RunOutcome::Stopped { status });
            },
            Ok(Setup::NotStarted(status)) => {
                info!(status = %status, "campaign no longer startable, skipping");
                return Ok(RunOutcome::Skipped { status });
            },
            Err(error) => {
                self.fail_campaign(campaign, &error).await;
                return Err(error);
            },
        };

        info!(
            recipients = prepared.recipients.len(),
            template = %prepared.template.name,
            account = %prepared.account.name,
            "starting campaign run"
        );

        let mut tally = campaign.counters();

        for recipient in &prepared.recipients {
            if cancel.is_cancelled() {
                info!("shutdown requested, leaving campaign in processing");
                return Ok(RunOutcome::Cancelled);
            }

            match self.store.find_campaign_status(campaign.id).await {
                Ok(Some(status)) if status.is_stop_requested() => {
                    info!(status = %status, "campaign stopped by operator");
                    return Ok(RunOutcome::Stopped { status });
                },
                Ok(_) => {},
                Err(error) => {
                    warn!(error = %error, "failed to read campaign status, continuing");
                },
            }

            if !self.renew_lease(campaign.id).await {
                warn!("campaign lease lost to another worker");
                return Ok(RunOutcome::LeaseLost);
            }

            let attempted = self.deliver(campaign, &prepared, recipient, &mut tally).await;

            let counters = self.refresh_counters(campaign.id, &mut tally).await;
            self.publish(campaign, CampaignStatus::Processing, counters).await;

            if attempted {
                self.limiter.wait().await;
            }
        }

        let counters = self.refresh_counters(campaign.id, &mut tally).await;
        let completed_at = self.clock.now_utc();

        if self.store.complete_campaign(campaign.id, counters, completed_at).await? {
            info!(sent = counters.sent, failed = counters.failed, "campaign completed");
            self.publish(campaign, CampaignStatus::Completed, counters).await;
            return Ok(RunOutcome::Completed { counters });
        }

        let status = match self.store.find_campaign_status(campaign.id).await {
            Ok(Some(status)) => status,
            Ok(None) => CampaignStatus::Processing,
            Err(error) => {
                warn!(error = %error, "failed to read campaign status after run");
                CampaignStatus::Processing
            },
        };
        info!(status = %status, "campaign status changed during final send, keeping it");
        Ok(RunOutcome::Stopped { status })
    }

    async fn prepare(&self, campaign: &Campaign) -> Result<Setup> {
        let template = self
            .store
            .find_template(campaign.template_id)
            .await?
            .ok_or_else(|| DeliveryError::template_not_found(campaign.template_id))?;

        let account = self
            .store
            .find_account(campaign.organization_id, campaign.account_name.clone())
            .await?
            .ok_or_else(|| DeliveryError::account_not_found(campaign.account_name.clone()))?;

        if !self.store.mark_campaign_started(campaign.id, self.clock.now_utc()).await? {
            let status = self
                .store
                .find_campaign_status(campaign.id)
                .await?
                .ok_or_else(|| DeliveryError::campaign_not_found(campaign.id))?;
            return Ok(Setup::NotStarted(status));
        }

        let recipients = self.store.find_pending_recipients(campaign.id).await?;

        Ok(Setup::Ready(Prepared { template, account, recipients }))
    }

    async fn fail_campaign(&self, campaign: &Campaign, cause: &DeliveryError) {
        error!(
            error = %cause,
            category = %ErrorCategory::from(cause),
            "campaign setup failed"
        );

        match self.store.update_campaign_status(campaign.id, CampaignStatus::Failed).await {
            Ok(true) => {
                self.publish(campaign, CampaignStatus::Failed, campaign.counters()).await;
            },
            Ok(false) => {
                info!("campaign status changed by operator, not marking it failed");
            },
            Err(error) => {
                error!(error = %error, "failed to mark campaign failed");
                self.publish(campaign, CampaignStatus::Failed, campaign.counters()).await;
            },
        }
    }

    /// Sends to one recipient and records the outcome. Returns whether the
    /// gateway was called.
    async fn deliver(
        &self,
        campaign: &Campaign,
        prepared: &Prepared,
        recipient: &Recipient,
        tally: &mut CampaignCounters,
    ) -> bool {
        let contact = match self
            .contacts
            .resolve(campaign.organization_id, &recipient.phone_number, &recipient.recipient_name)
            .await
        {
            Ok(contact) => contact,
            Err(error) => {
                warn!(recipient_id = %recipient.id, error = %error, "contact resolution failed");
                self.record_recipient(RecipientUpdate::failed(
                    recipient.id,
                    CONTACT_FAILURE_MESSAGE,
                ))
                .await;
                tally.record(RecipientStatus::Failed);
                return false;
            },
        };

        let max_params = self.config.max_template_params;
        let params = &recipient.template_params.0;
        let content = template::render_body(&prepared.template.body_content, params, max_params);
        let request = TemplateSendRequest::new(
            &prepared.account,
            recipient.phone_number.clone(),
            &prepared.template,
            template::body_parameters(params, max_params),
        );

        let (update, message_status, provider_message_id, error_message) =
            match self.gateway.send_template(request).await {
                Ok(provider_message_id) => {
                    debug!(
                        recipient_id = %recipient.id,
                        provider_message_id = %provider_message_id,
                        "template accepted"
                    );
                    let update = RecipientUpdate::sent(
                        recipient.id,
                        provider_message_id.clone(),
                        self.clock.now_utc(),
                    );
                    (update, MessageStatus::Sent, Some(provider_message_id), None)
                },
                Err(error) => {
                    warn!(
                        recipient_id = %recipient.id,
                        error = %error,
                        category = %ErrorCategory::from(&error),
                        "template send failed"
                    );
                    let text = error.to_string();
                    let update = RecipientUpdate::failed(recipient.id, text.clone());
                    (update, MessageStatus::Failed, None, Some(text))
                },
            };

        let message = Message {
            id: MessageId::new(),
            organization_id: campaign.organization_id,
            account_name: campaign.account_name.clone(),
            contact_id: contact.id,
            provider_message_id,
            direction: MessageDirection::Outgoing,
            message_type: MessageType::Template,
            template_name: Some(prepared.template.name.clone()),
            template_params: recipient.template_params.clone(),
            content,
            status: message_status,
            error_message,
            metadata: Json(json!({
                "campaign_id": campaign.id.to_string(),
                "recipient_name": recipient.recipient_name,
            })),
            created_at: self.clock.now_utc(),
        };

        if let Err(error) = self.store.create_message(message).await {
            error!(recipient_id = %recipient.id, error = %error, "failed to store message");
        }

        tally.record(update.status);
        self.record_recipient(update).await;
        true
    }

    async fn record_recipient(&self, update: RecipientUpdate) {
        let recipient_id = update.recipient_id;
        if let Err(error) = self.store.update_recipient(update).await {
            error!(recipient_id = %recipient_id, error = %error, "failed to update recipient");
        }
    }

    /// Recounts outcomes from recipient rows and persists them, falling back
    /// to the in-run tally when the recount fails.
    async fn refresh_counters(
        &self,
        campaign_id: CampaignId,
        tally: &mut CampaignCounters,
    ) -> CampaignCounters {
        match self.store.count_recipient_outcomes(campaign_id).await {
            Ok(counters) => *tally = counters,
            Err(error) => warn!(error = %error, "failed to recount recipients, using local tally"),
        }

        if let Err(error) = self.store.update_campaign_counters(campaign_id, *tally).await {
            error!(error = %error, "failed to persist campaign counters");
        }

        *tally
    }

    async fn publish(&self, campaign: &Campaign, status: CampaignStatus, counters: CampaignCounters) {
        self.publisher
            .publish(CampaignStatsUpdate::new(
                campaign.id,
                campaign.organization_id,
                status,
                counters,
            ))
            .await;
    }

    async fn take_lease(&self, campaign_id: CampaignId) -> Result<bool> {
        let ttl = chrono::Duration::from_std(self.config.lease_ttl)
            .map_err(|e| DeliveryError::configuration(format!("invalid lease ttl: {e}")))?;
        let now = self.clock.now_utc();

        let acquired = self
            .store
            .acquire_lease(campaign_id, self.config.worker_id.clone(), now + ttl, now)
            .await?;
        Ok(acquired)
    }

    /// Extends the lease before the next recipient. A store error keeps the
    /// run going; only an explicit refusal means the lease was lost.
    async fn renew_lease(&self, campaign_id: CampaignId) -> bool {
        match self.take_lease(campaign_id).await {
            Ok(held) => held,
            Err(error) => {
                warn!(error = %error, "failed to renew campaign lease, continuing");
                true
            },
        }
    }
}

#[async_trait]
impl JobHandler for CampaignProcessor {
    async fn handle(&self, job: &CampaignJob, cancel: &CancellationToken) -> Result<RunOutcome> {
        self.process(job.campaign_id, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_parameter_cap() {
        let config = ProcessorConfig::default();
        assert_eq!(config.max_template_params, 10);
        assert_eq!(config.lease_ttl, Duration::from_secs(300));
        assert!(config.worker_id.starts_with("herald-"));
    }

    #[test]
    fn worker_ids_are_unique() {
        assert_ne!(ProcessorConfig::default().worker_id, ProcessorConfig::default().worker_id);
    }
}
