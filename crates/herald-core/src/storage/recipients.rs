//! Repository for campaign recipients.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{CampaignCounters, CampaignId, Recipient, RecipientUpdate},
};

/// Repository for recipient database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Loads every `pending` recipient of a campaign in creation order.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_pending(&self, campaign_id: CampaignId) -> Result<Vec<Recipient>> {
        let recipients = sqlx::query_as::<_, Recipient>(
            r#"
            SELECT id, campaign_id, phone_number, recipient_name, template_params,
                   status, error_message, provider_message_id, sent_at, created_at
            FROM campaign_recipients
            WHERE campaign_id = $1 AND status = 'pending'
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(recipients)
    }

    /// Writes the outcome of one delivery attempt.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn update(&self, update: &RecipientUpdate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaign_recipients
            SET status = $2,
                provider_message_id = $3,
                error_message = $4,
                sent_at = $5
            WHERE id = $1
            "#,
        )
        .bind(update.recipient_id)
        .bind(update.status)
        .bind(&update.provider_message_id)
        .bind(&update.error_message)
        .bind(update.sent_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Counts recipients in each terminal status.
    ///
    /// Campaign counters are derived from this rather than incremented, so a
    /// resumed run reports the same totals as an uninterrupted one.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_outcomes(&self, campaign_id: CampaignId) -> Result<CampaignCounters> {
        let (sent, failed): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FILTER (WHERE status = 'sent'),
                   COUNT(*) FILTER (WHERE status = 'failed')
            FROM campaign_recipients
            WHERE campaign_id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_one(&*self.pool)
        .await?;

        Ok(CampaignCounters {
            sent: i32::try_from(sent).unwrap_or(i32::MAX),
            failed: i32::try_from(failed).unwrap_or(i32::MAX),
        })
    }
}
