//! Repository for campaign rows.
//!
//! Status transitions, counter writes and the processing lease all live
//! here. Status, start, completion and lease updates are conditional
//! `UPDATE`s so that a concurrent status change by an operator is never
//! overwritten.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::Result,
    models::{Campaign, CampaignCounters, CampaignId, CampaignStatus},
};

const CAMPAIGN_COLUMNS: &str = "id, organization_id, name, account_name, template_id, status, \
                                total_recipients, sent_count, failed_count, started_at, \
                                completed_at, lease_owner, lease_expires_at, created_at, \
                                updated_at";

/// Repository for campaign database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Finds a campaign by id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: CampaignId) -> Result<Option<Campaign>> {
        let campaign = sqlx::query_as::<_, Campaign>(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(campaign)
    }

    /// Reads only the status column. Used for the per-recipient pause and
    /// cancel poll.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_status(&self, id: CampaignId) -> Result<Option<CampaignStatus>> {
        let status = sqlx::query_scalar::<_, CampaignStatus>(
            "SELECT status FROM campaigns WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(status)
    }

    /// Sets the campaign status while it is still `queued` or `processing`.
    ///
    /// Returns `false` when an operator already moved the campaign elsewhere
    /// (paused, cancelled, or finished), in which case nothing is written.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn update_status(&self, id: CampaignId, status: CampaignStatus) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status IN ('queued', 'processing')
            "#,
        )
        .bind(id)
        .bind(status)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Moves the campaign to `processing`, stamping `started_at` on the
    /// first run only.
    ///
    /// Only a `queued` or interrupted `processing` campaign is started; a
    /// pause or cancel issued while the run was being set up is kept and
    /// `false` is returned.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_started(&self, id: CampaignId, started_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'processing',
                started_at = COALESCE(started_at, $2),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('queued', 'processing')
            "#,
        )
        .bind(id)
        .bind(started_at)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Persists sent and failed counters.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn update_counters(&self, id: CampaignId, counters: CampaignCounters) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET sent_count = $2, failed_count = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(counters.sent)
        .bind(counters.failed)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Transitions `processing -> completed` with final counters.
    ///
    /// Returns `false` when the campaign was no longer `processing` (an
    /// operator paused or cancelled it while the last recipient was in
    /// flight), in which case nothing is written.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn complete(
        &self,
        id: CampaignId,
        counters: CampaignCounters,
        completed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'completed',
                completed_at = $2,
                sent_count = $3,
                failed_count = $4,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(completed_at)
        .bind(counters.sent)
        .bind(counters.failed)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Takes or renews the processing lease.
    ///
    /// Succeeds when the lease is free, expired at `now`, or already held by
    /// `owner`. Returns `false` when another owner holds a live lease.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn acquire_lease(
        &self,
        id: CampaignId,
        owner: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET lease_owner = $2, lease_expires_at = $3
            WHERE id = $1
              AND (lease_owner IS NULL OR lease_owner = $2 OR lease_expires_at <= $4)
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(expires_at)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Clears the lease if `owner` still holds it.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn release_lease(&self, id: CampaignId, owner: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET lease_owner = NULL, lease_expires_at = NULL
            WHERE id = $1 AND lease_owner = $2
            "#,
        )
        .bind(id)
        .bind(owner)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }
}
