//! Repository for the campaign-start job queue.
//!
//! Jobs are claimed with `FOR UPDATE SKIP LOCKED` so several workers can poll
//! the same table without blocking one another. A claimed job stays invisible
//! until `locked_until`; a worker that crashes mid-campaign therefore has its
//! job redelivered once the visibility timeout passes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{types::Json, PgPool};

use crate::{
    error::Result,
    models::{CampaignId, CampaignJob, JobId, QueuedJob},
};

/// Repository for job queue operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Enqueues a start job for a campaign.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn enqueue(&self, campaign_id: CampaignId) -> Result<JobId> {
        let id = JobId::new();

        sqlx::query(
            r#"
            INSERT INTO campaign_jobs (id, payload, attempts, locked_until, enqueued_at)
            VALUES ($1, $2, 0, NULL, NOW())
            "#,
        )
        .bind(id)
        .bind(Json(CampaignJob { campaign_id }))
        .execute(&*self.pool)
        .await?;

        Ok(id)
    }

    /// Claims the oldest visible job and hides it until `locked_until`.
    ///
    /// # Errors
    ///
    /// Returns error if the claim transaction fails.
    pub async fn claim_next(
        &self,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> Result<Option<QueuedJob>> {
        let mut tx = self.pool.begin().await?;

        let job_id: Option<JobId> = sqlx::query_scalar(
            r#"
            SELECT id FROM campaign_jobs
            WHERE locked_until IS NULL OR locked_until <= $1
            ORDER BY enqueued_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job_id) = job_id else {
            tx.rollback().await?;
            return Ok(None);
        };

        let job = sqlx::query_as::<_, QueuedJob>(
            r#"
            UPDATE campaign_jobs
            SET locked_until = $2, attempts = attempts + 1
            WHERE id = $1
            RETURNING id, payload, attempts, locked_until, enqueued_at
            "#,
        )
        .bind(job_id)
        .bind(locked_until)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(job))
    }

    /// Deletes a job after it has been handled.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn delete(&self, id: JobId) -> Result<()> {
        sqlx::query("DELETE FROM campaign_jobs WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    /// Makes a claimed job immediately visible again.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn release(&self, id: JobId) -> Result<()> {
        sqlx::query("UPDATE campaign_jobs SET locked_until = NULL WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    /// Keeps a claimed job hidden until `locked_until`.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn extend(&self, id: JobId, locked_until: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE campaign_jobs SET locked_until = $2 WHERE id = $1")
            .bind(id)
            .bind(locked_until)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }
}
