//! Database access layer implementing the repository pattern.
//!
//! Each repository owns the SQL for one table and translates rows into the
//! domain models. The delivery crate reaches the database only through these
//! repositories.

use std::sync::Arc;

use sqlx::PgPool;

pub mod accounts;
pub mod campaign_jobs;
pub mod campaigns;
pub mod contacts;
pub mod messages;
pub mod recipients;
pub mod templates;

use crate::error::Result;

/// Container for all repository instances sharing one connection pool.
#[derive(Clone)]
pub struct Storage {
    /// Campaign rows, status transitions, counters and leases.
    pub campaigns: Arc<campaigns::Repository>,

    /// Campaign recipients.
    pub recipients: Arc<recipients::Repository>,

    /// Message templates.
    pub templates: Arc<templates::Repository>,

    /// Sending accounts.
    pub accounts: Arc<accounts::Repository>,

    /// Organization contacts.
    pub contacts: Arc<contacts::Repository>,

    /// Outbound message records.
    pub messages: Arc<messages::Repository>,

    /// Campaign-start job queue.
    pub campaign_jobs: Arc<campaign_jobs::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            campaigns: Arc::new(campaigns::Repository::new(pool.clone())),
            recipients: Arc::new(recipients::Repository::new(pool.clone())),
            templates: Arc::new(templates::Repository::new(pool.clone())),
            accounts: Arc::new(accounts::Repository::new(pool.clone())),
            contacts: Arc::new(contacts::Repository::new(pool.clone())),
            messages: Arc::new(messages::Repository::new(pool.clone())),
            campaign_jobs: Arc::new(campaign_jobs::Repository::new(pool)),
        }
    }

    /// Returns the shared connection pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.campaigns.pool()
    }

    /// Verifies database connectivity with a trivial query.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool()).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn storage_can_be_created() {
        // Lazy pools never connect until the first query.
        let pool = sqlx::PgPool::connect_lazy("postgresql://test").unwrap();
        let storage = Storage::new(pool);
        assert!(Arc::ptr_eq(&storage.pool(), &storage.campaigns.pool()));
    }
    #[tokio::test]
    async fn health_check_reports_unreachable_database() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_millis(500))
            .connect_lazy("postgresql://herald@127.0.0.1:1/herald")
            .unwrap();
        let storage = Storage::new(pool);

        assert!(storage.health_check().await.is_err());
    }
}
