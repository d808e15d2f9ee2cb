//! Repository for sending accounts.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{Account, OrganizationId},
};

/// Repository for account database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Finds an account by name within an organization.
    ///
    /// Campaigns reference their sending account by name, so the lookup is
    /// always scoped to the owning organization.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_name(
        &self,
        organization_id: OrganizationId,
        name: &str,
    ) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, organization_id, name, phone_id, business_id, api_version,
                   access_token, created_at
            FROM accounts
            WHERE organization_id = $1 AND name = $2
            "#,
        )
        .bind(organization_id)
        .bind(name)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(account)
    }
}
