//! Repository for organization contacts.
//!
//! `(organization_id, phone_number)` carries a unique constraint; a losing
//! concurrent insert surfaces as `CoreError::ConstraintViolation`.

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;

use crate::{
    error::Result,
    models::{Contact, ContactId, NewContact, OrganizationId},
};

/// Repository for contact database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Finds a contact by exact phone number.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_phone(
        &self,
        organization_id: OrganizationId,
        phone_number: &str,
    ) -> Result<Option<Contact>> {
        let contact = sqlx::query_as::<_, Contact>(
            r#"
            SELECT id, organization_id, phone_number, profile_name, created_at
            FROM contacts
            WHERE organization_id = $1 AND phone_number = $2
            "#,
        )
        .bind(organization_id)
        .bind(phone_number)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(contact)
    }

    /// Inserts a contact and returns the stored row.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::ConstraintViolation` if the phone number already
    /// exists in the organization.
    pub async fn create(&self, contact: &NewContact) -> Result<Contact> {
        let created = sqlx::query_as::<_, Contact>(
            r#"
            INSERT INTO contacts (id, organization_id, phone_number, profile_name, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, organization_id, phone_number, profile_name, created_at
            "#,
        )
        .bind(ContactId::new())
        .bind(contact.organization_id)
        .bind(&contact.phone_number)
        .bind(&contact.profile_name)
        .bind(Utc::now())
        .fetch_one(&*self.pool)
        .await?;

        Ok(created)
    }
}
