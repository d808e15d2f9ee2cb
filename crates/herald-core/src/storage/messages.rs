//! Repository for outbound message records.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{Message, MessageId},
};

/// Repository for message database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Inserts a message record.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create(&self, message: &Message) -> Result<MessageId> {
        let id = sqlx::query_scalar::<_, MessageId>(
            r#"
            INSERT INTO messages (
                id, organization_id, account_name, contact_id, provider_message_id,
                direction, message_type, template_name, template_params, content,
                status, error_message, metadata, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14
            )
            RETURNING id
            "#,
        )
        .bind(message.id)
        .bind(message.organization_id)
        .bind(&message.account_name)
        .bind(message.contact_id)
        .bind(&message.provider_message_id)
        .bind(message.direction)
        .bind(message.message_type)
        .bind(&message.template_name)
        .bind(&message.template_params)
        .bind(&message.content)
        .bind(message.status)
        .bind(&message.error_message)
        .bind(&message.metadata)
        .bind(message.created_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(id)
    }
}
