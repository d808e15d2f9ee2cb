//! Contact lookup and creation for campaign recipients.
//!
//! Phone numbers are stored without a leading `+`, but older rows may still
//! carry one, so lookups try both forms before creating a new contact.

use std::sync::Arc;

use herald_core::{Contact, NewContact, OrganizationId};
use tracing::debug;

use crate::{
    error::{DeliveryError, Result},
    storage::CampaignStore,
};

/// Error text recorded on a recipient whose contact could not be resolved.
pub const CONTACT_FAILURE_MESSAGE: &str = "Failed to create contact";

/// Strips a single leading `+` from a phone number.
pub fn normalize_phone(phone_number: &str) -> &str {
    phone_number.strip_prefix('+').unwrap_or(phone_number)
}

/// Finds or creates the contact for a recipient phone number.
pub struct ContactResolver {
    store: Arc<dyn CampaignStore>,
}

impl ContactResolver {
    /// Creates a resolver over the given store.
    pub fn new(store: Arc<dyn CampaignStore>) -> Self {
        Self { store }
    }

    /// Returns the contact for `phone_number` in the organization, creating
    /// it with `display_name` as profile name when none exists.
    ///
    /// A unique violation on create means another worker inserted the same
    /// contact first; the existing row is looked up and returned.
    pub async fn resolve(
        &self,
        organization_id: OrganizationId,
        phone_number: &str,
        display_name: &str,
    ) -> Result<Contact> {
        let normalized = normalize_phone(phone_number);
        if normalized.is_empty() {
            return Err(DeliveryError::contact("phone number is empty"));
        }

        if let Some(contact) = self.store.find_contact(organization_id, normalized.to_string()).await? {
            return Ok(contact);
        }

        if let Some(contact) =
            self.store.find_contact(organization_id, format!("+{normalized}")).await?
        {
            return Ok(contact);
        }

        let new_contact = NewContact {
            organization_id,
            phone_number: normalized.to_string(),
            profile_name: display_name.to_string(),
        };

        match self.store.create_contact(new_contact).await {
            Ok(contact) => {
                debug!(contact_id = %contact.id, "created contact");
                Ok(contact)
            },
            Err(error) if error.is_constraint_violation() => {
                debug!(error = %error, "contact created concurrently, reloading");
                self.store
                    .find_contact(organization_id, normalized.to_string())
                    .await?
                    .ok_or_else(|| {
                        DeliveryError::contact(format!(
                            "contact missing after unique violation: {error}"
                        ))
                    })
            },
            Err(error) => Err(DeliveryError::contact(error.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use herald_core::ContactId;

    use super::*;
    use crate::storage::mock::MockCampaignStore;

    fn contact(organization_id: OrganizationId, phone_number: &str) -> Contact {
        Contact {
            id: ContactId::new(),
            organization_id,
            phone_number: phone_number.to_string(),
            profile_name: Some("Existing".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn normalize_strips_one_plus() {
        assert_eq!(normalize_phone("+15550001"), "15550001");
        assert_eq!(normalize_phone("15550001"), "15550001");
        assert_eq!(normalize_phone("++1"), "+1");
    }

    #[tokio::test]
    async fn finds_contact_stored_without_plus() {
        let store = Arc::new(MockCampaignStore::new());
        let org = OrganizationId::new();
        let existing = contact(org, "15550001");
        store.add_contact(existing.clone()).await;

        let resolver = ContactResolver::new(store.clone());
        let found = resolver.resolve(org, "+15550001", "Ana").await.unwrap();

        assert_eq!(found.id, existing.id);
        assert_eq!(store.contacts().await.len(), 1);
    }

    #[tokio::test]
    async fn surrounding_whitespace_is_kept_verbatim() {
        let store = Arc::new(MockCampaignStore::new());
        let org = OrganizationId::new();
        let existing = contact(org, "15550001");
        store.add_contact(existing.clone()).await;

        let resolver = ContactResolver::new(store.clone());
        let created = resolver.resolve(org, " +15550001", "Ana").await.unwrap();

        assert_ne!(created.id, existing.id);
        assert_eq!(created.phone_number, " +15550001");
        assert_eq!(store.contacts().await.len(), 2);
    }

    #[tokio::test]
    async fn finds_legacy_contact_stored_with_plus() {
        let store = Arc::new(MockCampaignStore::new());
        let org = OrganizationId::new();
        let existing = contact(org, "+15550001");
        store.add_contact(existing.clone()).await;

        let resolver = ContactResolver::new(store.clone());
        let found = resolver.resolve(org, "15550001", "Ana").await.unwrap();

        assert_eq!(found.id, existing.id);
    }

    #[tokio::test]
    async fn creates_normalized_contact_with_display_name() {
        let store = Arc::new(MockCampaignStore::new());
        let org = OrganizationId::new();

        let resolver = ContactResolver::new(store.clone());
        let created = resolver.resolve(org, "+15550002", "Bruno").await.unwrap();

        assert_eq!(created.phone_number, "15550002");
        assert_eq!(created.profile_name.as_deref(), Some("Bruno"));
        assert_eq!(store.contacts().await.len(), 1);
    }

    #[tokio::test]
    async fn contacts_are_scoped_to_organization() {
        let store = Arc::new(MockCampaignStore::new());
        let other_org = OrganizationId::new();
        store.add_contact(contact(other_org, "15550003")).await;

        let org = OrganizationId::new();
        let resolver = ContactResolver::new(store.clone());
        let created = resolver.resolve(org, "15550003", "Caio").await.unwrap();

        assert_eq!(created.organization_id, org);
        assert_eq!(store.contacts().await.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_insert_returns_existing_contact() {
        let store = Arc::new(MockCampaignStore::new());
        let org = OrganizationId::new();
        store.race_contact_creation("15550004").await;

        let resolver = ContactResolver::new(store.clone());
        let resolved = resolver.resolve(org, "+15550004", "Dora").await.unwrap();

        let contacts = store.contacts().await;
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].id, resolved.id);
    }

    #[tokio::test]
    async fn create_failure_is_contact_error() {
        let store = Arc::new(MockCampaignStore::new());
        store.fail_contact_creation("15550005").await;

        let resolver = ContactResolver::new(store);
        let error = resolver.resolve(OrganizationId::new(), "15550005", "Eva").await.unwrap_err();

        assert!(matches!(error, DeliveryError::ContactResolution { .. }));
    }

    #[tokio::test]
    async fn empty_phone_is_rejected() {
        let store = Arc::new(MockCampaignStore::new());
        let resolver = ContactResolver::new(store.clone());

        let error = resolver.resolve(OrganizationId::new(), "+", "Nobody").await.unwrap_err();

        assert!(matches!(error, DeliveryError::ContactResolution { .. }));
        assert!(store.contacts().await.is_empty());
    }
}
