//! Storage abstraction for the campaign processor.
//!
//! `CampaignStore` is the narrow set of reads and writes the processor and
//! contact resolver need. Production wraps `herald_core::storage::Storage`;
//! tests use the in-memory `mock::MockCampaignStore`, which can inject
//! failures and simulate operator actions mid-run.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use herald_core::{
    error::Result, Account, Campaign, CampaignCounters, CampaignId, CampaignStatus, Contact,
    Message, MessageId, NewContact, OrganizationId, Recipient, RecipientUpdate, Template,
    TemplateId,
};

/// Boxed future returned by every `CampaignStore` operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Store operations required by the campaign processor.
pub trait CampaignStore: Send + Sync + 'static {
    /// Loads a campaign.
    fn find_campaign(&self, campaign_id: CampaignId) -> StoreFuture<'_, Option<Campaign>>;

    /// Loads a template.
    fn find_template(&self, template_id: TemplateId) -> StoreFuture<'_, Option<Template>>;

    /// Loads a sending account by name within an organization.
    fn find_account(
        &self,
        organization_id: OrganizationId,
        account_name: String,
    ) -> StoreFuture<'_, Option<Account>>;

    /// Loads the campaign's `pending` recipients in creation order.
    fn find_pending_recipients(&self, campaign_id: CampaignId) -> StoreFuture<'_, Vec<Recipient>>;

    /// Reads the current campaign status.
    fn find_campaign_status(
        &self,
        campaign_id: CampaignId,
    ) -> StoreFuture<'_, Option<CampaignStatus>>;

    /// Sets the status of a `queued` or `processing` campaign; `false` if an
    /// operator already moved it elsewhere.
    fn update_campaign_status(
        &self,
        campaign_id: CampaignId,
        status: CampaignStatus,
    ) -> StoreFuture<'_, bool>;

    /// Moves a `queued` or `processing` campaign to `processing` and stamps
    /// the first start time; `false` if the status no longer allows a start.
    fn mark_campaign_started(
        &self,
        campaign_id: CampaignId,
        started_at: DateTime<Utc>,
    ) -> StoreFuture<'_, bool>;

    /// Persists campaign counters.
    fn update_campaign_counters(
        &self,
        campaign_id: CampaignId,
        counters: CampaignCounters,
    ) -> StoreFuture<'_, ()>;

    /// Transitions `processing -> completed`; `false` if the status changed.
    fn complete_campaign(
        &self,
        campaign_id: CampaignId,
        counters: CampaignCounters,
        completed_at: DateTime<Utc>,
    ) -> StoreFuture<'_, bool>;

    /// Counts `sent` and `failed` recipient rows.
    fn count_recipient_outcomes(&self, campaign_id: CampaignId)
        -> StoreFuture<'_, CampaignCounters>;

    /// Writes the outcome of one delivery attempt.
    fn update_recipient(&self, update: RecipientUpdate) -> StoreFuture<'_, ()>;

    /// Finds a contact by exact phone number.
    fn find_contact(
        &self,
        organization_id: OrganizationId,
        phone_number: String,
    ) -> StoreFuture<'_, Option<Contact>>;

    /// Creates a contact; fails with a constraint violation on duplicates.
    fn create_contact(&self, contact: NewContact) -> StoreFuture<'_, Contact>;

    /// Persists a message record.
    fn create_message(&self, message: Message) -> StoreFuture<'_, MessageId>;

    /// Takes or renews the processing lease for `owner`.
    fn acquire_lease(
        &self,
        campaign_id: CampaignId,
        owner: String,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, bool>;

    /// Releases the lease if `owner` still holds it.
    fn release_lease(&self, campaign_id: CampaignId, owner: String) -> StoreFuture<'_, ()>;
}

/// Production store backed by the PostgreSQL repositories.
pub struct PostgresCampaignStore {
    storage: Arc<herald_core::storage::Storage>,
}

impl PostgresCampaignStore {
    /// Creates a new PostgreSQL store adapter.
    pub fn new(storage: Arc<herald_core::storage::Storage>) -> Self {
        Self { storage }
    }
}

impl CampaignStore for PostgresCampaignStore {
    fn find_campaign(&self, campaign_id: CampaignId) -> StoreFuture<'_, Option<Campaign>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.campaigns.find_by_id(campaign_id).await })
    }

    fn find_template(&self, template_id: TemplateId) -> StoreFuture<'_, Option<Template>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.templates.find_by_id(template_id).await })
    }

    fn find_account(
        &self,
        organization_id: OrganizationId,
        account_name: String,
    ) -> StoreFuture<'_, Option<Account>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.accounts.find_by_name(organization_id, &account_name).await })
    }

    fn find_pending_recipients(&self, campaign_id: CampaignId) -> StoreFuture<'_, Vec<Recipient>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.recipients.find_pending(campaign_id).await })
    }

    fn find_campaign_status(
        &self,
        campaign_id: CampaignId,
    ) -> StoreFuture<'_, Option<CampaignStatus>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.campaigns.find_status(campaign_id).await })
    }

    fn update_campaign_status(
        &self,
        campaign_id: CampaignId,
        status: CampaignStatus,
    ) -> StoreFuture<'_, bool> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.campaigns.update_status(campaign_id, status).await })
    }

    fn mark_campaign_started(
        &self,
        campaign_id: CampaignId,
        started_at: DateTime<Utc>,
    ) -> StoreFuture<'_, bool> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.campaigns.mark_started(campaign_id, started_at).await })
    }

    fn update_campaign_counters(
        &self,
        campaign_id: CampaignId,
        counters: CampaignCounters,
    ) -> StoreFuture<'_, ()> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.campaigns.update_counters(campaign_id, counters).await })
    }

    fn complete_campaign(
        &self,
        campaign_id: CampaignId,
        counters: CampaignCounters,
        completed_at: DateTime<Utc>,
    ) -> StoreFuture<'_, bool> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.campaigns.complete(campaign_id, counters, completed_at).await })
    }

    fn count_recipient_outcomes(
        &self,
        campaign_id: CampaignId,
    ) -> StoreFuture<'_, CampaignCounters> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.recipients.count_outcomes(campaign_id).await })
    }

    fn update_recipient(&self, update: RecipientUpdate) -> StoreFuture<'_, ()> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.recipients.update(&update).await })
    }

    fn find_contact(
        &self,
        organization_id: OrganizationId,
        phone_number: String,
    ) -> StoreFuture<'_, Option<Contact>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.contacts.find_by_phone(organization_id, &phone_number).await })
    }

    fn create_contact(&self, contact: NewContact) -> StoreFuture<'_, Contact> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.contacts.create(&contact).await })
    }

    fn create_message(&self, message: Message) -> StoreFuture<'_, MessageId> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.messages.create(&message).await })
    }

    fn acquire_lease(
        &self,
        campaign_id: CampaignId,
        owner: String,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, bool> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage.campaigns.acquire_lease(campaign_id, &owner, expires_at, now).await
        })
    }

    fn release_lease(&self, campaign_id: CampaignId, owner: String) -> StoreFuture<'_, ()> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.campaigns.release_lease(campaign_id, &owner).await })
    }
}

pub mod mock {
    //! In-memory store for testing the processor without a database.
    //!
    //! Besides plain storage the mock can fail individual operations, fail
    //! contact creation for specific phone numbers, simulate a concurrent
    //! contact insert, and change a campaign's status after a given number
    //! of recipient updates, or while the run is still being set up, to
    //! mimic an operator pausing mid-run.

    use std::{
        collections::{HashMap, HashSet},
        sync::Arc,
    };

    use chrono::{DateTime, Utc};
    use herald_core::{
        error::CoreError, Account, Campaign, CampaignCounters, CampaignId, CampaignStatus,
        Contact, ContactId, Message, MessageId, NewContact, OrganizationId, Recipient,
        RecipientStatus, RecipientUpdate, Template, TemplateId,
    };
    use tokio::sync::RwLock;

    use super::{CampaignStore, StoreFuture};

    /// Store operations that can be made to fail.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum FailPoint {
        /// `find_campaign`
        FindCampaign,
        /// `find_template`
        FindTemplate,
        /// `find_account`
        FindAccount,
        /// `find_pending_recipients`
        FindPendingRecipients,
        /// `find_campaign_status`
        FindCampaignStatus,
        /// `mark_campaign_started`
        MarkStarted,
        /// `update_campaign_counters`
        UpdateCounters,
        /// `count_recipient_outcomes`
        CountOutcomes,
        /// `update_recipient`
        UpdateRecipient,
        /// `find_contact`
        FindContact,
        /// `create_message`
        CreateMessage,
        /// `complete_campaign`
        CompleteCampaign,
    }

    #[derive(Debug, Clone)]
    enum Change {
        Status(CampaignStatus),
        LeaseTakenBy(String),
    }

    #[derive(Debug, Clone)]
    struct ScriptedChange {
        after_updates: usize,
        change: Change,
    }

    /// Mock store keeping all rows in memory.
    #[derive(Default)]
    pub struct MockCampaignStore {
        campaigns: Arc<RwLock<HashMap<CampaignId, Campaign>>>,
        templates: Arc<RwLock<HashMap<TemplateId, Template>>>,
        accounts: Arc<RwLock<Vec<Account>>>,
        recipients: Arc<RwLock<Vec<Recipient>>>,
        contacts: Arc<RwLock<Vec<Contact>>>,
        messages: Arc<RwLock<Vec<Message>>>,
        fail_points: Arc<RwLock<HashMap<FailPoint, String>>>,
        failing_contact_phones: Arc<RwLock<HashSet<String>>>,
        racing_contact_phones: Arc<RwLock<HashSet<String>>>,
        scripted_changes: Arc<RwLock<HashMap<CampaignId, ScriptedChange>>>,
        setup_changes: Arc<RwLock<HashMap<CampaignId, CampaignStatus>>>,
        recipient_updates: Arc<RwLock<usize>>,
        status_writes: Arc<RwLock<Vec<(CampaignId, CampaignStatus)>>>,
        counter_writes: Arc<RwLock<Vec<(CampaignId, CampaignCounters)>>>,
    }

    impl MockCampaignStore {
        /// Creates an empty mock store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Inserts or replaces a campaign.
        pub async fn add_campaign(&self, campaign: Campaign) {
            self.campaigns.write().await.insert(campaign.id, campaign);
        }

        /// Inserts or replaces a template.
        pub async fn add_template(&self, template: Template) {
            self.templates.write().await.insert(template.id, template);
        }

        /// Adds a sending account.
        pub async fn add_account(&self, account: Account) {
            self.accounts.write().await.push(account);
        }

        /// Adds a recipient row.
        pub async fn add_recipient(&self, recipient: Recipient) {
            self.recipients.write().await.push(recipient);
        }

        /// Adds an existing contact.
        pub async fn add_contact(&self, contact: Contact) {
            self.contacts.write().await.push(contact);
        }

        /// Makes an operation fail with `message` until cleared.
        pub async fn inject_error(&self, point: FailPoint, message: impl Into<String>) {
            self.fail_points.write().await.insert(point, message.into());
        }

        /// Removes an injected failure.
        pub async fn clear_error(&self, point: FailPoint) {
            self.fail_points.write().await.remove(&point);
        }

        /// Makes contact creation fail for this exact phone number.
        pub async fn fail_contact_creation(&self, phone_number: impl Into<String>) {
            self.failing_contact_phones.write().await.insert(phone_number.into());
        }

        /// Simulates another worker inserting the same contact first: the
        /// next `create_contact` for this phone stores a contact and then
        /// reports a unique violation.
        pub async fn race_contact_creation(&self, phone_number: impl Into<String>) {
            self.racing_contact_phones.write().await.insert(phone_number.into());
        }

        /// Sets the campaign status once `after_updates` recipient updates
        /// have been written, as an operator would from the management API.
        pub async fn change_status_after(
            &self,
            campaign_id: CampaignId,
            after_updates: usize,
            status: CampaignStatus,
        ) {
            self.scripted_changes.write().await.insert(
                campaign_id,
                ScriptedChange { after_updates, change: Change::Status(status) },
            );
        }

        /// Hands the campaign lease to `owner` for an hour once
        /// `after_updates` recipient updates have been written, as if another
        /// worker had taken the campaign over.
        pub async fn take_lease_after(
            &self,
            campaign_id: CampaignId,
            after_updates: usize,
            owner: impl Into<String>,
        ) {
            self.scripted_changes.write().await.insert(
                campaign_id,
                ScriptedChange { after_updates, change: Change::LeaseTakenBy(owner.into()) },
            );
        }

        /// Sets the campaign status when its sending account is looked up,
        /// as an operator acting while the run is being prepared would.
        pub async fn change_status_during_setup(
            &self,
            campaign_id: CampaignId,
            status: CampaignStatus,
        ) {
            self.setup_changes.write().await.insert(campaign_id, status);
        }

        /// Directly sets a campaign status.
        pub async fn set_status(&self, campaign_id: CampaignId, status: CampaignStatus) {
            if let Some(campaign) = self.campaigns.write().await.get_mut(&campaign_id) {
                campaign.status = status;
            }
        }

        /// Sets a lease as if another worker held it.
        pub async fn set_lease(
            &self,
            campaign_id: CampaignId,
            owner: impl Into<String>,
            expires_at: DateTime<Utc>,
        ) {
            if let Some(campaign) = self.campaigns.write().await.get_mut(&campaign_id) {
                campaign.lease_owner = Some(owner.into());
                campaign.lease_expires_at = Some(expires_at);
            }
        }

        /// Returns a snapshot of a campaign.
        pub async fn campaign(&self, campaign_id: CampaignId) -> Option<Campaign> {
            self.campaigns.read().await.get(&campaign_id).cloned()
        }

        /// Returns a campaign's recipients in insertion order.
        pub async fn recipients(&self, campaign_id: CampaignId) -> Vec<Recipient> {
            self.recipients
                .read()
                .await
                .iter()
                .filter(|r| r.campaign_id == campaign_id)
                .cloned()
                .collect()
        }

        /// Returns all stored contacts.
        pub async fn contacts(&self) -> Vec<Contact> {
            self.contacts.read().await.clone()
        }

        /// Returns all stored messages.
        pub async fn messages(&self) -> Vec<Message> {
            self.messages.read().await.clone()
        }

        /// Every status written through the store, in order.
        pub async fn status_writes(&self) -> Vec<(CampaignId, CampaignStatus)> {
            self.status_writes.read().await.clone()
        }

        /// Every counter write, in order.
        pub async fn counter_writes(&self) -> Vec<(CampaignId, CampaignCounters)> {
            self.counter_writes.read().await.clone()
        }

        async fn check(&self, point: FailPoint) -> herald_core::Result<()> {
            match self.fail_points.read().await.get(&point) {
                Some(message) => Err(CoreError::Database(message.clone())),
                None => Ok(()),
            }
        }

        async fn apply_setup_changes(&self, organization_id: OrganizationId, account_name: &str) {
            let changes: Vec<(CampaignId, CampaignStatus)> =
                self.setup_changes.write().await.drain().collect();
            for (campaign_id, status) in changes {
                let matches = self.campaigns.read().await.get(&campaign_id).is_some_and(|c| {
                    c.organization_id == organization_id && c.account_name == account_name
                });
                if matches {
                    self.set_status(campaign_id, status).await;
                } else {
                    self.setup_changes.write().await.insert(campaign_id, status);
                }
            }
        }

        /// Applies `update` to the campaign if its status still allows a run.
        async fn write_if_startable(
            &self,
            campaign_id: CampaignId,
            update: impl FnOnce(&mut Campaign),
        ) -> bool {
            let mut campaigns = self.campaigns.write().await;
            match campaigns.get_mut(&campaign_id) {
                Some(campaign) if campaign.status.is_startable() => {
                    update(campaign);
                    true
                },
                _ => false,
            }
        }

        async fn apply_scripted_change(&self, campaign_id: CampaignId, updates: usize) {
            let scripted = self.scripted_changes.read().await.get(&campaign_id).cloned();
            let Some(scripted) = scripted else {
                return;
            };
            if updates < scripted.after_updates {
                return;
            }

            self.scripted_changes.write().await.remove(&campaign_id);
            match scripted.change {
                Change::Status(status) => self.set_status(campaign_id, status).await,
                Change::LeaseTakenBy(owner) => {
                    let expires_at = Utc::now() + chrono::Duration::hours(1);
                    self.set_lease(campaign_id, owner, expires_at).await;
                },
            }
        }
    }

    impl CampaignStore for MockCampaignStore {
        fn find_campaign(&self, campaign_id: CampaignId) -> StoreFuture<'_, Option<Campaign>> {
            Box::pin(async move {
                self.check(FailPoint::FindCampaign).await?;
                Ok(self.campaigns.read().await.get(&campaign_id).cloned())
            })
        }

        fn find_template(&self, template_id: TemplateId) -> StoreFuture<'_, Option<Template>> {
            Box::pin(async move {
                self.check(FailPoint::FindTemplate).await?;
                Ok(self.templates.read().await.get(&template_id).cloned())
            })
        }

        fn find_account(
            &self,
            organization_id: OrganizationId,
            account_name: String,
        ) -> StoreFuture<'_, Option<Account>> {
            Box::pin(async move {
                self.check(FailPoint::FindAccount).await?;
                self.apply_setup_changes(organization_id, &account_name).await;
                Ok(self
                    .accounts
                    .read()
                    .await
                    .iter()
                    .find(|a| a.organization_id == organization_id && a.name == account_name)
                    .cloned())
            })
        }

        fn find_pending_recipients(
            &self,
            campaign_id: CampaignId,
        ) -> StoreFuture<'_, Vec<Recipient>> {
            Box::pin(async move {
                self.check(FailPoint::FindPendingRecipients).await?;
                let mut pending: Vec<Recipient> = self
                    .recipients
                    .read()
                    .await
                    .iter()
                    .filter(|r| r.campaign_id == campaign_id && r.status == RecipientStatus::Pending)
                    .cloned()
                    .collect();
                pending.sort_by_key(|r| r.created_at);
                Ok(pending)
            })
        }

        fn find_campaign_status(
            &self,
            campaign_id: CampaignId,
        ) -> StoreFuture<'_, Option<CampaignStatus>> {
            Box::pin(async move {
                self.check(FailPoint::FindCampaignStatus).await?;
                Ok(self.campaigns.read().await.get(&campaign_id).map(|c| c.status))
            })
        }

        fn update_campaign_status(
            &self,
            campaign_id: CampaignId,
            status: CampaignStatus,
        ) -> StoreFuture<'_, bool> {
            Box::pin(async move {
                let written =
                    self.write_if_startable(campaign_id, |campaign| campaign.status = status).await;
                if written {
                    self.status_writes.write().await.push((campaign_id, status));
                }
                Ok(written)
            })
        }

        fn mark_campaign_started(
            &self,
            campaign_id: CampaignId,
            started_at: DateTime<Utc>,
        ) -> StoreFuture<'_, bool> {
            Box::pin(async move {
                self.check(FailPoint::MarkStarted).await?;
                let started = self
                    .write_if_startable(campaign_id, |campaign| {
                        campaign.status = CampaignStatus::Processing;
                        campaign.started_at.get_or_insert(started_at);
                    })
                    .await;
                if started {
                    self.status_writes
                        .write()
                        .await
                        .push((campaign_id, CampaignStatus::Processing));
                }
                Ok(started)
            })
        }

        fn update_campaign_counters(
            &self,
            campaign_id: CampaignId,
            counters: CampaignCounters,
        ) -> StoreFuture<'_, ()> {
            Box::pin(async move {
                self.check(FailPoint::UpdateCounters).await?;
                self.counter_writes.write().await.push((campaign_id, counters));
                if let Some(campaign) = self.campaigns.write().await.get_mut(&campaign_id) {
                    campaign.sent_count = counters.sent;
                    campaign.failed_count = counters.failed;
                }
                Ok(())
            })
        }

        fn complete_campaign(
            &self,
            campaign_id: CampaignId,
            counters: CampaignCounters,
            completed_at: DateTime<Utc>,
        ) -> StoreFuture<'_, bool> {
            Box::pin(async move {
                self.check(FailPoint::CompleteCampaign).await?;
                let mut campaigns = self.campaigns.write().await;
                let Some(campaign) = campaigns.get_mut(&campaign_id) else {
                    return Ok(false);
                };
                if campaign.status != CampaignStatus::Processing {
                    return Ok(false);
                }
                campaign.status = CampaignStatus::Completed;
                campaign.completed_at = Some(completed_at);
                campaign.sent_count = counters.sent;
                campaign.failed_count = counters.failed;
                drop(campaigns);

                self.status_writes.write().await.push((campaign_id, CampaignStatus::Completed));
                self.counter_writes.write().await.push((campaign_id, counters));
                Ok(true)
            })
        }

        fn count_recipient_outcomes(
            &self,
            campaign_id: CampaignId,
        ) -> StoreFuture<'_, CampaignCounters> {
            Box::pin(async move {
                self.check(FailPoint::CountOutcomes).await?;
                let mut counters = CampaignCounters::default();
                for recipient in self.recipients.read().await.iter() {
                    if recipient.campaign_id == campaign_id {
                        counters.record(recipient.status);
                    }
                }
                Ok(counters)
            })
        }

        fn update_recipient(&self, update: RecipientUpdate) -> StoreFuture<'_, ()> {
            Box::pin(async move {
                self.check(FailPoint::UpdateRecipient).await?;
                let campaign_id = {
                    let mut recipients = self.recipients.write().await;
                    let recipient =
                        recipients.iter_mut().find(|r| r.id == update.recipient_id).ok_or_else(
                            || CoreError::NotFound(format!("recipient {}", update.recipient_id)),
                        )?;
                    recipient.status = update.status;
                    recipient.provider_message_id = update.provider_message_id;
                    recipient.error_message = update.error_message;
                    recipient.sent_at = update.sent_at;
                    recipient.campaign_id
                };

                let updates = {
                    let mut count = self.recipient_updates.write().await;
                    *count += 1;
                    *count
                };
                self.apply_scripted_change(campaign_id, updates).await;
                Ok(())
            })
        }

        fn find_contact(
            &self,
            organization_id: OrganizationId,
            phone_number: String,
        ) -> StoreFuture<'_, Option<Contact>> {
            Box::pin(async move {
                self.check(FailPoint::FindContact).await?;
                Ok(self
                    .contacts
                    .read()
                    .await
                    .iter()
                    .find(|c| c.organization_id == organization_id && c.phone_number == phone_number)
                    .cloned())
            })
        }

        fn create_contact(&self, contact: NewContact) -> StoreFuture<'_, Contact> {
            Box::pin(async move {
                if self.failing_contact_phones.read().await.contains(&contact.phone_number) {
                    return Err(CoreError::Database(format!(
                        "insert into contacts failed for {}",
                        contact.phone_number
                    )));
                }

                let stored = Contact {
                    id: ContactId::new(),
                    organization_id: contact.organization_id,
                    phone_number: contact.phone_number.clone(),
                    profile_name: Some(contact.profile_name.clone()),
                    created_at: Utc::now(),
                };

                let raced = self.racing_contact_phones.write().await.remove(&contact.phone_number);
                let mut contacts = self.contacts.write().await;
                let exists = contacts.iter().any(|c| {
                    c.organization_id == contact.organization_id
                        && c.phone_number == contact.phone_number
                });

                if raced && !exists {
                    contacts.push(stored);
                    return Err(CoreError::ConstraintViolation(
                        "duplicate key value violates unique constraint \"contacts_org_phone_key\""
                            .to_string(),
                    ));
                }
                if exists {
                    return Err(CoreError::ConstraintViolation(
                        "duplicate key value violates unique constraint \"contacts_org_phone_key\""
                            .to_string(),
                    ));
                }

                contacts.push(stored.clone());
                Ok(stored)
            })
        }

        fn create_message(&self, message: Message) -> StoreFuture<'_, MessageId> {
            Box::pin(async move {
                self.check(FailPoint::CreateMessage).await?;
                let id = message.id;
                self.messages.write().await.push(message);
                Ok(id)
            })
        }

        fn acquire_lease(
            &self,
            campaign_id: CampaignId,
            owner: String,
            expires_at: DateTime<Utc>,
            now: DateTime<Utc>,
        ) -> StoreFuture<'_, bool> {
            Box::pin(async move {
                let mut campaigns = self.campaigns.write().await;
                let Some(campaign) = campaigns.get_mut(&campaign_id) else {
                    return Ok(false);
                };

                let available = match (&campaign.lease_owner, campaign.lease_expires_at) {
                    (None, _) => true,
                    (Some(holder), _) if *holder == owner => true,
                    (Some(_), Some(expiry)) => expiry <= now,
                    (Some(_), None) => true,
                };

                if available {
                    campaign.lease_owner = Some(owner);
                    campaign.lease_expires_at = Some(expires_at);
                }
                Ok(available)
            })
        }

        fn release_lease(&self, campaign_id: CampaignId, owner: String) -> StoreFuture<'_, ()> {
            Box::pin(async move {
                if let Some(campaign) = self.campaigns.write().await.get_mut(&campaign_id) {
                    if campaign.lease_owner.as_deref() == Some(owner.as_str()) {
                        campaign.lease_owner = None;
                        campaign.lease_expires_at = None;
                    }
                }
                Ok(())
            })
        }
    }
}
