//! Campaign fixtures with sensible defaults.
//!
//! `CampaignBuilder::with_defaults()` describes a queued campaign using an
//! order-confirmation template and a "primary" account; tests add
//! recipients and tweak only what they assert on.

use chrono::{DateTime, Duration, Utc};
use herald_core::{
    Account, AccountId, Campaign, CampaignId, CampaignStatus, OrganizationId, Recipient,
    RecipientId, RecipientStatus, Template, TemplateId, TemplateParams,
};
use herald_delivery::storage::mock::MockCampaignStore;
use serde_json::Value;
use sqlx::types::Json;

/// Template body used by default fixtures.
pub const DEFAULT_TEMPLATE_BODY: &str = "Hi {{1}}, your order {{2}} shipped";

/// Account name used by default fixtures.
pub const DEFAULT_ACCOUNT_NAME: &str = "primary";

struct RecipientSpec {
    phone_number: String,
    name: String,
    params: TemplateParams,
}

/// Builder for a campaign and everything it references.
pub struct CampaignBuilder {
    organization_id: OrganizationId,
    status: CampaignStatus,
    account_name: String,
    seed_account: bool,
    template_name: String,
    template_language: String,
    template_body: String,
    recipients: Vec<RecipientSpec>,
    created_at: DateTime<Utc>,
}

impl CampaignBuilder {
    /// Creates a queued campaign with a template and account but no
    /// recipients.
    pub fn with_defaults() -> Self {
        Self {
            organization_id: OrganizationId::new(),
            status: CampaignStatus::Queued,
            account_name: DEFAULT_ACCOUNT_NAME.to_string(),
            seed_account: true,
            template_name: "order_shipped".to_string(),
            template_language: "en_US".to_string(),
            template_body: DEFAULT_TEMPLATE_BODY.to_string(),
            recipients: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Sets the campaign organization.
    pub fn organization(mut self, organization_id: OrganizationId) -> Self {
        self.organization_id = organization_id;
        self
    }

    /// Sets the initial campaign status.
    pub fn status(mut self, status: CampaignStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the account name the campaign sends from.
    pub fn account_name(mut self, name: impl Into<String>) -> Self {
        self.account_name = name.into();
        self
    }

    /// Leaves the account out of the store so its lookup fails.
    pub fn without_account(mut self) -> Self {
        self.seed_account = false;
        self
    }

    /// Sets the template body.
    pub fn template_body(mut self, body: impl Into<String>) -> Self {
        self.template_body = body.into();
        self
    }

    /// Adds a recipient with positional parameters `"1"`, `"2"`, ...
    pub fn recipient(mut self, phone_number: &str, name: &str, params: &[&str]) -> Self {
        let params = params
            .iter()
            .enumerate()
            .map(|(index, value)| ((index + 1).to_string(), Value::String((*value).to_string())))
            .collect();
        self.recipients.push(RecipientSpec {
            phone_number: phone_number.to_string(),
            name: name.to_string(),
            params,
        });
        self
    }

    /// Adds a recipient with explicit parameters.
    pub fn recipient_with_params(
        mut self,
        phone_number: &str,
        name: &str,
        params: TemplateParams,
    ) -> Self {
        self.recipients.push(RecipientSpec {
            phone_number: phone_number.to_string(),
            name: name.to_string(),
            params,
        });
        self
    }

    /// Adds `count` recipients with distinct phone numbers.
    pub fn recipients(mut self, count: usize) -> Self {
        let start = self.recipients.len();
        for index in start..start + count {
            self = self.recipient(
                &format!("+1555{index:07}"),
                &format!("Recipient {index}"),
                &[&format!("Recipient {index}"), &format!("#{index}")],
            );
        }
        self
    }

    /// Builds the rows without storing them.
    pub fn build(self) -> SeededCampaign {
        let campaign_id = CampaignId::new();

        let template = Template {
            id: TemplateId::new(),
            organization_id: self.organization_id,
            name: self.template_name,
            language: self.template_language,
            body_content: self.template_body,
            created_at: self.created_at,
        };

        let account = Account {
            id: AccountId::new(),
            organization_id: self.organization_id,
            name: self.account_name.clone(),
            phone_id: "1098765432".to_string(),
            business_id: "2233445566".to_string(),
            api_version: "v18.0".to_string(),
            access_token: "test-access-token".to_string(),
            created_at: self.created_at,
        };

        let recipients: Vec<Recipient> = self
            .recipients
            .into_iter()
            .enumerate()
            .map(|(index, spec)| Recipient {
                id: RecipientId::new(),
                campaign_id,
                phone_number: spec.phone_number,
                recipient_name: spec.name,
                template_params: Json(spec.params),
                status: RecipientStatus::Pending,
                error_message: None,
                provider_message_id: None,
                sent_at: None,
                created_at: self.created_at + Duration::milliseconds(index as i64),
            })
            .collect();

        let campaign = Campaign {
            id: campaign_id,
            organization_id: self.organization_id,
            name: "Spring launch".to_string(),
            account_name: self.account_name,
            template_id: template.id,
            status: self.status,
            total_recipients: i32::try_from(recipients.len()).unwrap_or(i32::MAX),
            sent_count: 0,
            failed_count: 0,
            started_at: None,
            completed_at: None,
            lease_owner: None,
            lease_expires_at: None,
            created_at: self.created_at,
            updated_at: self.created_at,
        };

        SeededCampaign {
            campaign,
            template,
            account: self.seed_account.then_some(account),
            recipients,
        }
    }

    /// Builds the rows and inserts them into the mock store.
    pub async fn seed(self, store: &MockCampaignStore) -> SeededCampaign {
        let seeded = self.build();

        store.add_campaign(seeded.campaign.clone()).await;
        store.add_template(seeded.template.clone()).await;
        if let Some(account) = &seeded.account {
            store.add_account(account.clone()).await;
        }
        for recipient in &seeded.recipients {
            store.add_recipient(recipient.clone()).await;
        }

        seeded
    }
}

/// Rows produced by a `CampaignBuilder`.
#[derive(Debug, Clone)]
pub struct SeededCampaign {
    /// The campaign.
    pub campaign: Campaign,
    /// Its template.
    pub template: Template,
    /// Its account, unless built `without_account()`.
    pub account: Option<Account>,
    /// Its recipients in creation order.
    pub recipients: Vec<Recipient>,
}

impl SeededCampaign {
    /// Campaign id.
    pub fn id(&self) -> CampaignId {
        self.campaign.id
    }
}
