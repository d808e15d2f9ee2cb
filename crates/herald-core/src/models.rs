//! Domain models and strongly-typed identifiers.
//!
//! Defines campaigns, recipients, templates, sending accounts, contacts and
//! messages together with the newtype ids and status enums that flow through
//! the delivery pipeline. Every type here maps directly onto a table row so
//! repositories can decode it with `sqlx::FromRow`.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Positional template parameters keyed by `"1"`, `"2"`, ...
///
/// Values are JSON scalars supplied when the campaign was created.
pub type TemplateParams = BTreeMap<String, serde_json::Value>;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl sqlx::Type<PgDb> for $name {
            fn type_info() -> PgTypeInfo {
                <Uuid as sqlx::Type<PgDb>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, PgDb> for $name {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
                Ok(Self(uuid))
            }
        }

        impl sqlx::Encode<'_, PgDb> for $name {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
                <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

/// Status enums are stored as lowercase TEXT columns.
macro_rules! text_column {
    ($name:ident) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl sqlx::Type<PgDb> for $name {
            fn type_info() -> PgTypeInfo {
                <&str as sqlx::Type<PgDb>>::type_info()
            }

            fn compatible(ty: &PgTypeInfo) -> bool {
                <&str as sqlx::Type<PgDb>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, PgDb> for $name {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
                Ok(s.parse()?)
            }
        }

        impl sqlx::Encode<'_, PgDb> for $name {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
                <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a bulk-send campaign.
    CampaignId
);
uuid_id!(
    /// Tenant scope. Contacts, accounts and templates are unique per
    /// organization.
    OrganizationId
);
uuid_id!(
    /// Identifier of one campaign recipient row.
    RecipientId
);
uuid_id!(
    /// Identifier of a contact in the organization's address book.
    ContactId
);
uuid_id!(
    /// Identifier of a persisted message record.
    MessageId
);
uuid_id!(
    /// Identifier of a sending account.
    AccountId
);
uuid_id!(
    /// Identifier of a message template.
    TemplateId
);
uuid_id!(
    /// Identifier of a queued campaign-start job.
    JobId
);

/// Error returned when a status column holds an unknown value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} status: {value}")]
pub struct ParseStatusError {
    kind: &'static str,
    value: String,
}

impl ParseStatusError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self { kind, value: value.to_string() }
    }
}

/// Campaign lifecycle status.
///
/// ```text
/// Queued -> Processing -> Completed
///                      -> Failed     (setup error)
///                      -> Paused     (set externally)
///                      -> Cancelled  (set externally)
/// ```
///
/// `Paused` and `Cancelled` are written by the management side and observed
/// by the processor between recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// Waiting for a worker to pick up the start job.
    Queued,
    /// A worker is sending to pending recipients.
    Processing,
    /// Every recipient reached a terminal status.
    Completed,
    /// The run could not start (template, account or recipient load failed).
    Failed,
    /// Stopped on request; may be re-queued later.
    Paused,
    /// Stopped on request permanently.
    Cancelled,
}

impl CampaignStatus {
    /// Returns the database representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether a start job for a campaign in this status should run.
    ///
    /// `Processing` is startable so a job redelivered after a crash resumes
    /// the remaining pending recipients.
    pub const fn is_startable(&self) -> bool {
        matches!(self, Self::Queued | Self::Processing)
    }

    /// Whether an operator has asked the run to stop.
    pub const fn is_stop_requested(&self) -> bool {
        matches!(self, Self::Paused | Self::Cancelled)
    }

    /// Whether no further transitions are expected.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl FromStr for CampaignStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "paused" => Ok(Self::Paused),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(ParseStatusError::new("campaign", s)),
        }
    }
}

text_column!(CampaignStatus);

/// Per-recipient delivery status. A recipient leaves `Pending` at most once
/// per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    /// Not yet attempted.
    Pending,
    /// Accepted by the gateway.
    Sent,
    /// Contact resolution or the gateway call failed.
    Failed,
}

impl RecipientStatus {
    /// Returns the database representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for RecipientStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(ParseStatusError::new("recipient", s)),
        }
    }
}

text_column!(RecipientStatus);

/// Message record status.
///
/// The worker only writes `Sent` or `Failed`; `Delivered` and `Read` arrive
/// later through receipt ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Accepted by the provider.
    Sent,
    /// Delivered to the handset.
    Delivered,
    /// Read by the contact.
    Read,
    /// Rejected or never sent.
    Failed,
}

impl MessageStatus {
    /// Returns the database representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            "failed" => Ok(Self::Failed),
            _ => Err(ParseStatusError::new("message", s)),
        }
    }
}

text_column!(MessageStatus);

/// Direction of a message relative to the organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    /// Sent by a contact to the organization.
    Incoming,
    /// Sent by the organization.
    Outgoing,
}

impl MessageDirection {
    /// Returns the database representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

impl FromStr for MessageDirection {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incoming" => Ok(Self::Incoming),
            "outgoing" => Ok(Self::Outgoing),
            _ => Err(ParseStatusError::new("direction", s)),
        }
    }
}

text_column!(MessageDirection);

/// Kind of message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Free-form text.
    Text,
    /// Pre-approved template with positional parameters.
    Template,
}

impl MessageType {
    /// Returns the database representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Template => "template",
        }
    }
}

impl FromStr for MessageType {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "template" => Ok(Self::Template),
            _ => Err(ParseStatusError::new("message type", s)),
        }
    }
}

text_column!(MessageType);

/// A bulk send of one template to a list of recipients.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Campaign {
    /// Unique identifier for this campaign.
    pub id: CampaignId,

    /// Organization that owns the campaign.
    pub organization_id: OrganizationId,

    /// Human-readable campaign name.
    pub name: String,

    /// Name of the sending account, resolved within the organization.
    pub account_name: String,

    /// Template sent to every recipient.
    pub template_id: TemplateId,

    /// Current lifecycle status.
    pub status: CampaignStatus,

    /// Number of recipients attached at creation time.
    pub total_recipients: i32,

    /// Recipients accepted by the gateway.
    pub sent_count: i32,

    /// Recipients that failed contact resolution or sending.
    pub failed_count: i32,

    /// When the first run moved the campaign to `processing`.
    pub started_at: Option<DateTime<Utc>>,

    /// When the campaign reached `completed`.
    pub completed_at: Option<DateTime<Utc>>,

    /// Worker currently holding the processing lease.
    pub lease_owner: Option<String>,

    /// Lease expiry; another worker may take over after this instant.
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// When this campaign was created.
    pub created_at: DateTime<Utc>,

    /// When this campaign was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Counters as last persisted on the campaign row.
    pub fn counters(&self) -> CampaignCounters {
        CampaignCounters { sent: self.sent_count, failed: self.failed_count }
    }
}

/// Message template with `{{n}}` placeholders in its body.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Template {
    /// Unique identifier for this template.
    pub id: TemplateId,

    /// Organization that owns the template.
    pub organization_id: OrganizationId,

    /// Provider-side template name.
    pub name: String,

    /// Language code, e.g. `en_US`.
    pub language: String,

    /// Body text used to render the stored message content.
    pub body_content: String,

    /// When this template was created.
    pub created_at: DateTime<Utc>,
}

/// Sending account credentials for the messaging provider.
#[derive(Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    /// Unique identifier for this account.
    pub id: AccountId,

    /// Organization that owns the account.
    pub organization_id: OrganizationId,

    /// Account name, unique within the organization.
    pub name: String,

    /// Provider phone number id used in the send URL.
    pub phone_id: String,

    /// Provider business account id.
    pub business_id: String,

    /// Graph API version, e.g. `v18.0`.
    pub api_version: String,

    /// Bearer token for the provider API.
    #[serde(skip_serializing)]
    pub access_token: String,

    /// When this account was created.
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("organization_id", &self.organization_id)
            .field("name", &self.name)
            .field("phone_id", &self.phone_id)
            .field("business_id", &self.business_id)
            .field("api_version", &self.api_version)
            .field("access_token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// One target of a campaign.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Recipient {
    /// Unique identifier for this recipient row.
    pub id: RecipientId,

    /// Campaign this recipient belongs to.
    pub campaign_id: CampaignId,

    /// Phone number as supplied, with or without a leading `+`.
    pub phone_number: String,

    /// Display name used when a new contact is created.
    pub recipient_name: String,

    /// Positional parameters for this recipient.
    pub template_params: Json<TemplateParams>,

    /// Delivery status.
    pub status: RecipientStatus,

    /// Failure description when `status` is `failed`.
    pub error_message: Option<String>,

    /// Provider message id when the gateway accepted the send.
    pub provider_message_id: Option<String>,

    /// When the gateway accepted the send.
    pub sent_at: Option<DateTime<Utc>>,

    /// Creation time; pending recipients are processed in this order.
    pub created_at: DateTime<Utc>,
}

/// Terminal update written to a recipient after one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientUpdate {
    /// Recipient being updated.
    pub recipient_id: RecipientId,

    /// New status, never `Pending`.
    pub status: RecipientStatus,

    /// Provider id on success.
    pub provider_message_id: Option<String>,

    /// Error text on failure.
    pub error_message: Option<String>,

    /// Acceptance time on success.
    pub sent_at: Option<DateTime<Utc>>,
}

impl RecipientUpdate {
    /// Update for a send the gateway accepted.
    pub fn sent(
        recipient_id: RecipientId,
        provider_message_id: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            recipient_id,
            status: RecipientStatus::Sent,
            provider_message_id: Some(provider_message_id.into()),
            error_message: None,
            sent_at: Some(sent_at),
        }
    }

    /// Update for a failed attempt.
    pub fn failed(recipient_id: RecipientId, error_message: impl Into<String>) -> Self {
        Self {
            recipient_id,
            status: RecipientStatus::Failed,
            provider_message_id: None,
            error_message: Some(error_message.into()),
            sent_at: None,
        }
    }
}

/// Address-book entry, unique per `(organization_id, phone_number)`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Contact {
    /// Unique identifier for this contact.
    pub id: ContactId,

    /// Organization that owns the contact.
    pub organization_id: OrganizationId,

    /// Phone number, normalized without a leading `+` for contacts created
    /// by the worker.
    pub phone_number: String,

    /// Profile name shown in conversations.
    pub profile_name: Option<String>,

    /// When this contact was created.
    pub created_at: DateTime<Utc>,
}

/// Fields required to insert a contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Normalized phone number.
    pub phone_number: String,
    /// Profile name taken from the recipient.
    pub profile_name: String,
}

/// Immutable record of one outbound message.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: MessageId,

    /// Organization that sent the message.
    pub organization_id: OrganizationId,

    /// Sending account name.
    pub account_name: String,

    /// Contact the message was addressed to.
    pub contact_id: ContactId,

    /// Provider id when the send was accepted.
    pub provider_message_id: Option<String>,

    /// Always `outgoing` for campaign sends.
    pub direction: MessageDirection,

    /// Always `template` for campaign sends.
    pub message_type: MessageType,

    /// Template name at send time.
    pub template_name: Option<String>,

    /// Parameters used for this send.
    pub template_params: Json<TemplateParams>,

    /// Rendered body text.
    pub content: String,

    /// Send outcome.
    pub status: MessageStatus,

    /// Failure description when `status` is `failed`.
    pub error_message: Option<String>,

    /// Campaign linkage: `campaign_id` and `recipient_name`.
    pub metadata: Json<serde_json::Value>,

    /// When this message was recorded.
    pub created_at: DateTime<Utc>,
}

/// Sent and failed recipient counts for a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CampaignCounters {
    /// Recipients in `sent`.
    pub sent: i32,
    /// Recipients in `failed`.
    pub failed: i32,
}

impl CampaignCounters {
    /// Creates counters from explicit values.
    pub const fn new(sent: i32, failed: i32) -> Self {
        Self { sent, failed }
    }

    /// Adds one terminal recipient outcome. `Pending` is ignored.
    pub fn record(&mut self, status: RecipientStatus) {
        match status {
            RecipientStatus::Sent => self.sent = self.sent.saturating_add(1),
            RecipientStatus::Failed => self.failed = self.failed.saturating_add(1),
            RecipientStatus::Pending => {},
        }
    }

    /// Total recipients that reached a terminal status.
    pub const fn processed(&self) -> i32 {
        self.sent.saturating_add(self.failed)
    }
}

/// Queue payload asking a worker to start (or resume) a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignJob {
    /// Campaign to process.
    pub campaign_id: CampaignId,
}

/// A job row claimed from the `campaign_jobs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueuedJob {
    /// Job identifier used for acknowledgement.
    pub id: JobId,

    /// Job payload.
    pub payload: Json<CampaignJob>,

    /// Number of times the job has been claimed, including this one.
    pub attempts: i32,

    /// Claim expiry; the job becomes visible again afterwards.
    pub locked_until: Option<DateTime<Utc>>,

    /// When the job was enqueued.
    pub enqueued_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn campaign_status_round_trips_through_text() {
        for status in [
            CampaignStatus::Queued,
            CampaignStatus::Processing,
            CampaignStatus::Completed,
            CampaignStatus::Failed,
            CampaignStatus::Paused,
            CampaignStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<CampaignStatus>(), Ok(status));
            assert_eq!(status.to_string(), status.as_str());
        }
        assert!("archived".parse::<CampaignStatus>().is_err());
    }

    #[test]
    fn only_queued_and_processing_are_startable() {
        assert!(CampaignStatus::Queued.is_startable());
        assert!(CampaignStatus::Processing.is_startable());
        assert!(!CampaignStatus::Completed.is_startable());
        assert!(!CampaignStatus::Failed.is_startable());
        assert!(!CampaignStatus::Paused.is_startable());
        assert!(!CampaignStatus::Cancelled.is_startable());
    }

    #[test]
    fn pause_and_cancel_are_stop_requests() {
        assert!(CampaignStatus::Paused.is_stop_requested());
        assert!(CampaignStatus::Cancelled.is_stop_requested());
        assert!(!CampaignStatus::Processing.is_stop_requested());
        assert!(!CampaignStatus::Paused.is_terminal());
    }

    #[test]
    fn counters_ignore_pending() {
        let mut counters = CampaignCounters::default();
        counters.record(RecipientStatus::Sent);
        counters.record(RecipientStatus::Failed);
        counters.record(RecipientStatus::Pending);
        counters.record(RecipientStatus::Sent);

        assert_eq!(counters, CampaignCounters::new(2, 1));
        assert_eq!(counters.processed(), 3);
    }

    #[test]
    fn account_debug_redacts_token() {
        let account = Account {
            id: AccountId::new(),
            organization_id: OrganizationId::new(),
            name: "primary".to_string(),
            phone_id: "1234".to_string(),
            business_id: "5678".to_string(),
            api_version: "v18.0".to_string(),
            access_token: "EAAG-secret".to_string(),
            created_at: Utc::now(),
        };

        let debug = format!("{account:?}");
        assert!(!debug.contains("EAAG-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn ids_serialize_as_plain_uuid_strings() {
        let id = CampaignId(Uuid::nil());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
    }

    #[test]
    fn recipient_updates_carry_terminal_fields() {
        let id = RecipientId::new();
        let sent = RecipientUpdate::sent(id, "wamid.1", Utc::now());
        assert_eq!(sent.status, RecipientStatus::Sent);
        assert!(sent.error_message.is_none());

        let failed = RecipientUpdate::failed(id, "Failed to create contact");
        assert_eq!(failed.status, RecipientStatus::Failed);
        assert!(failed.sent_at.is_none());
        assert_eq!(failed.error_message.as_deref(), Some("Failed to create contact"));
    }
}
