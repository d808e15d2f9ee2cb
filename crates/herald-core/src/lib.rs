//! Core domain models, storage, and shared primitives for Herald.
//!
//! Provides strongly-typed ids, campaign and recipient state, the stats
//! event contract, a clock abstraction, and the PostgreSQL repositories the
//! delivery worker reads and writes through.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{CampaignStatsUpdate, MulticastPublisher, NoOpPublisher, StatsPublisher};
pub use models::{
    Account, AccountId, Campaign, CampaignCounters, CampaignId, CampaignJob, CampaignStatus,
    Contact, ContactId, JobId, Message, MessageDirection, MessageId, MessageStatus, MessageType,
    NewContact, OrganizationId, QueuedJob, Recipient, RecipientId, RecipientStatus,
    RecipientUpdate, Template, TemplateId, TemplateParams,
};
pub use time::{Clock, RealClock, TestClock};
