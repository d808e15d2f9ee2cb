//! Error types for campaign delivery.
//!
//! Errors fall into three groups: gateway failures for a single recipient,
//! setup failures that mark the whole campaign `failed`, and infrastructure
//! failures (database, configuration, shutdown). Only setup and
//! infrastructure errors escape `CampaignProcessor::process`; gateway errors
//! are recorded on the recipient and the run continues.

use std::{fmt, time::Duration};

use herald_core::CoreError;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error types for campaign delivery operations.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure talking to the provider.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// Provider request timed out.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Configured request timeout
        timeout_seconds: u64,
    },

    /// Provider rejected the access token (401/403).
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Provider error message
        message: String,
    },

    /// Provider throttled the account.
    #[error("rate limited by provider: {message}")]
    RateLimited {
        /// Provider error message
        message: String,
    },

    /// Provider refused the message (4xx other than auth and throttling).
    #[error("provider rejected message (HTTP {status_code}): {message}")]
    ProviderRejected {
        /// HTTP status code
        status_code: u16,
        /// Provider error code, when present
        code: Option<i64>,
        /// Provider error message
        message: String,
    },

    /// Provider returned a 5xx response.
    #[error("provider server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code (5xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Provider answered 2xx without a usable message id.
    #[error("invalid provider response: {message}")]
    InvalidResponse {
        /// What was wrong with the response
        message: String,
    },

    /// The campaign referenced by a job does not exist.
    #[error("campaign {campaign_id} not found")]
    CampaignNotFound {
        /// Campaign id from the job
        campaign_id: String,
    },

    /// The campaign's template does not exist.
    #[error("template {template_id} not found")]
    TemplateNotFound {
        /// Template id from the campaign
        template_id: String,
    },

    /// No account with the campaign's account name exists in the
    /// organization.
    #[error("account '{account_name}' not found")]
    AccountNotFound {
        /// Account name from the campaign
        account_name: String,
    },

    /// A contact could not be found or created for a recipient.
    #[error("contact resolution failed: {message}")]
    ContactResolution {
        /// Underlying failure
        message: String,
    },

    /// Database operation failed.
    #[error("database error: {message}")]
    DatabaseError {
        /// Database error message
        message: String,
    },

    /// Invalid worker or gateway configuration.
    #[error("invalid configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// Worker did not stop within the shutdown timeout.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Configured shutdown timeout
        timeout: Duration,
    },

    /// Unexpected internal error.
    #[error("internal delivery error: {message}")]
    InternalError {
        /// Internal error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates an unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized { message: message.into() }
    }

    /// Creates a provider rate-limit error.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited { message: message.into() }
    }

    /// Creates a provider rejection error.
    pub fn rejected(status_code: u16, code: Option<i64>, message: impl Into<String>) -> Self {
        Self::ProviderRejected { status_code, code, message: message.into() }
    }

    /// Creates a server error from an HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into() }
    }

    /// Creates an invalid response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse { message: message.into() }
    }

    /// Creates a campaign-not-found error.
    pub fn campaign_not_found(campaign_id: impl fmt::Display) -> Self {
        Self::CampaignNotFound { campaign_id: campaign_id.to_string() }
    }

    /// Creates a template-not-found error.
    pub fn template_not_found(template_id: impl fmt::Display) -> Self {
        Self::TemplateNotFound { template_id: template_id.to_string() }
    }

    /// Creates an account-not-found error.
    pub fn account_not_found(account_name: impl Into<String>) -> Self {
        Self::AccountNotFound { account_name: account_name.into() }
    }

    /// Creates a contact resolution error.
    pub fn contact(message: impl Into<String>) -> Self {
        Self::ContactResolution { message: message.into() }
    }

    /// Creates a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::DatabaseError { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Whether this error prevented a campaign run from starting.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::CampaignNotFound { .. }
                | Self::TemplateNotFound { .. }
                | Self::AccountNotFound { .. }
        )
    }

    /// Whether the failure came from the provider call for one recipient.
    pub fn is_gateway_failure(&self) -> bool {
        matches!(
            self,
            Self::NetworkError { .. }
                | Self::Timeout { .. }
                | Self::Unauthorized { .. }
                | Self::RateLimited { .. }
                | Self::ProviderRejected { .. }
                | Self::ServerError { .. }
                | Self::InvalidResponse { .. }
        )
    }
}

impl From<CoreError> for DeliveryError {
    fn from(error: CoreError) -> Self {
        Self::database(error.to_string())
    }
}

/// Category of delivery error for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues.
    Network,
    /// Provider refused the request.
    Provider,
    /// Provider throttling.
    RateLimit,
    /// Missing campaign, template or account.
    Setup,
    /// Contact lookup or creation.
    Contact,
    /// Database operations.
    Database,
    /// Configuration problems.
    Configuration,
    /// Internal system errors.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::Unauthorized { .. }
            | DeliveryError::ProviderRejected { .. }
            | DeliveryError::ServerError { .. }
            | DeliveryError::InvalidResponse { .. } => Self::Provider,
            DeliveryError::RateLimited { .. } => Self::RateLimit,
            DeliveryError::CampaignNotFound { .. }
            | DeliveryError::TemplateNotFound { .. }
            | DeliveryError::AccountNotFound { .. } => Self::Setup,
            DeliveryError::ContactResolution { .. } => Self::Contact,
            DeliveryError::DatabaseError { .. } => Self::Database,
            DeliveryError::ConfigurationError { .. } => Self::Configuration,
            DeliveryError::ShutdownTimeout { .. } | DeliveryError::InternalError { .. } => {
                Self::Internal
            },
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Provider => write!(f, "provider"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Setup => write!(f, "setup"),
            Self::Contact => write!(f, "contact"),
            Self::Database => write!(f, "database"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_failures_identified() {
        assert!(DeliveryError::campaign_not_found("c-1").is_setup_failure());
        assert!(DeliveryError::template_not_found("t-1").is_setup_failure());
        assert!(DeliveryError::account_not_found("primary").is_setup_failure());

        assert!(!DeliveryError::database("connection lost").is_setup_failure());
        assert!(!DeliveryError::rate_limited("slow down").is_setup_failure());
    }

    #[test]
    fn gateway_failures_identified() {
        assert!(DeliveryError::network("connection refused").is_gateway_failure());
        assert!(DeliveryError::timeout(30).is_gateway_failure());
        assert!(DeliveryError::rejected(400, Some(132000), "param mismatch").is_gateway_failure());
        assert!(DeliveryError::server_error(502, "bad gateway").is_gateway_failure());

        assert!(!DeliveryError::contact("db down").is_gateway_failure());
        assert!(!DeliveryError::configuration("bad url").is_gateway_failure());
    }

    #[test]
    fn core_errors_become_database_errors() {
        let error = DeliveryError::from(CoreError::Database("pool timed out".to_string()));
        assert!(matches!(error, DeliveryError::DatabaseError { .. }));
        assert_eq!(error.to_string(), "database error: Database error: pool timed out");
    }

    #[test]
    fn error_categories_mapped_correctly() {
        assert_eq!(ErrorCategory::from(&DeliveryError::network("x")), ErrorCategory::Network);
        assert_eq!(
            ErrorCategory::from(&DeliveryError::unauthorized("expired token")),
            ErrorCategory::Provider
        );
        assert_eq!(
            ErrorCategory::from(&DeliveryError::rate_limited("throttled")),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            ErrorCategory::from(&DeliveryError::account_not_found("primary")),
            ErrorCategory::Setup
        );
        assert_eq!(ErrorCategory::Setup.to_string(), "setup");
    }

    #[test]
    fn error_display_format() {
        assert_eq!(DeliveryError::timeout(30).to_string(), "request timeout after 30s");
        assert_eq!(
            DeliveryError::account_not_found("primary").to_string(),
            "account 'primary' not found"
        );
        assert_eq!(
            DeliveryError::rejected(400, Some(100), "Invalid parameter").to_string(),
            "provider rejected message (HTTP 400): Invalid parameter"
        );
    }
}
