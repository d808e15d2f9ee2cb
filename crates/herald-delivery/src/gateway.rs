//! External gateway adapter for template messages.
//!
//! `MessageGateway` is the seam between the campaign processor and the
//! messaging provider. `CloudApiGateway` implements it against the Cloud API
//! `/{version}/{phone_id}/messages` endpoint. The adapter performs exactly one
//! HTTP call per send and never retries; a failed send is recorded on the
//! recipient and the campaign moves on.

use std::time::Duration;

use herald_core::{Account, Template};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// Provider error codes that indicate throttling rather than rejection.
const RATE_LIMIT_CODES: [i64; 5] = [4, 80007, 130429, 131048, 131056];

/// Maximum bytes of an error body kept for diagnostics.
const MAX_ERROR_BODY: usize = 1024;

/// Everything needed to send one template message to one phone number.
#[derive(Clone)]
pub struct TemplateSendRequest {
    /// Provider phone number id of the sending account.
    pub phone_id: String,
    /// Graph API version.
    pub api_version: String,
    /// Bearer token.
    pub access_token: String,
    /// Destination phone number.
    pub to: String,
    /// Template name.
    pub template_name: String,
    /// Template language code.
    pub language: String,
    /// Ordered body parameters; empty means no body component.
    pub body_parameters: Vec<String>,
}

impl TemplateSendRequest {
    /// Builds a request from the sending account and template.
    pub fn new(
        account: &Account,
        to: impl Into<String>,
        template: &Template,
        body_parameters: Vec<String>,
    ) -> Self {
        Self {
            phone_id: account.phone_id.clone(),
            api_version: account.api_version.clone(),
            access_token: account.access_token.clone(),
            to: to.into(),
            template_name: template.name.clone(),
            language: template.language.clone(),
            body_parameters,
        }
    }
}

impl std::fmt::Debug for TemplateSendRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateSendRequest")
            .field("phone_id", &self.phone_id)
            .field("to", &self.to)
            .field("template_name", &self.template_name)
            .field("language", &self.language)
            .field("body_parameters", &self.body_parameters)
            .finish_non_exhaustive()
    }
}

/// Sends templated messages through an external provider.
#[async_trait::async_trait]
pub trait MessageGateway: Send + Sync + std::fmt::Debug {
    /// Sends one template message and returns the provider message id.
    ///
    /// # Errors
    ///
    /// Returns a gateway `DeliveryError` describing why the provider did not
    /// accept the message.
    async fn send_template(&self, request: TemplateSendRequest) -> Result<String>;
}

/// Configuration for the Cloud API gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL, without a trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.facebook.com".to_string(),
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: "Herald-Campaign-Worker/1.0".to_string(),
        }
    }
}

/// Cloud API implementation of `MessageGateway`.
#[derive(Debug, Clone)]
pub struct CloudApiGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl CloudApiGateway {
    /// Creates a gateway with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be built.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a gateway with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(GatewayConfig::default())
    }

    fn messages_url(&self, request: &TemplateSendRequest) -> String {
        format!(
            "{}/{}/{}/messages",
            self.config.base_url.trim_end_matches('/'),
            request.api_version,
            request.phone_id
        )
    }
}

#[async_trait::async_trait]
impl MessageGateway for CloudApiGateway {
    async fn send_template(&self, request: TemplateSendRequest) -> Result<String> {
        let span = info_span!(
            "template_send",
            phone_id = %request.phone_id,
            template = %request.template_name,
            parameters = request.body_parameters.len()
        );

        async move {
            let start_time = std::time::Instant::now();
            let url = self.messages_url(&request);

            let response = match self
                .client
                .post(&url)
                .bearer_auth(&request.access_token)
                .json(&request_body(&request))
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        duration_ms = start_time.elapsed().as_millis(),
                        error = %e,
                        "template send request failed"
                    );

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let status_code = response.status().as_u16();
            let body = response.text().await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to read provider response body");
                String::new()
            });

            tracing::debug!(
                status = status_code,
                duration_ms = start_time.elapsed().as_millis(),
                "received provider response"
            );

            if (200..300).contains(&status_code) {
                let message_id = parse_message_id(&body)?;
                tracing::debug!(message_id = %message_id, "template accepted by provider");
                Ok(message_id)
            } else {
                let error = classify_error(status_code, &body);
                tracing::warn!(status = status_code, error = %error, "provider refused template");
                Err(error)
            }
        }
        .instrument(span)
        .await
    }
}

#[derive(Debug, Serialize)]
struct SendTemplateBody<'a> {
    messaging_product: &'static str,
    recipient_type: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    template: TemplatePayload<'a>,
}

#[derive(Debug, Serialize)]
struct TemplatePayload<'a> {
    name: &'a str,
    language: LanguagePayload<'a>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    components: Vec<ComponentPayload<'a>>,
}

#[derive(Debug, Serialize)]
struct LanguagePayload<'a> {
    code: &'a str,
}

#[derive(Debug, Serialize)]
struct ComponentPayload<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    parameters: Vec<TextParameter<'a>>,
}

#[derive(Debug, Serialize)]
struct TextParameter<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

/// JSON body for a template send. The body component is omitted when there
/// are no parameters.
fn request_body(request: &TemplateSendRequest) -> SendTemplateBody<'_> {
    let components = if request.body_parameters.is_empty() {
        Vec::new()
    } else {
        vec![ComponentPayload {
            kind: "body",
            parameters: request
                .body_parameters
                .iter()
                .map(|text| TextParameter { kind: "text", text: text.as_str() })
                .collect(),
        }]
    };

    SendTemplateBody {
        messaging_product: "whatsapp",
        recipient_type: "individual",
        to: &request.to,
        kind: "template",
        template: TemplatePayload {
            name: &request.template_name,
            language: LanguagePayload { code: &request.language },
            components,
        },
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ProviderError,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

fn parse_message_id(body: &str) -> Result<String> {
    let response: SendResponse = serde_json::from_str(body)
        .map_err(|e| DeliveryError::invalid_response(format!("malformed JSON: {e}")))?;

    response
        .messages
        .into_iter()
        .next()
        .map(|message| message.id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| DeliveryError::invalid_response("response contained no message id"))
}

/// Maps a non-2xx provider response to a `DeliveryError`.
pub(crate) fn classify_error(status_code: u16, body: &str) -> DeliveryError {
    let provider = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|e| e.error);
    let code = provider.as_ref().and_then(|e| e.code);
    let message = provider
        .map(|e| e.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| truncate(body));

    if status_code == 429 || code.is_some_and(|c| RATE_LIMIT_CODES.contains(&c)) {
        return DeliveryError::rate_limited(message);
    }

    match status_code {
        401 | 403 => DeliveryError::unauthorized(message),
        400..=499 => DeliveryError::rejected(status_code, code, message),
        500..=599 => DeliveryError::server_error(status_code, truncate(body)),
        _ => DeliveryError::invalid_response(format!("unexpected HTTP status {status_code}")),
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn send_request(body_parameters: Vec<&str>) -> TemplateSendRequest {
        TemplateSendRequest {
            phone_id: "106540352242922".to_string(),
            api_version: "v18.0".to_string(),
            access_token: "test-token".to_string(),
            to: "+15551234567".to_string(),
            template_name: "order_shipped".to_string(),
            language: "en_US".to_string(),
            body_parameters: body_parameters.into_iter().map(String::from).collect(),
        }
    }

    fn gateway_for(server: &MockServer) -> CloudApiGateway {
        CloudApiGateway::new(GatewayConfig {
            base_url: server.uri(),
            timeout: Duration::from_secs(5),
            user_agent: "herald-test".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn body_includes_text_parameters_in_order() {
        let request = send_request(vec!["Ana", "#123"]);

        let body = serde_json::to_value(request_body(&request)).unwrap();

        assert_eq!(
            body,
            json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": "+15551234567",
                "type": "template",
                "template": {
                    "name": "order_shipped",
                    "language": { "code": "en_US" },
                    "components": [{
                        "type": "body",
                        "parameters": [
                            { "type": "text", "text": "Ana" },
                            { "type": "text", "text": "#123" }
                        ]
                    }]
                }
            })
        );
    }

    #[test]
    fn request_takes_credentials_from_account() {
        let organization_id = herald_core::OrganizationId::new();
        let account = Account {
            id: herald_core::AccountId::new(),
            organization_id,
            name: "main".to_string(),
            phone_id: "106540352242922".to_string(),
            business_id: "102290129340398".to_string(),
            api_version: "v19.0".to_string(),
            access_token: "account-token".to_string(),
            created_at: chrono::Utc::now(),
        };
        let template = Template {
            id: herald_core::TemplateId::new(),
            organization_id,
            name: "order_shipped".to_string(),
            language: "pt_BR".to_string(),
            body_content: "Hi {{1}}".to_string(),
            created_at: chrono::Utc::now(),
        };

        let request =
            TemplateSendRequest::new(&account, "15550001", &template, vec!["Ana".to_string()]);

        assert_eq!(request.phone_id, "106540352242922");
        assert_eq!(request.api_version, "v19.0");
        assert_eq!(request.access_token, "account-token");
        assert_eq!(request.to, "15550001");
        assert_eq!(request.template_name, "order_shipped");
        assert_eq!(request.language, "pt_BR");
        assert_eq!(request.body_parameters, vec!["Ana".to_string()]);
    }

    #[test]
    fn body_omits_components_without_parameters() {
        let body = serde_json::to_value(request_body(&send_request(vec![]))).unwrap();
        assert!(body["template"].get("components").is_none());
    }

    #[test]
    fn debug_output_hides_token() {
        let debug = format!("{:?}", send_request(vec![]));
        assert!(!debug.contains("test-token"));
    }

    #[test]
    fn classifies_provider_errors() {
        let throttled = json!({"error": {"message": "Rate limit hit", "code": 130429}});
        assert!(matches!(
            classify_error(400, &throttled.to_string()),
            DeliveryError::RateLimited { .. }
        ));
        assert!(matches!(classify_error(429, ""), DeliveryError::RateLimited { .. }));

        let auth = json!({"error": {"message": "Invalid OAuth access token", "code": 190}});
        assert!(matches!(
            classify_error(401, &auth.to_string()),
            DeliveryError::Unauthorized { .. }
        ));

        let invalid = json!({"error": {"message": "Recipient not on WhatsApp", "code": 131026}});
        match classify_error(400, &invalid.to_string()) {
            DeliveryError::ProviderRejected { status_code, code, message } => {
                assert_eq!(status_code, 400);
                assert_eq!(code, Some(131026));
                assert_eq!(message, "Recipient not on WhatsApp");
            },
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(matches!(classify_error(503, "unavailable"), DeliveryError::ServerError { .. }));
    }

    #[test]
    fn truncates_long_bodies_on_char_boundary() {
        let body = "é".repeat(MAX_ERROR_BODY);
        let truncated = truncate(&body);
        assert!(truncated.ends_with("... (truncated)"));
        assert!(truncated.len() < body.len());
    }

    #[tokio::test]
    async fn successful_send_returns_provider_id() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/v18.0/106540352242922/messages"))
            .and(matchers::header("authorization", "Bearer test-token"))
            .and(matchers::body_partial_json(json!({
                "to": "+15551234567",
                "template": { "name": "order_shipped", "language": { "code": "en_US" } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messaging_product": "whatsapp",
                "contacts": [{ "input": "+15551234567", "wa_id": "15551234567" }],
                "messages": [{ "id": "wamid.HBgLMTU1NTEyMzQ1NjcVAgARGBI" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let message_id =
            gateway_for(&server).send_template(send_request(vec!["Ana"])).await.unwrap();

        assert_eq!(message_id, "wamid.HBgLMTU1NTEyMzQ1NjcVAgARGBI");
    }

    #[tokio::test]
    async fn rejection_maps_provider_message() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "message": "(#132000) Number of parameters does not match",
                    "type": "OAuthException",
                    "code": 132000
                }
            })))
            .mount(&server)
            .await;

        let error =
            gateway_for(&server).send_template(send_request(vec!["Ana"])).await.unwrap_err();

        assert!(matches!(error, DeliveryError::ProviderRejected { code: Some(132000), .. }));
        assert!(error.to_string().contains("Number of parameters does not match"));
    }

    #[tokio::test]
    async fn success_without_message_id_is_invalid() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "messages": [] })))
            .mount(&server)
            .await;

        let error = gateway_for(&server).send_template(send_request(vec![])).await.unwrap_err();

        assert!(matches!(error, DeliveryError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn server_errors_are_not_retried() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream failure"))
            .expect(1)
            .mount(&server)
            .await;

        let error = gateway_for(&server).send_template(send_request(vec![])).await.unwrap_err();

        assert!(matches!(error, DeliveryError::ServerError { status_code: 500, .. }));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let gateway = CloudApiGateway::new(GatewayConfig {
            base_url: server.uri(),
            timeout: Duration::from_millis(200),
            user_agent: "herald-test".to_string(),
        })
        .unwrap();

        let error = gateway.send_template(send_request(vec![])).await.unwrap_err();

        assert!(matches!(error, DeliveryError::Timeout { .. }));
    }
}
