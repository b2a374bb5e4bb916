//! WhatsApp gateway client.
//!
//! Plain HTTP against the gateway's Messages endpoint. No retries here —
//! the retry executor wraps the send at the engine level. Failures of any
//! shape (non-2xx, timeout, transport) come back inside the receipt so
//! logging always has something to record.

use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::{debug, error, info};

use fw_common::retry::OpError;

const TEMPLATE_TEXT_TIMEOUT: Duration = Duration::from_secs(30);
const MEDIA_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of one gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub provider_id: Option<String>,
    pub status: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// HTTP status of the gateway response, when one was received.
    pub http_status: Option<u16>,
}

impl DeliveryReceipt {
    pub fn is_success(&self) -> bool {
        self.error_code.is_none() && self.provider_id.is_some()
    }

    /// Convert into the two-level result the retry executor consumes.
    pub fn into_result(self) -> Result<DeliveryReceipt, OpError> {
        if self.is_success() {
            return Ok(self);
        }
        let message = format!(
            "gateway error {}: {}",
            self.error_code.as_deref().unwrap_or("unknown"),
            self.error_message.as_deref().unwrap_or("no detail"),
        );
        match self.http_status {
            Some(status) => Err(OpError::from_http_status(status, message)),
            // No HTTP status means the request never completed: retryable.
            None => Err(OpError::retryable(anyhow::anyhow!(message))),
        }
    }

    fn transport_failure(code: &str, message: String) -> Self {
        Self {
            provider_id: None,
            status: "failed".to_string(),
            error_code: Some(code.to_string()),
            error_message: Some(message),
            http_status: None,
        }
    }
}

/// The seam the engine sends through.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_template(
        &self,
        to: &str,
        template_id: &str,
        variables: &IndexMap<String, String>,
    ) -> DeliveryReceipt;

    async fn send_text(&self, to: &str, body: &str) -> DeliveryReceipt;

    async fn send_media(&self, to: &str, media_url: &str, caption: Option<&str>) -> DeliveryReceipt;
}

#[derive(Debug, Clone)]
pub struct WhatsAppClientConfig {
    pub base_url: String,
    pub account_sid: String,
    pub auth_token: String,
    pub messaging_service_sid: String,
}

pub struct WhatsAppClient {
    config: WhatsAppClientConfig,
    client: reqwest::Client,
}

impl WhatsAppClient {
    pub fn new(config: WhatsAppClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { config, client })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/Accounts/{}/Messages.json",
            self.config.base_url.trim_end_matches('/'),
            self.config.account_sid,
        )
    }

    /// The gateway expects the channel prefix on the recipient.
    fn whatsapp_to(to: &str) -> String {
        if to.starts_with("whatsapp:") {
            to.to_string()
        } else {
            format!("whatsapp:{to}")
        }
    }

    async fn post_message(
        &self,
        form: Vec<(&'static str, String)>,
        timeout: Duration,
        context: &str,
    ) -> DeliveryReceipt {
        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .timeout(timeout)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                error!(context, timeout_s = timeout.as_secs(), "gateway request timed out");
                return DeliveryReceipt::transport_failure(
                    "TIMEOUT",
                    format!("request timed out after {}s", timeout.as_secs()),
                );
            }
            Err(e) => {
                error!(context, error = %e, "gateway request failed");
                return DeliveryReceipt::transport_failure("TRANSPORT", e.to_string());
            }
        };

        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or_default();

        if status.is_success() {
            let sid = body
                .get("sid")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let message_status = body
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("queued")
                .to_string();
            info!(context, provider_id = %sid, status = %message_status, "message accepted by gateway");
            metrics::counter!("messaging.sends_total").increment(1);
            DeliveryReceipt {
                provider_id: Some(sid),
                status: message_status,
                error_code: None,
                error_message: None,
                http_status: Some(status.as_u16()),
            }
        } else {
            let code = body
                .get("code")
                .map(|v| v.to_string().trim_matches('"').to_string())
                .unwrap_or_else(|| status.as_u16().to_string());
            let message = body
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown gateway error")
                .to_string();
            error!(context, http_status = status.as_u16(), code = %code, %message, "gateway rejected message");
            metrics::counter!("messaging.send_errors_total").increment(1);
            DeliveryReceipt {
                provider_id: None,
                status: "failed".to_string(),
                error_code: Some(code),
                error_message: Some(message),
                http_status: Some(status.as_u16()),
            }
        }
    }
}

#[async_trait]
impl MessageSender for WhatsAppClient {
    async fn send_template(
        &self,
        to: &str,
        template_id: &str,
        variables: &IndexMap<String, String>,
    ) -> DeliveryReceipt {
        debug!(to, template_id, slots = variables.len(), "sending template message");
        let content_variables =
            serde_json::to_string(variables).unwrap_or_else(|_| "{}".to_string());
        self.post_message(
            vec![
                ("To", Self::whatsapp_to(to)),
                (
                    "MessagingServiceSid",
                    self.config.messaging_service_sid.clone(),
                ),
                ("ContentSid", template_id.to_string()),
                ("ContentVariables", content_variables),
            ],
            TEMPLATE_TEXT_TIMEOUT,
            "send_template",
        )
        .await
    }

    async fn send_text(&self, to: &str, body: &str) -> DeliveryReceipt {
        debug!(to, len = body.len(), "sending free-text message");
        self.post_message(
            vec![
                ("To", Self::whatsapp_to(to)),
                (
                    "MessagingServiceSid",
                    self.config.messaging_service_sid.clone(),
                ),
                ("Body", body.to_string()),
            ],
            TEMPLATE_TEXT_TIMEOUT,
            "send_text",
        )
        .await
    }

    async fn send_media(&self, to: &str, media_url: &str, caption: Option<&str>) -> DeliveryReceipt {
        debug!(to, media_url, "sending media message");
        let mut form = vec![
            ("To", Self::whatsapp_to(to)),
            (
                "MessagingServiceSid",
                self.config.messaging_service_sid.clone(),
            ),
            ("MediaUrl", media_url.to_string()),
        ];
        if let Some(caption) = caption {
            form.push(("Body", caption.to_string()));
        }
        self.post_message(form, MEDIA_TIMEOUT, "send_media").await
    }
}
