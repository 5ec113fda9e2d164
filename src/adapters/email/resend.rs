//! Resend email adapter.
//!
//! Implements `EmailService` against the Resend HTTP API
//! (`POST /emails`, bearer auth, JSON body).

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::EmailConfig;
use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::{EmailService, EmailTag, TransactionalEmail};

/// Resend adapter configuration.
#[derive(Clone)]
pub struct ResendConfig {
    api_key: SecretString,
    from: String,
    api_base_url: String,
}

impl ResendConfig {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
            from: from.into(),
            api_base_url: "https://api.resend.com".to_string(),
        }
    }

    /// Builds the adapter configuration from the application's email section.
    pub fn from_app_config(config: &EmailConfig) -> Self {
        Self::new(config.resend_api_key.clone(), config.from_header())
            .with_base_url(config.api_base_url.clone())
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }
}

pub struct ResendEmailService {
    config: ResendConfig,
    http_client: reqwest::Client,
}

impl ResendEmailService {
    pub fn new(config: ResendConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct SendEmailBody<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "no_tags")]
    tags: &'a [EmailTag],
}

fn no_tags(tags: &&[EmailTag]) -> bool {
    tags.is_empty()
}

#[derive(Deserialize)]
struct SendEmailResponse {
    id: String,
}

#[async_trait]
impl EmailService for ResendEmailService {
    async fn send_transactional_email(
        &self,
        email: &TransactionalEmail,
    ) -> Result<String, DomainError> {
        let url = format!("{}/emails", self.config.api_base_url);
        let body = SendEmailBody {
            from: &self.config.from,
            to: [email.to.as_str()],
            subject: &email.subject,
            html: &email.html_body,
            tags: &email.tags,
        };

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                DomainError::new(
                    ErrorCode::ExternalServiceError,
                    format!("Resend request failed: {}", e),
                )
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(%status, error = %error_text, "Resend send failed");
            return Err(DomainError::new(
                ErrorCode::ExternalServiceError,
                format!("Resend API error ({}): {}", status, error_text),
            )
            .with_detail("status", status.as_u16().to_string()));
        }

        let parsed: SendEmailResponse = response.json().await.map_err(|e| {
            DomainError::new(
                ErrorCode::ExternalServiceError,
                format!("Failed to parse Resend response: {}", e),
            )
        })?;

        tracing::debug!(message_id = %parsed.id, to = %email.to, "email accepted by Resend");
        Ok(parsed.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn email() -> TransactionalEmail {
        TransactionalEmail::new("customer@example.com", "Canceled", "<p>Bye</p>")
            .unwrap()
            .with_tag("category", "subscription_canceled")
    }

    #[tokio::test]
    async fn posts_message_and_returns_id() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/emails")
                    .header("authorization", "Bearer re_test")
                    .json_body(json!({
                        "from": "Billing <billing@example.com>",
                        "to": ["customer@example.com"],
                        "subject": "Canceled",
                        "html": "<p>Bye</p>",
                        "tags": [{"name": "category", "value": "subscription_canceled"}],
                    }));
                then.status(200).json_body(json!({ "id": "em_123" }));
            })
            .await;

        let service = ResendEmailService::new(
            ResendConfig::new("re_test", "Billing <billing@example.com>")
                .with_base_url(server.base_url()),
        );
        let id = service.send_transactional_email(&email()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(id, "em_123");
    }

    #[tokio::test]
    async fn provider_error_is_external_service_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/emails");
                then.status(422).body("invalid from address");
            })
            .await;

        let service = ResendEmailService::new(
            ResendConfig::new("re_test", "Billing <billing@example.com>")
                .with_base_url(server.base_url()),
        );
        let err = service.send_transactional_email(&email()).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::ExternalServiceError);
        assert_eq!(err.details.get("status"), Some(&"422".to_string()));
    }
}
