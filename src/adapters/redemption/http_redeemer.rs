//! HTTP delegation redeemer.
//!
//! Implements `DelegationRedeemer` against the redemption service that
//! submits delegated transfers on-chain.
//!
//! # Protocol
//!
//! `POST {base}/v1/redemptions` with a JSON body. The attempt's idempotency
//! key travels in the `Idempotency-Key` header. When a signing secret is
//! configured the raw body is signed with HMAC-SHA256 and sent hex-encoded
//! in `X-Signature`.
//!
//! # Classification
//!
//! | Response | Code |
//! |----------|------|
//! | transport error | NetworkError / Timeout |
//! | 408, 504 | Timeout |
//! | 429 | RateLimited |
//! | other 5xx | ServiceUnavailable |
//! | 402 | InsufficientFunds (unless body says otherwise) |
//! | other 4xx | from body `error.code`, else Rejected |

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::RedemptionConfig;
use crate::ports::{
    DelegationRedeemer, RedemptionError, RedemptionErrorCode, RedemptionRequest,
    SettlementReference,
};

type HmacSha256 = Hmac<Sha256>;

/// Redemption service client configuration.
#[derive(Clone)]
pub struct HttpRedeemerConfig {
    service_url: String,
    api_key: Option<SecretString>,
    signing_secret: Option<SecretString>,
    request_timeout: Duration,
}

impl HttpRedeemerConfig {
    pub fn new(service_url: impl Into<String>) -> Self {
        Self {
            service_url: service_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            signing_secret: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_app_config(config: &RedemptionConfig) -> Self {
        let mut redeemer = Self::new(config.service_url.clone())
            .with_request_timeout(config.request_timeout());
        if let Some(key) = &config.api_key {
            redeemer = redeemer.with_api_key(key.clone());
        }
        if let Some(secret) = &config.signing_secret {
            redeemer = redeemer.with_signing_secret(secret.clone());
        }
        redeemer
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::new(key.into()));
        self
    }

    pub fn with_signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.signing_secret = Some(SecretString::new(secret.into()));
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

pub struct HttpDelegationRedeemer {
    config: HttpRedeemerConfig,
    http_client: reqwest::Client,
}

impl HttpDelegationRedeemer {
    pub fn new(config: HttpRedeemerConfig) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn sign(&self, body: &[u8]) -> Option<String> {
        let secret = self.config.signing_secret.as_ref()?;
        let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()).ok()?;
        mac.update(body);
        Some(hex_encode(&mac.finalize().into_bytes()))
    }
}

#[derive(Serialize)]
struct RedeemBody<'a> {
    subscription_id: String,
    delegation: &'a str,
    amount_in_cents: i64,
}

#[derive(Deserialize)]
struct RedeemResponse {
    settlement_reference: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Maps a non-success response onto the redemption taxonomy.
fn classify(status: reqwest::StatusCode, body: &str) -> RedemptionError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let message = match &parsed {
        Some(env) if !env.error.message.is_empty() => env.error.message.clone(),
        _ => format!("redemption service returned {}", status),
    };

    let code = match status.as_u16() {
        408 | 504 => RedemptionErrorCode::Timeout,
        429 => RedemptionErrorCode::RateLimited,
        500..=599 => RedemptionErrorCode::ServiceUnavailable,
        400..=499 => match &parsed {
            Some(env) => match RedemptionErrorCode::from_provider_code(&env.error.code) {
                RedemptionErrorCode::Unknown if status.as_u16() == 402 => {
                    RedemptionErrorCode::InsufficientFunds
                }
                RedemptionErrorCode::Unknown => RedemptionErrorCode::Rejected,
                known => known,
            },
            None if status.as_u16() == 402 => RedemptionErrorCode::InsufficientFunds,
            None => RedemptionErrorCode::Rejected,
        },
        _ => RedemptionErrorCode::Unknown,
    };

    let err = RedemptionError::new(code, message);
    match parsed {
        Some(env) => err.with_provider_code(env.error.code),
        None => err,
    }
}

#[async_trait]
impl DelegationRedeemer for HttpDelegationRedeemer {
    async fn redeem(
        &self,
        request: &RedemptionRequest,
    ) -> Result<SettlementReference, RedemptionError> {
        let url = format!("{}/v1/redemptions", self.config.service_url);
        let body = serde_json::to_vec(&RedeemBody {
            subscription_id: request.subscription_id.to_string(),
            delegation: request.delegation.as_str(),
            amount_in_cents: request.amount_in_cents,
        })
        .map_err(|e| {
            RedemptionError::new(
                RedemptionErrorCode::InvalidDelegation,
                format!("failed to encode redemption request: {}", e),
            )
        })?;

        let mut builder = self
            .http_client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header("Idempotency-Key", &request.idempotency_key);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }
        if let Some(signature) = self.sign(&body) {
            builder = builder.header("X-Signature", signature);
        }

        let response = builder.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                RedemptionError::timeout(e.to_string())
            } else {
                RedemptionError::network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = classify(status, &text);
            tracing::warn!(
                subscription_id = %request.subscription_id,
                %status,
                code = %err.code,
                "redemption rejected"
            );
            return Err(err);
        }

        let parsed: RedeemResponse = response.json().await.map_err(|e| {
            RedemptionError::new(
                RedemptionErrorCode::Unknown,
                format!("failed to parse redemption response: {}", e),
            )
        })?;

        Ok(SettlementReference::new(parsed.settlement_reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::SubscriptionId;
    use crate::ports::DelegationPayload;
    use httpmock::prelude::*;
    use serde_json::json;

    fn request() -> RedemptionRequest {
        RedemptionRequest {
            subscription_id: SubscriptionId::new(),
            delegation: DelegationPayload::new("{\"delegate\":\"0xabc\"}"),
            amount_in_cents: 1_999,
            idempotency_key: "idem-1".to_string(),
        }
    }

    fn redeemer(server: &MockServer) -> HttpDelegationRedeemer {
        HttpDelegationRedeemer::new(HttpRedeemerConfig::new(server.base_url())).unwrap()
    }

    #[tokio::test]
    async fn successful_redemption_returns_reference() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/redemptions")
                    .header("Idempotency-Key", "idem-1");
                then.status(201)
                    .json_body(json!({ "settlement_reference": "0xfeed" }));
            })
            .await;

        let reference = redeemer(&server).redeem(&request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(reference.as_str(), "0xfeed");
    }

    #[tokio::test]
    async fn revoked_delegation_is_terminal() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/redemptions");
                then.status(422).json_body(json!({
                    "error": { "code": "delegation_revoked", "message": "revoked by owner" }
                }));
            })
            .await;

        let err = redeemer(&server).redeem(&request()).await.unwrap_err();

        assert_eq!(err.code, RedemptionErrorCode::DelegationRevoked);
        assert!(!err.is_retryable());
        assert_eq!(err.provider_code.as_deref(), Some("delegation_revoked"));
        assert_eq!(err.message, "revoked by owner");
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/redemptions");
                then.status(503);
            })
            .await;

        let err = redeemer(&server).redeem(&request()).await.unwrap_err();

        assert_eq!(err.code, RedemptionErrorCode::ServiceUnavailable);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn signed_requests_carry_signature_header() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/redemptions")
                    .header_exists("X-Signature")
                    .header("authorization", "Bearer rk_test");
                then.status(200)
                    .json_body(json!({ "settlement_reference": "0x01" }));
            })
            .await;

        let config = HttpRedeemerConfig::new(server.base_url())
            .with_api_key("rk_test")
            .with_signing_secret("shh");
        let redeemer = HttpDelegationRedeemer::new(config).unwrap();
        redeemer.redeem(&request()).await.unwrap();

        mock.assert_async().await;
    }

    #[test]
    fn bare_402_is_insufficient_funds() {
        let err = classify(reqwest::StatusCode::PAYMENT_REQUIRED, "");
        assert_eq!(err.code, RedemptionErrorCode::InsufficientFunds);
    }

    #[test]
    fn unknown_4xx_code_is_rejected() {
        let err = classify(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error":{"code":"nonce_reused"}}"#,
        );
        assert_eq!(err.code, RedemptionErrorCode::Rejected);
        assert_eq!(err.provider_code.as_deref(), Some("nonce_reused"));
    }

    #[test]
    fn gateway_timeout_is_timeout() {
        let err = classify(reqwest::StatusCode::GATEWAY_TIMEOUT, "");
        assert_eq!(err.code, RedemptionErrorCode::Timeout);
    }

    #[test]
    fn hex_encode_bytes() {
        assert_eq!(hex_encode(&[0x00, 0xff, 0x10]), "00ff10");
    }
}
