//! Delegation redemption service configuration

use serde::Deserialize;
use std::time::Duration;

use super::email::is_http_url;
use super::error::ValidationError;

/// Where and how payment retries redeem delegations.
///
/// Only consulted when `scheduler.payment_retries_enabled` is set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedemptionConfig {
    #[serde(default)]
    pub service_url: String,

    /// Sent as a bearer token
    pub api_key: Option<String>,

    /// Enables the `X-Signature` HMAC header
    pub signing_secret: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl RedemptionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.service_url.is_empty() {
            return Err(ValidationError::MissingRequired("REDEMPTION__SERVICE_URL"));
        }
        if !is_http_url(&self.service_url) {
            return Err(ValidationError::InvalidUrl("redemption.service_url"));
        }
        if self.request_timeout_secs == 0 || self.request_timeout_secs > 300 {
            return Err(ValidationError::InvalidTimeout(
                "redemption.request_timeout_secs",
            ));
        }
        if self.signing_secret.as_deref().is_some_and(str::is_empty) {
            return Err(ValidationError::MissingRequired("REDEMPTION__SIGNING_SECRET"));
        }
        Ok(())
    }
}

fn default_request_timeout() -> u64 {
    30
}
