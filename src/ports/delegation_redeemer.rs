//! Delegation redeemer port.
//!
//! Redeeming a delegation executes the on-chain transfer the customer
//! pre-authorised. The scheduler never looks inside the delegation; it only
//! passes it along and interprets the classified outcome.
//!
//! # Failure classification
//!
//! - **Retryable** (network, timeout, rate limit, service unavailable): leave
//!   the campaign untouched so the next retry cycle tries again. These never
//!   advance the dunning counter on their own.
//! - **Terminal** (revoked, expired, insufficient funds, invalid, rejected):
//!   advance the dunning counter toward exhaustion.

use std::time::Duration;

use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Port for the external redemption service.
///
/// Implementations must treat `idempotency_key` as the deduplication key for
/// the transfer so a retried call cannot settle twice.
#[async_trait]
pub trait DelegationRedeemer: Send + Sync {
    async fn redeem(
        &self,
        request: &RedemptionRequest,
    ) -> Result<SettlementReference, RedemptionError>;
}

/// Runs `redeem` under a caller-supplied deadline.
///
/// An elapsed deadline is reported as a retryable `Timeout`; whatever the
/// abandoned call did is up to the service's own idempotency guarantees.
pub async fn redeem_within(
    redeemer: &dyn DelegationRedeemer,
    request: &RedemptionRequest,
    timeout: Duration,
) -> Result<SettlementReference, RedemptionError> {
    match tokio::time::timeout(timeout, redeemer.redeem(request)).await {
        Ok(result) => result,
        Err(_) => Err(RedemptionError::timeout(format!(
            "redemption did not complete within {:?}",
            timeout
        ))),
    }
}

/// Opaque signed delegation, exactly as the client produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DelegationPayload(String);

impl DelegationPayload {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One redemption attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionRequest {
    pub subscription_id: SubscriptionId,
    pub delegation: DelegationPayload,
    pub amount_in_cents: i64,

    /// Stable per attempt; the service deduplicates on it.
    pub idempotency_key: String,
}

/// Settlement layer reference for a completed transfer (e.g. a transaction hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettlementReference(String);

impl SettlementReference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SettlementReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Classified redemption failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionError {
    pub code: RedemptionErrorCode,
    pub message: String,

    /// Service's own error code, if it sent one.
    pub provider_code: Option<String>,
}

impl RedemptionError {
    pub fn new(code: RedemptionErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider_code: None,
        }
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RedemptionErrorCode::NetworkError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RedemptionErrorCode::Timeout, message)
    }

    pub fn revoked(message: impl Into<String>) -> Self {
        Self::new(RedemptionErrorCode::DelegationRevoked, message)
    }

    pub fn insufficient_funds(message: impl Into<String>) -> Self {
        Self::new(RedemptionErrorCode::InsufficientFunds, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl std::fmt::Display for RedemptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RedemptionError {}

impl From<RedemptionError> for DomainError {
    fn from(err: RedemptionError) -> Self {
        let code = match err.code {
            RedemptionErrorCode::Timeout => ErrorCode::Timeout,
            RedemptionErrorCode::InvalidDelegation => ErrorCode::ValidationFailed,
            _ => ErrorCode::ExternalServiceError,
        };
        DomainError::new(code, err.to_string())
    }
}

/// Redemption error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionErrorCode {
    /// Could not reach the service.
    NetworkError,

    /// The call did not finish in time.
    Timeout,

    /// Service asked us to slow down.
    RateLimited,

    /// Service or chain temporarily unavailable.
    ServiceUnavailable,

    /// Customer revoked the delegation.
    DelegationRevoked,

    /// Delegation is past its validity window.
    DelegationExpired,

    /// Smart account balance too low.
    InsufficientFunds,

    /// Delegation is malformed or its signature does not verify.
    InvalidDelegation,

    /// Any other semantic rejection by the settlement layer.
    Rejected,

    /// Unclassified failure.
    Unknown,
}

impl RedemptionErrorCode {
    /// Infrastructure failures are retried; semantic rejections are not.
    ///
    /// `Unknown` counts as retryable so an unclassified failure never burns a
    /// dunning attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RedemptionErrorCode::NetworkError
                | RedemptionErrorCode::Timeout
                | RedemptionErrorCode::RateLimited
                | RedemptionErrorCode::ServiceUnavailable
                | RedemptionErrorCode::Unknown
        )
    }

    /// Maps a service error code string onto the taxonomy.
    pub fn from_provider_code(code: &str) -> Self {
        match code {
            "delegation_revoked" | "revoked" => RedemptionErrorCode::DelegationRevoked,
            "delegation_expired" | "expired" => RedemptionErrorCode::DelegationExpired,
            "insufficient_funds" | "insufficient_balance" => {
                RedemptionErrorCode::InsufficientFunds
            }
            "invalid_delegation" | "invalid_signature" => RedemptionErrorCode::InvalidDelegation,
            "rejected" | "execution_reverted" => RedemptionErrorCode::Rejected,
            "rate_limited" => RedemptionErrorCode::RateLimited,
            "unavailable" | "service_unavailable" => RedemptionErrorCode::ServiceUnavailable,
            "timeout" => RedemptionErrorCode::Timeout,
            _ => RedemptionErrorCode::Unknown,
        }
    }
}

impl std::fmt::Display for RedemptionErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RedemptionErrorCode::NetworkError => "network_error",
            RedemptionErrorCode::Timeout => "timeout",
            RedemptionErrorCode::RateLimited => "rate_limited",
            RedemptionErrorCode::ServiceUnavailable => "service_unavailable",
            RedemptionErrorCode::DelegationRevoked => "delegation_revoked",
            RedemptionErrorCode::DelegationExpired => "delegation_expired",
            RedemptionErrorCode::InsufficientFunds => "insufficient_funds",
            RedemptionErrorCode::InvalidDelegation => "invalid_delegation",
            RedemptionErrorCode::Rejected => "rejected",
            RedemptionErrorCode::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}
