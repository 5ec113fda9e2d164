//! Dunning campaigns: the payment-retry sub-state-machine of a subscription.
//!
//! A campaign is opened when a redemption fails. Each terminal redemption
//! failure bumps `retry_count`; once it reaches `max_retries` the campaign
//! needs its final action. `final_action_taken` is the commit point for that
//! action and is written at most once.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{CampaignId, StateMachine, SubscriptionId, Timestamp, ValidationError};

/// Lifecycle of a dunning campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// Retrying payment.
    Active,

    /// A retry succeeded; the subscription is paid up again.
    Recovered,

    /// Retries exhausted and the final action has been taken.
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Recovered => "recovered",
            CampaignStatus::Failed => "failed",
        }
    }
}

impl FromStr for CampaignStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CampaignStatus::Active),
            "recovered" => Ok(CampaignStatus::Recovered),
            "failed" => Ok(CampaignStatus::Failed),
            other => Err(ValidationError::invalid_format(
                "campaign_status",
                format!("unknown campaign status '{}'", other),
            )),
        }
    }
}

impl StateMachine for CampaignStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        matches!(
            (self, target),
            (CampaignStatus::Active, CampaignStatus::Recovered)
                | (CampaignStatus::Active, CampaignStatus::Failed)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        match self {
            CampaignStatus::Active => vec![CampaignStatus::Recovered, CampaignStatus::Failed],
            CampaignStatus::Recovered | CampaignStatus::Failed => vec![],
        }
    }
}

/// What to do with the subscription once retries are exhausted.
///
/// Stored as free text; values this build does not understand are kept in
/// [`FinalAction::Unknown`] so they are surfaced rather than dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum FinalAction {
    Cancel,
    Pause,
    Downgrade,
    Unknown(String),
}

impl FinalAction {
    pub fn as_str(&self) -> &str {
        match self {
            FinalAction::Cancel => "cancel",
            FinalAction::Pause => "pause",
            FinalAction::Downgrade => "downgrade",
            FinalAction::Unknown(raw) => raw,
        }
    }
}

impl From<&str> for FinalAction {
    fn from(s: &str) -> Self {
        match s {
            "cancel" => FinalAction::Cancel,
            "pause" => FinalAction::Pause,
            "downgrade" => FinalAction::Downgrade,
            other => FinalAction::Unknown(other.to_string()),
        }
    }
}

impl From<String> for FinalAction {
    fn from(s: String) -> Self {
        FinalAction::from(s.as_str())
    }
}

impl From<FinalAction> for String {
    fn from(action: FinalAction) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for FinalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A final action that has been applied. Only these two can ever be committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalActionTaken {
    Cancel,
    Pause,
}

impl FinalActionTaken {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalActionTaken::Cancel => "cancel",
            FinalActionTaken::Pause => "pause",
        }
    }
}

impl FromStr for FinalActionTaken {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cancel" => Ok(FinalActionTaken::Cancel),
            "pause" => Ok(FinalActionTaken::Pause),
            other => Err(ValidationError::invalid_format(
                "final_action_taken",
                format!("'{}' cannot be a taken action", other),
            )),
        }
    }
}

impl fmt::Display for FinalActionTaken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dunning campaign for one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DunningCampaign {
    pub id: CampaignId,
    pub subscription_id: SubscriptionId,
    pub status: CampaignStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<Timestamp>,
    pub final_action: FinalAction,
    pub final_action_taken: Option<FinalActionTaken>,
    pub last_failure_reason: Option<String>,
    pub created_at: Timestamp,
}

impl DunningCampaign {
    /// Opens a campaign with no retries spent.
    pub fn open(
        subscription_id: SubscriptionId,
        max_retries: u32,
        final_action: FinalAction,
        first_retry_at: Timestamp,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: CampaignId::new(),
            subscription_id,
            status: CampaignStatus::Active,
            retry_count: 0,
            max_retries,
            next_retry_at: Some(first_retry_at),
            final_action,
            final_action_taken: None,
            last_failure_reason: None,
            created_at,
        }
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// The sole admission condition into the final-action stage.
    pub fn needs_final_action(&self) -> bool {
        self.retries_exhausted() && self.final_action_taken.is_none()
    }

    /// Still retrying and the next attempt has come due.
    pub fn is_due_for_retry(&self, now: &Timestamp) -> bool {
        self.status == CampaignStatus::Active
            && !self.retries_exhausted()
            && self.next_retry_at.is_some_and(|at| at.is_due(now))
    }
}

/// Exponential backoff between payment retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetrySchedule {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self { base_delay, max_delay }
    }

    /// Delay before the attempt that follows `failed_attempts` failures.
    ///
    /// `base_delay * 2^(failed_attempts - 1)`, capped at `max_delay`.
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    pub fn next_retry_at(&self, now: Timestamp, failed_attempts: u32) -> Timestamp {
        now.plus(self.delay_after(failed_attempts))
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(24 * 60 * 60),
            max_delay: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}
