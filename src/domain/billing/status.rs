//! Subscription status state machine.
//!
//! `canceled` and `expired` are terminal: once a subscription reaches either
//! one, no scheduled transition applies to it again.

use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{StateMachine, ValidationError};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Paid up and billing on schedule.
    Active,

    /// A redemption failed and a dunning campaign is retrying.
    PastDue,

    /// Billing suspended, optionally until `pause_ends_at`.
    Paused,

    /// Ended by cancellation. Terminal.
    Canceled,

    /// Ended by running out its term. Terminal.
    Expired,
}

impl SubscriptionStatus {
    /// All statuses, in declaration order.
    pub const ALL: [SubscriptionStatus; 5] = [
        SubscriptionStatus::Active,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Paused,
        SubscriptionStatus::Canceled,
        SubscriptionStatus::Expired,
    ];

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "paused" => Ok(SubscriptionStatus::Paused),
            "canceled" | "cancelled" => Ok(SubscriptionStatus::Canceled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(ValidationError::invalid_format(
                "status",
                format!("unknown subscription status '{}'", other),
            )),
        }
    }
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, target),
            (Active, PastDue)
                | (Active, Paused)
                | (Active, Canceled)
                | (Active, Expired)
                | (PastDue, Active)
                | (PastDue, Paused)
                | (PastDue, Canceled)
                | (PastDue, Expired)
                | (Paused, Active)
                | (Paused, Canceled)
                | (Paused, Expired)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            Active => vec![PastDue, Paused, Canceled, Expired],
            PastDue => vec![Active, Paused, Canceled, Expired],
            Paused => vec![Active, Canceled, Expired],
            Canceled | Expired => vec![],
        }
    }
}
