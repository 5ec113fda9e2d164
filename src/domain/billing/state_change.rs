//! Append-only audit log of subscription status changes.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{SubscriptionStatus, TransitionOutcome};
use crate::domain::foundation::{StateChangeId, SubscriptionId, Timestamp};

/// Reason recorded when the scheduler applies a due cancellation.
pub const REASON_SCHEDULED_CANCELLATION: &str = "Scheduled cancellation processed";

/// Reason recorded when the scheduler applies a due resumption.
pub const REASON_SCHEDULED_RESUMPTION: &str = "Scheduled resumption processed";

/// Reason recorded when dunning pauses a subscription.
pub const REASON_DUNNING_PAUSE: &str = "Dunning retries exhausted";

/// Cancellation reason stored when dunning schedules a cancellation.
pub const REASON_DUNNING_CANCELLATION: &str = "Payment failed after all dunning retries";

/// Reason recorded when a payment retry brings a subscription back.
pub const REASON_PAYMENT_RECOVERED: &str = "Payment retry succeeded";

/// Who caused a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initiator {
    System,
    Customer,
    Merchant,
}

impl Initiator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Initiator::System => "system",
            Initiator::Customer => "customer",
            Initiator::Merchant => "merchant",
        }
    }
}

impl fmt::Display for Initiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable entry in the state change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeRecord {
    pub id: StateChangeId,
    pub subscription_id: SubscriptionId,
    pub from_status: SubscriptionStatus,
    pub to_status: SubscriptionStatus,
    pub from_amount_in_cents: i64,
    pub to_amount_in_cents: i64,
    pub reason: String,
    pub initiated_by: Initiator,
    pub occurred_at: Timestamp,
}

impl StateChangeRecord {
    /// Builds the record for a scheduler-driven change.
    pub fn system(
        subscription_id: SubscriptionId,
        from_status: SubscriptionStatus,
        to_status: SubscriptionStatus,
        from_amount_in_cents: i64,
        to_amount_in_cents: i64,
        reason: impl Into<String>,
        occurred_at: Timestamp,
    ) -> Self {
        Self {
            id: StateChangeId::new(),
            subscription_id,
            from_status,
            to_status,
            from_amount_in_cents,
            to_amount_in_cents,
            reason: reason.into(),
            initiated_by: Initiator::System,
            occurred_at,
        }
    }

    /// Builds the record for an applied transition, or `None` if the status
    /// did not change.
    pub fn for_outcome(
        subscription_id: SubscriptionId,
        outcome: &TransitionOutcome,
        reason: &str,
        occurred_at: Timestamp,
    ) -> Option<Self> {
        match *outcome {
            TransitionOutcome::Applied {
                previous_status,
                previous_amount_in_cents,
                status,
                amount_in_cents,
            } if previous_status != status => Some(Self::system(
                subscription_id,
                previous_status,
                status,
                previous_amount_in_cents,
                amount_in_cents,
                reason,
                occurred_at,
            )),
            TransitionOutcome::Applied { .. } | TransitionOutcome::Unchanged { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_record_is_initiated_by_system() {
        let record = StateChangeRecord::system(
            SubscriptionId::new(),
            SubscriptionStatus::Active,
            SubscriptionStatus::Canceled,
            1_000,
            0,
            REASON_SCHEDULED_CANCELLATION,
            Timestamp::now(),
        );
        assert_eq!(record.initiated_by, Initiator::System);
        assert_eq!(record.initiated_by.to_string(), "system");
        assert_eq!(record.reason, "Scheduled cancellation processed");
    }

    #[test]
    fn applied_outcome_produces_record() {
        let outcome = TransitionOutcome::Applied {
            previous_status: SubscriptionStatus::Paused,
            previous_amount_in_cents: 900,
            status: SubscriptionStatus::Active,
            amount_in_cents: 900,
        };
        let record = StateChangeRecord::for_outcome(
            SubscriptionId::new(),
            &outcome,
            REASON_SCHEDULED_RESUMPTION,
            Timestamp::now(),
        )
        .unwrap();
        assert_eq!(record.from_status, SubscriptionStatus::Paused);
        assert_eq!(record.to_status, SubscriptionStatus::Active);
    }

    #[test]
    fn unchanged_outcome_produces_nothing() {
        let outcome = TransitionOutcome::Unchanged {
            current: SubscriptionStatus::Canceled,
        };
        assert!(StateChangeRecord::for_outcome(
            SubscriptionId::new(),
            &outcome,
            REASON_SCHEDULED_CANCELLATION,
            Timestamp::now(),
        )
        .is_none());
    }

    #[test]
    fn applied_outcome_without_status_change_produces_nothing() {
        // A timed pause made indefinite stays paused.
        let outcome = TransitionOutcome::Applied {
            previous_status: SubscriptionStatus::Paused,
            previous_amount_in_cents: 900,
            status: SubscriptionStatus::Paused,
            amount_in_cents: 900,
        };
        assert!(StateChangeRecord::for_outcome(
            SubscriptionId::new(),
            &outcome,
            REASON_DUNNING_PAUSE,
            Timestamp::now(),
        )
        .is_none());
    }
}
