//! Result of a single-row subscription mutation.

use super::SubscriptionStatus;

/// What a repository mutation did to the row.
///
/// Mutations are guarded by a status predicate in the same statement, so a
/// row already in (or past) the target state comes back as `Unchanged`
/// instead of being written twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The row was updated. Carries the before/after snapshot for the audit log.
    Applied {
        previous_status: SubscriptionStatus,
        previous_amount_in_cents: i64,
        status: SubscriptionStatus,
        amount_in_cents: i64,
    },

    /// The row did not qualify; nothing was written.
    Unchanged { current: SubscriptionStatus },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }

    /// Status of the row after the call.
    pub fn status(&self) -> SubscriptionStatus {
        match self {
            TransitionOutcome::Applied { status, .. } => *status,
            TransitionOutcome::Unchanged { current } => *current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reports_post_call_state() {
        let applied = TransitionOutcome::Applied {
            previous_status: SubscriptionStatus::Active,
            previous_amount_in_cents: 100,
            status: SubscriptionStatus::Canceled,
            amount_in_cents: 0,
        };
        assert!(applied.is_applied());
        assert_eq!(applied.status(), SubscriptionStatus::Canceled);

        let unchanged = TransitionOutcome::Unchanged {
            current: SubscriptionStatus::Expired,
        };
        assert!(!unchanged.is_applied());
        assert_eq!(unchanged.status(), SubscriptionStatus::Expired);
    }
}
