//! Subscription entity.
//!
//! The scheduler only ever reads subscriptions; every mutation goes through
//! a single-row operation on [`SubscriptionRepository`](crate::ports::SubscriptionRepository).

use serde::{Deserialize, Serialize};

use super::SubscriptionStatus;
use crate::domain::foundation::{CustomerId, ProductId, StateMachine, SubscriptionId, Timestamp, WorkspaceId};

/// A customer's recurring subscription to a product within a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub workspace_id: WorkspaceId,
    pub customer_id: CustomerId,
    pub product_id: ProductId,

    /// Customer contact address, joined in from the customer record.
    pub customer_email: Option<String>,

    /// Product display name, joined in from the product record.
    pub product_name: Option<String>,

    pub status: SubscriptionStatus,

    /// Scheduled but not-yet-applied cancellation.
    pub cancel_at: Option<Timestamp>,

    /// Why the cancellation was scheduled.
    pub cancel_reason: Option<String>,

    /// When the cancellation was applied.
    pub canceled_at: Option<Timestamp>,

    /// Scheduled resumption of a paused subscription.
    pub pause_ends_at: Option<Timestamp>,

    pub current_period_start: Timestamp,
    pub current_period_end: Timestamp,
    pub total_amount_in_cents: i64,
}

impl Subscription {
    /// Creates an active subscription for the given billing period.
    pub fn new(
        workspace_id: WorkspaceId,
        customer_id: CustomerId,
        product_id: ProductId,
        total_amount_in_cents: i64,
        current_period_start: Timestamp,
        current_period_end: Timestamp,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            workspace_id,
            customer_id,
            product_id,
            customer_email: None,
            product_name: None,
            status: SubscriptionStatus::Active,
            cancel_at: None,
            cancel_reason: None,
            canceled_at: None,
            pause_ends_at: None,
            current_period_start,
            current_period_end,
            total_amount_in_cents,
        }
    }

    pub fn with_customer_email(mut self, email: impl Into<String>) -> Self {
        self.customer_email = Some(email.into());
        self
    }

    pub fn with_product_name(mut self, name: impl Into<String>) -> Self {
        self.product_name = Some(name.into());
        self
    }

    pub fn with_status(mut self, status: SubscriptionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_cancel_at(mut self, at: Timestamp) -> Self {
        self.cancel_at = Some(at);
        self
    }

    pub fn with_pause_ends_at(mut self, at: Timestamp) -> Self {
        self.pause_ends_at = Some(at);
        self
    }

    /// Canceled or expired.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// A scheduled cancellation has come due.
    pub fn is_due_for_cancellation(&self, now: &Timestamp) -> bool {
        !self.is_terminal() && self.cancel_at.is_some_and(|at| at.is_due(now))
    }

    /// A paused subscription whose pause window has ended.
    pub fn is_due_for_resumption(&self, now: &Timestamp) -> bool {
        self.status == SubscriptionStatus::Paused
            && self.pause_ends_at.is_some_and(|at| at.is_due(now))
    }

    /// Payment retries may charge it: active or past due only.
    pub fn is_billable(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::PastDue
        )
    }

    /// Name used in customer-facing copy.
    pub fn display_name(&self) -> &str {
        self.product_name.as_deref().unwrap_or("your subscription")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse_rfc3339(s).unwrap()
    }

    fn subscription() -> Subscription {
        Subscription::new(
            WorkspaceId::new(),
            CustomerId::new(),
            ProductId::new(),
            2_500,
            ts("2023-12-01T00:00:00Z"),
            ts("2024-01-01T00:00:00Z"),
        )
    }

    #[test]
    fn new_subscription_is_active_without_schedule() {
        let sub = subscription();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(sub.cancel_at.is_none());
        assert!(sub.pause_ends_at.is_none());
    }

    #[test]
    fn due_for_cancellation_once_cancel_at_passes() {
        let sub = subscription().with_cancel_at(ts("2024-01-01T00:00:00Z"));
        assert!(!sub.is_due_for_cancellation(&ts("2023-12-31T23:00:00Z")));
        assert!(sub.is_due_for_cancellation(&ts("2024-01-01T00:05:00Z")));
    }

    #[test]
    fn terminal_subscription_is_never_due() {
        let sub = subscription()
            .with_cancel_at(ts("2024-01-01T00:00:00Z"))
            .with_status(SubscriptionStatus::Canceled);
        assert!(!sub.is_due_for_cancellation(&ts("2024-02-01T00:00:00Z")));
    }

    #[test]
    fn only_active_and_past_due_are_billable() {
        use SubscriptionStatus::*;
        for (status, billable) in [
            (Active, true),
            (PastDue, true),
            (Paused, false),
            (Canceled, false),
            (Expired, false),
        ] {
            assert_eq!(
                subscription().with_status(status).is_billable(),
                billable,
                "{status:?}"
            );
        }
    }

    #[test]
    fn resumption_requires_paused_status() {
        let at = ts("2024-01-01T00:00:00Z");
        let now = ts("2024-01-02T00:00:00Z");

        let active = subscription().with_pause_ends_at(at);
        assert!(!active.is_due_for_resumption(&now));

        let paused = active.with_status(SubscriptionStatus::Paused);
        assert!(paused.is_due_for_resumption(&now));
    }

    #[test]
    fn indefinite_pause_is_never_due() {
        let sub = subscription().with_status(SubscriptionStatus::Paused);
        assert!(!sub.is_due_for_resumption(&ts("2030-01-01T00:00:00Z")));
    }

    #[test]
    fn display_name_falls_back() {
        assert_eq!(subscription().display_name(), "your subscription");
        assert_eq!(subscription().with_product_name("Pro").display_name(), "Pro");
    }
}
