//! LifecycleTransitioner - Applies scheduled cancellations and resumptions.
//!
//! For each due subscription the status mutation commits first, then the
//! audit entry is appended, then the customer is notified. A failed mutation
//! skips the rest for that item; the row is still due on the next tick.
//! Items are independent of one another.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::notification_gateway::{NotificationGateway, NotificationKind};
use super::report::{ItemResult, StageReport};
use crate::domain::billing::{
    StateChangeRecord, Subscription, TransitionOutcome, REASON_SCHEDULED_CANCELLATION,
    REASON_SCHEDULED_RESUMPTION,
};
use crate::domain::foundation::{DomainError, Timestamp};
use crate::ports::SubscriptionRepository;

pub struct LifecycleTransitioner {
    repository: Arc<dyn SubscriptionRepository>,
    notifications: NotificationGateway,
}

impl LifecycleTransitioner {
    pub fn new(
        repository: Arc<dyn SubscriptionRepository>,
        notifications: NotificationGateway,
    ) -> Self {
        Self {
            repository,
            notifications,
        }
    }

    /// Cancels every non-terminal subscription whose `cancel_at` has passed.
    ///
    /// Returns `Err` only when the due-work query itself fails.
    pub async fn process_cancellations(&self, now: Timestamp) -> Result<StageReport, DomainError> {
        let due = self
            .repository
            .subscriptions_due_for_cancellation(now)
            .await?;
        let mut report = StageReport::with_due(due.len());

        for subscription in &due {
            let item = match self
                .repository
                .cancel_subscription_immediately(&subscription.id, now)
                .await
            {
                Ok(outcome) => {
                    self.after_transition(
                        subscription,
                        &outcome,
                        REASON_SCHEDULED_CANCELLATION,
                        NotificationKind::Cancellation,
                        now,
                    )
                    .await
                }
                Err(e) => {
                    warn!(
                        subscription_id = %subscription.id,
                        error = %e,
                        "scheduled cancellation failed, will retry next tick"
                    );
                    ItemResult::Failed
                }
            };
            report.tally(item);
        }

        Ok(report)
    }

    /// Resumes every paused subscription whose `pause_ends_at` has passed.
    pub async fn process_resumptions(&self, now: Timestamp) -> Result<StageReport, DomainError> {
        let due = self
            .repository
            .subscriptions_due_for_resumption(now)
            .await?;
        let mut report = StageReport::with_due(due.len());

        for subscription in &due {
            let item = match self.repository.resume_subscription(&subscription.id).await {
                Ok(outcome) => {
                    self.after_transition(
                        subscription,
                        &outcome,
                        REASON_SCHEDULED_RESUMPTION,
                        NotificationKind::Resumption,
                        now,
                    )
                    .await
                }
                Err(e) => {
                    warn!(
                        subscription_id = %subscription.id,
                        error = %e,
                        "scheduled resumption failed, will retry next tick"
                    );
                    ItemResult::Failed
                }
            };
            report.tally(item);
        }

        Ok(report)
    }

    async fn after_transition(
        &self,
        subscription: &Subscription,
        outcome: &TransitionOutcome,
        reason: &str,
        kind: NotificationKind,
        now: Timestamp,
    ) -> ItemResult {
        let Some(record) = StateChangeRecord::for_outcome(subscription.id, outcome, reason, now)
        else {
            info!(
                subscription_id = %subscription.id,
                status = %outcome.status(),
                "already transitioned, nothing to do"
            );
            return ItemResult::Unchanged;
        };

        info!(
            subscription_id = %subscription.id,
            from = %record.from_status,
            to = %record.to_status,
            reason,
            "subscription transitioned"
        );

        // The status change is committed; a lost audit entry needs reconciliation.
        if let Err(e) = self.repository.record_state_change(&record).await {
            error!(
                subscription_id = %subscription.id,
                state_change_id = %record.id,
                error = %e,
                needs_reconciliation = true,
                "state change not recorded"
            );
        }

        self.notifications.notify(kind, subscription).await;
        ItemResult::Applied
    }
}
