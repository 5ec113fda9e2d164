//! DunningEngine - Executes final actions for exhausted dunning campaigns.
//!
//! Marking `final_action_taken` is the commit point. It is written only
//! after the subscription side effect has been applied, and that side
//! effect is safe to re-issue, so a crash between the two converges on the
//! next tick.
//!
//! | final_action | Side effect | Marked as |
//! |--------------|-------------|-----------|
//! | cancel | `cancel_at = now` with reason | `cancel` |
//! | pause | paused indefinitely, audited | `pause` |
//! | downgrade | none | never |
//! | anything else | none | never |

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::notification_gateway::{NotificationGateway, NotificationKind};
use super::report::{ItemResult, StageReport};
use crate::domain::billing::{
    DunningCampaign, FinalAction, FinalActionTaken, StateChangeRecord, TransitionOutcome,
    REASON_DUNNING_CANCELLATION, REASON_DUNNING_PAUSE,
};
use crate::domain::foundation::{CampaignId, DomainError, StateMachine, Timestamp};
use crate::ports::SubscriptionRepository;

pub struct DunningEngine {
    repository: Arc<dyn SubscriptionRepository>,
    notifications: NotificationGateway,

    /// Unsupported campaigns already escalated to an operator by this process.
    escalated: Mutex<HashSet<CampaignId>>,
}

impl DunningEngine {
    pub fn new(
        repository: Arc<dyn SubscriptionRepository>,
        notifications: NotificationGateway,
    ) -> Self {
        Self {
            repository,
            notifications,
            escalated: Mutex::new(HashSet::new()),
        }
    }

    /// Runs the final action of every campaign that needs one.
    pub async fn process_final_actions(&self, now: Timestamp) -> Result<StageReport, DomainError> {
        let campaigns = self.repository.campaigns_needing_final_action().await?;
        let mut report = StageReport::with_due(campaigns.len());

        for campaign in &campaigns {
            let item = match &campaign.final_action {
                FinalAction::Cancel => self.cancel(campaign, now).await,
                FinalAction::Pause => self.pause(campaign, now).await,
                FinalAction::Downgrade | FinalAction::Unknown(_) => {
                    self.escalate(campaign);
                    Ok(ItemResult::Deferred)
                }
            };

            report.tally(item.unwrap_or_else(|e| {
                warn!(
                    campaign_id = %campaign.id,
                    subscription_id = %campaign.subscription_id,
                    final_action = %campaign.final_action,
                    error = %e,
                    "final action failed, will retry next tick"
                );
                ItemResult::Failed
            }));
        }

        Ok(report)
    }

    async fn cancel(
        &self,
        campaign: &DunningCampaign,
        now: Timestamp,
    ) -> Result<ItemResult, DomainError> {
        let outcome = self
            .repository
            .schedule_subscription_cancellation(
                &campaign.subscription_id,
                now,
                REASON_DUNNING_CANCELLATION,
            )
            .await?;

        let marked = self
            .repository
            .fail_dunning_campaign(&campaign.id, FinalActionTaken::Cancel)
            .await?;
        if !marked {
            return Ok(ItemResult::Unchanged);
        }

        info!(
            campaign_id = %campaign.id,
            subscription_id = %campaign.subscription_id,
            scheduled = outcome.is_applied(),
            "dunning exhausted, cancellation scheduled"
        );

        // A subscription that was already terminal gets no dunning notice.
        if let TransitionOutcome::Unchanged { current } = outcome {
            if current.is_terminal() {
                return Ok(ItemResult::Applied);
            }
        }
        self.notify_cancellation(campaign).await;
        Ok(ItemResult::Applied)
    }

    async fn pause(
        &self,
        campaign: &DunningCampaign,
        now: Timestamp,
    ) -> Result<ItemResult, DomainError> {
        let outcome = self
            .repository
            .pause_subscription(&campaign.subscription_id, None)
            .await?;

        if let Some(record) = StateChangeRecord::for_outcome(
            campaign.subscription_id,
            &outcome,
            REASON_DUNNING_PAUSE,
            now,
        ) {
            self.repository.record_state_change(&record).await?;
        }

        let marked = self
            .repository
            .fail_dunning_campaign(&campaign.id, FinalActionTaken::Pause)
            .await?;
        if !marked {
            return Ok(ItemResult::Unchanged);
        }

        info!(
            campaign_id = %campaign.id,
            subscription_id = %campaign.subscription_id,
            paused = outcome.is_applied(),
            "dunning exhausted, subscription paused"
        );
        Ok(ItemResult::Applied)
    }

    /// Leaves the campaign unmarked and tells an operator, once per process.
    fn escalate(&self, campaign: &DunningCampaign) {
        let first_sighting = self
            .escalated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(campaign.id);

        let reason = match &campaign.final_action {
            FinalAction::Downgrade => "downgrade is not supported",
            _ => "unrecognized final action",
        };

        if first_sighting {
            warn!(
                campaign_id = %campaign.id,
                subscription_id = %campaign.subscription_id,
                final_action = %campaign.final_action,
                needs_operator = true,
                "{}; campaign left un-actioned",
                reason
            );
        } else {
            debug!(
                campaign_id = %campaign.id,
                final_action = %campaign.final_action,
                "{}; still awaiting operator",
                reason
            );
        }
    }

    async fn notify_cancellation(&self, campaign: &DunningCampaign) {
        match self
            .repository
            .find_subscription(&campaign.subscription_id)
            .await
        {
            Ok(Some(subscription)) => {
                self.notifications
                    .notify(NotificationKind::DunningCancellation, &subscription)
                    .await;
            }
            Ok(None) => warn!(
                campaign_id = %campaign.id,
                subscription_id = %campaign.subscription_id,
                "subscription vanished, dunning notice skipped"
            ),
            Err(e) => warn!(
                campaign_id = %campaign.id,
                subscription_id = %campaign.subscription_id,
                error = %e,
                "could not load subscription, dunning notice skipped"
            ),
        }
    }

    /// Number of unsupported campaigns escalated so far.
    pub fn escalated_count(&self) -> usize {
        self.escalated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemorySubscriptionRepository, RecordingEmailService, RepoOperation};
    use crate::domain::billing::{CampaignStatus, Subscription, SubscriptionStatus};
    use crate::domain::foundation::{CustomerId, ProductId, SubscriptionId, WorkspaceId};

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse_rfc3339(s).unwrap()
    }

    fn now() -> Timestamp {
        ts("2024-01-01T00:05:00Z")
    }

    fn subscription() -> Subscription {
        Subscription::new(
            WorkspaceId::new(),
            CustomerId::new(),
            ProductId::new(),
            4_900,
            ts("2023-12-01T00:00:00Z"),
            ts("2024-01-01T00:00:00Z"),
        )
        .with_customer_email("owner@example.com")
    }

    fn exhausted(subscription_id: SubscriptionId, action: &str) -> DunningCampaign {
        let mut campaign = DunningCampaign::open(
            subscription_id,
            3,
            FinalAction::from(action),
            ts("2023-12-20T00:00:00Z"),
            ts("2023-12-10T00:00:00Z"),
        );
        campaign.retry_count = 3;
        campaign
    }

    struct Fixture {
        repo: Arc<InMemorySubscriptionRepository>,
        email: Arc<RecordingEmailService>,
        engine: DunningEngine,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(InMemorySubscriptionRepository::new());
        let email = Arc::new(RecordingEmailService::new());
        let engine = DunningEngine::new(repo.clone(), NotificationGateway::new(email.clone()));
        Fixture { repo, email, engine }
    }

    fn seed(f: &Fixture, action: &str) -> (SubscriptionId, CampaignId) {
        let sub = subscription();
        let sub_id = sub.id;
        let campaign = exhausted(sub_id, action);
        let campaign_id = campaign.id;
        f.repo.insert_subscription(sub);
        f.repo.insert_campaign(campaign);
        (sub_id, campaign_id)
    }

    // ════════════════════════════════════════════════════════════════════
    // Cancel
    // ════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn cancel_schedules_marks_and_notifies() {
        let f = fixture();
        let (sub_id, campaign_id) = seed(&f, "cancel");

        let report = f.engine.process_final_actions(now()).await.unwrap();

        assert_eq!(report.applied, 1);
        let sub = f.repo.subscription(&sub_id).unwrap();
        assert_eq!(sub.cancel_at, Some(now()));
        assert_eq!(sub.cancel_reason.as_deref(), Some(REASON_DUNNING_CANCELLATION));
        assert_eq!(sub.status, SubscriptionStatus::Active);

        let campaign = f.repo.campaign(&campaign_id).unwrap();
        assert_eq!(campaign.final_action_taken, Some(FinalActionTaken::Cancel));
        assert_eq!(campaign.status, CampaignStatus::Failed);
        assert_eq!(f.email.sent_with_category("dunning_canceled").len(), 1);
    }

    #[tokio::test]
    async fn failed_scheduling_leaves_campaign_unmarked() {
        let f = fixture();
        let (sub_id, campaign_id) = seed(&f, "cancel");
        f.repo
            .fail_operation_for(RepoOperation::ScheduleCancellation, *sub_id.as_uuid());

        let report = f.engine.process_final_actions(now()).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(f.repo.campaign(&campaign_id).unwrap().final_action_taken, None);
        assert_eq!(f.repo.call_count(RepoOperation::FailCampaign), 0);
        assert_eq!(f.email.attempts(), 0);
    }

    #[tokio::test]
    async fn failed_marking_is_retried_without_rescheduling_twice() {
        let f = fixture();
        let (sub_id, campaign_id) = seed(&f, "cancel");
        f.repo.fail_operation(RepoOperation::FailCampaign);

        let first = f.engine.process_final_actions(now()).await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(f.repo.subscription(&sub_id).unwrap().cancel_at, Some(now()));
        assert_eq!(f.email.attempts(), 0);

        f.repo.heal();
        let later = now().plus_secs(60);
        let second = f.engine.process_final_actions(later).await.unwrap();

        assert_eq!(second.applied, 1);
        // The original schedule is kept.
        assert_eq!(f.repo.subscription(&sub_id).unwrap().cancel_at, Some(now()));
        assert_eq!(
            f.repo.campaign(&campaign_id).unwrap().final_action_taken,
            Some(FinalActionTaken::Cancel)
        );
        assert_eq!(f.email.sent_with_category("dunning_canceled").len(), 1);
    }

    #[tokio::test]
    async fn second_pass_sends_no_second_email() {
        let f = fixture();
        seed(&f, "cancel");

        f.engine.process_final_actions(now()).await.unwrap();
        let second = f.engine.process_final_actions(now()).await.unwrap();

        assert_eq!(second.due, 0);
        assert_eq!(f.email.sent_with_category("dunning_canceled").len(), 1);
    }

    #[tokio::test]
    async fn terminal_subscription_is_marked_without_notice() {
        let f = fixture();
        let sub = subscription().with_status(SubscriptionStatus::Canceled);
        let campaign = exhausted(sub.id, "cancel");
        let campaign_id = campaign.id;
        f.repo.insert_subscription(sub);
        f.repo.insert_campaign(campaign);

        let report = f.engine.process_final_actions(now()).await.unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(
            f.repo.campaign(&campaign_id).unwrap().final_action_taken,
            Some(FinalActionTaken::Cancel)
        );
        assert_eq!(f.email.attempts(), 0);
    }

    // ════════════════════════════════════════════════════════════════════
    // Pause
    // ════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn pause_pauses_indefinitely_and_records() {
        let f = fixture();
        let (sub_id, campaign_id) = seed(&f, "pause");

        let report = f.engine.process_final_actions(now()).await.unwrap();

        assert_eq!(report.applied, 1);
        let sub = f.repo.subscription(&sub_id).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Paused);
        assert_eq!(sub.pause_ends_at, None);
        assert_eq!(
            f.repo.campaign(&campaign_id).unwrap().final_action_taken,
            Some(FinalActionTaken::Pause)
        );

        let changes = f.repo.state_changes_for(&sub_id);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].to_status, SubscriptionStatus::Paused);
        assert_eq!(changes[0].reason, REASON_DUNNING_PAUSE);
    }

    #[tokio::test]
    async fn pause_makes_an_existing_timed_pause_indefinite() {
        let f = fixture();
        let sub = subscription()
            .with_status(SubscriptionStatus::Paused)
            .with_pause_ends_at(ts("2024-03-01T00:00:00Z"));
        let sub_id = sub.id;
        let campaign = exhausted(sub_id, "pause");
        let campaign_id = campaign.id;
        f.repo.insert_subscription(sub);
        f.repo.insert_campaign(campaign);

        let report = f.engine.process_final_actions(now()).await.unwrap();

        assert_eq!(report.applied, 1);
        let stored = f.repo.subscription(&sub_id).unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Paused);
        assert_eq!(stored.pause_ends_at, None);
        assert_eq!(
            f.repo.campaign(&campaign_id).unwrap().final_action_taken,
            Some(FinalActionTaken::Pause)
        );
        // Status did not change, so nothing is audited.
        assert!(f.repo.state_changes_for(&sub_id).is_empty());
    }

    #[tokio::test]
    async fn pause_retry_after_failed_marking_does_not_duplicate_audit() {
        let f = fixture();
        let (sub_id, _) = seed(&f, "pause");
        f.repo.fail_operation(RepoOperation::FailCampaign);

        f.engine.process_final_actions(now()).await.unwrap();
        f.repo.heal();
        let report = f.engine.process_final_actions(now()).await.unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(f.repo.state_changes_for(&sub_id).len(), 1);
    }

    // ════════════════════════════════════════════════════════════════════
    // Unsupported actions
    // ════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn downgrade_is_never_marked() {
        let f = fixture();
        let (sub_id, campaign_id) = seed(&f, "downgrade");

        for _ in 0..3 {
            let report = f.engine.process_final_actions(now()).await.unwrap();
            assert_eq!(report.deferred, 1);
        }

        assert_eq!(f.repo.campaign(&campaign_id).unwrap().final_action_taken, None);
        assert_eq!(
            f.repo.subscription(&sub_id).unwrap().status,
            SubscriptionStatus::Active
        );
        assert_eq!(f.engine.escalated_count(), 1);
        assert_eq!(f.repo.call_count(RepoOperation::FailCampaign), 0);
    }

    #[tokio::test]
    async fn unrecognized_action_is_deferred() {
        let f = fixture();
        let (_, campaign_id) = seed(&f, "archive");

        let report = f.engine.process_final_actions(now()).await.unwrap();

        assert_eq!(report.deferred, 1);
        assert_eq!(f.repo.campaign(&campaign_id).unwrap().final_action_taken, None);
    }

    #[tokio::test]
    async fn one_failing_campaign_does_not_block_others() {
        let f = fixture();
        let (broken_sub, _) = seed(&f, "pause");
        let (healthy_sub, _) = seed(&f, "pause");
        f.repo
            .fail_operation_for(RepoOperation::Pause, *broken_sub.as_uuid());

        let report = f.engine.process_final_actions(now()).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.applied, 1);
        assert_eq!(
            f.repo.subscription(&healthy_sub).unwrap().status,
            SubscriptionStatus::Paused
        );
    }
}
