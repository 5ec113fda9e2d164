//! In-memory implementation of SubscriptionRepository.
//!
//! Mirrors the Postgres adapter's guarded single-row semantics so scheduler
//! behaviour can be exercised without a database. Supports failure injection
//! per operation, optionally scoped to one row, and records every call.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::billing::{
    CampaignStatus, DunningCampaign, FinalActionTaken, StateChangeRecord, Subscription,
    SubscriptionStatus, TransitionOutcome,
};
use crate::domain::foundation::{
    CampaignId, DomainError, ErrorCode, StateMachine, SubscriptionId, Timestamp,
};
use crate::ports::{DelegationPayload, SubscriptionRepository};

/// Repository operations, used for failure injection and call tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepoOperation {
    DueForCancellation,
    DueForResumption,
    NeedingFinalAction,
    DueForRetry,
    FindSubscription,
    FindDelegation,
    CancelImmediately,
    Resume,
    Pause,
    ScheduleCancellation,
    Reactivate,
    RecordStateChange,
    FailCampaign,
    RecordRetryFailure,
    RecoverCampaign,
}

#[derive(Default)]
struct State {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    campaigns: HashMap<CampaignId, DunningCampaign>,
    delegations: HashMap<SubscriptionId, DelegationPayload>,
    state_changes: Vec<StateChangeRecord>,

    /// Operations that fail for every row.
    failing: HashSet<RepoOperation>,

    /// Operations that fail only for one subscription or campaign id.
    failing_for: HashSet<(RepoOperation, Uuid)>,

    calls: Vec<RepoOperation>,
}

impl State {
    fn check(&mut self, op: RepoOperation, key: Option<&Uuid>) -> Result<(), DomainError> {
        self.calls.push(op);
        let scoped = key.is_some_and(|k| self.failing_for.contains(&(op, *k)));
        if scoped || self.failing.contains(&op) {
            return Err(DomainError::database(format!("injected failure in {:?}", op)));
        }
        Ok(())
    }

    fn subscription_mut(&mut self, id: &SubscriptionId) -> Result<&mut Subscription, DomainError> {
        self.subscriptions.get_mut(id).ok_or_else(|| {
            DomainError::new(
                ErrorCode::SubscriptionNotFound,
                format!("Subscription {} not found", id),
            )
        })
    }

    fn campaign_mut(&mut self, id: &CampaignId) -> Result<&mut DunningCampaign, DomainError> {
        self.campaigns.get_mut(id).ok_or_else(|| {
            DomainError::new(
                ErrorCode::CampaignNotFound,
                format!("Dunning campaign {} not found", id),
            )
        })
    }

    /// Applies `mutate` if `eligible` holds for the current status.
    fn transition(
        &mut self,
        id: &SubscriptionId,
        eligible: impl Fn(&Subscription) -> bool,
        mutate: impl FnOnce(&mut Subscription),
    ) -> Result<TransitionOutcome, DomainError> {
        let sub = self.subscription_mut(id)?;
        if !eligible(&*sub) {
            return Ok(TransitionOutcome::Unchanged {
                current: sub.status,
            });
        }
        let previous_status = sub.status;
        let previous_amount_in_cents = sub.total_amount_in_cents;
        mutate(&mut *sub);
        Ok(TransitionOutcome::Applied {
            previous_status,
            previous_amount_in_cents,
            status: sub.status,
            amount_in_cents: sub.total_amount_in_cents,
        })
    }
}

/// Thread-safe in-memory billing store.
#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    state: Mutex<State>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ════════════════════════════════════════════════════════════════════
    // Seeding
    // ════════════════════════════════════════════════════════════════════

    pub fn insert_subscription(&self, subscription: Subscription) {
        self.lock()
            .subscriptions
            .insert(subscription.id, subscription);
    }

    pub fn insert_campaign(&self, campaign: DunningCampaign) {
        self.lock().campaigns.insert(campaign.id, campaign);
    }

    pub fn insert_delegation(&self, subscription_id: SubscriptionId, payload: DelegationPayload) {
        self.lock().delegations.insert(subscription_id, payload);
    }

    // ════════════════════════════════════════════════════════════════════
    // Failure injection
    // ════════════════════════════════════════════════════════════════════

    /// Makes every call of `op` fail with a database error.
    pub fn fail_operation(&self, op: RepoOperation) {
        self.lock().failing.insert(op);
    }

    /// Makes `op` fail only when applied to the row with this id.
    pub fn fail_operation_for(&self, op: RepoOperation, id: Uuid) {
        self.lock().failing_for.insert((op, id));
    }

    /// Removes all injected failures.
    pub fn heal(&self) {
        let mut state = self.lock();
        state.failing.clear();
        state.failing_for.clear();
    }

    // ════════════════════════════════════════════════════════════════════
    // Inspection
    // ════════════════════════════════════════════════════════════════════

    pub fn subscription(&self, id: &SubscriptionId) -> Option<Subscription> {
        self.lock().subscriptions.get(id).cloned()
    }

    pub fn campaign(&self, id: &CampaignId) -> Option<DunningCampaign> {
        self.lock().campaigns.get(id).cloned()
    }

    pub fn state_changes(&self) -> Vec<StateChangeRecord> {
        self.lock().state_changes.clone()
    }

    pub fn state_changes_for(&self, id: &SubscriptionId) -> Vec<StateChangeRecord> {
        self.lock()
            .state_changes
            .iter()
            .filter(|r| &r.subscription_id == id)
            .cloned()
            .collect()
    }

    /// How many times `op` has been called, failed calls included.
    pub fn call_count(&self, op: RepoOperation) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }
}

fn sorted<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(key);
    items
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn subscriptions_due_for_cancellation(
        &self,
        now: Timestamp,
    ) -> Result<Vec<Subscription>, DomainError> {
        let mut state = self.lock();
        state.check(RepoOperation::DueForCancellation, None)?;
        let due: Vec<Subscription> = state
            .subscriptions
            .values()
            .filter(|s| s.is_due_for_cancellation(&now))
            .cloned()
            .collect();
        Ok(sorted(due, |s| (s.cancel_at, s.id)))
    }

    async fn subscriptions_due_for_resumption(
        &self,
        now: Timestamp,
    ) -> Result<Vec<Subscription>, DomainError> {
        let mut state = self.lock();
        state.check(RepoOperation::DueForResumption, None)?;
        let due: Vec<Subscription> = state
            .subscriptions
            .values()
            .filter(|s| s.is_due_for_resumption(&now))
            .cloned()
            .collect();
        Ok(sorted(due, |s| (s.pause_ends_at, s.id)))
    }

    async fn campaigns_needing_final_action(&self) -> Result<Vec<DunningCampaign>, DomainError> {
        let mut state = self.lock();
        state.check(RepoOperation::NeedingFinalAction, None)?;
        let due: Vec<DunningCampaign> = state
            .campaigns
            .values()
            .filter(|c| c.needs_final_action())
            .cloned()
            .collect();
        Ok(sorted(due, |c| (c.created_at, c.id)))
    }

    async fn campaigns_due_for_retry(
        &self,
        now: Timestamp,
    ) -> Result<Vec<DunningCampaign>, DomainError> {
        let mut state = self.lock();
        state.check(RepoOperation::DueForRetry, None)?;
        let due: Vec<DunningCampaign> = state
            .campaigns
            .values()
            .filter(|c| {
                c.is_due_for_retry(&now)
                    && state
                        .subscriptions
                        .get(&c.subscription_id)
                        .is_some_and(Subscription::is_billable)
            })
            .cloned()
            .collect();
        Ok(sorted(due, |c| (c.next_retry_at, c.id)))
    }

    async fn find_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, DomainError> {
        let mut state = self.lock();
        state.check(RepoOperation::FindSubscription, Some(id.as_uuid()))?;
        Ok(state.subscriptions.get(id).cloned())
    }

    async fn find_delegation(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<DelegationPayload>, DomainError> {
        let mut state = self.lock();
        state.check(RepoOperation::FindDelegation, Some(id.as_uuid()))?;
        Ok(state.delegations.get(id).cloned())
    }

    async fn cancel_subscription_immediately(
        &self,
        id: &SubscriptionId,
        now: Timestamp,
    ) -> Result<TransitionOutcome, DomainError> {
        let mut state = self.lock();
        state.check(RepoOperation::CancelImmediately, Some(id.as_uuid()))?;
        state.transition(
            id,
            |s| !s.status.is_terminal(),
            |s| {
                s.status = SubscriptionStatus::Canceled;
                s.total_amount_in_cents = 0;
                s.canceled_at = Some(now);
                s.pause_ends_at = None;
            },
        )
    }

    async fn resume_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<TransitionOutcome, DomainError> {
        let mut state = self.lock();
        state.check(RepoOperation::Resume, Some(id.as_uuid()))?;
        state.transition(
            id,
            |s| s.status == SubscriptionStatus::Paused,
            |s| {
                s.status = SubscriptionStatus::Active;
                s.pause_ends_at = None;
            },
        )
    }

    async fn pause_subscription(
        &self,
        id: &SubscriptionId,
        resume_at: Option<Timestamp>,
    ) -> Result<TransitionOutcome, DomainError> {
        let mut state = self.lock();
        state.check(RepoOperation::Pause, Some(id.as_uuid()))?;
        state.transition(
            id,
            |s| {
                // An indefinite pause also replaces a timed one.
                let ends_timed_pause = resume_at.is_none()
                    && s.status == SubscriptionStatus::Paused
                    && s.pause_ends_at.is_some();
                s.status.can_transition_to(&SubscriptionStatus::Paused) || ends_timed_pause
            },
            |s| {
                s.status = SubscriptionStatus::Paused;
                s.pause_ends_at = resume_at;
            },
        )
    }

    async fn schedule_subscription_cancellation(
        &self,
        id: &SubscriptionId,
        at: Timestamp,
        reason: &str,
    ) -> Result<TransitionOutcome, DomainError> {
        let mut state = self.lock();
        state.check(RepoOperation::ScheduleCancellation, Some(id.as_uuid()))?;
        let reason = reason.to_string();
        state.transition(
            id,
            |s| {
                let already_due_sooner = s.cancel_at.is_some_and(|existing| existing <= at);
                !s.status.is_terminal() && !already_due_sooner
            },
            |s| {
                s.cancel_at = Some(at);
                s.cancel_reason = Some(reason);
            },
        )
    }

    async fn reactivate_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<TransitionOutcome, DomainError> {
        let mut state = self.lock();
        state.check(RepoOperation::Reactivate, Some(id.as_uuid()))?;
        state.transition(
            id,
            |s| s.status == SubscriptionStatus::PastDue,
            |s| s.status = SubscriptionStatus::Active,
        )
    }

    async fn record_state_change(&self, record: &StateChangeRecord) -> Result<(), DomainError> {
        let mut state = self.lock();
        state.check(
            RepoOperation::RecordStateChange,
            Some(record.subscription_id.as_uuid()),
        )?;
        state.state_changes.push(record.clone());
        Ok(())
    }

    async fn fail_dunning_campaign(
        &self,
        id: &CampaignId,
        action: FinalActionTaken,
    ) -> Result<bool, DomainError> {
        let mut state = self.lock();
        state.check(RepoOperation::FailCampaign, Some(id.as_uuid()))?;
        let campaign = state.campaign_mut(id)?;
        if campaign.final_action_taken.is_some() {
            return Ok(false);
        }
        campaign.final_action_taken = Some(action);
        campaign.status = CampaignStatus::Failed;
        campaign.next_retry_at = None;
        Ok(true)
    }

    async fn record_retry_failure(
        &self,
        id: &CampaignId,
        next_retry_at: Timestamp,
        reason: &str,
    ) -> Result<(), DomainError> {
        let mut state = self.lock();
        state.check(RepoOperation::RecordRetryFailure, Some(id.as_uuid()))?;
        let campaign = state.campaign_mut(id)?;
        if campaign.status != CampaignStatus::Active {
            return Ok(());
        }
        campaign.retry_count += 1;
        campaign.next_retry_at = Some(next_retry_at);
        campaign.last_failure_reason = Some(reason.to_string());
        Ok(())
    }

    async fn recover_dunning_campaign(&self, id: &CampaignId) -> Result<bool, DomainError> {
        let mut state = self.lock();
        state.check(RepoOperation::RecoverCampaign, Some(id.as_uuid()))?;
        let campaign = state.campaign_mut(id)?;
        if campaign.status != CampaignStatus::Active {
            return Ok(false);
        }
        campaign.status = CampaignStatus::Recovered;
        campaign.next_retry_at = None;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::FinalAction;
    use crate::domain::foundation::{CustomerId, ProductId, WorkspaceId};

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse_rfc3339(s).unwrap()
    }

    fn subscription() -> Subscription {
        Subscription::new(
            WorkspaceId::new(),
            CustomerId::new(),
            ProductId::new(),
            1_500,
            ts("2023-12-01T00:00:00Z"),
            ts("2024-01-01T00:00:00Z"),
        )
    }

    #[tokio::test]
    async fn cancel_is_applied_once() {
        let repo = InMemorySubscriptionRepository::new();
        let sub = subscription();
        let id = sub.id;
        repo.insert_subscription(sub);

        let now = ts("2024-01-01T00:05:00Z");
        let first = repo.cancel_subscription_immediately(&id, now).await.unwrap();
        assert_eq!(
            first,
            TransitionOutcome::Applied {
                previous_status: SubscriptionStatus::Active,
                previous_amount_in_cents: 1_500,
                status: SubscriptionStatus::Canceled,
                amount_in_cents: 0,
            }
        );

        let second = repo.cancel_subscription_immediately(&id, now).await.unwrap();
        assert_eq!(
            second,
            TransitionOutcome::Unchanged {
                current: SubscriptionStatus::Canceled
            }
        );
        assert_eq!(repo.subscription(&id).unwrap().canceled_at, Some(now));
    }

    #[tokio::test]
    async fn due_queries_skip_terminal_rows() {
        let repo = InMemorySubscriptionRepository::new();
        let due = subscription().with_cancel_at(ts("2024-01-01T00:00:00Z"));
        let gone = subscription()
            .with_cancel_at(ts("2024-01-01T00:00:00Z"))
            .with_status(SubscriptionStatus::Expired);
        let due_id = due.id;
        repo.insert_subscription(due);
        repo.insert_subscription(gone);

        let rows = repo
            .subscriptions_due_for_cancellation(ts("2024-01-01T00:05:00Z"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, due_id);
    }

    #[tokio::test]
    async fn scheduling_cancellation_is_idempotent() {
        let repo = InMemorySubscriptionRepository::new();
        let sub = subscription();
        let id = sub.id;
        repo.insert_subscription(sub);

        let at = ts("2024-01-01T00:05:00Z");
        let first = repo
            .schedule_subscription_cancellation(&id, at, "dunning")
            .await
            .unwrap();
        assert!(first.is_applied());

        let again = repo
            .schedule_subscription_cancellation(&id, at.plus_secs(60), "dunning")
            .await
            .unwrap();
        assert!(!again.is_applied());
        assert_eq!(repo.subscription(&id).unwrap().cancel_at, Some(at));
    }

    #[tokio::test]
    async fn earlier_cancellation_replaces_a_later_one() {
        let repo = InMemorySubscriptionRepository::new();
        let later = ts("2024-02-01T00:00:00Z");
        let sub = subscription().with_cancel_at(later);
        let id = sub.id;
        repo.insert_subscription(sub);

        let same = repo
            .schedule_subscription_cancellation(&id, later, "dunning")
            .await
            .unwrap();
        assert!(!same.is_applied());

        let sooner = ts("2024-01-01T00:05:00Z");
        let moved = repo
            .schedule_subscription_cancellation(&id, sooner, "dunning")
            .await
            .unwrap();
        assert!(moved.is_applied());
        assert_eq!(repo.subscription(&id).unwrap().cancel_at, Some(sooner));
    }

    #[tokio::test]
    async fn pause_then_pause_again_is_unchanged() {
        let repo = InMemorySubscriptionRepository::new();
        let sub = subscription();
        let id = sub.id;
        repo.insert_subscription(sub);

        assert!(repo.pause_subscription(&id, None).await.unwrap().is_applied());
        let again = repo.pause_subscription(&id, None).await.unwrap();
        assert_eq!(
            again,
            TransitionOutcome::Unchanged {
                current: SubscriptionStatus::Paused
            }
        );
    }

    #[tokio::test]
    async fn indefinite_pause_replaces_a_timed_pause_once() {
        let repo = InMemorySubscriptionRepository::new();
        let sub = subscription()
            .with_status(SubscriptionStatus::Paused)
            .with_pause_ends_at(ts("2024-03-01T00:00:00Z"));
        let id = sub.id;
        repo.insert_subscription(sub);

        let first = repo.pause_subscription(&id, None).await.unwrap();
        assert!(first.is_applied());
        assert_eq!(first.status(), SubscriptionStatus::Paused);
        assert_eq!(repo.subscription(&id).unwrap().pause_ends_at, None);

        let again = repo.pause_subscription(&id, None).await.unwrap();
        assert!(!again.is_applied());
    }

    #[tokio::test]
    async fn timed_pause_does_not_override_an_existing_pause() {
        let repo = InMemorySubscriptionRepository::new();
        let sub = subscription().with_status(SubscriptionStatus::Paused);
        let id = sub.id;
        repo.insert_subscription(sub);

        let outcome = repo
            .pause_subscription(&id, Some(ts("2024-03-01T00:00:00Z")))
            .await
            .unwrap();
        assert!(!outcome.is_applied());
        assert_eq!(repo.subscription(&id).unwrap().pause_ends_at, None);
    }

    #[tokio::test]
    async fn retry_query_only_returns_billable_subscriptions() {
        let repo = InMemorySubscriptionRepository::new();
        let mut billable_id = None;
        for status in [
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Paused,
            SubscriptionStatus::Expired,
        ] {
            let sub = subscription().with_status(status);
            let campaign = DunningCampaign::open(
                sub.id,
                3,
                FinalAction::Cancel,
                ts("2024-01-02T00:00:00Z"),
                ts("2024-01-01T00:00:00Z"),
            );
            if status == SubscriptionStatus::PastDue {
                billable_id = Some(campaign.id);
            }
            repo.insert_subscription(sub);
            repo.insert_campaign(campaign);
        }

        let due = repo
            .campaigns_due_for_retry(ts("2024-01-03T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(Some(due[0].id), billable_id);
    }

    #[tokio::test]
    async fn fail_campaign_marks_once() {
        let repo = InMemorySubscriptionRepository::new();
        let campaign = DunningCampaign::open(
            SubscriptionId::new(),
            3,
            FinalAction::Pause,
            ts("2024-01-02T00:00:00Z"),
            ts("2024-01-01T00:00:00Z"),
        );
        let id = campaign.id;
        repo.insert_campaign(campaign);

        assert!(repo
            .fail_dunning_campaign(&id, FinalActionTaken::Pause)
            .await
            .unwrap());
        assert!(!repo
            .fail_dunning_campaign(&id, FinalActionTaken::Pause)
            .await
            .unwrap());
        assert_eq!(repo.campaign(&id).unwrap().status, CampaignStatus::Failed);
    }

    #[tokio::test]
    async fn scoped_failure_hits_only_that_row() {
        let repo = InMemorySubscriptionRepository::new();
        let a = subscription();
        let b = subscription();
        let (a_id, b_id) = (a.id, b.id);
        repo.insert_subscription(a);
        repo.insert_subscription(b);
        repo.fail_operation_for(RepoOperation::CancelImmediately, *a_id.as_uuid());

        let now = ts("2024-01-01T00:00:00Z");
        assert!(repo.cancel_subscription_immediately(&a_id, now).await.is_err());
        assert!(repo.cancel_subscription_immediately(&b_id, now).await.is_ok());
        assert_eq!(repo.call_count(RepoOperation::CancelImmediately), 2);
    }

    #[tokio::test]
    async fn missing_subscription_is_not_found() {
        let repo = InMemorySubscriptionRepository::new();
        let err = repo
            .resume_subscription(&SubscriptionId::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SubscriptionNotFound);
    }
}
