//! Subscription repository port.
//!
//! One interface covers subscriptions, dunning campaigns and the state
//! change log, so the scheduler depends on a single seam.
//!
//! # Contract
//!
//! - **Snapshots**: due-work queries return a finite list, never a live cursor,
//!   and only include non-terminal rows.
//! - **Single-row atomicity**: every mutation is one statement (or one short
//!   transaction) guarded by a status predicate. No read-modify-write in
//!   application memory, so concurrent writers outside the scheduler cannot
//!   cause lost updates.
//! - **Idempotence**: re-applying a mutation to a row already in its target
//!   state returns [`TransitionOutcome::Unchanged`] and writes nothing.

use crate::domain::billing::{
    DunningCampaign, FinalActionTaken, StateChangeRecord, Subscription, TransitionOutcome,
};
use crate::domain::foundation::{CampaignId, DomainError, SubscriptionId, Timestamp};
use crate::ports::DelegationPayload;
use async_trait::async_trait;

/// Repository port for the billing tables.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    // ── Due-work queries ────────────────────────────────────────────────

    /// Non-terminal subscriptions with `cancel_at <= now`.
    async fn subscriptions_due_for_cancellation(
        &self,
        now: Timestamp,
    ) -> Result<Vec<Subscription>, DomainError>;

    /// Paused subscriptions with `pause_ends_at <= now`.
    async fn subscriptions_due_for_resumption(
        &self,
        now: Timestamp,
    ) -> Result<Vec<Subscription>, DomainError>;

    /// Campaigns whose retries are exhausted and whose final action has not been taken.
    async fn campaigns_needing_final_action(&self) -> Result<Vec<DunningCampaign>, DomainError>;

    /// Active campaigns with retries left and `next_retry_at <= now`.
    async fn campaigns_due_for_retry(
        &self,
        now: Timestamp,
    ) -> Result<Vec<DunningCampaign>, DomainError>;

    // ── Lookups ─────────────────────────────────────────────────────────

    async fn find_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Signed delegation stored for the subscription, if the customer granted one.
    async fn find_delegation(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<DelegationPayload>, DomainError>;

    // ── Subscription mutations ──────────────────────────────────────────

    /// Sets status `canceled`, zeroes the monetary totals and clears the schedule.
    ///
    /// `Unchanged` if the subscription is already terminal.
    async fn cancel_subscription_immediately(
        &self,
        id: &SubscriptionId,
        now: Timestamp,
    ) -> Result<TransitionOutcome, DomainError>;

    /// Paused → active, clearing `pause_ends_at`.
    ///
    /// `Unchanged` unless the subscription is currently paused.
    async fn resume_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<TransitionOutcome, DomainError>;

    /// Active/past-due → paused. `resume_at = None` pauses indefinitely.
    ///
    /// `Unchanged` if already paused or terminal.
    async fn pause_subscription(
        &self,
        id: &SubscriptionId,
        resume_at: Option<Timestamp>,
    ) -> Result<TransitionOutcome, DomainError>;

    /// Sets `cancel_at` and the reason without changing status.
    ///
    /// Safe to repeat: a subscription that already has a `cancel_at` at or
    /// before `at` keeps it, and terminal subscriptions are left alone. Both
    /// report `Unchanged`.
    async fn schedule_subscription_cancellation(
        &self,
        id: &SubscriptionId,
        at: Timestamp,
        reason: &str,
    ) -> Result<TransitionOutcome, DomainError>;

    /// Past-due → active after a successful payment retry.
    async fn reactivate_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<TransitionOutcome, DomainError>;

    // ── Audit log ───────────────────────────────────────────────────────

    /// Appends an audit entry. Entries are never updated or deleted.
    async fn record_state_change(&self, record: &StateChangeRecord) -> Result<(), DomainError>;

    // ── Dunning campaign mutations ──────────────────────────────────────

    /// Marks the final action as taken and the campaign as failed.
    ///
    /// Returns `false` if the campaign was already marked (nothing written).
    async fn fail_dunning_campaign(
        &self,
        id: &CampaignId,
        action: FinalActionTaken,
    ) -> Result<bool, DomainError>;

    /// Atomically increments `retry_count` and schedules the next attempt.
    async fn record_retry_failure(
        &self,
        id: &CampaignId,
        next_retry_at: Timestamp,
        reason: &str,
    ) -> Result<(), DomainError>;

    /// Marks an active campaign recovered. Returns `false` if it was not active.
    async fn recover_dunning_campaign(&self, id: &CampaignId) -> Result<bool, DomainError>;
}
