//! PaymentRetryProcessor - Redeems delegations for campaigns due a retry.
//!
//! The redemption outcome decides what happens to the campaign:
//!
//! - **Settled**: the past-due subscription is reactivated (audited), then
//!   the campaign is marked recovered.
//! - **Retryable failure**: nothing is written; the campaign stays due and
//!   the next tick tries again with the same idempotency key.
//! - **Terminal failure**: `retry_count` is incremented and the next attempt
//!   is scheduled with exponential backoff. Exhausting the count hands the
//!   campaign to the final-action stage.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use super::report::{ItemResult, StageReport};
use crate::domain::billing::{
    DunningCampaign, RetrySchedule, StateChangeRecord, REASON_PAYMENT_RECOVERED,
};
use crate::domain::foundation::{CampaignId, DomainError, ErrorCode, Timestamp};
use crate::ports::{
    redeem_within, DelegationRedeemer, RedemptionError, RedemptionErrorCode, RedemptionRequest,
    SubscriptionRepository,
};

pub struct PaymentRetryProcessor {
    repository: Arc<dyn SubscriptionRepository>,
    redeemer: Arc<dyn DelegationRedeemer>,
    schedule: RetrySchedule,
    redeem_timeout: Duration,
}

impl PaymentRetryProcessor {
    pub fn new(
        repository: Arc<dyn SubscriptionRepository>,
        redeemer: Arc<dyn DelegationRedeemer>,
        schedule: RetrySchedule,
        redeem_timeout: Duration,
    ) -> Self {
        Self {
            repository,
            redeemer,
            schedule,
            redeem_timeout,
        }
    }

    pub async fn process_due_retries(&self, now: Timestamp) -> Result<StageReport, DomainError> {
        let campaigns = self.repository.campaigns_due_for_retry(now).await?;
        let mut report = StageReport::with_due(campaigns.len());

        for campaign in &campaigns {
            let item = self.retry(campaign, now).await.unwrap_or_else(|e| {
                warn!(
                    campaign_id = %campaign.id,
                    subscription_id = %campaign.subscription_id,
                    error = %e,
                    "payment retry failed, will retry next tick"
                );
                ItemResult::Failed
            });
            report.tally(item);
        }

        Ok(report)
    }

    async fn retry(
        &self,
        campaign: &DunningCampaign,
        now: Timestamp,
    ) -> Result<ItemResult, DomainError> {
        let subscription = self
            .repository
            .find_subscription(&campaign.subscription_id)
            .await?
            .ok_or_else(|| {
                DomainError::new(
                    ErrorCode::SubscriptionNotFound,
                    format!("Subscription {} not found", campaign.subscription_id),
                )
            })?;

        // The due query already excludes these; the row may have moved since.
        if !subscription.is_billable() {
            info!(
                campaign_id = %campaign.id,
                subscription_id = %campaign.subscription_id,
                status = %subscription.status,
                "subscription not billable, retry skipped"
            );
            return Ok(ItemResult::Deferred);
        }

        let attempt = campaign.retry_count + 1;
        let outcome = match self
            .repository
            .find_delegation(&campaign.subscription_id)
            .await?
        {
            Some(delegation) => {
                let request = RedemptionRequest {
                    subscription_id: campaign.subscription_id,
                    delegation,
                    amount_in_cents: subscription.total_amount_in_cents,
                    idempotency_key: idempotency_key(&campaign.id, attempt),
                };
                redeem_within(self.redeemer.as_ref(), &request, self.redeem_timeout).await
            }
            None => Err(RedemptionError::new(
                RedemptionErrorCode::InvalidDelegation,
                "no delegation on file",
            )),
        };

        match outcome {
            Ok(reference) => {
                let reactivated = self
                    .repository
                    .reactivate_subscription(&campaign.subscription_id)
                    .await?;
                if let Some(record) = StateChangeRecord::for_outcome(
                    campaign.subscription_id,
                    &reactivated,
                    REASON_PAYMENT_RECOVERED,
                    now,
                ) {
                    if let Err(e) = self.repository.record_state_change(&record).await {
                        error!(
                            subscription_id = %campaign.subscription_id,
                            state_change_id = %record.id,
                            error = %e,
                            needs_reconciliation = true,
                            "state change not recorded"
                        );
                    }
                }

                let recovered = self.repository.recover_dunning_campaign(&campaign.id).await?;
                info!(
                    campaign_id = %campaign.id,
                    subscription_id = %campaign.subscription_id,
                    settlement_reference = %reference,
                    attempt,
                    "payment recovered"
                );
                Ok(if recovered {
                    ItemResult::Applied
                } else {
                    ItemResult::Unchanged
                })
            }
            Err(e) if e.is_retryable() => {
                info!(
                    campaign_id = %campaign.id,
                    subscription_id = %campaign.subscription_id,
                    code = %e.code,
                    error = %e.message,
                    "redemption failed transiently, campaign left for next tick"
                );
                Ok(ItemResult::Deferred)
            }
            Err(e) => {
                let next_retry_at = self.schedule.next_retry_at(now, attempt);
                self.repository
                    .record_retry_failure(&campaign.id, next_retry_at, &e.to_string())
                    .await?;
                warn!(
                    campaign_id = %campaign.id,
                    subscription_id = %campaign.subscription_id,
                    code = %e.code,
                    attempt,
                    max_retries = campaign.max_retries,
                    next_retry_at = %next_retry_at,
                    "redemption rejected, dunning advanced"
                );
                Ok(ItemResult::Applied)
            }
        }
    }
}

/// Stable key for one attempt of one campaign.
pub fn idempotency_key(campaign_id: &CampaignId, attempt: u32) -> String {
    let digest = Sha256::digest(format!("{}:{}", campaign_id, attempt).as_bytes());
    format!("{:x}", digest)
}
