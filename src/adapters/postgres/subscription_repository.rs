//! PostgreSQL implementation of SubscriptionRepository.
//!
//! Every mutation is a single statement. Status transitions lock the target
//! row in a CTE, apply the update only when the status guard holds, and
//! report both the prior and the resulting state, so a lost race shows up as
//! `TransitionOutcome::Unchanged` instead of a blind overwrite.

use crate::domain::billing::{
    CampaignStatus, DunningCampaign, FinalAction, FinalActionTaken, StateChangeRecord,
    Subscription, SubscriptionStatus, TransitionOutcome,
};
use crate::domain::foundation::{
    CampaignId, CustomerId, DomainError, ErrorCode, ProductId, SubscriptionId, Timestamp,
    WorkspaceId,
};
use crate::ports::{DelegationPayload, SubscriptionRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// PostgreSQL implementation of the SubscriptionRepository port.
pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SUBSCRIPTION_COLUMNS: &str = r#"
    s.id, s.workspace_id, s.customer_id, s.product_id, s.status,
    s.cancel_at, s.cancel_reason, s.canceled_at, s.pause_ends_at,
    s.current_period_start, s.current_period_end, s.total_amount_in_cents,
    c.email AS customer_email, p.name AS product_name
"#;

const SUBSCRIPTION_JOINS: &str = r#"
    FROM subscriptions s
    LEFT JOIN customers c ON c.id = s.customer_id
    LEFT JOIN products p ON p.id = s.product_id
"#;

const CAMPAIGN_COLUMNS: &str = r#"
    id, subscription_id, status, retry_count, max_retries, next_retry_at,
    final_action, final_action_taken, last_failure_reason, created_at
"#;

/// Database row representation of a subscription joined with its customer
/// and product.
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    workspace_id: Uuid,
    customer_id: Uuid,
    product_id: Uuid,
    status: String,
    cancel_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    canceled_at: Option<DateTime<Utc>>,
    pause_ends_at: Option<DateTime<Utc>>,
    current_period_start: DateTime<Utc>,
    current_period_end: DateTime<Utc>,
    total_amount_in_cents: i64,
    customer_email: Option<String>,
    product_name: Option<String>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.id),
            workspace_id: WorkspaceId::from_uuid(row.workspace_id),
            customer_id: CustomerId::from_uuid(row.customer_id),
            product_id: ProductId::from_uuid(row.product_id),
            customer_email: row.customer_email,
            product_name: row.product_name,
            status: parse_status(&row.status)?,
            cancel_at: row.cancel_at.map(Timestamp::from_datetime),
            cancel_reason: row.cancel_reason,
            canceled_at: row.canceled_at.map(Timestamp::from_datetime),
            pause_ends_at: row.pause_ends_at.map(Timestamp::from_datetime),
            current_period_start: Timestamp::from_datetime(row.current_period_start),
            current_period_end: Timestamp::from_datetime(row.current_period_end),
            total_amount_in_cents: row.total_amount_in_cents,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CampaignRow {
    id: Uuid,
    subscription_id: Uuid,
    status: String,
    retry_count: i32,
    max_retries: i32,
    next_retry_at: Option<DateTime<Utc>>,
    final_action: String,
    final_action_taken: Option<String>,
    last_failure_reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CampaignRow> for DunningCampaign {
    type Error = DomainError;

    fn try_from(row: CampaignRow) -> Result<Self, Self::Error> {
        let final_action_taken = row
            .final_action_taken
            .as_deref()
            .map(|s| s.parse::<FinalActionTaken>())
            .transpose()
            .map_err(|e| invalid_column("final_action_taken", e))?;

        Ok(DunningCampaign {
            id: CampaignId::from_uuid(row.id),
            subscription_id: SubscriptionId::from_uuid(row.subscription_id),
            status: row
                .status
                .parse::<CampaignStatus>()
                .map_err(|e| invalid_column("status", e))?,
            retry_count: to_count("retry_count", row.retry_count)?,
            max_retries: to_count("max_retries", row.max_retries)?,
            next_retry_at: row.next_retry_at.map(Timestamp::from_datetime),
            final_action: FinalAction::from(row.final_action),
            final_action_taken,
            last_failure_reason: row.last_failure_reason,
            created_at: Timestamp::from_datetime(row.created_at),
        })
    }
}

/// Prior and resulting state of a guarded transition. The `new_*` columns
/// are NULL when the guard rejected the update.
#[derive(Debug, sqlx::FromRow)]
struct TransitionRow {
    previous_status: String,
    previous_amount_in_cents: i64,
    new_status: Option<String>,
    new_amount_in_cents: Option<i64>,
}

impl TryFrom<TransitionRow> for TransitionOutcome {
    type Error = DomainError;

    fn try_from(row: TransitionRow) -> Result<Self, Self::Error> {
        let previous_status = parse_status(&row.previous_status)?;
        match (row.new_status, row.new_amount_in_cents) {
            (Some(status), Some(amount_in_cents)) => Ok(TransitionOutcome::Applied {
                previous_status,
                previous_amount_in_cents: row.previous_amount_in_cents,
                status: parse_status(&status)?,
                amount_in_cents,
            }),
            _ => Ok(TransitionOutcome::Unchanged {
                current: previous_status,
            }),
        }
    }
}

fn parse_status(s: &str) -> Result<SubscriptionStatus, DomainError> {
    s.parse::<SubscriptionStatus>()
        .map_err(|e| invalid_column("status", e))
}

fn invalid_column(column: &str, err: impl std::fmt::Display) -> DomainError {
    DomainError::new(
        ErrorCode::DatabaseError,
        format!("Invalid {} value: {}", column, err),
    )
}

fn to_count(column: &str, value: i32) -> Result<u32, DomainError> {
    u32::try_from(value).map_err(|_| invalid_column(column, value))
}

fn db_error(context: &str) -> impl FnOnce(sqlx::Error) -> DomainError + '_ {
    move |e| DomainError::database(format!("Failed to {}: {}", context, e))
}

fn subscription_not_found(id: &SubscriptionId) -> DomainError {
    DomainError::new(
        ErrorCode::SubscriptionNotFound,
        format!("Subscription {} not found", id),
    )
}

fn campaign_not_found(id: &CampaignId) -> DomainError {
    DomainError::new(
        ErrorCode::CampaignNotFound,
        format!("Dunning campaign {} not found", id),
    )
}

impl PostgresSubscriptionRepository {
    async fn fetch_subscriptions(
        &self,
        filter: &str,
        now: Timestamp,
        context: &str,
    ) -> Result<Vec<Subscription>, DomainError> {
        let sql = format!(
            "SELECT {} {} WHERE {}",
            SUBSCRIPTION_COLUMNS, SUBSCRIPTION_JOINS, filter
        );
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(now.as_datetime())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error(context))?;
        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn fetch_campaigns(
        &self,
        filter: &str,
        now: Option<Timestamp>,
        context: &str,
    ) -> Result<Vec<DunningCampaign>, DomainError> {
        let sql = format!(
            "SELECT {} FROM dunning_campaigns WHERE {}",
            CAMPAIGN_COLUMNS, filter
        );
        let mut query = sqlx::query_as::<_, CampaignRow>(&sql);
        if let Some(now) = now {
            query = query.bind(*now.as_datetime());
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(db_error(context))?;
        rows.into_iter().map(DunningCampaign::try_from).collect()
    }

    /// Runs a guarded transition. `update` is the `SET ... WHERE` tail applied
    /// to `subscriptions s` joined to the locked `target t`; `$1` is the id.
    async fn transition(
        &self,
        id: &SubscriptionId,
        update: &str,
        binds: TransitionBinds<'_>,
        context: &str,
    ) -> Result<TransitionOutcome, DomainError> {
        let sql = format!(
            r#"
            WITH target AS (
                SELECT id, status, total_amount_in_cents
                FROM subscriptions
                WHERE id = $1
                FOR UPDATE
            ),
            updated AS (
                UPDATE subscriptions s
                SET {update}
                RETURNING s.status, s.total_amount_in_cents
            )
            SELECT
                t.status AS previous_status,
                t.total_amount_in_cents AS previous_amount_in_cents,
                u.status AS new_status,
                u.total_amount_in_cents AS new_amount_in_cents
            FROM target t
            LEFT JOIN updated u ON TRUE
            "#
        );

        let mut query = sqlx::query_as::<_, TransitionRow>(&sql).bind(id.as_uuid());
        query = match binds {
            TransitionBinds::None => query,
            TransitionBinds::At(at) => query.bind(at.map(|t| *t.as_datetime())),
            TransitionBinds::AtWithReason(at, reason) => {
                query.bind(*at.as_datetime()).bind(reason)
            }
        };

        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error(context))?
            .ok_or_else(|| subscription_not_found(id))?;

        TransitionOutcome::try_from(row)
    }
}

enum TransitionBinds<'a> {
    None,
    At(Option<Timestamp>),
    AtWithReason(Timestamp, &'a str),
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn subscriptions_due_for_cancellation(
        &self,
        now: Timestamp,
    ) -> Result<Vec<Subscription>, DomainError> {
        self.fetch_subscriptions(
            "s.status NOT IN ('canceled', 'expired') AND s.cancel_at <= $1 \
             ORDER BY s.cancel_at, s.id",
            now,
            "query subscriptions due for cancellation",
        )
        .await
    }

    async fn subscriptions_due_for_resumption(
        &self,
        now: Timestamp,
    ) -> Result<Vec<Subscription>, DomainError> {
        self.fetch_subscriptions(
            "s.status = 'paused' AND s.pause_ends_at <= $1 ORDER BY s.pause_ends_at, s.id",
            now,
            "query subscriptions due for resumption",
        )
        .await
    }

    async fn campaigns_needing_final_action(&self) -> Result<Vec<DunningCampaign>, DomainError> {
        self.fetch_campaigns(
            "retry_count >= max_retries AND final_action_taken IS NULL \
             ORDER BY created_at, id",
            None,
            "query campaigns needing final action",
        )
        .await
    }

    async fn campaigns_due_for_retry(
        &self,
        now: Timestamp,
    ) -> Result<Vec<DunningCampaign>, DomainError> {
        self.fetch_campaigns(
            "status = 'active' AND retry_count < max_retries AND next_retry_at <= $1 \
             AND EXISTS (SELECT 1 FROM subscriptions s \
                         WHERE s.id = dunning_campaigns.subscription_id \
                           AND s.status IN ('active', 'past_due')) \
             ORDER BY next_retry_at, id",
            Some(now),
            "query campaigns due for retry",
        )
        .await
    }

    async fn find_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, DomainError> {
        let sql = format!(
            "SELECT {} {} WHERE s.id = $1",
            SUBSCRIPTION_COLUMNS, SUBSCRIPTION_JOINS
        );
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("find subscription"))?;
        row.map(Subscription::try_from).transpose()
    }

    async fn find_delegation(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<DelegationPayload>, DomainError> {
        let payload: Option<String> = sqlx::query_scalar(
            r#"
            SELECT payload FROM delegations
            WHERE subscription_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("find delegation"))?;
        Ok(payload.map(DelegationPayload::new))
    }

    async fn cancel_subscription_immediately(
        &self,
        id: &SubscriptionId,
        now: Timestamp,
    ) -> Result<TransitionOutcome, DomainError> {
        self.transition(
            id,
            r#"status = 'canceled',
                   total_amount_in_cents = 0,
                   canceled_at = $2,
                   pause_ends_at = NULL,
                   updated_at = NOW()
                FROM target t
                WHERE s.id = t.id AND t.status NOT IN ('canceled', 'expired')"#,
            TransitionBinds::At(Some(now)),
            "cancel subscription",
        )
        .await
    }

    async fn resume_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<TransitionOutcome, DomainError> {
        self.transition(
            id,
            r#"status = 'active',
                   pause_ends_at = NULL,
                   updated_at = NOW()
                FROM target t
                WHERE s.id = t.id AND t.status = 'paused'"#,
            TransitionBinds::None,
            "resume subscription",
        )
        .await
    }

    async fn pause_subscription(
        &self,
        id: &SubscriptionId,
        resume_at: Option<Timestamp>,
    ) -> Result<TransitionOutcome, DomainError> {
        self.transition(
            id,
            r#"status = 'paused',
                   pause_ends_at = $2,
                   updated_at = NOW()
                FROM target t
                WHERE s.id = t.id
                  AND (t.status IN ('active', 'past_due')
                       OR (t.status = 'paused' AND $2::timestamptz IS NULL
                           AND s.pause_ends_at IS NOT NULL))"#,
            TransitionBinds::At(resume_at),
            "pause subscription",
        )
        .await
    }

    async fn schedule_subscription_cancellation(
        &self,
        id: &SubscriptionId,
        at: Timestamp,
        reason: &str,
    ) -> Result<TransitionOutcome, DomainError> {
        self.transition(
            id,
            r#"cancel_at = $2,
                   cancel_reason = $3,
                   updated_at = NOW()
                FROM target t
                WHERE s.id = t.id
                  AND t.status NOT IN ('canceled', 'expired')
                  AND (s.cancel_at IS NULL OR s.cancel_at > $2)"#,
            TransitionBinds::AtWithReason(at, reason),
            "schedule subscription cancellation",
        )
        .await
    }

    async fn reactivate_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<TransitionOutcome, DomainError> {
        self.transition(
            id,
            r#"status = 'active',
                   updated_at = NOW()
                FROM target t
                WHERE s.id = t.id AND t.status = 'past_due'"#,
            TransitionBinds::None,
            "reactivate subscription",
        )
        .await
    }

    async fn record_state_change(&self, record: &StateChangeRecord) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO subscription_state_changes (
                id, subscription_id, from_status, to_status,
                from_amount_in_cents, to_amount_in_cents,
                reason, initiated_by, occurred_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.subscription_id.as_uuid())
        .bind(record.from_status.as_str())
        .bind(record.to_status.as_str())
        .bind(record.from_amount_in_cents)
        .bind(record.to_amount_in_cents)
        .bind(&record.reason)
        .bind(record.initiated_by.as_str())
        .bind(record.occurred_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(db_error("record state change"))?;

        Ok(())
    }

    async fn fail_dunning_campaign(
        &self,
        id: &CampaignId,
        action: FinalActionTaken,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE dunning_campaigns SET
                final_action_taken = $2,
                status = 'failed',
                next_retry_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND final_action_taken IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .bind(action.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error("mark dunning campaign failed"))?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        self.ensure_campaign_exists(id).await?;
        Ok(false)
    }

    async fn record_retry_failure(
        &self,
        id: &CampaignId,
        next_retry_at: Timestamp,
        reason: &str,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE dunning_campaigns SET
                retry_count = retry_count + 1,
                next_retry_at = $2,
                last_failure_reason = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id.as_uuid())
        .bind(next_retry_at.as_datetime())
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(db_error("record retry failure"))?;

        if result.rows_affected() == 0 {
            self.ensure_campaign_exists(id).await?;
        }
        Ok(())
    }

    async fn recover_dunning_campaign(&self, id: &CampaignId) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE dunning_campaigns SET
                status = 'recovered',
                next_retry_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(db_error("recover dunning campaign"))?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        self.ensure_campaign_exists(id).await?;
        Ok(false)
    }
}

impl PostgresSubscriptionRepository {
    async fn ensure_campaign_exists(&self, id: &CampaignId) -> Result<(), DomainError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM dunning_campaigns WHERE id = $1)")
                .bind(id.as_uuid())
                .fetch_one(&self.pool)
                .await
                .map_err(db_error("look up dunning campaign"))?;
        if exists {
            Ok(())
        } else {
            Err(campaign_not_found(id))
        }
    }
}
