use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

use super::error::StoreError;
use super::store::IntentStore;
use crate::payments::types::{Allocation, IntentKind, IntentStatus, PaymentChannel, PaymentIntent};

const INTENT_COLUMNS: &str = "id, user_id, kind, reference_id, requested_amount, channel, \
     final_amount, unique_add, reserved_until, status, pay_url, status_reason, \
     idempotency_key, created_at, updated_at";

/// Raw `payment_intents` row; enums travel as TEXT and the allocation is
/// flattened into three nullable columns.
#[derive(Debug, Clone, FromRow)]
struct IntentRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    reference_id: Option<String>,
    requested_amount: i64,
    channel: String,
    final_amount: Option<i64>,
    unique_add: Option<i64>,
    reserved_until: Option<DateTime<Utc>>,
    status: String,
    pay_url: Option<String>,
    status_reason: Option<String>,
    idempotency_key: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<IntentRow> for PaymentIntent {
    type Error = StoreError;

    fn try_from(row: IntentRow) -> Result<Self, Self::Error> {
        let allocation = match (row.final_amount, row.unique_add, row.reserved_until) {
            (Some(final_amount), Some(unique_add), Some(reserved_until)) => Some(Allocation {
                final_amount,
                unique_add,
                reserved_until,
            }),
            (None, None, None) => None,
            _ => {
                return Err(StoreError::decode(format!(
                    "intent {} has a partial allocation",
                    row.id
                )))
            }
        };
        Ok(PaymentIntent {
            id: row.id,
            user_id: row.user_id,
            kind: IntentKind::from_str(&row.kind)
                .map_err(|_| StoreError::decode(format!("unknown intent kind: {}", row.kind)))?,
            reference_id: row.reference_id,
            requested_amount: row.requested_amount,
            channel: PaymentChannel::from_str(&row.channel).map_err(StoreError::decode)?,
            allocation,
            status: IntentStatus::from_str(&row.status).map_err(StoreError::decode)?,
            pay_url: row.pay_url,
            status_reason: row.status_reason,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// sqlx-backed [`IntentStore`].
#[derive(Clone)]
pub struct IntentRepository {
    pool: PgPool,
}

impl IntentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_optional(
        &self,
        query: sqlx::query::QueryAs<'_, sqlx::Postgres, IntentRow, sqlx::postgres::PgArguments>,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        query
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?
            .map(PaymentIntent::try_from)
            .transpose()
    }
}

#[async_trait]
impl IntentStore for IntentRepository {
    async fn create(&self, intent: &PaymentIntent) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO payment_intents \
             (id, user_id, kind, reference_id, requested_amount, channel, status, \
              status_reason, idempotency_key, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(intent.id)
        .bind(intent.user_id)
        .bind(intent.kind.as_str())
        .bind(&intent.reference_id)
        .bind(intent.requested_amount)
        .bind(intent.channel.as_str())
        .bind(intent.status.as_str())
        .bind(&intent.status_reason)
        .bind(&intent.idempotency_key)
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentIntent>, StoreError> {
        self.fetch_optional(
            sqlx::query_as::<_, IntentRow>(&format!(
                "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE id = $1"
            ))
            .bind(id),
        )
        .await
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        self.fetch_optional(
            sqlx::query_as::<_, IntentRow>(&format!(
                "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE idempotency_key = $1"
            ))
            .bind(key),
        )
        .await
    }

    async fn transition(
        &self,
        id: Uuid,
        from: IntentStatus,
        to: IntentStatus,
        reason: Option<&str>,
    ) -> Result<bool, StoreError> {
        // The WHERE clause on the current status makes this a CAS; a zero
        // row count means another writer resolved the intent first.
        let result = sqlx::query(
            "UPDATE payment_intents \
             SET status = $3, status_reason = COALESCE($4, status_reason), updated_at = NOW() \
             WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn activate(
        &self,
        id: Uuid,
        allocation: Option<&Allocation>,
        pay_url: Option<&str>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE payment_intents \
             SET status = 'AWAITING_PAYMENT', final_amount = $2, unique_add = $3, \
                 reserved_until = $4, pay_url = $5, updated_at = NOW() \
             WHERE id = $1 AND status = 'CREATED'",
        )
        .bind(id)
        .bind(allocation.map(|a| a.final_amount))
        .bind(allocation.map(|a| a.unique_add))
        .bind(allocation.map(|a| a.reserved_until))
        .bind(pay_url)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_expiring(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        let rows = sqlx::query_as::<_, IntentRow>(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents \
             WHERE status IN ('AWAITING_PAYMENT', 'PENDING_REVIEW') \
               AND reserved_until IS NOT NULL AND reserved_until < $1 \
             ORDER BY reserved_until ASC \
             LIMIT $2"
        ))
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        rows.into_iter().map(PaymentIntent::try_from).collect()
    }

    async fn find_by_channel_and_amount(
        &self,
        channel: PaymentChannel,
        final_amount: i64,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        self.fetch_optional(
            sqlx::query_as::<_, IntentRow>(&format!(
                "SELECT {INTENT_COLUMNS} FROM payment_intents \
                 WHERE channel = $1 AND final_amount = $2 \
                   AND status NOT IN ('CONFIRMED', 'EXPIRED', 'FAILED', 'CANCELLED') \
                 LIMIT 1"
            ))
            .bind(channel.as_str())
            .bind(final_amount),
        )
        .await
    }
}
