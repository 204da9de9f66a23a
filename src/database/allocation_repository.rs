use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::error::StoreError;
use super::store::AllocationStore;
use crate::payments::types::PaymentChannel;

/// sqlx-backed [`AllocationStore`].
///
/// The `(channel, final_amount)` primary key on `allocation_reservations` is
/// what enforces amount uniqueness; `ON CONFLICT DO NOTHING` turns the race
/// into a clean lost-the-slot signal.
#[derive(Clone)]
pub struct AllocationRepository {
    pool: PgPool,
}

impl AllocationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AllocationStore for AllocationRepository {
    async fn try_reserve(
        &self,
        channel: PaymentChannel,
        final_amount: i64,
        intent_id: Uuid,
        reserved_until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO allocation_reservations (channel, final_amount, intent_id, reserved_until) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (channel, final_amount) DO NOTHING",
        )
        .bind(channel.as_str())
        .bind(final_amount)
        .bind(intent_id)
        .bind(reserved_until)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(
        &self,
        channel: PaymentChannel,
        final_amount: i64,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM allocation_reservations WHERE channel = $1 AND final_amount = $2")
            .bind(channel.as_str())
            .bind(final_amount)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM allocation_reservations WHERE reserved_until < $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn is_reserved(
        &self,
        channel: PaymentChannel,
        final_amount: i64,
    ) -> Result<bool, StoreError> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT intent_id FROM allocation_reservations WHERE channel = $1 AND final_amount = $2",
        )
        .bind(channel.as_str())
        .bind(final_amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(row.is_some())
    }
}
