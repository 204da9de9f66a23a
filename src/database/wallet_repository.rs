use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

use super::error::StoreError;
use super::store::{EntryDirection, LedgerApplyOutcome, LedgerEntry, WalletBalance, WalletStore};

#[derive(Debug, Clone, FromRow)]
struct WalletRow {
    user_id: Uuid,
    balance: i64,
    version: i64,
}

#[derive(Debug, Clone, FromRow)]
struct EntryRow {
    id: Uuid,
    user_id: Uuid,
    entry_key: String,
    direction: String,
    amount: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            id: row.id,
            user_id: row.user_id,
            entry_key: row.entry_key,
            direction: EntryDirection::from_str(&row.direction).map_err(StoreError::decode)?,
            amount: row.amount,
            created_at: row.created_at,
        })
    }
}

impl From<WalletRow> for WalletBalance {
    fn from(row: WalletRow) -> Self {
        WalletBalance {
            user_id: row.user_id,
            balance: row.balance,
            version: row.version,
        }
    }
}

/// sqlx-backed [`WalletStore`].
#[derive(Clone)]
pub struct WalletRepository {
    pool: PgPool,
}

impl WalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WalletStore for WalletRepository {
    async fn get_or_create(&self, user_id: Uuid) -> Result<WalletBalance, StoreError> {
        let row = sqlx::query_as::<_, WalletRow>(
            "INSERT INTO wallet_balances (user_id, balance, version) \
             VALUES ($1, 0, 1) \
             ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id \
             RETURNING user_id, balance, version",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(row.into())
    }

    async fn apply_entry(
        &self,
        entry: &LedgerEntry,
        expected_version: i64,
        new_balance: i64,
    ) -> Result<LedgerApplyOutcome, StoreError> {
        // Entry insert and balance update commit together or not at all;
        // the version predicate on the UPDATE is the optimistic lock.
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        let inserted = sqlx::query(
            "INSERT INTO ledger_entries (id, user_id, entry_key, direction, amount, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (entry_key) DO NOTHING",
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(&entry.entry_key)
        .bind(entry.direction.as_str())
        .bind(entry.amount)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await.map_err(StoreError::from_sqlx)?;
            let balance: (i64,) =
                sqlx::query_as("SELECT balance FROM wallet_balances WHERE user_id = $1")
                    .bind(entry.user_id)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(StoreError::from_sqlx)?;
            return Ok(LedgerApplyOutcome::Duplicate { balance: balance.0 });
        }

        let updated = sqlx::query(
            "UPDATE wallet_balances \
             SET balance = $2, version = version + 1 \
             WHERE user_id = $1 AND version = $3",
        )
        .bind(entry.user_id)
        .bind(new_balance)
        .bind(expected_version)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(StoreError::from_sqlx)?;
            return Ok(LedgerApplyOutcome::VersionConflict);
        }

        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(LedgerApplyOutcome::Applied { new_balance })
    }

    async fn find_entry(&self, entry_key: &str) -> Result<Option<LedgerEntry>, StoreError> {
        sqlx::query_as::<_, EntryRow>(
            "SELECT id, user_id, entry_key, direction, amount, created_at \
             FROM ledger_entries WHERE entry_key = $1",
        )
        .bind(entry_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?
        .map(LedgerEntry::try_from)
        .transpose()
    }
}
