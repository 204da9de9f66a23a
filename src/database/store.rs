//! Store traits: the coordination surface between stateless request handlers.
//!
//! All cross-request coordination goes through these atomic primitives; the
//! handlers themselves hold no mutable state. Two implementations exist:
//! the sqlx Postgres repositories and [`super::memory::InMemoryStore`] for
//! tests and `SKIP_EXTERNALS` runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::StoreError;
use crate::payments::types::{Allocation, IntentStatus, PaymentChannel, PaymentIntent};

/// Durable record of every payment attempt.
#[async_trait]
pub trait IntentStore: Send + Sync {
    /// Insert a new intent. `StoreError::Duplicate` when the idempotency key
    /// is already taken.
    async fn create(&self, intent: &PaymentIntent) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<PaymentIntent>, StoreError>;

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentIntent>, StoreError>;

    /// Compare-and-swap on the stored status. Returns `false` when the
    /// current status does not match `from` (someone else already resolved
    /// this intent); callers re-fetch instead of erroring blindly.
    async fn transition(
        &self,
        id: Uuid,
        from: IntentStatus,
        to: IntentStatus,
        reason: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// CREATED → AWAITING_PAYMENT together with the allocation or gateway
    /// URL, as one atomic write.
    async fn activate(
        &self,
        id: Uuid,
        allocation: Option<&Allocation>,
        pay_url: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Non-terminal intents whose reservation lapsed before `before`.
    async fn list_expiring(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, StoreError>;

    /// The one non-terminal intent holding `(channel, final_amount)`, if any.
    /// The allocator's uniqueness invariant guarantees at most one.
    async fn find_by_channel_and_amount(
        &self,
        channel: PaymentChannel,
        final_amount: i64,
    ) -> Result<Option<PaymentIntent>, StoreError>;
}

/// Authoritative balance per user, guarded by an optimistic version counter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletBalance {
    pub user_id: Uuid,
    pub balance: i64,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryDirection {
    Credit,
    Debit,
}

impl EntryDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryDirection::Credit => "credit",
            EntryDirection::Debit => "debit",
        }
    }
}

impl std::str::FromStr for EntryDirection {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "credit" => Ok(EntryDirection::Credit),
            "debit" => Ok(EntryDirection::Debit),
            other => Err(format!("unknown entry direction: {}", other)),
        }
    }
}

/// One applied balance movement. `entry_key` is unique: the intent id for
/// credits, the caller's idempotency key for debits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub entry_key: String,
    pub direction: EntryDirection,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(user_id: Uuid, entry_key: String, direction: EntryDirection, amount: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            entry_key,
            direction,
            amount,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of one conditional ledger write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerApplyOutcome {
    Applied { new_balance: i64 },
    /// `entry_key` was already recorded; no funds moved.
    Duplicate { balance: i64 },
    /// The balance version moved underneath us; the caller retries.
    VersionConflict,
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn get_or_create(&self, user_id: Uuid) -> Result<WalletBalance, StoreError>;

    /// Record `entry` and set the balance to `new_balance`, both conditional
    /// on the wallet still being at `expected_version`, in one atomic unit.
    async fn apply_entry(
        &self,
        entry: &LedgerEntry,
        expected_version: i64,
        new_balance: i64,
    ) -> Result<LedgerApplyOutcome, StoreError>;

    /// The entry previously recorded under `entry_key`, if any. Replay
    /// detection for paths that cannot reach `apply_entry`.
    async fn find_entry(&self, entry_key: &str) -> Result<Option<LedgerEntry>, StoreError>;
}

/// The reserved-amount space per channel. This is the one genuinely shared,
/// contended resource; all access goes through these primitives.
#[async_trait]
pub trait AllocationStore: Send + Sync {
    /// Claim `(channel, final_amount)` for `intent_id` until
    /// `reserved_until`. Returns `false` when the slot is taken.
    async fn try_reserve(
        &self,
        channel: PaymentChannel,
        final_amount: i64,
        intent_id: Uuid,
        reserved_until: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn release(&self, channel: PaymentChannel, final_amount: i64)
        -> Result<(), StoreError>;

    /// Drop every reservation past its deadline (crash recovery sweep).
    /// Returns the number released.
    async fn release_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn is_reserved(
        &self,
        channel: PaymentChannel,
        final_amount: i64,
    ) -> Result<bool, StoreError>;
}
