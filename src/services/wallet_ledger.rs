//! Wallet ledger.
//!
//! Every balance movement is a ledger entry with a unique `entry_key`, so a
//! replayed credit or debit is detected at the store and no funds move twice.
//! Balance updates use optimistic versioning with a bounded retry loop.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::store::{
    EntryDirection, LedgerApplyOutcome, LedgerEntry, WalletBalance, WalletStore,
};
use crate::error::{AppError, AppResult};

const MAX_CAS_ATTEMPTS: usize = 5;

pub struct WalletLedger {
    store: Arc<dyn WalletStore>,
}

/// Result of a credit or debit, with replay marked explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerResult {
    pub balance: i64,
    pub replayed: bool,
}

impl WalletLedger {
    pub fn new(store: Arc<dyn WalletStore>) -> Self {
        Self { store }
    }

    pub async fn balance(&self, user_id: Uuid) -> AppResult<WalletBalance> {
        Ok(self.store.get_or_create(user_id).await?)
    }

    /// Credit `amount` under `entry_key`. Idempotent per key.
    pub async fn credit(
        &self,
        user_id: Uuid,
        amount: i64,
        entry_key: &str,
    ) -> AppResult<LedgerResult> {
        self.apply(user_id, amount, entry_key, EntryDirection::Credit)
            .await
    }

    /// Debit `amount` under `entry_key`. Fails with INSUFFICIENT_FUNDS when
    /// the balance cannot cover it; idempotent per key.
    pub async fn debit(
        &self,
        user_id: Uuid,
        amount: i64,
        entry_key: &str,
    ) -> AppResult<LedgerResult> {
        self.apply(user_id, amount, entry_key, EntryDirection::Debit)
            .await
    }

    async fn apply(
        &self,
        user_id: Uuid,
        amount: i64,
        entry_key: &str,
        direction: EntryDirection,
    ) -> AppResult<LedgerResult> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let wallet = self.store.get_or_create(user_id).await?;

            // The balance check re-runs on every attempt against the freshly
            // read balance, so a concurrent debit cannot sneak us negative.
            let new_balance = match direction {
                EntryDirection::Credit => wallet.balance + amount,
                EntryDirection::Debit => {
                    if wallet.balance < amount {
                        // The balance may be low precisely because this debit
                        // already landed; a replay must not be refused.
                        if self.store.find_entry(entry_key).await?.is_some() {
                            return Ok(LedgerResult {
                                balance: wallet.balance,
                                replayed: true,
                            });
                        }
                        return Err(AppError::insufficient_funds(wallet.balance, amount));
                    }
                    wallet.balance - amount
                }
            };

            let entry = LedgerEntry::new(user_id, entry_key.to_string(), direction, amount);
            match self
                .store
                .apply_entry(&entry, wallet.version, new_balance)
                .await?
            {
                LedgerApplyOutcome::Applied { new_balance } => {
                    info!(
                        %user_id,
                        entry_key,
                        direction = direction.as_str(),
                        amount,
                        new_balance,
                        "ledger entry applied"
                    );
                    return Ok(LedgerResult {
                        balance: new_balance,
                        replayed: false,
                    });
                }
                LedgerApplyOutcome::Duplicate { balance } => {
                    return Ok(LedgerResult {
                        balance,
                        replayed: true,
                    });
                }
                LedgerApplyOutcome::VersionConflict => {
                    warn!(%user_id, entry_key, attempt, "wallet version conflict, retrying");
                }
            }
        }

        Err(AppError::internal(format!(
            "wallet {} contended beyond {} attempts for entry {}",
            user_id, MAX_CAS_ATTEMPTS, entry_key
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryStore;

    #[tokio::test]
    async fn credit_then_debit_moves_the_balance() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = WalletLedger::new(store.clone());
        let user = Uuid::new_v4();

        let credited = ledger.credit(user, 50_000, "credit:a").await.unwrap();
        assert_eq!(credited.balance, 50_000);
        assert!(!credited.replayed);

        let debited = ledger.debit(user, 30_000, "debit:b").await.unwrap();
        assert_eq!(debited.balance, 20_000);
    }

    #[tokio::test]
    async fn replayed_credit_does_not_double_fund() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = WalletLedger::new(store.clone());
        let user = Uuid::new_v4();

        ledger.credit(user, 10_000, "credit:x").await.unwrap();
        let replay = ledger.credit(user, 10_000, "credit:x").await.unwrap();
        assert!(replay.replayed);
        assert_eq!(replay.balance, 10_000);
        assert_eq!(ledger.balance(user).await.unwrap().balance, 10_000);
    }

    #[tokio::test]
    async fn replayed_debit_is_honored_even_below_the_amount() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = WalletLedger::new(store.clone());
        let user = Uuid::new_v4();

        ledger.credit(user, 100_000, "credit:seed").await.unwrap();
        let debited = ledger.debit(user, 60_000, "debit:buy").await.unwrap();
        assert_eq!(debited.balance, 40_000);

        // The remaining 40_000 cannot cover a fresh 60_000 debit, but this
        // key already landed; the replay reports the balance unchanged.
        let replay = ledger.debit(user, 60_000, "debit:buy").await.unwrap();
        assert!(replay.replayed);
        assert_eq!(replay.balance, 40_000);
        assert_eq!(ledger.balance(user).await.unwrap().balance, 40_000);
    }

    #[tokio::test]
    async fn overdraft_is_refused_with_402() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = WalletLedger::new(store.clone());
        let user = Uuid::new_v4();

        ledger.credit(user, 1_000, "credit:seed").await.unwrap();
        let err = ledger.debit(user, 5_000, "debit:big").await.unwrap_err();
        assert_eq!(err.status_code(), 402);
        // The failed debit wrote nothing
        assert_eq!(ledger.balance(user).await.unwrap().balance, 1_000);
    }

    #[tokio::test]
    async fn concurrent_credits_all_land_exactly_once() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = Arc::new(WalletLedger::new(store.clone()));
        let user = Uuid::new_v4();

        // 6 writers: each can lose the version race at most 5 times, which
        // stays within the retry budget even under the worst interleaving.
        let mut handles = Vec::new();
        for i in 0..6 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.credit(user, 100, &format!("credit:{i}")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(ledger.balance(user).await.unwrap().balance, 600);
    }
}
