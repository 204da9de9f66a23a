//! In-memory store implementation.
//!
//! Backs the integration tests and `SKIP_EXTERNALS` local runs. A single
//! async mutex around the whole state makes every trait method atomic, which
//! is exactly the contract the Postgres repositories provide per statement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::error::StoreError;
use super::store::{
    AllocationStore, IntentStore, LedgerApplyOutcome, LedgerEntry, WalletBalance, WalletStore,
};
use crate::payments::types::{Allocation, IntentStatus, PaymentChannel, PaymentIntent};

#[derive(Debug, Clone)]
struct ReservationRow {
    intent_id: Uuid,
    reserved_until: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    intents: HashMap<Uuid, PaymentIntent>,
    intents_by_idem: HashMap<String, Uuid>,
    wallets: HashMap<Uuid, WalletBalance>,
    ledger: HashMap<String, LedgerEntry>,
    reservations: HashMap<(PaymentChannel, i64), ReservationRow>,
}

/// Shared-state store; clone the `Arc` freely across handlers and workers.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All ledger entries for a user, insertion order not guaranteed.
    /// Test-support accessor.
    pub async fn ledger_entries(&self, user_id: Uuid) -> Vec<LedgerEntry> {
        let inner = self.inner.lock().await;
        inner
            .ledger
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Count of live reservations. Test-support accessor.
    pub async fn reservation_count(&self) -> usize {
        self.inner.lock().await.reservations.len()
    }

    /// Seed a wallet balance directly. Test-support accessor.
    pub async fn seed_wallet(&self, user_id: Uuid, balance: i64) {
        let mut inner = self.inner.lock().await;
        inner.wallets.insert(
            user_id,
            WalletBalance {
                user_id,
                balance,
                version: 1,
            },
        );
    }
}

#[async_trait]
impl IntentStore for InMemoryStore {
    async fn create(&self, intent: &PaymentIntent) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner
            .intents_by_idem
            .contains_key(&intent.idempotency_key)
        {
            return Err(StoreError::Duplicate {
                entity: "payment_intent",
                key: intent.idempotency_key.clone(),
            });
        }
        inner
            .intents_by_idem
            .insert(intent.idempotency_key.clone(), intent.id);
        inner.intents.insert(intent.id, intent.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentIntent>, StoreError> {
        Ok(self.inner.lock().await.intents.get(&id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .intents_by_idem
            .get(key)
            .and_then(|id| inner.intents.get(id))
            .cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: IntentStatus,
        to: IntentStatus,
        reason: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.intents.get_mut(&id) {
            Some(intent) if intent.status == from => {
                intent.status = to;
                if let Some(reason) = reason {
                    intent.status_reason = Some(reason.to_string());
                }
                intent.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn activate(
        &self,
        id: Uuid,
        allocation: Option<&Allocation>,
        pay_url: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.intents.get_mut(&id) {
            Some(intent) if intent.status == IntentStatus::Created => {
                intent.status = IntentStatus::AwaitingPayment;
                intent.allocation = allocation.copied();
                intent.pay_url = pay_url.map(|u| u.to_string());
                intent.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_expiring(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        let inner = self.inner.lock().await;
        let mut due: Vec<PaymentIntent> = inner
            .intents
            .values()
            .filter(|i| !i.status.is_terminal())
            .filter(|i| matches!(i.allocation, Some(a) if a.reserved_until < before))
            .cloned()
            .collect();
        due.sort_by_key(|i| i.created_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn find_by_channel_and_amount(
        &self,
        channel: PaymentChannel,
        final_amount: i64,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .intents
            .values()
            .find(|i| {
                !i.status.is_terminal()
                    && i.channel == channel
                    && matches!(i.allocation, Some(a) if a.final_amount == final_amount)
            })
            .cloned())
    }
}

#[async_trait]
impl WalletStore for InMemoryStore {
    async fn get_or_create(&self, user_id: Uuid) -> Result<WalletBalance, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(*inner.wallets.entry(user_id).or_insert(WalletBalance {
            user_id,
            balance: 0,
            version: 1,
        }))
    }

    async fn apply_entry(
        &self,
        entry: &LedgerEntry,
        expected_version: i64,
        new_balance: i64,
    ) -> Result<LedgerApplyOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.ledger.get(&entry.entry_key) {
            let balance = inner
                .wallets
                .get(&existing.user_id)
                .map(|w| w.balance)
                .unwrap_or(0);
            return Ok(LedgerApplyOutcome::Duplicate { balance });
        }
        let wallet = inner.wallets.entry(entry.user_id).or_insert(WalletBalance {
            user_id: entry.user_id,
            balance: 0,
            version: 1,
        });
        if wallet.version != expected_version {
            return Ok(LedgerApplyOutcome::VersionConflict);
        }
        wallet.balance = new_balance;
        wallet.version += 1;
        inner.ledger.insert(entry.entry_key.clone(), entry.clone());
        Ok(LedgerApplyOutcome::Applied { new_balance })
    }

    async fn find_entry(&self, entry_key: &str) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self.inner.lock().await.ledger.get(entry_key).cloned())
    }
}

#[async_trait]
impl AllocationStore for InMemoryStore {
    async fn try_reserve(
        &self,
        channel: PaymentChannel,
        final_amount: i64,
        intent_id: Uuid,
        reserved_until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.reservations.entry((channel, final_amount)) {
            std::collections::hash_map::Entry::Occupied(_) => Ok(false),
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(ReservationRow {
                    intent_id,
                    reserved_until,
                });
                Ok(true)
            }
        }
    }

    async fn release(
        &self,
        channel: PaymentChannel,
        final_amount: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.reservations.remove(&(channel, final_amount));
        Ok(())
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let before = inner.reservations.len();
        inner.reservations.retain(|_, row| row.reserved_until >= now);
        Ok((before - inner.reservations.len()) as u64)
    }

    async fn is_reserved(
        &self,
        channel: PaymentChannel,
        final_amount: i64,
    ) -> Result<bool, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.reservations.contains_key(&(channel, final_amount)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::IntentKind;

    fn intent(key: &str) -> PaymentIntent {
        PaymentIntent::new(
            Uuid::new_v4(),
            IntentKind::Topup,
            None,
            50_000,
            PaymentChannel::Manual,
            key.to_string(),
        )
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_rejected() {
        let store = InMemoryStore::new();
        store.create(&intent("k1")).await.unwrap();
        let err = store.create(&intent("k1")).await.unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn transition_is_a_cas_on_status() {
        let store = InMemoryStore::new();
        let i = intent("k2");
        store.create(&i).await.unwrap();

        assert!(store
            .activate(i.id, None, None)
            .await
            .unwrap());
        // Second activation loses the race
        assert!(!store.activate(i.id, None, None).await.unwrap());

        assert!(store
            .transition(
                i.id,
                IntentStatus::AwaitingPayment,
                IntentStatus::Confirmed,
                None
            )
            .await
            .unwrap());
        assert!(!store
            .transition(
                i.id,
                IntentStatus::AwaitingPayment,
                IntentStatus::Confirmed,
                None
            )
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn reservation_slot_is_exclusive() {
        let store = InMemoryStore::new();
        let until = Utc::now() + chrono::Duration::minutes(15);
        assert!(store
            .try_reserve(PaymentChannel::Manual, 50_001, Uuid::new_v4(), until)
            .await
            .unwrap());
        assert!(!store
            .try_reserve(PaymentChannel::Manual, 50_001, Uuid::new_v4(), until)
            .await
            .unwrap());
        // Different channel, same amount is a different slot
        assert!(store
            .try_reserve(PaymentChannel::Bot, 50_001, Uuid::new_v4(), until)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn expired_reservations_are_swept() {
        let store = InMemoryStore::new();
        let past = Utc::now() - chrono::Duration::minutes(1);
        store
            .try_reserve(PaymentChannel::Manual, 7_000, Uuid::new_v4(), past)
            .await
            .unwrap();
        let released = store.release_expired(Utc::now()).await.unwrap();
        assert_eq!(released, 1);
        assert!(!store
            .is_reserved(PaymentChannel::Manual, 7_000)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn apply_entry_detects_duplicates_and_version_conflicts() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let wallet = store.get_or_create(user).await.unwrap();

        let entry = LedgerEntry::new(
            user,
            "credit:abc".to_string(),
            super::super::store::EntryDirection::Credit,
            1_000,
        );
        let outcome = store
            .apply_entry(&entry, wallet.version, wallet.balance + 1_000)
            .await
            .unwrap();
        assert_eq!(outcome, LedgerApplyOutcome::Applied { new_balance: 1_000 });

        // Same entry key again: funds do not move
        let outcome = store.apply_entry(&entry, wallet.version + 1, 9_999).await.unwrap();
        assert_eq!(outcome, LedgerApplyOutcome::Duplicate { balance: 1_000 });

        // Stale version: conflict
        let entry2 = LedgerEntry::new(
            user,
            "credit:def".to_string(),
            super::super::store::EntryDirection::Credit,
            1_000,
        );
        let outcome = store.apply_entry(&entry2, wallet.version, 2_000).await.unwrap();
        assert_eq!(outcome, LedgerApplyOutcome::VersionConflict);
    }
}
