//! Unique-amount allocation.
//!
//! Reference-less channels (MANUAL, BOT) identify a payer only by the exact
//! amount transferred, so at most one live intent per channel may hold any
//! given final amount. The allocator perturbs the base amount by the smallest
//! free `unique_add` in `0..=max_unique_add` and holds the slot for the
//! reservation TTL.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::database::store::AllocationStore;
use crate::error::{AppError, AppResult};
use crate::payments::types::{Allocation, PaymentChannel};

pub struct AmountAllocator {
    store: Arc<dyn AllocationStore>,
    max_unique_add: i64,
    reservation_ttl: ChronoDuration,
}

impl AmountAllocator {
    pub fn new(
        store: Arc<dyn AllocationStore>,
        max_unique_add: i64,
        reservation_ttl: std::time::Duration,
    ) -> Self {
        Self {
            store,
            max_unique_add,
            reservation_ttl: ChronoDuration::seconds(reservation_ttl.as_secs() as i64),
        }
    }

    /// Reserve the smallest free `base_amount + unique_add` on `channel`.
    ///
    /// Each candidate is claimed with an atomic insert, so concurrent callers
    /// never end up holding the same amount; the loser simply probes the next
    /// candidate. Exhausting the whole range maps to a 503.
    pub async fn reserve(
        &self,
        channel: PaymentChannel,
        base_amount: i64,
        intent_id: Uuid,
    ) -> AppResult<Allocation> {
        let reserved_until = Utc::now() + self.reservation_ttl;

        for unique_add in 0..=self.max_unique_add {
            let final_amount = base_amount + unique_add;
            let claimed = self
                .store
                .try_reserve(channel, final_amount, intent_id, reserved_until)
                .await?;
            if claimed {
                debug!(
                    channel = %channel,
                    final_amount,
                    unique_add,
                    %intent_id,
                    "reserved unique amount"
                );
                return Ok(Allocation {
                    final_amount,
                    unique_add,
                    reserved_until,
                });
            }
        }

        Err(AppError::allocation_exhausted(channel, base_amount))
    }

    pub async fn release(&self, channel: PaymentChannel, final_amount: i64) -> AppResult<()> {
        self.store.release(channel, final_amount).await?;
        Ok(())
    }

    /// Drop reservations past their deadline. Returns the number released.
    pub async fn sweep_expired(&self) -> AppResult<u64> {
        let released = self.store.release_expired(Utc::now()).await?;
        Ok(released)
    }
}
