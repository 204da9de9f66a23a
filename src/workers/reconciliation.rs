//! Reconciliation worker.
//!
//! Two jobs on a fixed interval: expire intents whose reservation lapsed, and
//! release orphaned amount reservations (crash recovery). The same
//! `Reconciler` also serves the inbound-transfer signal, matching a parsed
//! bank transfer to the one live intent holding that exact amount.
//!
//! Every mutation goes through the orchestrator's CAS transitions, so running
//! several instances concurrently only produces harmless lost races.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::database::store::IntentStore;
use crate::error::{AppError, AppResult};
use crate::payments::types::{PaymentChannel, PaymentIntent};
use crate::services::{AmountAllocator, PaymentOrchestrator};

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// How often the worker wakes up.
    pub sweep_interval: Duration,
    /// Maximum number of expirable intents processed per cycle.
    pub batch_size: i64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            batch_size: 200,
        }
    }
}

impl ReconciliationConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.sweep_interval = Duration::from_secs(
            std::env::var("RECONCILIATION_SWEEP_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.sweep_interval.as_secs()),
        );
        cfg.batch_size = std::env::var("RECONCILIATION_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg
    }
}

/// Matching and sweeping logic, shared by the worker and the
/// `/internal/transfers` endpoint.
pub struct Reconciler {
    intents: Arc<dyn IntentStore>,
    allocator: Arc<AmountAllocator>,
    orchestrator: Arc<PaymentOrchestrator>,
}

impl Reconciler {
    pub fn new(
        intents: Arc<dyn IntentStore>,
        allocator: Arc<AmountAllocator>,
        orchestrator: Arc<PaymentOrchestrator>,
    ) -> Self {
        Self {
            intents,
            allocator,
            orchestrator,
        }
    }

    /// Match an inbound transfer of exactly `amount` on `channel` to its
    /// owning live intent and confirm it. The allocator's uniqueness
    /// invariant guarantees at most one candidate.
    pub async fn match_transfer(
        &self,
        channel: PaymentChannel,
        amount: i64,
    ) -> AppResult<PaymentIntent> {
        let intent = self
            .intents
            .find_by_channel_and_amount(channel, amount)
            .await?
            .ok_or_else(|| {
                AppError::intent_not_found(format!("{channel}:{amount}"))
                    .with_context("no live intent holds this amount")
            })?;

        info!(
            intent_id = %intent.id,
            channel = %channel,
            final_amount = amount,
            "inbound transfer matched"
        );
        self.orchestrator.confirm(intent.id).await
    }

    /// One sweep pass. Returns (intents expired, reservations released).
    pub async fn sweep(&self, batch_size: i64) -> AppResult<(u64, u64)> {
        let now = Utc::now();
        let mut expired = 0u64;

        let due = self.intents.list_expiring(now, batch_size).await?;
        for intent in due {
            match self.orchestrator.expire(&intent).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(intent_id = %intent.id, error = %e, "failed to expire intent");
                }
            }
        }

        // Orphan cleanup: reservations whose intent write never landed, or
        // whose release was lost to a crash.
        let released = self.allocator.sweep_expired().await?;
        Ok((expired, released))
    }
}

pub struct ReconciliationWorker {
    reconciler: Arc<Reconciler>,
    config: ReconciliationConfig,
}

impl ReconciliationWorker {
    pub fn new(reconciler: Arc<Reconciler>, config: ReconciliationConfig) -> Self {
        Self { reconciler, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            batch_size = self.config.batch_size,
            "reconciliation worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("reconciliation worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.sweep_interval) => {
                    match self.reconciler.sweep(self.config.batch_size).await {
                        Ok((expired, released)) => {
                            if expired > 0 || released > 0 {
                                info!(expired, released, "reconciliation sweep completed");
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "reconciliation sweep failed");
                        }
                    }
                }
            }
        }

        info!("reconciliation worker stopped");
    }
}
