//! Payment orchestrator.
//!
//! Owns the intent state machine. Handlers are stateless; every coordination
//! point (idempotency, status CAS, amount reservation, ledger entry) is an
//! atomic store primitive, so any number of orchestrator instances can run
//! against the same store.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::store::IntentStore;
use crate::error::{AppError, AppResult, ValidationError};
use crate::payments::router::ProviderRouter;
use crate::payments::types::{IntentKind, IntentStatus, PaymentIntent, ProviderInstructions};
use crate::services::amount_allocator::AmountAllocator;
use crate::services::wallet_ledger::WalletLedger;

#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub user_id: Uuid,
    pub kind: IntentKind,
    pub reference_id: Option<String>,
    pub amount: i64,
    pub method: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone)]
pub struct InitiateOutcome {
    pub intent: PaymentIntent,
    /// Absent when the intent never activated (e.g. a replayed initiate
    /// whose gateway order failed).
    pub instructions: Option<ProviderInstructions>,
    /// True when the idempotency key matched an existing intent.
    pub replayed: bool,
}

pub struct PaymentOrchestrator {
    intents: Arc<dyn IntentStore>,
    allocator: Arc<AmountAllocator>,
    ledger: Arc<WalletLedger>,
    router: Arc<ProviderRouter>,
    min_reject_reason_len: usize,
}

impl PaymentOrchestrator {
    pub fn new(
        intents: Arc<dyn IntentStore>,
        allocator: Arc<AmountAllocator>,
        ledger: Arc<WalletLedger>,
        router: Arc<ProviderRouter>,
        min_reject_reason_len: usize,
    ) -> Self {
        Self {
            intents,
            allocator,
            ledger,
            router,
            min_reject_reason_len,
        }
    }

    /// Create (or replay) a payment intent and hand back its instructions.
    pub async fn initiate(&self, request: InitiateRequest) -> AppResult<InitiateOutcome> {
        self.validate_initiate(&request)?;

        if let Some(existing) = self
            .intents
            .find_by_idempotency_key(&request.idempotency_key)
            .await?
        {
            return self.replay(existing).await;
        }

        let channel = self.router.resolve_channel(request.method.as_deref())?;
        let intent = PaymentIntent::new(
            request.user_id,
            request.kind,
            request.reference_id.clone(),
            request.amount,
            channel,
            request.idempotency_key.clone(),
        );

        if let Err(err) = self.intents.create(&intent).await {
            // Two initiates raced on the same key; the winner's intent is
            // authoritative.
            if err.is_duplicate() {
                if let Some(existing) = self
                    .intents
                    .find_by_idempotency_key(&request.idempotency_key)
                    .await?
                {
                    return self.replay(existing).await;
                }
            }
            return Err(err.into());
        }

        let activated = if channel.requires_allocation() {
            let allocation = match self
                .allocator
                .reserve(channel, intent.requested_amount, intent.id)
                .await
            {
                Ok(allocation) => allocation,
                Err(err) => {
                    // Nothing is held; park the intent as FAILED so its key
                    // cannot replay into a dead CREATED intent, and surface
                    // the (retryable) allocation error for a fresh attempt.
                    let _ = self
                        .intents
                        .transition(
                            intent.id,
                            IntentStatus::Created,
                            IntentStatus::Failed,
                            Some("amount allocation failed"),
                        )
                        .await?;
                    warn!(intent_id = %intent.id, error = %err, "amount allocation failed");
                    return Err(err);
                }
            };
            match self
                .intents
                .activate(intent.id, Some(&allocation), None)
                .await
            {
                Ok(true) => true,
                Ok(false) => {
                    self.allocator
                        .release(channel, allocation.final_amount)
                        .await?;
                    false
                }
                Err(err) => {
                    // A reservation must never outlive a failed intent write.
                    self.allocator
                        .release(channel, allocation.final_amount)
                        .await?;
                    return Err(err.into());
                }
            }
        } else {
            match self.router.create_gateway_order(&intent).await {
                Ok(pay_url) => {
                    self.intents
                        .activate(intent.id, None, Some(&pay_url))
                        .await?
                }
                Err(err) => {
                    // No reservation and no funds are in play; park the
                    // intent as FAILED and surface the gateway error.
                    let _ = self
                        .intents
                        .transition(
                            intent.id,
                            IntentStatus::Created,
                            IntentStatus::Failed,
                            Some("gateway order creation failed"),
                        )
                        .await?;
                    warn!(intent_id = %intent.id, error = %err, "gateway order creation failed");
                    return Err(err);
                }
            }
        };

        if !activated {
            // Lost a CAS on a freshly created intent: something else already
            // resolved it between create and activate.
            let current = self.require(intent.id).await?;
            return Err(AppError::stale_transition(
                intent.id.to_string(),
                current.status.to_string(),
            ));
        }

        let intent = self.require(intent.id).await?;
        let instructions = self.router.build_instructions(&intent)?;
        info!(
            intent_id = %intent.id,
            channel = %intent.channel,
            amount = intent.requested_amount,
            final_amount = intent.payable_amount(),
            "payment intent initiated"
        );
        Ok(InitiateOutcome {
            intent,
            instructions: Some(instructions),
            replayed: false,
        })
    }

    /// Fetch an intent, lazily expiring it when its reservation has lapsed,
    /// so clients never observe a stale countdown.
    pub async fn get(&self, intent_id: Uuid) -> AppResult<PaymentIntent> {
        let intent = self.require(intent_id).await?;
        if let Some(allocation) = intent.allocation {
            let expirable = matches!(
                intent.status,
                IntentStatus::AwaitingPayment | IntentStatus::PendingReview
            );
            if expirable && allocation.reserved_until < chrono::Utc::now() {
                self.expire(&intent).await?;
                return self.require(intent_id).await;
            }
        }
        Ok(intent)
    }

    /// Payer claims the transfer was sent (MANUAL/BOT only).
    pub async fn mark_paid(&self, intent_id: Uuid) -> AppResult<PaymentIntent> {
        let intent = self.get(intent_id).await?;
        if !intent.channel.requires_allocation() {
            return Err(AppError::validation(ValidationError::ChannelMismatch {
                intent_id: intent_id.to_string(),
                channel: intent.channel.to_string(),
            }));
        }
        let moved = self
            .intents
            .transition(
                intent_id,
                IntentStatus::AwaitingPayment,
                IntentStatus::PendingReview,
                None,
            )
            .await?;
        if !moved {
            let current = self.require(intent_id).await?;
            return Err(AppError::stale_transition(
                intent_id.to_string(),
                current.status.to_string(),
            ));
        }
        self.require(intent_id).await
    }

    /// Settle an intent. Idempotent: confirming a CONFIRMED intent returns
    /// it unchanged, and the ledger's entry key blocks any second credit.
    pub async fn confirm(&self, intent_id: Uuid) -> AppResult<PaymentIntent> {
        let intent = self.require(intent_id).await?;

        if intent.status == IntentStatus::Confirmed {
            // Replay. Settlement effects are idempotent, so re-running them
            // also repairs a crash that landed between the CAS and the
            // credit.
            return self.settle(intent).await;
        }

        let expirable = matches!(
            intent.status,
            IntentStatus::AwaitingPayment | IntentStatus::PendingReview
        );
        if !expirable {
            return Err(AppError::stale_transition(
                intent_id.to_string(),
                intent.status.to_string(),
            ));
        }

        let moved = self
            .intents
            .transition(intent_id, intent.status, IntentStatus::Confirmed, None)
            .await?;
        if !moved {
            let current = self.require(intent_id).await?;
            if current.status == IntentStatus::Confirmed {
                return self.settle(current).await;
            }
            return Err(AppError::stale_transition(
                intent_id.to_string(),
                current.status.to_string(),
            ));
        }

        let intent = self.require(intent_id).await?;
        self.settle(intent).await
    }

    /// Post-confirmation effects: credit the wallet for top-ups and release
    /// the amount slot. Both idempotent.
    async fn settle(&self, intent: PaymentIntent) -> AppResult<PaymentIntent> {
        if intent.kind == IntentKind::Topup {
            // The payer transferred final_amount; the wallet is credited the
            // requested amount. The surcharge is matching metadata only.
            let entry_key = format!("credit:{}", intent.id);
            let result = self
                .ledger
                .credit(intent.user_id, intent.requested_amount, &entry_key)
                .await?;
            if !result.replayed {
                info!(
                    intent_id = %intent.id,
                    user_id = %intent.user_id,
                    amount = intent.requested_amount,
                    balance = result.balance,
                    "wallet credited"
                );
            }
        }
        if let Some(allocation) = intent.allocation {
            self.allocator
                .release(intent.channel, allocation.final_amount)
                .await?;
        }
        Ok(intent)
    }

    /// Admin approval of a PENDING_REVIEW intent.
    pub async fn approve(&self, intent_id: Uuid) -> AppResult<PaymentIntent> {
        let intent = self.require(intent_id).await?;
        if intent.status != IntentStatus::PendingReview
            && intent.status != IntentStatus::Confirmed
        {
            return Err(AppError::stale_transition(
                intent_id.to_string(),
                intent.status.to_string(),
            ));
        }
        self.confirm(intent_id).await
    }

    /// Admin rejection. The reason is validated before any state is read,
    /// so a short reason changes nothing.
    pub async fn reject(&self, intent_id: Uuid, reason: &str) -> AppResult<PaymentIntent> {
        let trimmed = reason.trim();
        if trimmed.chars().count() < self.min_reject_reason_len {
            return Err(AppError::validation(ValidationError::ReasonTooShort {
                min_len: self.min_reject_reason_len,
                actual: trimmed.chars().count(),
            }));
        }

        let intent = self.require(intent_id).await?;
        let moved = self
            .intents
            .transition(
                intent_id,
                IntentStatus::PendingReview,
                IntentStatus::Failed,
                Some(trimmed),
            )
            .await?;
        if !moved {
            let current = self.require(intent_id).await?;
            return Err(AppError::stale_transition(
                intent_id.to_string(),
                current.status.to_string(),
            ));
        }
        if let Some(allocation) = intent.allocation {
            self.allocator
                .release(intent.channel, allocation.final_amount)
                .await?;
        }
        info!(intent_id = %intent_id, "payment rejected");
        self.require(intent_id).await
    }

    /// User cancellation from any non-terminal state.
    pub async fn cancel(&self, intent_id: Uuid) -> AppResult<PaymentIntent> {
        let intent = self.require(intent_id).await?;
        if intent.status.is_terminal() {
            return Err(AppError::stale_transition(
                intent_id.to_string(),
                intent.status.to_string(),
            ));
        }
        let moved = self
            .intents
            .transition(intent_id, intent.status, IntentStatus::Cancelled, None)
            .await?;
        if !moved {
            let current = self.require(intent_id).await?;
            return Err(AppError::stale_transition(
                intent_id.to_string(),
                current.status.to_string(),
            ));
        }
        if let Some(allocation) = intent.allocation {
            self.allocator
                .release(intent.channel, allocation.final_amount)
                .await?;
        }
        info!(intent_id = %intent_id, "payment cancelled");
        self.require(intent_id).await
    }

    /// Gateway-reported failure (webhook path). Idempotent on terminal
    /// intents.
    pub async fn fail(&self, intent_id: Uuid, reason: &str) -> AppResult<PaymentIntent> {
        let intent = self.require(intent_id).await?;
        if intent.status.is_terminal() {
            return Ok(intent);
        }
        let moved = self
            .intents
            .transition(intent_id, intent.status, IntentStatus::Failed, Some(reason))
            .await?;
        if moved {
            if let Some(allocation) = intent.allocation {
                self.allocator
                    .release(intent.channel, allocation.final_amount)
                    .await?;
            }
        }
        self.require(intent_id).await
    }

    /// Expire a lapsed intent; a lost CAS means someone else resolved it
    /// first, which is fine.
    pub async fn expire(&self, intent: &PaymentIntent) -> AppResult<bool> {
        let expirable = matches!(
            intent.status,
            IntentStatus::AwaitingPayment | IntentStatus::PendingReview
        );
        if !expirable {
            return Ok(false);
        }
        let moved = self
            .intents
            .transition(
                intent.id,
                intent.status,
                IntentStatus::Expired,
                Some("reservation expired"),
            )
            .await?;
        if moved {
            if let Some(allocation) = intent.allocation {
                self.allocator
                    .release(intent.channel, allocation.final_amount)
                    .await?;
            }
            info!(intent_id = %intent.id, "payment intent expired");
        }
        Ok(moved)
    }

    /// Direct wallet purchase: debit the balance under the caller's
    /// idempotency key. No intent is created; the ledger entry is the record.
    pub async fn purchase_with_balance(
        &self,
        user_id: Uuid,
        amount: i64,
        idempotency_key: &str,
    ) -> AppResult<i64> {
        if amount <= 0 {
            return Err(AppError::validation(ValidationError::InvalidAmount {
                amount,
                reason: "amount must be positive".to_string(),
            }));
        }
        if idempotency_key.trim().is_empty() {
            return Err(AppError::missing_field("idempotency_key"));
        }
        let entry_key = format!("debit:{}", idempotency_key);
        let result = self.ledger.debit(user_id, amount, &entry_key).await?;
        Ok(result.balance)
    }

    pub async fn wallet_balance(&self, user_id: Uuid) -> AppResult<i64> {
        Ok(self.ledger.balance(user_id).await?.balance)
    }

    async fn replay(&self, existing: PaymentIntent) -> AppResult<InitiateOutcome> {
        // Replays surface the live view, including lazy expiry.
        let intent = self.get(existing.id).await?;
        let instructions = if intent.allocation.is_some() || intent.pay_url.is_some() {
            Some(self.router.build_instructions(&intent)?)
        } else {
            None
        };
        Ok(InitiateOutcome {
            intent,
            instructions,
            replayed: true,
        })
    }

    fn validate_initiate(&self, request: &InitiateRequest) -> AppResult<()> {
        if request.amount <= 0 {
            return Err(AppError::validation(ValidationError::InvalidAmount {
                amount: request.amount,
                reason: "amount must be positive".to_string(),
            }));
        }
        if request.idempotency_key.trim().is_empty() {
            return Err(AppError::missing_field("idempotency_key"));
        }
        if request.kind.requires_reference()
            && request
                .reference_id
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .is_none()
        {
            return Err(AppError::missing_field("reference_id"));
        }
        Ok(())
    }

    async fn require(&self, intent_id: Uuid) -> AppResult<PaymentIntent> {
        self.intents
            .get(intent_id)
            .await?
            .ok_or_else(|| AppError::intent_not_found(intent_id.to_string()))
    }
}
