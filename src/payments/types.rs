use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, ValidationError};

/// What the intent pays for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentKind {
    Topup,
    CoursePurchase,
    OlympiadPurchase,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::Topup => "TOPUP",
            IntentKind::CoursePurchase => "COURSE_PURCHASE",
            IntentKind::OlympiadPurchase => "OLYMPIAD_PURCHASE",
        }
    }

    /// Purchases identify the course/olympiad through `reference_id`.
    pub fn requires_reference(&self) -> bool {
        !matches!(self, IntentKind::Topup)
    }
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IntentKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "TOPUP" => Ok(IntentKind::Topup),
            "COURSE_PURCHASE" | "COURSE" => Ok(IntentKind::CoursePurchase),
            "OLYMPIAD_PURCHASE" | "OLYMPIAD" => Ok(IntentKind::OlympiadPurchase),
            _ => Err(AppError::validation(ValidationError::InvalidValue {
                field: "type".to_string(),
                value: value.to_string(),
            })),
        }
    }
}

/// The payment path an intent travels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentChannel {
    IntegrationPayme,
    IntegrationClick,
    Manual,
    Bot,
}

impl PaymentChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentChannel::IntegrationPayme => "INTEGRATION_PAYME",
            PaymentChannel::IntegrationClick => "INTEGRATION_CLICK",
            PaymentChannel::Manual => "MANUAL",
            PaymentChannel::Bot => "BOT",
        }
    }

    /// Gateway channels are disambiguated by the gateway's own order
    /// reference; only reference-less channels need a unique amount.
    pub fn requires_allocation(&self) -> bool {
        matches!(self, PaymentChannel::Manual | PaymentChannel::Bot)
    }
}

impl std::fmt::Display for PaymentChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentChannel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "INTEGRATION_PAYME" => Ok(PaymentChannel::IntegrationPayme),
            "INTEGRATION_CLICK" => Ok(PaymentChannel::IntegrationClick),
            "MANUAL" => Ok(PaymentChannel::Manual),
            "BOT" => Ok(PaymentChannel::Bot),
            other => Err(format!("unknown payment channel: {}", other)),
        }
    }
}

/// Which family of payment methods is currently offered to users.
/// Operator-configured; the router refuses methods outside the active mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMode {
    Integration,
    Manual,
    Bot,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Integration => "INTEGRATION",
            PaymentMode::Manual => "MANUAL",
            PaymentMode::Bot => "BOT",
        }
    }
}

impl std::fmt::Display for PaymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "INTEGRATION" => Ok(PaymentMode::Integration),
            "MANUAL" => Ok(PaymentMode::Manual),
            "BOT" => Ok(PaymentMode::Bot),
            other => Err(format!("unknown payment mode: {}", other)),
        }
    }
}

/// Intent lifecycle status.
///
/// CREATED → AWAITING_PAYMENT → {PENDING_REVIEW | CONFIRMED} → CONFIRMED,
/// with EXPIRED / FAILED / CANCELLED reachable as side exits from any
/// non-terminal state. Terminal statuses are immutable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    Created,
    AwaitingPayment,
    PendingReview,
    Confirmed,
    Expired,
    Failed,
    Cancelled,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Created => "CREATED",
            IntentStatus::AwaitingPayment => "AWAITING_PAYMENT",
            IntentStatus::PendingReview => "PENDING_REVIEW",
            IntentStatus::Confirmed => "CONFIRMED",
            IntentStatus::Expired => "EXPIRED",
            IntentStatus::Failed => "FAILED",
            IntentStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntentStatus::Confirmed
                | IntentStatus::Expired
                | IntentStatus::Failed
                | IntentStatus::Cancelled
        )
    }

    /// Forward transitions; terminal side exits are additionally reachable
    /// from every non-terminal state.
    pub fn valid_transitions(&self) -> Vec<IntentStatus> {
        let mut targets = match self {
            IntentStatus::Created => vec![IntentStatus::AwaitingPayment],
            IntentStatus::AwaitingPayment => {
                vec![IntentStatus::PendingReview, IntentStatus::Confirmed]
            }
            IntentStatus::PendingReview => vec![IntentStatus::Confirmed],
            _ => vec![],
        };
        if !self.is_terminal() {
            targets.extend([
                IntentStatus::Expired,
                IntentStatus::Failed,
                IntentStatus::Cancelled,
            ]);
        }
        targets
    }

    pub fn can_transition_to(&self, to: IntentStatus) -> bool {
        self.valid_transitions().contains(&to)
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "CREATED" => Ok(IntentStatus::Created),
            "AWAITING_PAYMENT" => Ok(IntentStatus::AwaitingPayment),
            "PENDING_REVIEW" => Ok(IntentStatus::PendingReview),
            "CONFIRMED" => Ok(IntentStatus::Confirmed),
            "EXPIRED" => Ok(IntentStatus::Expired),
            "FAILED" => Ok(IntentStatus::Failed),
            "CANCELLED" => Ok(IntentStatus::Cancelled),
            other => Err(format!("unknown intent status: {}", other)),
        }
    }
}

/// Time-bounded hold on a `(channel, final_amount)` pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Allocation {
    pub final_amount: i64,
    pub unique_add: i64,
    pub reserved_until: DateTime<Utc>,
}

/// A single attempt to pay for a top-up or purchase, tracked end-to-end.
/// Never deleted; this is the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: IntentKind,
    pub reference_id: Option<String>,
    /// Positive amount in minor currency units. The allocation surcharge is
    /// never part of this.
    pub requested_amount: i64,
    pub channel: PaymentChannel,
    pub allocation: Option<Allocation>,
    pub status: IntentStatus,
    /// Redirect URL returned by the gateway, INTEGRATION channels only.
    pub pay_url: Option<String>,
    /// Reason recorded on FAILED/CANCELLED transitions (admin rejection etc.)
    pub status_reason: Option<String>,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    pub fn new(
        user_id: Uuid,
        kind: IntentKind,
        reference_id: Option<String>,
        requested_amount: i64,
        channel: PaymentChannel,
        idempotency_key: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            reference_id,
            requested_amount,
            channel,
            allocation: None,
            status: IntentStatus::Created,
            pay_url: None,
            status_reason: None,
            idempotency_key,
            created_at: now,
            updated_at: now,
        }
    }

    /// The amount the payer must transfer: the perturbed sum when an
    /// allocation is held, otherwise the requested amount.
    pub fn payable_amount(&self) -> i64 {
        self.allocation
            .map(|a| a.final_amount)
            .unwrap_or(self.requested_amount)
    }
}

/// Manual bank-transfer destination shown to the payer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BankDetails {
    pub card_number: String,
    pub holder_name: String,
    pub bank_name: String,
}

/// Channel-specific payment instructions, exhaustively matched by callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderInstructions {
    /// INTEGRATION_*: redirect to the gateway checkout page.
    Gateway { pay_url: String },
    /// MANUAL: transfer exactly `final_amount` to the listed card.
    BankTransfer {
        bank_details: BankDetails,
        final_amount: i64,
        reserved_until: DateTime<Utc>,
    },
    /// BOT: open the chat bot deep link and pay exactly `final_amount`.
    Bot {
        deeplink: String,
        final_amount: i64,
        reserved_until: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_have_no_transitions() {
        for status in [
            IntentStatus::Confirmed,
            IntentStatus::Expired,
            IntentStatus::Failed,
            IntentStatus::Cancelled,
        ] {
            assert!(status.is_terminal());
            assert!(status.valid_transitions().is_empty());
        }
    }

    #[test]
    fn awaiting_payment_can_confirm_or_go_to_review() {
        let from = IntentStatus::AwaitingPayment;
        assert!(from.can_transition_to(IntentStatus::PendingReview));
        assert!(from.can_transition_to(IntentStatus::Confirmed));
        assert!(from.can_transition_to(IntentStatus::Expired));
        assert!(from.can_transition_to(IntentStatus::Cancelled));
        assert!(!from.can_transition_to(IntentStatus::Created));
    }

    #[test]
    fn created_cannot_reach_pending_review_directly() {
        assert!(!IntentStatus::Created.can_transition_to(IntentStatus::PendingReview));
        assert!(IntentStatus::Created.can_transition_to(IntentStatus::AwaitingPayment));
        assert!(IntentStatus::Created.can_transition_to(IntentStatus::Failed));
    }

    #[test]
    fn only_manual_and_bot_channels_need_allocations() {
        assert!(PaymentChannel::Manual.requires_allocation());
        assert!(PaymentChannel::Bot.requires_allocation());
        assert!(!PaymentChannel::IntegrationPayme.requires_allocation());
        assert!(!PaymentChannel::IntegrationClick.requires_allocation());
    }

    #[test]
    fn payable_amount_prefers_the_allocation() {
        let mut intent = PaymentIntent::new(
            Uuid::new_v4(),
            IntentKind::Topup,
            None,
            50_000,
            PaymentChannel::Manual,
            "idem-1".to_string(),
        );
        assert_eq!(intent.payable_amount(), 50_000);
        intent.allocation = Some(Allocation {
            final_amount: 50_002,
            unique_add: 2,
            reserved_until: Utc::now(),
        });
        assert_eq!(intent.payable_amount(), 50_002);
    }

    #[test]
    fn instructions_serialize_with_a_kind_tag() {
        let instructions = ProviderInstructions::Bot {
            deeplink: "https://t.me/paybot?start=pay_1".to_string(),
            final_amount: 50_002,
            reserved_until: Utc::now(),
        };
        let json = serde_json::to_value(&instructions).expect("serialize");
        assert_eq!(json["kind"], "bot");
        assert_eq!(json["final_amount"], 50_002);
    }

    #[test]
    fn unknown_kind_reports_the_bad_value() {
        let err = "GIFT_CARD".parse::<IntentKind>().unwrap_err();
        assert_eq!(err.status_code(), 400);
        let message = err.user_message();
        assert!(message.contains("Invalid value 'GIFT_CARD'"));
        assert!(message.contains("'type'"));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            IntentStatus::Created,
            IntentStatus::AwaitingPayment,
            IntentStatus::PendingReview,
            IntentStatus::Confirmed,
        ] {
            assert_eq!(status.as_str().parse::<IntentStatus>(), Ok(status));
        }
    }
}
