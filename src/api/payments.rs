//! Payment intent endpoints.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use super::AppState;
use crate::error::{AppError, AppResult};
use crate::payments::types::{IntentKind, PaymentChannel, PaymentIntent, ProviderInstructions};
use crate::services::InitiateRequest;

#[derive(Debug, Deserialize)]
pub struct InitiateBody {
    pub user_id: Uuid,
    pub amount: i64,
    /// Payment kind: TOPUP, COURSE_PURCHASE, OLYMPIAD_PURCHASE.
    #[serde(rename = "type")]
    pub kind: String,
    pub reference_id: Option<String>,
    /// Method within the active mode (payme / click / manual / bot).
    pub method: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Serialize)]
pub struct IntentResponse {
    pub intent_id: Uuid,
    pub status: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub channel: String,
    pub requested_amount: i64,
    /// The exact amount the payer must transfer.
    pub payable_amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserved_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<ProviderInstructions>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub replayed: bool,
}

impl IntentResponse {
    pub fn from_intent(intent: &PaymentIntent) -> Self {
        Self {
            intent_id: intent.id,
            status: intent.status.to_string(),
            kind: intent.kind.to_string(),
            channel: intent.channel.to_string(),
            requested_amount: intent.requested_amount,
            payable_amount: intent.payable_amount(),
            reserved_until: intent.allocation.map(|a| a.reserved_until),
            status_reason: intent.status_reason.clone(),
            instructions: None,
            replayed: false,
        }
    }

    fn with_instructions(mut self, instructions: Option<ProviderInstructions>) -> Self {
        self.instructions = instructions;
        self
    }

    fn replayed(mut self, replayed: bool) -> Self {
        self.replayed = replayed;
        self
    }
}

/// POST /payments/initiate
pub async fn initiate(
    State(state): State<AppState>,
    Json(body): Json<InitiateBody>,
) -> AppResult<Json<IntentResponse>> {
    let kind = IntentKind::from_str(&body.kind)?;
    let outcome = state
        .orchestrator
        .initiate(InitiateRequest {
            user_id: body.user_id,
            kind,
            reference_id: body.reference_id,
            amount: body.amount,
            method: body.method,
            idempotency_key: body.idempotency_key,
        })
        .await?;
    Ok(Json(
        IntentResponse::from_intent(&outcome.intent)
            .with_instructions(outcome.instructions)
            .replayed(outcome.replayed),
    ))
}

/// GET /payments/{id}
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<IntentResponse>> {
    let intent = state.orchestrator.get(id).await?;
    Ok(Json(IntentResponse::from_intent(&intent)))
}

/// POST /payments/{id}/mark-paid
pub async fn mark_paid(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<IntentResponse>> {
    let intent = state.orchestrator.mark_paid(id).await?;
    Ok(Json(IntentResponse::from_intent(&intent)))
}

/// POST /payments/{id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<IntentResponse>> {
    let intent = state.orchestrator.cancel(id).await?;
    Ok(Json(IntentResponse::from_intent(&intent)))
}

/// POST /payments/{id}/approve (admin)
pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> AppResult<Json<IntentResponse>> {
    require_admin(&state, &headers)?;
    let intent = state.orchestrator.approve(id).await?;
    Ok(Json(IntentResponse::from_intent(&intent)))
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub reason: String,
}

/// POST /payments/{id}/reject (admin)
pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<RejectBody>,
) -> AppResult<Json<IntentResponse>> {
    require_admin(&state, &headers)?;
    let intent = state.orchestrator.reject(id, &body.reason).await?;
    Ok(Json(IntentResponse::from_intent(&intent)))
}

#[derive(Debug, Deserialize)]
pub struct TransferBody {
    pub channel: String,
    pub amount: i64,
}

/// POST /internal/transfers (admin)
///
/// Inbound parsed-transfer signal from the monitoring bot: "someone sent
/// exactly `amount` on `channel`".
pub async fn inbound_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<TransferBody>,
) -> AppResult<Json<IntentResponse>> {
    require_admin(&state, &headers)?;
    let channel = PaymentChannel::from_str(&body.channel).map_err(|_| {
        AppError::validation(crate::error::ValidationError::InvalidValue {
            field: "channel".to_string(),
            value: body.channel.clone(),
        })
    })?;
    info!(channel = %channel, amount = body.amount, "inbound transfer signal");
    let intent = state.reconciler.match_transfer(channel, body.amount).await?;
    Ok(Json(IntentResponse::from_intent(&intent)))
}

/// Shared-token guard for admin/internal endpoints.
pub(super) fn require_admin(state: &AppState, headers: &HeaderMap) -> AppResult<()> {
    let Some(expected) = state.payments_config.admin_api_token.as_deref() else {
        return Err(AppError::internal("ADMIN_API_TOKEN is not configured")
            .with_context("admin endpoints are disabled"));
    };
    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        return Err(AppError::validation(
            crate::error::ValidationError::Unauthorized {
                reason: "missing or invalid admin token".to_string(),
            },
        ));
    }
    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_slices() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secrets"));
    }
}
