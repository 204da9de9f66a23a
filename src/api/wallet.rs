//! Wallet endpoints.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::error::AppResult;

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub balance: i64,
}

/// GET /api/wallet/balance?user_id=
pub async fn balance(
    State(state): State<AppState>,
    Query(query): Query<BalanceQuery>,
) -> AppResult<Json<BalanceResponse>> {
    let balance = state.orchestrator.wallet_balance(query.user_id).await?;
    Ok(Json(BalanceResponse {
        user_id: query.user_id,
        balance,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PurchaseBody {
    pub user_id: Uuid,
    pub amount: i64,
    pub idempotency_key: String,
}

#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub user_id: Uuid,
    pub balance: i64,
}

/// POST /wallet/purchase
///
/// Direct debit against the wallet balance. An insufficient balance yields
/// a 402 prompting the client to top up first.
pub async fn purchase(
    State(state): State<AppState>,
    Json(body): Json<PurchaseBody>,
) -> AppResult<Json<PurchaseResponse>> {
    let balance = state
        .orchestrator
        .purchase_with_balance(body.user_id, body.amount, &body.idempotency_key)
        .await?;
    Ok(Json(PurchaseResponse {
        user_id: body.user_id,
        balance,
    }))
}
