pub mod payments;
pub mod wallet;
pub mod webhooks;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::config::PaymentsConfig;
use crate::services::PaymentOrchestrator;
use crate::workers::Reconciler;

/// Shared handler state. Everything inside is either immutable config or an
/// `Arc` over store-coordinated services, so handlers stay stateless.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub reconciler: Arc<Reconciler>,
    pub payments_config: Arc<PaymentsConfig>,
    /// Present only when running against Postgres; health checks ping it.
    pub db_pool: Option<sqlx::PgPool>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(crate::health::health_handler))
        .route("/payments/initiate", post(payments::initiate))
        .route("/payments/{id}", get(payments::get_payment))
        .route("/payments/{id}/mark-paid", post(payments::mark_paid))
        .route("/payments/{id}/cancel", post(payments::cancel))
        .route("/payments/{id}/approve", post(payments::approve))
        .route("/payments/{id}/reject", post(payments::reject))
        .route("/webhooks/{provider}", post(webhooks::handle_webhook))
        .route("/internal/transfers", post(payments::inbound_transfer))
        .route("/api/wallet/balance", get(wallet::balance))
        .route("/wallet/purchase", post(wallet::purchase))
        .with_state(state)
}
