use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use edupay_backend::api::{build_router, AppState};
use edupay_backend::config::AppConfig;
use edupay_backend::database::allocation_repository::AllocationRepository;
use edupay_backend::database::init_pool_from_config;
use edupay_backend::database::intent_repository::IntentRepository;
use edupay_backend::database::memory::InMemoryStore;
use edupay_backend::database::store::{AllocationStore, IntentStore, WalletStore};
use edupay_backend::database::wallet_repository::WalletRepository;
use edupay_backend::logging::init_tracing;
use edupay_backend::payments::gateway::{ClickGateway, PaymeGateway};
use edupay_backend::payments::router::ProviderRouter;
use edupay_backend::payments::types::{PaymentChannel, PaymentMode};
use edupay_backend::services::{AmountAllocator, PaymentOrchestrator, WalletLedger};
use edupay_backend::workers::{ReconciliationConfig, ReconciliationWorker, Reconciler};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().map_err(|e| anyhow::anyhow!("configuration: {e}"))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("configuration: {e}"))?;

    init_tracing(&config.logging);

    let skip_externals = std::env::var("SKIP_EXTERNALS")
        .unwrap_or_else(|_| "false".to_string())
        .to_lowercase()
        == "true";

    info!(
        version = env!("CARGO_PKG_VERSION"),
        active_mode = %config.payments.active_mode,
        "Starting edupay backend service"
    );

    // Wire the stores: Postgres in production, in-memory for local runs.
    let (intents, wallets, allocations, db_pool): (
        Arc<dyn IntentStore>,
        Arc<dyn WalletStore>,
        Arc<dyn AllocationStore>,
        Option<sqlx::PgPool>,
    ) = if skip_externals {
        info!("Skipping database initialization (SKIP_EXTERNALS=true)");
        let store = Arc::new(InMemoryStore::new());
        (store.clone(), store.clone(), store, None)
    } else {
        info!("Initializing database connection pool");
        let pool = init_pool_from_config(&config.database).await.map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            anyhow::anyhow!("database: {e}")
        })?;
        (
            Arc::new(IntentRepository::new(pool.clone())),
            Arc::new(WalletRepository::new(pool.clone())),
            Arc::new(AllocationRepository::new(pool.clone())),
            Some(pool),
        )
    };

    let allocator = Arc::new(AmountAllocator::new(
        allocations,
        config.payments.max_unique_add,
        config.payments.reservation_ttl,
    ));
    let ledger = Arc::new(WalletLedger::new(wallets));

    let mut provider_router = ProviderRouter::new(&config.payments);
    if config.payments.active_mode == PaymentMode::Integration {
        match PaymeGateway::from_env() {
            Some(gateway) => {
                provider_router = provider_router
                    .with_gateway(PaymentChannel::IntegrationPayme, Arc::new(gateway));
                info!("Payme gateway configured");
            }
            None => info!("Payme gateway not configured (PAYME_* env vars missing)"),
        }
        match ClickGateway::from_env() {
            Some(gateway) => {
                provider_router = provider_router
                    .with_gateway(PaymentChannel::IntegrationClick, Arc::new(gateway));
                info!("Click gateway configured");
            }
            None => info!("Click gateway not configured (CLICK_* env vars missing)"),
        }
    }
    let provider_router = Arc::new(provider_router);

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        intents.clone(),
        allocator.clone(),
        ledger,
        provider_router,
        config.payments.min_reject_reason_len,
    ));
    let reconciler = Arc::new(Reconciler::new(intents, allocator, orchestrator.clone()));

    // Background reconciliation sweep
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let worker = ReconciliationWorker::new(reconciler.clone(), ReconciliationConfig::from_env());
    let worker_handle = tokio::spawn(worker.run(worker_shutdown_rx));

    let state = AppState {
        orchestrator,
        reconciler,
        payments_config: Arc::new(config.payments.clone()),
        db_pool,
    };

    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(5), worker_handle).await {
        error!(error = %e, "Timed out waiting for reconciliation worker shutdown");
    }

    info!("Server shutdown complete");
    Ok(())
}
