//! Shared test harness: the full service stack over the in-memory store.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use edupay_backend::config::PaymentsConfig;
use edupay_backend::database::memory::InMemoryStore;
use edupay_backend::payments::gateway::{
    GatewayError, GatewayOrder, OrderRequest, PaymentGateway,
};
use edupay_backend::payments::router::ProviderRouter;
use edupay_backend::payments::types::{IntentKind, PaymentChannel, PaymentMode};
use edupay_backend::services::{
    AmountAllocator, InitiateRequest, PaymentOrchestrator, WalletLedger,
};
use edupay_backend::workers::Reconciler;

pub struct MockGateway {
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl MockGateway {
    pub fn succeeding() -> Self {
        Self {
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_order(&self, request: &OrderRequest) -> Result<GatewayOrder, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(GatewayError::Unavailable {
                provider: "mock".to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(GatewayOrder {
            pay_url: format!("https://checkout.example/{}", request.intent_id),
            provider_reference: format!("mock_{}", request.intent_id),
        })
    }

    fn provider(&self) -> &'static str {
        "mock"
    }
}

pub struct TestApp {
    pub store: Arc<InMemoryStore>,
    pub allocator: Arc<AmountAllocator>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub reconciler: Arc<Reconciler>,
}

pub fn build(mode: PaymentMode) -> TestApp {
    build_with(mode, None, Duration::from_secs(900))
}

pub fn build_with(
    mode: PaymentMode,
    gateway: Option<Arc<dyn PaymentGateway>>,
    reservation_ttl: Duration,
) -> TestApp {
    build_with_config(
        PaymentsConfig {
            active_mode: mode,
            reservation_ttl,
            ..PaymentsConfig::default()
        },
        gateway,
    )
}

pub fn build_with_config(
    config: PaymentsConfig,
    gateway: Option<Arc<dyn PaymentGateway>>,
) -> TestApp {
    let store = Arc::new(InMemoryStore::new());
    let allocator = Arc::new(AmountAllocator::new(
        store.clone(),
        config.max_unique_add,
        config.reservation_ttl,
    ));
    let ledger = Arc::new(WalletLedger::new(store.clone()));

    let mut router = ProviderRouter::new(&config);
    if let Some(gateway) = gateway {
        router = router
            .with_gateway(PaymentChannel::IntegrationPayme, gateway.clone())
            .with_gateway(PaymentChannel::IntegrationClick, gateway);
    }

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        store.clone(),
        allocator.clone(),
        ledger,
        Arc::new(router),
        config.min_reject_reason_len,
    ));
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        allocator.clone(),
        orchestrator.clone(),
    ));

    TestApp {
        store,
        allocator,
        orchestrator,
        reconciler,
    }
}

pub fn topup(user_id: Uuid, amount: i64, key: &str) -> InitiateRequest {
    InitiateRequest {
        user_id,
        kind: IntentKind::Topup,
        reference_id: None,
        amount,
        method: None,
        idempotency_key: key.to_string(),
    }
}
