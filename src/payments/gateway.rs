//! Card-gateway integration.
//!
//! Both gateways expose the same order-creation shape: POST an amount and a
//! merchant order id, get back a checkout URL. A single trait keeps the
//! orchestrator gateway-agnostic and lets tests plug in a mock.

use async_trait::async_trait;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::error::{AppError, AppErrorKind, ExternalError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub intent_id: Uuid,
    /// Amount in minor currency units.
    pub amount: i64,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct GatewayOrder {
    /// Checkout URL the payer is redirected to.
    pub pay_url: String,
    pub provider_reference: String,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway {provider} unavailable: {message}")]
    Unavailable { provider: String, message: String },

    #[error("gateway {provider} rejected the order: {message}")]
    Rejected { provider: String, message: String },

    #[error("gateway {provider} returned an unparseable response: {message}")]
    InvalidResponse { provider: String, message: String },
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        let (provider, message, is_retryable) = match &err {
            GatewayError::Unavailable { provider, message } => {
                (provider.clone(), message.clone(), true)
            }
            GatewayError::Rejected { provider, message }
            | GatewayError::InvalidResponse { provider, message } => {
                (provider.clone(), message.clone(), false)
            }
        };
        AppError::new(AppErrorKind::External(ExternalError::Gateway {
            provider,
            message,
            is_retryable,
        }))
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a checkout order. Transport failures are retried once inside
    /// the implementation; business rejections never are.
    async fn create_order(&self, request: &OrderRequest) -> Result<GatewayOrder, GatewayError>;

    fn provider(&self) -> &'static str;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub merchant_id: String,
    pub secret_key: String,
    pub timeout: Duration,
}

impl GatewayConfig {
    fn from_env(prefix: &str) -> Option<Self> {
        let base_url = env::var(format!("{prefix}_BASE_URL")).ok()?;
        let merchant_id = env::var(format!("{prefix}_MERCHANT_ID")).ok()?;
        let secret_key = env::var(format!("{prefix}_SECRET_KEY")).ok()?;
        let timeout = env::var(format!("{prefix}_TIMEOUT_SECONDS"))
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        Some(Self {
            base_url,
            merchant_id,
            secret_key,
            timeout,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OrderResponseBody {
    pay_url: String,
    #[serde(alias = "order_id", alias = "invoice_id")]
    reference: String,
}

async fn post_order(
    client: &reqwest::Client,
    provider: &'static str,
    url: &str,
    secret_key: &str,
    body: &serde_json::Value,
) -> Result<GatewayOrder, GatewayError> {
    // One retry, transport errors only. A 4xx means the order itself is bad
    // and a second attempt would change nothing.
    let mut last_transport_error = None;
    for _ in 0..2 {
        let response = match client
            .post(url)
            .bearer_auth(secret_key)
            .json(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                last_transport_error = Some(e.to_string());
                continue;
            }
        };

        let status = response.status();
        if status.is_client_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                provider: provider.to_string(),
                message: format!("{status}: {message}"),
            });
        }
        if !status.is_success() {
            return Err(GatewayError::Unavailable {
                provider: provider.to_string(),
                message: format!("unexpected status {status}"),
            });
        }

        let parsed: OrderResponseBody =
            response
                .json()
                .await
                .map_err(|e| GatewayError::InvalidResponse {
                    provider: provider.to_string(),
                    message: e.to_string(),
                })?;
        return Ok(GatewayOrder {
            pay_url: parsed.pay_url,
            provider_reference: parsed.reference,
        });
    }
    Err(GatewayError::Unavailable {
        provider: provider.to_string(),
        message: last_transport_error.unwrap_or_else(|| "transport error".to_string()),
    })
}

pub struct PaymeGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl PaymeGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    pub fn from_env() -> Option<Self> {
        GatewayConfig::from_env("PAYME").map(Self::new)
    }
}

#[async_trait]
impl PaymentGateway for PaymeGateway {
    async fn create_order(&self, request: &OrderRequest) -> Result<GatewayOrder, GatewayError> {
        let url = format!("{}/api/orders", self.config.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "merchant_id": self.config.merchant_id,
            "amount": request.amount,
            "account": { "order_id": request.intent_id.to_string() },
            "description": request.description,
        });
        post_order(&self.client, self.provider(), &url, &self.config.secret_key, &body).await
    }

    fn provider(&self) -> &'static str {
        "payme"
    }
}

pub struct ClickGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl ClickGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    pub fn from_env() -> Option<Self> {
        GatewayConfig::from_env("CLICK").map(Self::new)
    }
}

#[async_trait]
impl PaymentGateway for ClickGateway {
    async fn create_order(&self, request: &OrderRequest) -> Result<GatewayOrder, GatewayError> {
        let url = format!(
            "{}/v2/merchant/invoice/create",
            self.config.base_url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "service_id": self.config.merchant_id,
            "amount": request.amount,
            "merchant_trans_id": request.intent_id.to_string(),
            "description": request.description,
        });
        post_order(&self.client, self.provider(), &url, &self.config.secret_key, &body).await
    }

    fn provider(&self) -> &'static str {
        "click"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubGateway;

    #[async_trait]
    impl PaymentGateway for StubGateway {
        async fn create_order(
            &self,
            request: &OrderRequest,
        ) -> Result<GatewayOrder, GatewayError> {
            Ok(GatewayOrder {
                pay_url: format!("https://checkout.example/{}", request.intent_id),
                provider_reference: format!("stub_{}", request.intent_id),
            })
        }

        fn provider(&self) -> &'static str {
            "stub"
        }
    }

    #[tokio::test]
    async fn trait_object_dispatch_reaches_the_gateway() {
        let gateway: &dyn PaymentGateway = &StubGateway;
        let order = gateway
            .create_order(&OrderRequest {
                intent_id: Uuid::new_v4(),
                amount: 50_000,
                description: "Wallet top-up".to_string(),
            })
            .await
            .expect("order should succeed");
        assert!(order.pay_url.starts_with("https://checkout.example/"));
        assert_eq!(gateway.provider(), "stub");
    }

    #[test]
    fn unavailable_maps_to_a_retryable_app_error() {
        let err: AppError = GatewayError::Unavailable {
            provider: "payme".to_string(),
            message: "timeout".to_string(),
        }
        .into();
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), 502);

        let err: AppError = GatewayError::Rejected {
            provider: "click".to_string(),
            message: "bad amount".to_string(),
        }
        .into();
        assert!(!err.is_retryable());
    }
}
