//! Provider routing.
//!
//! The operator configures exactly one active payment mode; the router maps a
//! client-supplied method name onto a channel within that mode and builds the
//! channel-specific instructions the client renders.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::PaymentsConfig;
use crate::error::{AppError, AppResult, ValidationError};
use crate::payments::gateway::{OrderRequest, PaymentGateway};
use crate::payments::types::{
    BankDetails, PaymentChannel, PaymentIntent, PaymentMode, ProviderInstructions,
};

pub struct ProviderRouter {
    active_mode: PaymentMode,
    bank_details: BankDetails,
    bot_url: String,
    gateways: HashMap<PaymentChannel, Arc<dyn PaymentGateway>>,
}

impl ProviderRouter {
    pub fn new(config: &PaymentsConfig) -> Self {
        Self {
            active_mode: config.active_mode,
            bank_details: config.bank_details.clone(),
            bot_url: config.bot_url.clone(),
            gateways: HashMap::new(),
        }
    }

    pub fn with_gateway(
        mut self,
        channel: PaymentChannel,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        self.gateways.insert(channel, gateway);
        self
    }

    pub fn active_mode(&self) -> PaymentMode {
        self.active_mode
    }

    /// Map a requested method onto a channel, refusing anything outside the
    /// active mode. `method` is optional for the single-channel modes.
    pub fn resolve_channel(&self, method: Option<&str>) -> AppResult<PaymentChannel> {
        let unsupported = |method: &str| {
            AppError::validation(ValidationError::UnsupportedMethod {
                method: method.to_string(),
                active_mode: self.active_mode.to_string(),
            })
        };

        match self.active_mode {
            PaymentMode::Integration => match method.map(|m| m.trim().to_lowercase()) {
                Some(m) if m == "payme" => Ok(PaymentChannel::IntegrationPayme),
                Some(m) if m == "click" => Ok(PaymentChannel::IntegrationClick),
                Some(m) => Err(unsupported(&m)),
                None => Err(AppError::missing_field("method")),
            },
            PaymentMode::Manual => match method {
                None => Ok(PaymentChannel::Manual),
                Some(m) if m.trim().eq_ignore_ascii_case("manual") => Ok(PaymentChannel::Manual),
                Some(m) => Err(unsupported(m)),
            },
            PaymentMode::Bot => match method {
                None => Ok(PaymentChannel::Bot),
                Some(m) if m.trim().eq_ignore_ascii_case("bot") => Ok(PaymentChannel::Bot),
                Some(m) => Err(unsupported(m)),
            },
        }
    }

    /// Instructions for an intent that already holds its allocation (or, for
    /// gateway channels, its pay URL). Pure assembly, no external calls.
    pub fn build_instructions(&self, intent: &PaymentIntent) -> AppResult<ProviderInstructions> {
        match intent.channel {
            PaymentChannel::IntegrationPayme | PaymentChannel::IntegrationClick => {
                let pay_url = intent.pay_url.clone().ok_or_else(|| {
                    AppError::internal(format!("gateway intent {} has no pay_url", intent.id))
                })?;
                Ok(ProviderInstructions::Gateway { pay_url })
            }
            PaymentChannel::Manual => {
                let allocation = intent.allocation.ok_or_else(|| {
                    AppError::internal(format!("manual intent {} has no allocation", intent.id))
                })?;
                Ok(ProviderInstructions::BankTransfer {
                    bank_details: self.bank_details.clone(),
                    final_amount: allocation.final_amount,
                    reserved_until: allocation.reserved_until,
                })
            }
            PaymentChannel::Bot => {
                let allocation = intent.allocation.ok_or_else(|| {
                    AppError::internal(format!("bot intent {} has no allocation", intent.id))
                })?;
                Ok(ProviderInstructions::Bot {
                    deeplink: self.deeplink(intent),
                    final_amount: allocation.final_amount,
                    reserved_until: allocation.reserved_until,
                })
            }
        }
    }

    /// Create a gateway checkout order for an INTEGRATION intent.
    pub async fn create_gateway_order(&self, intent: &PaymentIntent) -> AppResult<String> {
        let gateway = self.gateways.get(&intent.channel).ok_or_else(|| {
            AppError::internal(format!("no gateway registered for {}", intent.channel))
        })?;
        let order = gateway
            .create_order(&OrderRequest {
                intent_id: intent.id,
                amount: intent.requested_amount,
                description: match &intent.reference_id {
                    Some(reference) => format!("{} {}", intent.kind, reference),
                    None => intent.kind.to_string(),
                },
            })
            .await?;
        Ok(order.pay_url)
    }

    fn deeplink(&self, intent: &PaymentIntent) -> String {
        format!("{}?start=pay_{}", self.bot_url, intent.id)
    }
}
