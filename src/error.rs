//! Unified error handling for the payment engine
//!
//! Every domain failure maps to a stable machine-readable error code, an HTTP
//! status, and a human message. Nothing here crosses the HTTP boundary as an
//! opaque exception: handlers return `AppError` and the middleware renders it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::payments::types::PaymentChannel;

/// Stable error codes for programmatic client handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "INSUFFICIENT_FUNDS")]
    InsufficientFunds,
    #[serde(rename = "ALLOCATION_EXHAUSTED")]
    AllocationExhausted,
    #[serde(rename = "STALE_TRANSITION")]
    StaleTransition,
    #[serde(rename = "INTENT_NOT_FOUND")]
    IntentNotFound,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 504)
    #[serde(rename = "GATEWAY_UNAVAILABLE")]
    GatewayUnavailable,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Direct wallet purchase with a balance below the price
    InsufficientFunds { available: i64, required: i64 },
    /// No free `final_amount` below the perturbation bound on this channel
    AllocationExhausted {
        channel: PaymentChannel,
        base_amount: i64,
    },
    /// A CAS status transition lost the race; the caller must re-fetch
    StaleTransition {
        intent_id: String,
        current_status: String,
    },
    /// Intent id does not exist
    IntentNotFound { intent_id: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
}

/// External service errors (payment gateways)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Gateway order-creation failed; the intent goes straight to FAILED
    Gateway {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Amount is zero, negative, or otherwise unusable
    InvalidAmount { amount: i64, reason: String },
    /// Required field missing from the request
    MissingField { field: String },
    /// Field present but carrying an unrecognized value
    InvalidValue { field: String, value: String },
    /// Rejection reason shorter than the configured minimum
    ReasonTooShort { min_len: usize, actual: usize },
    /// Requested method is not served by the configured active payment mode
    UnsupportedMethod { method: String, active_mode: String },
    /// Operation not valid for this intent's channel (e.g. mark-paid on a
    /// gateway intent)
    ChannelMismatch { intent_id: String, channel: String },
    /// Missing or invalid credentials on a guarded endpoint
    Unauthorized { reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn insufficient_funds(available: i64, required: i64) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::InsufficientFunds {
            available,
            required,
        }))
    }

    pub fn allocation_exhausted(channel: PaymentChannel, base_amount: i64) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::AllocationExhausted {
            channel,
            base_amount,
        }))
    }

    pub fn stale_transition(intent_id: impl Into<String>, current: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::StaleTransition {
            intent_id: intent_id.into(),
            current_status: current.into(),
        }))
    }

    pub fn intent_not_found(intent_id: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::IntentNotFound {
            intent_id: intent_id.into(),
        }))
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::MissingField {
            field: field.into(),
        }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(
            InfrastructureError::Database {
                message: message.into(),
                is_retryable: false,
            },
        ))
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientFunds { .. } => 402,
                // Channel-level overload; clients should retry shortly
                DomainError::AllocationExhausted { .. } => 503,
                DomainError::StaleTransition { .. } => 409,
                DomainError::IntentNotFound { .. } => 404,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { .. } => 502,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(ValidationError::Unauthorized { .. }) => 401,
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
                DomainError::AllocationExhausted { .. } => ErrorCode::AllocationExhausted,
                DomainError::StaleTransition { .. } => ErrorCode::StaleTransition,
                DomainError::IntentNotFound { .. } => ErrorCode::IntentNotFound,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { .. } => ErrorCode::GatewayUnavailable,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(ValidationError::Unauthorized { .. }) => {
                ErrorCode::Unauthorized
            }
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientFunds {
                    available,
                    required,
                } => format!(
                    "Insufficient wallet balance. Available: {}, required: {}. Top up your wallet and try again",
                    available, required
                ),
                DomainError::AllocationExhausted { channel, .. } => format!(
                    "Payment channel '{}' is overloaded right now. Please try again shortly",
                    channel
                ),
                DomainError::StaleTransition { intent_id, current_status } => format!(
                    "Payment '{}' was already resolved (current status: {}). Refresh and check its state",
                    intent_id, current_status
                ),
                DomainError::IntentNotFound { intent_id } => {
                    format!("Payment '{}' not found", intent_id)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { provider, .. } => format!(
                    "Payment gateway ({}) is unavailable. No funds were moved; please try again",
                    provider
                ),
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidValue { field, value } => {
                    format!("Invalid value '{}' for field '{}'", value, field)
                }
                ValidationError::ReasonTooShort { min_len, actual } => format!(
                    "Rejection reason must be at least {} characters (got {})",
                    min_len, actual
                ),
                ValidationError::UnsupportedMethod {
                    method,
                    active_mode,
                } => format!(
                    "Payment method '{}' is not available while mode '{}' is active",
                    method, active_mode
                ),
                ValidationError::ChannelMismatch { intent_id, channel } => format!(
                    "Operation is not valid for payment '{}' on channel '{}'",
                    intent_id, channel
                ),
                ValidationError::Unauthorized { reason } => {
                    format!("Unauthorized: {}", reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(err) => {
                matches!(err, DomainError::AllocationExhausted { .. })
            }
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { is_retryable, .. } => *is_retryable,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_funds_maps_to_402() {
        let error = AppError::insufficient_funds(40_000, 50_000);
        assert_eq!(error.status_code(), 402);
        assert_eq!(error.error_code(), ErrorCode::InsufficientFunds);
        assert!(error.user_message().contains("Top up"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn allocation_exhausted_is_retryable() {
        let error = AppError::allocation_exhausted(PaymentChannel::Manual, 50_000);
        assert_eq!(error.status_code(), 503);
        assert_eq!(error.error_code(), ErrorCode::AllocationExhausted);
        assert!(error.is_retryable());
    }

    #[test]
    fn stale_transition_maps_to_conflict() {
        let error = AppError::stale_transition("abc", "CONFIRMED");
        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::StaleTransition);
        assert!(!error.is_retryable());
    }

    #[test]
    fn short_reject_reason_is_a_validation_error() {
        let error = AppError::validation(ValidationError::ReasonTooShort {
            min_len: 10,
            actual: 9,
        });
        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(error.user_message().contains("at least 10"));
    }
}
