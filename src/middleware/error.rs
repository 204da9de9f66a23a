//! Error response formatting
//!
//! Every error crosses the HTTP boundary as the same JSON envelope, with a
//! machine-readable code, a human message and a retryability hint.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, ErrorCode};

/// Standardized error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Request ID for debugging and support
    pub request_id: Option<String>,

    /// ISO 8601 timestamp of the error
    pub timestamp: String,

    /// Optional additional details (e.g., validation errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Whether the client should retry the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(error.is_retryable()),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::error!(
                error = ?self,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error = ?self,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Client error occurred"
            );
        }

        let error_response = ErrorResponse::from_app_error(&self);
        (status_code, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::payments::types::PaymentChannel;
    use axum::response::IntoResponse;

    #[test]
    fn error_response_carries_the_code_and_request_id() {
        let app_error = AppError::insufficient_funds(40_000, 50_000).with_request_id("req_123");
        let error_response = ErrorResponse::from_app_error(&app_error);

        assert_eq!(error_response.error, ErrorCode::InsufficientFunds);
        assert_eq!(error_response.request_id, Some("req_123".to_string()));
        assert_eq!(error_response.retryable, Some(false));
    }

    #[test]
    fn validation_error_renders_as_400() {
        let app_error = AppError::validation(ValidationError::ReasonTooShort {
            min_len: 10,
            actual: 9,
        });
        let response = app_error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn allocation_exhausted_renders_as_503_retryable() {
        let app_error = AppError::allocation_exhausted(PaymentChannel::Manual, 50_000);
        let envelope = ErrorResponse::from_app_error(&app_error);
        assert_eq!(envelope.retryable, Some(true));
        assert_eq!(app_error.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
