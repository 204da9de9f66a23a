//! Gateway webhook endpoint.
//!
//! The gateway signs the raw body with HMAC-SHA256 over a shared secret and
//! puts the hex digest in `x-signature`. Verification happens before any
//! parsing; an unverifiable body is dropped with a 401.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

use super::AppState;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    intent_id: Uuid,
    /// "paid" or "failed".
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

/// POST /webhooks/{provider}
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    info!(provider = %provider, "Received webhook");

    let Some(secret) = state.payments_config.webhook_secret.as_deref() else {
        warn!(provider = %provider, "WEBHOOK_SECRET not configured, webhook dropped");
        return (StatusCode::UNAUTHORIZED, "Webhooks disabled").into_response();
    };

    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !verify_signature(secret, body.as_bytes(), signature) {
        warn!(provider = %provider, "Invalid webhook signature");
        return (StatusCode::UNAUTHORIZED, "Invalid signature").into_response();
    }

    let payload: WebhookPayload = match serde_json::from_str(&body) {
        Ok(p) => p,
        Err(e) => {
            warn!(provider = %provider, error = %e, "Invalid webhook payload");
            return (StatusCode::BAD_REQUEST, "Invalid JSON").into_response();
        }
    };

    let result = match payload.status.as_str() {
        "paid" => state.orchestrator.confirm(payload.intent_id).await,
        "failed" => {
            let reason = payload.reason.as_deref().unwrap_or("gateway reported failure");
            state.orchestrator.fail(payload.intent_id, reason).await
        }
        other => {
            warn!(provider = %provider, status = %other, "Unknown webhook status");
            return (StatusCode::BAD_REQUEST, "Unknown status").into_response();
        }
    };

    match result {
        Ok(intent) => {
            info!(
                provider = %provider,
                intent_id = %intent.id,
                status = %intent.status,
                "Webhook processed"
            );
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
        }
        Err(e) => {
            // The gateway retries on non-2xx; surface the domain error so a
            // transient conflict gets another delivery.
            warn!(provider = %provider, error = %e, "Webhook processing failed");
            e.into_response()
        }
    }
}

fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(decoded) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&decoded).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_verifies() {
        let body = br#"{"intent_id":"00000000-0000-0000-0000-000000000000","status":"paid"}"#;
        let signature = sign("topsecret", body);
        assert!(verify_signature("topsecret", body, &signature));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let body = b"{\"status\":\"paid\"}";
        let signature = sign("topsecret", body);
        assert!(!verify_signature("topsecret", b"{\"status\":\"failed\"}", &signature));
        assert!(!verify_signature("othersecret", body, &signature));
    }

    #[test]
    fn malformed_hex_fails_closed() {
        assert!(!verify_signature("topsecret", b"body", "not-hex"));
        assert!(!verify_signature("topsecret", b"body", ""));
    }
}
