//! Health check module
//! Provides health status for the application and its dependencies

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

use crate::api::AppState;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Up,
    Down,
}

impl ComponentHealth {
    fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    fn down(details: String) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details: Some(details),
        }
    }
}

/// GET /health
pub async fn health_handler(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthStatus>) {
    let mut checks = HashMap::new();

    let store_health = match &state.db_pool {
        Some(pool) => {
            let started = Instant::now();
            match crate::database::health_check(pool).await {
                Ok(()) => ComponentHealth::up(Some(started.elapsed().as_millis())),
                Err(e) => ComponentHealth::down(e.to_string()),
            }
        }
        // In-memory store has no external dependency to probe.
        None => ComponentHealth::up(None),
    };
    let healthy = store_health.status == ComponentState::Up;
    checks.insert("store".to_string(), store_health);

    let status = HealthStatus {
        status: if healthy {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        },
        checks,
        timestamp: chrono::Utc::now(),
    };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}
