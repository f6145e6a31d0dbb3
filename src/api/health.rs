//! Health check endpoint

use actix_web::{get, web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ApiState;
use crate::models::HubKey;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub hub_url: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<f64>,
}

impl HealthResponse {
    pub fn with_status(status: &str, hub_url: &str, version: &str) -> Self {
        Self {
            status: status.to_string(),
            version: version.to_string(),
            hub_url: hub_url.to_string(),
            timestamp: Utc::now(),
            uptime_seconds: None,
        }
    }

    pub fn healthy(hub_url: &str, version: &str) -> Self {
        Self::with_status("healthy", hub_url, version)
    }

    pub fn with_uptime(mut self, uptime: f64) -> Self {
        self.uptime_seconds = Some(uptime);
        self
    }
}

/// Process-level state reported by the health endpoints
#[derive(Clone)]
pub struct AppState {
    pub hub_url: String,
    pub version: String,
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(hub_url: impl Into<String>) -> Self {
        Self {
            hub_url: hub_url.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Utc::now(),
        }
    }

    pub fn uptime_seconds(&self) -> f64 {
        let duration = Utc::now().signed_duration_since(self.start_time);
        duration.num_milliseconds() as f64 / 1000.0
    }
}

/// Health check endpoint
#[get("/health")]
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let response = HealthResponse::healthy(&state.hub_url, &state.version)
        .with_uptime(state.uptime_seconds());

    HttpResponse::Ok().json(response)
}

/// Readiness check endpoint: both stores must answer a lookup
#[get("/ready")]
pub async fn readiness_check(
    state: web::Data<AppState>,
    api: web::Data<ApiState>,
) -> HttpResponse {
    let hub_ready = api.hub.store().get(&HubKey::new("", "")).is_ok();
    let subscriber_ready = api.subscriber.subscription("").is_ok();

    if hub_ready && subscriber_ready {
        HttpResponse::Ok().json(HealthResponse::healthy(&state.hub_url, &state.version))
    } else {
        HttpResponse::ServiceUnavailable().json(HealthResponse::with_status(
            "unavailable",
            &state.hub_url,
            &state.version,
        ))
    }
}

/// Liveness check endpoint
#[get("/live")]
pub async fn liveness_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "alive"
    }))
}

/// Configure health routes
pub fn configure_health_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(readiness_check)
        .service(liveness_check);
}
