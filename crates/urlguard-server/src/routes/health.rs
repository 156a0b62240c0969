//! Health check endpoint

use crate::AppState;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub cache_available: bool,
    pub probes: Vec<String>,
    pub uptime_secs: i64,
    pub timestamp: String,
}

/// Health check
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let now = chrono::Utc::now();
    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        cache_available: state.orchestrator.cache().is_available().await,
        probes: state
            .orchestrator
            .probe_kinds()
            .iter()
            .map(|k| k.label().to_string())
            .collect(),
        uptime_secs: (now - state.started_at).num_seconds(),
        timestamp: now.to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::server;

    #[tokio::test]
    async fn test_health() {
        let response = server().get("/health").await;
        response.assert_status_ok();

        let health: HealthResponse = response.json();
        assert_eq!(health.status, "healthy");
        assert!(health.cache_available);
        assert_eq!(health.probes, vec!["phishing_database", "ml_model"]);
    }
}
