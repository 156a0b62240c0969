//! URLGuard HTTP Service
//!
//! ```text
//! POST /test_url   {"url": "..."}  -> aggregate report
//! GET  /health                     -> liveness, cache reachability, probes
//! GET  /stats                      -> evaluation counters
//! ```

pub mod error;
pub mod routes;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use urlguard_core::Orchestrator;

pub use error::ApiError;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            started_at: chrono::Utc::now(),
        }
    }
}

/// Build the service router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/test_url", post(routes::evaluate::test_url))
        .route("/health", get(routes::health::health_check))
        .route("/stats", get(routes::stats::get_stats))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(Arc::new(state))
}
