//! Evaluation counters

use crate::AppState;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use urlguard_core::EvaluationStats;

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: EvaluationStats,
    pub avg_latency_us: f64,
    pub hit_ratio: f64,
}

/// Counter snapshot
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let stats = state.orchestrator.stats();
    Json(StatsResponse {
        avg_latency_us: stats.avg_latency_us(),
        hit_ratio: stats.hit_ratio(),
        stats,
    })
}
