//! URL evaluation endpoint

use crate::{ApiError, AppState};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use urlguard_core::AggregateReport;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct TestUrlRequest {
    #[serde(default)]
    pub url: Option<Value>,
}

/// Evaluate a URL
pub async fn test_url(
    State(state): State<Arc<AppState>>,
    body: Result<Json<TestUrlRequest>, JsonRejection>,
) -> Result<Json<AggregateReport>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::InvalidBody(e.body_text()))?;
    let url = match request.url {
        Some(Value::String(url)) if !url.trim().is_empty() => url,
        _ => return Err(ApiError::MissingUrl),
    };

    let request_id = Uuid::new_v4();
    tracing::info!(%request_id, %url, "Evaluating URL");

    let report = state.orchestrator.evaluate(&url).await;
    tracing::info!(%request_id, flagged_by = ?report.flagged_by(), "Evaluation finished");

    Ok(Json(report))
}
