//! HTTP ingest: feeders without a broker POST envelopes here.
//!
//! The body is the same `{"raw": "<hex>"}` envelope the broker carries and goes
//! through the same pipeline, so stats and logs are shared.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::web::AppState;

/// POST /api/v1/frames: decode one envelope and record it.
///
/// 200 with the decoded record, 422 with the failure category otherwise.
pub async fn api_ingest_frame(State(state): State<Arc<AppState>>, body: Bytes) -> impl IntoResponse {
    match state.pipeline.process(&body).await {
        Ok(record) => (StatusCode::OK, Json(json!(record))),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "error": e.to_string(),
                "category": e.category(),
                "station_id": e.station_id(),
            })),
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
