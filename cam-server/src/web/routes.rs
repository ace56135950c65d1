//! REST API route handlers.
//!
//! Everything is served from an in-memory snapshot of the trajectory store;
//! handlers never hold the store lock while serializing.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use cam_core::types::StationId;
use cam_core::view::timestamped_geojson;

use crate::web::AppState;

/// GET /data: every station with its colour and full position history.
pub async fn api_data(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.view.current_state())
}

/// GET /api/map: ordered map features, or the empty-state overview.
pub async fn api_map(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.view.renderable_features())
}

/// GET /api/map/geojson: timed points for animated playback.
pub async fn api_map_geojson(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let map = state.view.renderable_features();
    Json(timestamped_geojson(map.features()))
}

/// GET /api/stations/:station_id: one station's trajectory.
pub async fn api_station(
    State(state): State<Arc<AppState>>,
    Path(station_id): Path<StationId>,
) -> impl IntoResponse {
    match state.view.store().vehicle(station_id) {
        Some(vehicle) => Json(json!({
            "station_id": station_id,
            "color": vehicle.color,
            "positions": vehicle.positions,
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Station not found"})),
        )
            .into_response(),
    }
}

/// GET /api/stats: ingest counters plus store size.
pub async fn api_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.view.store();
    Json(json!({
        "ingest": state.pipeline.stats().snapshot(),
        "stations": store.len(),
        "positions": store.position_count(),
        "retention": format!("{:?}", store.retention()),
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use cam_core::decode::Decoder;
    use cam_core::store::TrajectoryStore;
    use cam_core::view::{MapDefaults, TrajectoryView, DEFAULT_CENTER};

    use super::*;
    use crate::ingest::Pipeline;

    fn test_state() -> Arc<AppState> {
        let store = Arc::new(TrajectoryStore::new());
        Arc::new(AppState {
            pipeline: Arc::new(Pipeline::new(
                Arc::clone(&store),
                Decoder::default(),
                Duration::from_secs(2),
            )),
            view: TrajectoryView::new(store, MapDefaults::default()),
        })
    }

    async fn get_json(state: Arc<AppState>, uri: &str) -> (StatusCode, Value) {
        let app = crate::web::build_router(state);
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_api_data_empty() {
        let (status, json) = get_json(test_state(), "/data").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({}));
    }

    #[tokio::test]
    async fn test_api_data_shape() {
        let state = test_state();
        state
            .view
            .store()
            .record_position(7, 1_700_000_000, 7.66, 45.05, Some(5.0));

        let (status, json) = get_json(state, "/data").await;
        assert_eq!(status, StatusCode::OK);
        let vehicle = &json["7"];
        assert!(vehicle["color"].is_string());
        assert_eq!(vehicle["positions"][0]["time"], 1_700_000_000u64);
        assert_eq!(vehicle["positions"][0]["coordinates"], json!([7.66, 45.05]));
        assert_eq!(vehicle["positions"][0]["speed"], 5.0);
    }

    #[tokio::test]
    async fn test_api_map_empty_state() {
        let (status, json) = get_json(test_state(), "/api/map").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["state"], "empty");
        assert_eq!(json["center"], json!(DEFAULT_CENTER));
        assert_eq!(json["zoom"], 20);
    }

    #[tokio::test]
    async fn test_api_map_populated() {
        let state = test_state();
        state.view.store().record_position(3, 10, 7.6, 45.0, None);

        let (_, json) = get_json(state, "/api/map").await;
        assert_eq!(json["state"], "populated");
        let kinds: Vec<&str> = json["features"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["kind"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["polyline", "marker", "timed_point"]);
    }

    #[tokio::test]
    async fn test_api_map_geojson() {
        let state = test_state();
        state.view.store().record_position(3, 10, 7.6, 45.0, None);
        state.view.store().record_position(3, 11, 7.7, 45.1, None);

        let (_, json) = get_json(state, "/api/map/geojson").await;
        assert_eq!(json["type"], "FeatureCollection");
        assert_eq!(json["features"].as_array().unwrap().len(), 2);
        assert_eq!(json["features"][1]["properties"]["time"], 11_000);
        assert_eq!(json["features"][1]["geometry"]["coordinates"], json!([7.7, 45.1]));
    }

    #[tokio::test]
    async fn test_api_station() {
        let state = test_state();
        state.view.store().record_position(9, 10, 7.6, 45.0, None);

        let (status, json) = get_json(state.clone(), "/api/stations/9").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["station_id"], 9);
        assert_eq!(json["positions"].as_array().unwrap().len(), 1);

        let (status, _) = get_json(state, "/api/stations/10").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_api_stats() {
        let state = test_state();
        state.view.store().record_position(1, 10, 7.6, 45.0, None);
        state.view.store().record_position(2, 10, 7.6, 45.0, None);

        let (status, json) = get_json(state, "/api/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["stations"], 2);
        assert_eq!(json["positions"], 2);
        assert_eq!(json["ingest"]["received"], 0);
    }
}
