//! Web server: axum REST API and dashboard for live CAM trajectories.
//!
//! Shared state is the ingest pipeline (which owns a handle to the store) and
//! a read-only view over the same store.

use std::future::Future;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use cam_core::view::TrajectoryView;

use crate::ingest::Pipeline;

pub mod ingest;
pub mod pages;
pub mod routes;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub view: TrajectoryView,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(pages::page_map))
        .route("/map", get(pages::page_map))
        .route("/data", get(routes::api_data))
        .route("/api/map", get(routes::api_map))
        .route("/api/map/geojson", get(routes::api_map_geojson))
        .route("/api/stations/:station_id", get(routes::api_station))
        .route("/api/stats", get(routes::api_stats))
        // HTTP ingest, same pipeline as the broker subscriber
        .route("/api/v1/frames", post(ingest::api_ingest_frame))
        .with_state(state)
        .layer(cors)
}

/// Bind the dashboard address.
pub async fn bind(host: &str, port: u16) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind((host, port)).await?;
    tracing::info!("dashboard listening on http://{}", listener.local_addr()?);
    Ok(listener)
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve<S>(state: Arc<AppState>, listener: TcpListener, shutdown: S) -> std::io::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
