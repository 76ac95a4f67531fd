//! API Routes

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::error::Result;
use crate::media_signaling::{HangupRequest, HangupResponse, OfferResponse, SessionDescription};
use crate::state::AppState;
use crate::stream_coordinator::WorkerStatus;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(health_check))
        .route("/api/status", get(service_status))
        // Signaling
        .route("/webrtc/offer", post(offer))
        .route("/webrtc/hangup", post(hangup))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ServiceStatus {
    edge_id: String,
    version: &'static str,
    workers: Vec<WorkerStatus>,
    published_streams: usize,
    sessions: usize,
    mosaic_version: u64,
    events_in_flight: usize,
}

async fn service_status(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(ServiceStatus {
        edge_id: state.config.edge_id.clone(),
        version: env!("CARGO_PKG_VERSION"),
        workers: state.coordinator.status().await,
        published_streams: state.registry.len(),
        sessions: state.signaling.session_count(),
        mosaic_version: state.mosaic.version(),
        events_in_flight: state.reporter.in_flight(),
    })
}

async fn offer(
    State(state): State<AppState>,
    Json(req): Json<SessionDescription>,
) -> Result<Json<OfferResponse>> {
    let response = state.signaling.offer(req).await?;
    Ok(Json(response))
}

async fn hangup(
    State(state): State<AppState>,
    Json(req): Json<HangupRequest>,
) -> Json<HangupResponse> {
    let closed = state.signaling.hangup(req.session_id).await;
    Json(HangupResponse { closed })
}
