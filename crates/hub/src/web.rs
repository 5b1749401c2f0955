//! JSON API for the presentation layer. Each handler is a thin call into
//! the registry or scheduler; rendering is left to the client.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::decision::{Outcome, ZoneEvent};
use crate::error::Result;
use crate::registry::ZoneRegistry;
use crate::scheduler::{RefreshReport, RefreshScheduler};
use crate::state::SharedState;
use crate::zone::{IrrigationZone, ZoneMode};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ZoneRegistry>,
    pub scheduler: Arc<RefreshScheduler>,
    pub shared: SharedState,
}

#[derive(Debug, Deserialize)]
struct ModeRequest {
    mode: ZoneMode,
}

#[derive(Debug, Serialize)]
struct ToggleResponse {
    applied: bool,
    zone: IrrigationZone,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/zones", get(list_zones))
        .route("/api/zones/{id}", get(get_zone))
        .route("/api/zones/{id}/mode", post(set_mode))
        .route("/api/zones/{id}/irrigation", post(toggle_irrigation))
        .route("/api/refresh", post(refresh))
        .route("/api/status", get(api_status))
        .with_state(state)
}

async fn list_zones(State(state): State<AppState>) -> Json<Vec<IrrigationZone>> {
    Json(state.registry.list().await)
}

async fn get_zone(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<IrrigationZone>> {
    Ok(Json(state.registry.get(&id).await?))
}

async fn set_mode(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ModeRequest>,
) -> Result<Json<IrrigationZone>> {
    let t = state
        .registry
        .transition(&id, &ZoneEvent::ModeToggled(req.mode), OffsetDateTime::now_utc())
        .await?;

    if t.request_prediction {
        // A failed cycle is already in the event log; the mode change stands.
        if let Err(e) = state.scheduler.trigger(&id).await {
            warn!(zone = %id, "mode change: immediate refresh failed: {e}");
        }
        return Ok(Json(state.registry.get(&id).await?));
    }
    Ok(Json(t.zone))
}

async fn toggle_irrigation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ToggleResponse>> {
    let t = state
        .registry
        .transition(&id, &ZoneEvent::IrrigationToggled, OffsetDateTime::now_utc())
        .await?;

    if t.outcome == Outcome::Applied {
        let detail = if t.zone.irrigating {
            "manual irrigation started"
        } else {
            "manual irrigation stopped"
        };
        state.shared.write().await.record_decision(&id, detail);
    }

    Ok(Json(ToggleResponse {
        applied: t.outcome == Outcome::Applied,
        zone: t.zone,
    }))
}

async fn refresh(State(state): State<AppState>) -> Result<Json<RefreshReport>> {
    Ok(Json(state.scheduler.refresh("api").await?))
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let st = state.shared.read().await;
    Json(st.to_status())
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "api listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
