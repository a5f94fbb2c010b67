//! HTTP route definitions

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{RoundConfig, RoundError, ScoringKind, Surface, Vec3};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/rounds", post(create_round_handler))
        .route("/rounds/:id/terrain", get(terrain_probe_handler))
        .route("/ws", get(ws_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.client_origin))
        .with_state(state)
}

/// CORS for the configured origins; `*` allows any
fn cors_layer(client_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if client_origin.trim() == "*" {
        return cors.allow_origin(Any);
    }

    let allowed_origins: Vec<HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    cors.allow_origin(allowed_origins)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_rounds: usize,
    active_players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_rounds: state.rounds.active_rounds(),
        active_players: state.rounds.total_players(),
    })
}

// ============================================================================
// Round endpoints
// ============================================================================

#[derive(Deserialize)]
struct CreateRoundRequest {
    course: String,
    #[serde(default)]
    scoring: ScoringKind,
    /// Putts left this close to the pin are conceded (m)
    #[serde(default)]
    gimme_radius: f32,
}

#[derive(Serialize)]
struct CreateRoundResponse {
    round_id: Uuid,
    course: String,
    ws_path: String,
}

async fn create_round_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateRoundRequest>,
) -> Result<Json<CreateRoundResponse>, AppError> {
    let config = RoundConfig {
        gimme_radius: req.gimme_radius,
        ..state.round_config(req.scoring)
    };
    let handle = state
        .rounds
        .launch(&req.course, state.physics.clone(), config)
        .await?;

    info!(round_id = %handle.id, course = %req.course, scoring = ?req.scoring, "Round created");

    Ok(Json(CreateRoundResponse {
        round_id: handle.id,
        course: req.course,
        ws_path: format!("/ws?round={}", handle.id),
    }))
}

#[derive(Deserialize)]
struct ProbeQuery {
    x: f32,
    #[serde(default)]
    y: Option<f32>,
    z: f32,
}

#[derive(Serialize)]
struct ProbeResponse {
    hit: bool,
    height: Option<f32>,
    normal: Option<Vec3>,
    surface: Option<Surface>,
}

/// Terrain under a point on the round's current hole. Without `y` the probe
/// starts high above the hole's tee and pin.
async fn terrain_probe_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ProbeQuery>,
) -> Result<Json<ProbeResponse>, AppError> {
    let round = state.rounds.handle(&id)?;

    let hole = round.current_hole();
    let (min, max) = hole.terrain.bounds();
    let y = query.y.unwrap_or(hole.tee.y.max(hole.pin.y) + 1000.0);
    let on_mesh = (min.x..=max.x).contains(&query.x) && (min.y..=max.y).contains(&query.z);
    let hit = if on_mesh {
        round.probe_terrain(&Vec3::new(query.x, y, query.z))
    } else {
        None
    };

    Ok(Json(ProbeResponse {
        hit: hit.is_some(),
        height: hit.map(|h| h.height),
        normal: hit.map(|h| h.normal),
        surface: hit.map(|h| h.surface),
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RoundError> for AppError {
    fn from(err: RoundError) -> Self {
        match err {
            RoundError::Course(e) => AppError::BadRequest(e.to_string()),
            RoundError::NotFound(id) => AppError::NotFound(format!("round {id}")),
            RoundError::Closed(id) => AppError::Internal(format!("round {id} has shut down")),
            RoundError::LoadTask(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
