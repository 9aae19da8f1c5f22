use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use uuid::Uuid;

use crate::{
    dao::models::GameTelemetrySummary, error::AppError, services::session_service,
    state::SharedState, state::telemetry::GameTelemetry,
};

/// Read-only access to archived games.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/telemetry", get(list_telemetry))
        .route("/telemetry/{id}", get(get_telemetry))
}

#[utoipa::path(
    get,
    path = "/telemetry",
    tag = "telemetry",
    responses(
        (status = 200, description = "Archived games, oldest first", body = [GameTelemetrySummary]),
        (status = 503, description = "Archive store unavailable")
    )
)]
/// List archived games.
pub async fn list_telemetry(
    State(state): State<SharedState>,
) -> Result<Json<Vec<GameTelemetrySummary>>, AppError> {
    Ok(Json(session_service::list_telemetry(&state).await?))
}

#[utoipa::path(
    get,
    path = "/telemetry/{id}",
    tag = "telemetry",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Sealed game telemetry", body = GameTelemetry),
        (status = 404, description = "No archive for this session")
    )
)]
/// Sealed telemetry of one archived game.
pub async fn get_telemetry(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GameTelemetry>, AppError> {
    Ok(Json(session_service::get_telemetry(&state, id).await?))
}
