use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::session::{
        ArchiveResponse, CloseAtaResponse, CloseFffResponse, CreateSessionRequest,
        FinishRoundRequest, OfflineVoteRequest, OpenAtaRequest, OpenFffRequest,
        RoundOpenedResponse, SelectContestantsRequest, SelectContestantsResponse, SessionSummary,
    },
    error::AppError,
    services::session_service,
    state::{SharedState, ata::AtaTally, telemetry::RoundTelemetry},
};

/// Host endpoints driving one session from lobby to archive.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/lobby", post(open_lobby))
        .route("/sessions/{id}/fff/select", post(select_contestants))
        .route("/sessions/{id}/fff/open", post(open_fff))
        .route("/sessions/{id}/fff/close", post(close_fff))
        .route("/sessions/{id}/ata/open", post(open_ata))
        .route("/sessions/{id}/ata/vote", post(cast_offline_vote))
        .route("/sessions/{id}/ata/close", post(close_ata))
        .route("/sessions/{id}/rounds/finish", post(finish_round))
        .route("/sessions/{id}/end", post(end_game))
        .route("/sessions/{id}/archive", post(archive_session))
}

/// Create a session waiting in `PreGame`.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    request_body = CreateSessionRequest,
    responses((status = 201, description = "Session created", body = SessionSummary))
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<SessionSummary>), AppError> {
    let summary = session_service::create_session(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// Current view of a live session.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session", body = SessionSummary),
        (status = 404, description = "Unknown or archived session")
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>, AppError> {
    Ok(Json(session_service::get_session(&state, id).await?))
}

/// Open the lobby so participants can join.
#[utoipa::path(
    post,
    path = "/sessions/{id}/lobby",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Lobby opened", body = SessionSummary),
        (status = 409, description = "Session is not in PreGame")
    )
)]
pub async fn open_lobby(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>, AppError> {
    Ok(Json(session_service::open_lobby(&state, id).await?))
}

/// Pick the contestants of the next fastest-finger round.
#[utoipa::path(
    post,
    path = "/sessions/{id}/fff/select",
    tag = "fastest-finger",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = SelectContestantsRequest,
    responses(
        (status = 200, description = "Contestants selected", body = SelectContestantsResponse),
        (status = 409, description = "Selection rejected in the current phase")
    )
)]
pub async fn select_contestants(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SelectContestantsRequest>>,
) -> Result<Json<SelectContestantsResponse>, AppError> {
    let selected = session_service::select_contestants(&state, id, payload.selection).await?;
    Ok(Json(selected))
}

/// Open a fastest-finger question for the selected contestants.
#[utoipa::path(
    post,
    path = "/sessions/{id}/fff/open",
    tag = "fastest-finger",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = OpenFffRequest,
    responses(
        (status = 200, description = "Question open", body = RoundOpenedResponse),
        (status = 409, description = "No contestants selected or a round is already open")
    )
)]
pub async fn open_fff(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<OpenFffRequest>>,
) -> Result<Json<RoundOpenedResponse>, AppError> {
    Ok(Json(session_service::open_fff(&state, id, payload).await?))
}

/// Close the fastest-finger question before its window elapses.
#[utoipa::path(
    post,
    path = "/sessions/{id}/fff/close",
    tag = "fastest-finger",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses((status = 200, description = "Results, or `closed = false` when already closed", body = CloseFffResponse))
)]
pub async fn close_fff(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CloseFffResponse>, AppError> {
    Ok(Json(session_service::close_fff(&state, id).await?))
}

/// Open the audience poll for the current contestant.
#[utoipa::path(
    post,
    path = "/sessions/{id}/ata/open",
    tag = "ask-the-audience",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = OpenAtaRequest,
    responses(
        (status = 200, description = "Poll open", body = RoundOpenedResponse),
        (status = 409, description = "Session is not in MainGame")
    )
)]
pub async fn open_ata(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<OpenAtaRequest>>,
) -> Result<Json<RoundOpenedResponse>, AppError> {
    Ok(Json(session_service::open_ata(&state, id, payload).await?))
}

/// Record the operator vote of an offline poll.
#[utoipa::path(
    post,
    path = "/sessions/{id}/ata/vote",
    tag = "ask-the-audience",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = OfflineVoteRequest,
    responses(
        (status = 200, description = "Updated tally", body = AtaTally),
        (status = 409, description = "No offline poll is open")
    )
)]
pub async fn cast_offline_vote(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<OfflineVoteRequest>>,
) -> Result<Json<AtaTally>, AppError> {
    Ok(Json(
        session_service::cast_offline_vote(&state, id, payload).await?,
    ))
}

/// Close the audience poll before its window elapses.
#[utoipa::path(
    post,
    path = "/sessions/{id}/ata/close",
    tag = "ask-the-audience",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses((status = 200, description = "Poll statistics, or `closed = false` when already closed", body = CloseAtaResponse))
)]
pub async fn close_ata(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CloseAtaResponse>, AppError> {
    Ok(Json(session_service::close_ata(&state, id).await?))
}

/// Close the current main-game round and return to contestant selection.
#[utoipa::path(
    post,
    path = "/sessions/{id}/rounds/finish",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = FinishRoundRequest,
    responses(
        (status = 200, description = "Round telemetry", body = RoundTelemetry),
        (status = 409, description = "No round in progress")
    )
)]
pub async fn finish_round(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<FinishRoundRequest>>,
) -> Result<Json<RoundTelemetry>, AppError> {
    Ok(Json(session_service::finish_round(&state, id, payload).await?))
}

/// End the game, seal its telemetry and archive it.
#[utoipa::path(
    post,
    path = "/sessions/{id}/end",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Game archived", body = ArchiveResponse),
        (status = 503, description = "Archival failed; retry with /archive")
    )
)]
pub async fn end_game(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ArchiveResponse>, AppError> {
    Ok(Json(session_service::end_game(&state, id).await?))
}

/// Retry archival of an ended session. Idempotent.
#[utoipa::path(
    post,
    path = "/sessions/{id}/archive",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Game archived", body = ArchiveResponse),
        (status = 409, description = "Game has not ended"),
        (status = 503, description = "Archive store unavailable")
    )
)]
pub async fn archive_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ArchiveResponse>, AppError> {
    Ok(Json(session_service::archive_session(&state, id).await?))
}
