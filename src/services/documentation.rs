use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Trivia Live Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::host_stream,
        crate::routes::websocket::ws_handler,
        crate::routes::sessions::create_session,
        crate::routes::sessions::get_session,
        crate::routes::sessions::open_lobby,
        crate::routes::sessions::select_contestants,
        crate::routes::sessions::open_fff,
        crate::routes::sessions::close_fff,
        crate::routes::sessions::open_ata,
        crate::routes::sessions::cast_offline_vote,
        crate::routes::sessions::close_ata,
        crate::routes::sessions::finish_round,
        crate::routes::sessions::end_game,
        crate::routes::sessions::archive_session,
        crate::routes::telemetry::list_telemetry,
        crate::routes::telemetry::get_telemetry,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::phase::GameStateType,
            crate::dto::phase::GameStateData,
            crate::dto::ws::ParticipantInboundMessage,
            crate::dto::ws::JoinRequest,
            crate::dto::ws::ParticipantErrorFrame,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::SessionFrameEvent,
            crate::state::eligibility::Eligibility,
            crate::state::participant::ParticipantState,
            crate::state::participant::DeviceInfo,
            crate::dto::session::SelectContestantsRequest,
            crate::dto::session::SelectContestantsResponse,
            crate::state::telemetry::RoundTelemetry,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events stream for the host console"),
        (name = "participants", description = "WebSocket channel for participant devices"),
        (name = "sessions", description = "Session lifecycle driven by the host"),
        (name = "fastest-finger", description = "Fastest-finger qualification rounds"),
        (name = "ask-the-audience", description = "Audience poll lifeline"),
        (name = "telemetry", description = "Archived game telemetry"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_session_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/sessions/{id}/fff/open"));
        assert!(doc.paths.paths.contains_key("/telemetry/{id}"));
        assert!(doc.paths.paths.contains_key("/sse/host"));
    }

    #[test]
    fn participant_ids_are_documented_as_uuids() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let schemas = &doc["components"]["schemas"];
        assert_eq!(
            schemas["SelectContestantsResponse"]["properties"]["selected"]["items"]["format"],
            "uuid"
        );
        assert_eq!(
            schemas["RoundTelemetry"]["properties"]["contestant_id"]["format"],
            "uuid"
        );
        assert!(schemas.get("SelectContestantsRequest").is_some());
    }
}
