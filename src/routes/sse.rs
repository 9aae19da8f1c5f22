use std::convert::Infallible;

use axum::{
    Router,
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sse/host",
    tag = "sse",
    responses((status = 200, description = "Host SSE stream mirroring every session frame", content_type = "text/event-stream", body = String))
)]
/// Stream session frames, participant presence and degraded mode changes to the host console.
pub async fn host_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = sse_service::subscribe_host(&state).await;
    info!("New host SSE connection");
    sse_service::to_sse_stream(receiver)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/host", get(host_stream))
}
