use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::{
    dto::sse::{Handshake, ServerEvent},
    state::SharedState,
};

/// Subscribe to the host stream and queue the handshake for the new subscriber.
///
/// The handshake is pushed onto the shared hub, so every host subscriber sees it.
pub async fn subscribe_host(state: &SharedState) -> broadcast::Receiver<ServerEvent> {
    let receiver = state.host_sse().subscribe();
    let handshake = Handshake {
        stream: "host".into(),
        message: "subscribed to session updates".into(),
        degraded: state.is_degraded().await,
    };
    if let Ok(event) = ServerEvent::json(Some("handshake".to_string()), &handshake) {
        state.host_sse().broadcast(event);
    }
    receiver
}

/// Convert a broadcast receiver into an SSE response, forwarding events until the client leaves.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            let mut event = Event::default().data(payload.data);
                            if let Some(name) = payload.event {
                                event = event.event(name);
                            }

                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "host SSE subscriber lagged");
                            continue;
                        }
                    }
                }
            }
        }
        info!("host SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, state::AppState};

    #[tokio::test]
    async fn subscribers_receive_the_handshake() {
        let state = AppState::new(AppConfig::default());
        let mut receiver = subscribe_host(&state).await;

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some("handshake"));
        let value: serde_json::Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(value["stream"], "host");
        assert_eq!(value["degraded"], true);
    }
}
