use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, timeout_at},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{ParticipantErrorFrame, ParticipantInboundMessage},
    services::{broadcast::send_message_to_websocket, participant_service},
    state::SharedState,
};

/// Handle the full lifecycle of one participant WebSocket connection.
///
/// The client must send a `join` frame within the identification window. Rejected frames are
/// answered with an error frame and the connection stays open.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    let connection_id = Uuid::new_v4();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let deadline = Instant::now() + state.config().identification_timeout;
    loop {
        let text = match timeout_at(deadline, receiver.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => text,
            Ok(Some(Ok(Message::Ping(payload)))) => {
                let _ = outbound_tx.send(Message::Pong(payload));
                continue;
            }
            Ok(Some(Ok(Message::Close(_)))) => {
                finalize(writer_task, outbound_tx).await;
                return;
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(err))) => {
                warn!(error = %err, "websocket receive error");
                finalize(writer_task, outbound_tx).await;
                return;
            }
            Ok(None) | Err(_) => {
                warn!(connection_id = %connection_id, "websocket join timed out");
                let _ = outbound_tx.send(Message::Close(None));
                finalize(writer_task, outbound_tx).await;
                return;
            }
        };

        let request = match serde_json::from_str::<ParticipantInboundMessage>(&text) {
            Ok(ParticipantInboundMessage::Join(request)) => request,
            Ok(_) => {
                reject(&outbound_tx, "join_required", "the first message must be a join");
                continue;
            }
            Err(err) => {
                reject(&outbound_tx, "invalid_input", err.to_string());
                continue;
            }
        };

        match participant_service::join(&state, connection_id, outbound_tx.clone(), request).await
        {
            Ok(welcome) => {
                if !send_message_to_websocket(&outbound_tx, &welcome) {
                    participant_service::disconnect(&state, connection_id).await;
                    finalize(writer_task, outbound_tx).await;
                    return;
                }
                break;
            }
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "join rejected");
                reject(&outbound_tx, err.code(), err.to_string());
            }
        }
    }

    info!(connection_id = %connection_id, "participant socket joined");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(connection_id = %connection_id, payload = %text, "received participant message");
                let outcome = match serde_json::from_str::<ParticipantInboundMessage>(&text) {
                    Ok(ParticipantInboundMessage::SubmitFffAnswer { sequence }) => {
                        participant_service::submit_fff_answer(&state, connection_id, &sequence)
                            .await
                            .map_err(|err| (err.code(), err.to_string()))
                    }
                    Ok(ParticipantInboundMessage::CastAtaVote { option }) => {
                        participant_service::cast_vote(&state, connection_id, &option)
                            .await
                            .map_err(|err| (err.code(), err.to_string()))
                    }
                    Ok(ParticipantInboundMessage::Join(_)) => {
                        Err(("already_joined", "this connection already joined".to_string()))
                    }
                    Ok(ParticipantInboundMessage::Unknown) => {
                        Err(("unknown_message", "unsupported message type".to_string()))
                    }
                    Err(err) => Err(("invalid_input", err.to_string())),
                };

                if let Err((code, message)) = outcome {
                    debug!(connection_id = %connection_id, code, %message, "participant message rejected");
                    if !reject(&outbound_tx, code, message) {
                        break;
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(connection_id = %connection_id, "participant closed the socket");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "websocket error");
                break;
            }
        }
    }

    participant_service::disconnect(&state, connection_id).await;
    finalize(writer_task, outbound_tx).await;
}

/// Queue an error frame; `false` once the writer is gone.
fn reject(tx: &mpsc::UnboundedSender<Message>, code: &str, message: impl Into<String>) -> bool {
    send_message_to_websocket(tx, &ParticipantErrorFrame::new(code, message))
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejections_are_error_frames() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(reject(&tx, "late_submission", "too late"));

        let Some(Message::Text(text)) = rx.recv().await else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "late_submission");

        drop(rx);
        assert!(!reject(&tx, "late_submission", "too late"));
    }
}
