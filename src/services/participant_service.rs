use axum::extract::ws::Message;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info};
use validator::Validate;

use crate::{
    dto::{
        phase::{GameStateData, GameStateType},
        ws::JoinRequest,
    },
    error::ServiceError,
    services::session_service::mutate,
    state::{
        ParticipantConnection, SharedState,
        participant::ConnectionId,
        question::{AnswerOption, AnswerSequence},
    },
};

fn binding(
    state: &SharedState,
    connection_id: ConnectionId,
) -> Result<ParticipantConnection, ServiceError> {
    state
        .connections()
        .get(&connection_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| ServiceError::NotFound("connection has not joined a session".into()))
}

/// Register (or reconnect) the participant behind a socket and bind the socket to it.
///
/// Returns the frame welcoming the participant into the current phase.
pub async fn join(
    state: &SharedState,
    connection_id: ConnectionId,
    tx: mpsc::UnboundedSender<Message>,
    request: JoinRequest,
) -> Result<GameStateData, ServiceError> {
    request
        .validate()
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    let session_id = request.session_id;
    let rejoin = match (request.participant_id, request.reconnect_token) {
        (Some(participant_id), Some(token)) => Some((participant_id, token)),
        (Some(_), None) => {
            return Err(ServiceError::InvalidInput(
                "reconnecting requires the reconnect_token from the welcome frame".into(),
            ));
        }
        (None, _) => None,
    };

    mutate(state, session_id, |slot, now| {
        let session = &mut slot.session;
        let participant = match rejoin {
            Some((participant_id, token)) => {
                session.reconnect(participant_id, token, connection_id, now)?
            }
            None => session.join(
                &request.display_name,
                Some(connection_id),
                request.device,
                now,
            )?,
        };

        state.bind_connection(
            connection_id,
            ParticipantConnection {
                session_id,
                participant_id: participant.id,
                tx,
            },
        );

        let eligibility = session.eligibility(participant.id)?;
        let presented = GameStateType::derive(session.status(), session.last_round());
        Ok(GameStateData::new(
            presented,
            format!("Welcome, {}", participant.display_name),
            json!({
                "session_id": session_id,
                "participant_id": participant.id,
                "reconnect_token": participant.reconnect_token,
                "display_name": participant.display_name,
                "participant_state": participant.state,
                "eligibility": eligibility,
            }),
            now,
        ))
    })
    .await
}

/// Forward a fastest-finger ordering received on a socket.
pub async fn submit_fff_answer(
    state: &SharedState,
    connection_id: ConnectionId,
    sequence: &str,
) -> Result<(), ServiceError> {
    let bound = binding(state, connection_id)?;
    let sequence = sequence
        .parse::<AnswerSequence>()
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;

    mutate(state, bound.session_id, |slot, now| {
        slot.session
            .submit_fff_answer(bound.participant_id, sequence, now)
    })
    .await?;
    Ok(())
}

/// Forward an audience vote received on a socket.
pub async fn cast_vote(
    state: &SharedState,
    connection_id: ConnectionId,
    option: &str,
) -> Result<(), ServiceError> {
    let bound = binding(state, connection_id)?;
    let option = option
        .parse::<AnswerOption>()
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;

    mutate(state, bound.session_id, |slot, now| {
        slot.session.cast_vote(bound.participant_id, option, now)
    })
    .await?;
    Ok(())
}

/// Report a closed socket. Unknown or already replaced sockets are ignored.
pub async fn disconnect(state: &SharedState, connection_id: ConnectionId) {
    let Some((_, bound)) = state.connections().remove(&connection_id) else {
        return;
    };

    match mutate(state, bound.session_id, |slot, now| {
        Ok(slot.session.disconnect(connection_id, now))
    })
    .await
    {
        Ok(Some(participant_id)) => {
            info!(connection_id = %connection_id, participant_id = %participant_id, "participant socket closed");
        }
        Ok(None) => {}
        Err(err) => debug!(connection_id = %connection_id, error = %err, "disconnect ignored"),
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::AppConfig,
        dto::session::CreateSessionRequest,
        services::session_service,
        state::{
            AppState, error::GameError, participant::DeviceInfo, participant::ParticipantState,
        },
    };

    async fn open_session(state: &SharedState) -> Uuid {
        let summary = session_service::create_session(
            state,
            CreateSessionRequest {
                host_name: "Host".into(),
            },
        )
        .await
        .unwrap();
        session_service::open_lobby(state, summary.id).await.unwrap();
        summary.id
    }

    fn join_request(session_id: Uuid, name: &str) -> JoinRequest {
        JoinRequest {
            session_id,
            display_name: name.into(),
            participant_id: None,
            reconnect_token: None,
            device: DeviceInfo::default(),
        }
    }

    #[tokio::test]
    async fn join_binds_the_socket_and_welcomes() {
        let state = AppState::new(AppConfig::default());
        let session_id = open_session(&state).await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();

        let welcome = join(&state, connection_id, tx, join_request(session_id, "Ada"))
            .await
            .unwrap();
        assert_eq!(welcome.state, GameStateType::WaitingLobby);
        assert_eq!(welcome.data["eligibility"]["is_spectator"], true);
        assert_eq!(state.session_senders(session_id).len(), 1);

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = join(&state, Uuid::new_v4(), tx, join_request(session_id, " ada "))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Game(GameError::DuplicateName(_))));
        assert_eq!(state.session_senders(session_id).len(), 1);
    }

    #[tokio::test]
    async fn unjoined_sockets_cannot_submit() {
        let state = AppState::new(AppConfig::default());
        let err = submit_fff_answer(&state, Uuid::new_v4(), "A,B,C,D")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn malformed_payloads_are_invalid_input() {
        let state = AppState::new(AppConfig::default());
        let session_id = open_session(&state).await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();
        join(&state, connection_id, tx, join_request(session_id, "Ada"))
            .await
            .unwrap();

        let err = cast_vote(&state, connection_id, "E").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        // well formed but no poll open
        let err = cast_vote(&state, connection_id, "a").await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Game(GameError::IneligibleParticipant(_))
                | ServiceError::Game(GameError::LateSubmission)
        ));
    }

    #[tokio::test]
    async fn disconnect_then_reconnect_returns_to_lobby() {
        let state = AppState::new(AppConfig::default());
        let session_id = open_session(&state).await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let first = Uuid::new_v4();
        let welcome = join(&state, first, tx, join_request(session_id, "Ada"))
            .await
            .unwrap();
        let participant_id: Uuid =
            serde_json::from_value(welcome.data["participant_id"].clone()).unwrap();
        let token: Uuid =
            serde_json::from_value(welcome.data["reconnect_token"].clone()).unwrap();

        disconnect(&state, first).await;
        {
            let handle = state.session(session_id).unwrap();
            let slot = handle.lock().await;
            let participant = slot.session.participants().get(participant_id).unwrap();
            assert_eq!(participant.state, ParticipantState::Disconnected);
        }

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut request = join_request(session_id, "Ada");
        request.participant_id = Some(participant_id);
        request.reconnect_token = Some(token);
        let welcome = join(&state, Uuid::new_v4(), tx, request).await.unwrap();
        assert_eq!(welcome.data["participant_state"], "Lobby");
        assert_eq!(welcome.data["participant_id"], participant_id.to_string());
    }

    #[tokio::test]
    async fn known_participant_id_alone_cannot_take_over() {
        let state = AppState::new(AppConfig::default());
        let session_id = open_session(&state).await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let owner = Uuid::new_v4();
        let welcome = join(&state, owner, tx, join_request(session_id, "Ada"))
            .await
            .unwrap();
        let participant_id: Uuid =
            serde_json::from_value(welcome.data["participant_id"].clone()).unwrap();
        let token: Uuid =
            serde_json::from_value(welcome.data["reconnect_token"].clone()).unwrap();

        let mut request = join_request(session_id, "Ada");
        request.participant_id = Some(participant_id);
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = join(&state, Uuid::new_v4(), tx, request).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        // the owner is still connected, even with the right token
        let mut request = join_request(session_id, "Ada");
        request.participant_id = Some(participant_id);
        request.reconnect_token = Some(token);
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = join(&state, Uuid::new_v4(), tx, request).await.unwrap_err();
        assert!(matches!(err, ServiceError::Game(GameError::Conflict(_))));

        disconnect(&state, owner).await;
        let mut request = join_request(session_id, "Ada");
        request.participant_id = Some(participant_id);
        request.reconnect_token = Some(Uuid::new_v4());
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = join(&state, Uuid::new_v4(), tx, request).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Game(GameError::IneligibleParticipant(_))
        ));
        assert_eq!(state.session_senders(session_id).len(), 0);
    }
}
