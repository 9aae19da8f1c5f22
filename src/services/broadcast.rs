//! Fan-out of accepted session events to participant sockets and the host stream.
//!
//! The mapping from [`DomainEvent`] to [`GameStateData`] frames is pure; delivery is
//! best-effort and nothing in the session depends on it.

use std::time::SystemTime;

use axum::extract::ws::Message;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dto::{
        phase::{GameStateData, GameStateType},
        session::FffResultsView,
        sse::{ServerEvent, SessionFrameEvent, SystemStatus},
    },
    state::{
        SharedState, SseHub,
        ata::OFFLINE_VOTER,
        participant::ParticipantId,
        session::{DomainEvent, LiveSession},
    },
};

/// Who receives a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every socket of the session, mirrored on the host stream.
    Session,
    /// One participant, mirrored on the host stream.
    Participant(ParticipantId),
    /// Host stream only.
    Host,
}

/// A frame and its recipients.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundFrame {
    /// Recipients.
    pub audience: Audience,
    /// Payload.
    pub frame: GameStateData,
}

impl OutboundFrame {
    fn new(audience: Audience, frame: GameStateData) -> Self {
        Self { audience, frame }
    }
}

fn is_round_event(event: &DomainEvent) -> bool {
    matches!(
        event,
        DomainEvent::FffOpened { .. }
            | DomainEvent::FffClosed { .. }
            | DomainEvent::AtaOpened { .. }
            | DomainEvent::AtaClosed { .. }
            | DomainEvent::RoundFinished { .. }
            | DomainEvent::GameOver { .. }
    )
}

fn phase_message(state: GameStateType) -> &'static str {
    match state {
        GameStateType::InitialLobby => "The game will start soon",
        GameStateType::WaitingLobby => "Waiting for the host to start the first round",
        GameStateType::FffLobby => "Get ready for fastest finger first",
        GameStateType::FffQuestion => "Put the answers in the right order",
        GameStateType::FffCalculating => "Answer received, calculating results",
        GameStateType::FffNoResponse => "Nobody answered in time",
        GameStateType::FffResults => "Fastest finger first results",
        GameStateType::FffWinner => "You were the fastest! Take the hot seat",
        GameStateType::AtaReady => "The contestant is playing",
        GameStateType::AtaVoting => "Ask the audience: cast your vote",
        GameStateType::AtaVoteSubmitted => "Vote received",
        GameStateType::AtaResults => "Ask the audience results",
        GameStateType::GameComplete => "Thanks for playing",
    }
}

/// Map a drained batch of events to frames.
///
/// A bare phase change only produces a frame when no round event of the same batch already
/// describes it.
pub fn frames_for(
    events: &[DomainEvent],
    session: &LiveSession,
    now: SystemTime,
) -> Vec<OutboundFrame> {
    let covered = events.iter().any(is_round_event);
    let last_round = session.last_round();
    let frame = |state: GameStateType, data| GameStateData::new(state, phase_message(state), data, now);
    let mut frames = Vec::new();

    for event in events {
        match event {
            DomainEvent::PhaseChanged { status } => {
                let state = GameStateType::derive(*status, last_round);
                let audience = if covered {
                    Audience::Host
                } else {
                    Audience::Session
                };
                frames.push(OutboundFrame::new(
                    audience,
                    frame(state, json!({ "status": status })),
                ));
            }
            DomainEvent::ParticipantJoined {
                participant_id,
                display_name,
                reconnected,
            } => {
                let state = GameStateType::derive(session.status(), last_round);
                frames.push(OutboundFrame::new(
                    Audience::Host,
                    GameStateData::new(
                        state,
                        format!("{display_name} joined"),
                        json!({
                            "participant_id": participant_id,
                            "display_name": display_name,
                            "reconnected": reconnected,
                            "participants": session.participants().len(),
                        }),
                        now,
                    ),
                ));
            }
            DomainEvent::ParticipantLeft { participant_id } => {
                let state = GameStateType::derive(session.status(), last_round);
                frames.push(OutboundFrame::new(
                    Audience::Host,
                    GameStateData::new(
                        state,
                        "participant disconnected",
                        json!({ "participant_id": participant_id }),
                        now,
                    ),
                ));
            }
            DomainEvent::ContestantsSelected {
                selected,
                not_selected,
            } => {
                frames.push(OutboundFrame::new(
                    Audience::Session,
                    frame(GameStateType::FffLobby, json!({ "selected": selected })),
                ));
                for id in selected {
                    frames.push(OutboundFrame::new(
                        Audience::Participant(*id),
                        GameStateData::new(
                            GameStateType::FffLobby,
                            "You have been selected for fastest finger first",
                            json!({ "selected": true }),
                            now,
                        ),
                    ));
                }
                for id in not_selected {
                    frames.push(OutboundFrame::new(
                        Audience::Participant(*id),
                        GameStateData::new(
                            GameStateType::FffLobby,
                            "You were not selected for this round",
                            json!({ "selected": false }),
                            now,
                        ),
                    ));
                }
            }
            DomainEvent::FffOpened {
                round_id,
                question,
                time_limit,
            } => frames.push(OutboundFrame::new(
                Audience::Session,
                frame(
                    GameStateType::FffQuestion,
                    json!({
                        "round_id": round_id,
                        "question_id": question.id,
                        "text": question.text,
                        "options": question.options,
                        "time_limit_ms": time_limit.as_millis() as u64,
                    }),
                ),
            )),
            DomainEvent::FffAnswerAccepted { answer } => frames.push(OutboundFrame::new(
                Audience::Participant(answer.participant_id),
                frame(
                    GameStateType::FffCalculating,
                    json!({ "time_elapsed_ms": answer.time_elapsed_ms }),
                ),
            )),
            DomainEvent::FffClosed { results, stats } => {
                let state = if results.answers.is_empty() {
                    GameStateType::FffNoResponse
                } else {
                    GameStateType::FffResults
                };
                let winner_name = results
                    .winner
                    .and_then(|id| session.participants().get(id).ok())
                    .map(|p| p.display_name.clone());
                frames.push(OutboundFrame::new(
                    Audience::Session,
                    frame(
                        state,
                        json!({
                            "results": FffResultsView::from(results),
                            "stats": stats,
                            "winner_name": winner_name,
                        }),
                    ),
                ));
                if let Some(winner) = results.winner {
                    frames.push(OutboundFrame::new(
                        Audience::Participant(winner),
                        frame(
                            GameStateType::FffWinner,
                            json!({ "time_elapsed_ms": stats.winner_time_ms }),
                        ),
                    ));
                }
            }
            DomainEvent::AtaOpened {
                round_id,
                question,
                window,
                mode,
            } => frames.push(OutboundFrame::new(
                Audience::Session,
                frame(
                    GameStateType::AtaVoting,
                    json!({
                        "round_id": round_id,
                        "question_id": question.id,
                        "number": question.number,
                        "text": question.text,
                        "options": question.options,
                        "window_ms": window.as_millis() as u64,
                        "mode": mode,
                    }),
                ),
            )),
            DomainEvent::AtaVoteAccepted {
                participant_id,
                tally,
            } => {
                if *participant_id != OFFLINE_VOTER {
                    frames.push(OutboundFrame::new(
                        Audience::Participant(*participant_id),
                        frame(GameStateType::AtaVoteSubmitted, json!({})),
                    ));
                }
                frames.push(OutboundFrame::new(
                    Audience::Host,
                    GameStateData::new(
                        GameStateType::AtaVoting,
                        "live tally",
                        json!({ "tally": tally }),
                        now,
                    ),
                ));
            }
            DomainEvent::AtaClosed { stats } => frames.push(OutboundFrame::new(
                Audience::Session,
                frame(GameStateType::AtaResults, json!({ "results": stats })),
            )),
            DomainEvent::RoundFinished { round } => frames.push(OutboundFrame::new(
                Audience::Session,
                frame(
                    GameStateType::FffLobby,
                    json!({
                        "round_number": round.round_number,
                        "outcome": round.outcome,
                        "winnings": round.winnings,
                    }),
                ),
            )),
            DomainEvent::GameOver { telemetry } => frames.push(OutboundFrame::new(
                Audience::Session,
                frame(
                    GameStateType::GameComplete,
                    json!({
                        "total_rounds": telemetry.total_rounds,
                        "total_participants": telemetry.total_participants,
                        "total_duration_ms": telemetry.total_duration_ms,
                    }),
                ),
            )),
        }
    }

    frames
}

/// Serialize a payload and push it onto a participant socket.
///
/// Returns `false` when the socket writer is gone.
pub fn send_message_to_websocket<T>(tx: &mpsc::UnboundedSender<Message>, value: &T) -> bool
where
    T: ?Sized + serde::Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            return true;
        }
    };
    tx.send(Message::Text(payload.into())).is_ok()
}

fn mirror_to_host(hub: &SseHub, session_id: Uuid, frame: &OutboundFrame) {
    let participant_id = match frame.audience {
        Audience::Participant(id) => Some(id),
        Audience::Session | Audience::Host => None,
    };
    let payload = SessionFrameEvent {
        session_id,
        participant_id,
        frame: frame.frame.clone(),
    };
    match ServerEvent::json(Some("frame".to_string()), &payload) {
        Ok(event) => hub.broadcast(event),
        Err(err) => warn!(error = %err, "failed to serialize host frame"),
    }
}

/// Deliver frames to the sockets of `session_id` and mirror them on the host stream.
pub fn dispatch(state: &SharedState, session_id: Uuid, frames: &[OutboundFrame]) {
    for frame in frames {
        match frame.audience {
            Audience::Session => {
                for tx in state.session_senders(session_id) {
                    send_message_to_websocket(&tx, &frame.frame);
                }
            }
            Audience::Participant(participant_id) => {
                if let Some(tx) = state.participant_sender(participant_id) {
                    send_message_to_websocket(&tx, &frame.frame);
                }
            }
            Audience::Host => {}
        }
        mirror_to_host(state.host_sse(), session_id, frame);
    }
}

/// Map and deliver the events drained from `session`.
pub fn publish(state: &SharedState, session: &LiveSession, events: &[DomainEvent], now: SystemTime) {
    if events.is_empty() {
        return;
    }
    let frames = frames_for(events, session, now);
    dispatch(state, session.id(), &frames);
}

/// Tell the host stream that degraded mode was entered or left.
pub fn broadcast_system_status(state: &SharedState, degraded: bool) {
    if let Ok(event) = ServerEvent::json(Some("system_status".to_string()), &SystemStatus { degraded }) {
        state.host_sse().broadcast(event);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::state::{
        participant::DeviceInfo,
        question::FffQuestion,
        session::ContestantSelection,
    };

    fn at(ms: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_millis(1_000_000 + ms)
    }

    fn lobby_with(names: &[&str]) -> (LiveSession, Vec<ParticipantId>) {
        let mut session = LiveSession::new("Host", at(0));
        session.open_lobby(at(0)).unwrap();
        let ids = names
            .iter()
            .map(|name| {
                session
                    .join(name, Some(Uuid::new_v4()), DeviceInfo::default(), at(1))
                    .unwrap()
                    .id
            })
            .collect();
        session.drain_events();
        (session, ids)
    }

    #[test]
    fn unselected_participants_get_an_individual_frame() {
        let (mut session, ids) = lobby_with(&["Ada", "Bob"]);
        session.begin_fff_selection().unwrap();
        session
            .select_contestants(
                ContestantSelection::Explicit {
                    participant_ids: vec![ids[0]],
                },
                at(2),
            )
            .unwrap();
        let events = session.drain_events();
        let frames = frames_for(&events, &session, at(2));

        let to_bob = frames
            .iter()
            .find(|f| f.audience == Audience::Participant(ids[1]))
            .unwrap();
        assert_eq!(to_bob.frame.data["selected"], false);
        assert!(frames.iter().any(|f| f.audience == Audience::Session
            && f.frame.state == GameStateType::FffLobby));
    }

    #[test]
    fn closing_with_a_winner_addresses_the_winner() {
        let (mut session, ids) = lobby_with(&["Ada", "Bob"]);
        session.begin_fff_selection().unwrap();
        session
            .select_contestants(ContestantSelection::All, at(2))
            .unwrap();
        let question = FffQuestion {
            id: "q1".into(),
            text: "Order".into(),
            options: ["1", "2", "3", "4"].map(String::from).to_vec(),
            correct_order: "B,A,D,C".parse().unwrap(),
        };
        session
            .open_fff(question, Duration::from_secs(20), at(10))
            .unwrap();
        session
            .submit_fff_answer(ids[1], "B,A,D,C".parse().unwrap(), at(3_510))
            .unwrap();
        session.close_fff(None, at(20_010)).unwrap();

        let events = session.drain_events();
        let frames = frames_for(&events, &session, at(20_010));

        let calculating = frames
            .iter()
            .find(|f| f.frame.state == GameStateType::FffCalculating)
            .unwrap();
        assert_eq!(calculating.audience, Audience::Participant(ids[1]));

        let winner = frames
            .iter()
            .find(|f| f.frame.state == GameStateType::FffWinner)
            .unwrap();
        assert_eq!(winner.audience, Audience::Participant(ids[1]));

        let results = frames
            .iter()
            .find(|f| f.audience == Audience::Session && f.frame.state == GameStateType::FffResults)
            .unwrap();
        assert_eq!(results.frame.data["winner_name"], "Bob");
        assert!(
            frames
                .iter()
                .filter(|f| f.audience == Audience::Session)
                .all(|f| f.frame.data.get("status").is_none()),
            "phase changes covered by round events stay on the host stream"
        );
    }

    #[tokio::test]
    async fn dispatch_reaches_bound_sockets_and_the_host() {
        use crate::{config::AppConfig, state::{AppState, ParticipantConnection}};

        let state = AppState::new(AppConfig::default());
        let mut host = state.host_sse().subscribe();
        let session_id = Uuid::new_v4();
        let participant_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.bind_connection(
            Uuid::new_v4(),
            ParticipantConnection {
                session_id,
                participant_id,
                tx,
            },
        );

        let frame = GameStateData::new(
            GameStateType::WaitingLobby,
            "hello",
            json!({}),
            SystemTime::UNIX_EPOCH,
        );
        dispatch(
            &state,
            session_id,
            &[
                OutboundFrame::new(Audience::Session, frame.clone()),
                OutboundFrame::new(Audience::Host, frame),
            ],
        );

        assert!(matches!(rx.recv().await, Some(Message::Text(_))));
        assert!(rx.try_recv().is_err());
        assert_eq!(host.recv().await.unwrap().event.as_deref(), Some("frame"));
        assert_eq!(host.recv().await.unwrap().event.as_deref(), Some("frame"));
    }
}
