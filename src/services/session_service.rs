//! Host-driven session lifecycle.
//!
//! Every operation locks the session, runs the synchronous aggregate operation with the current
//! time, fans the drained events out and releases the lock. Round windows are enforced twice: the
//! engines reject late submissions on their own, and a cancellable timer closes the round when
//! the window elapses. Whichever of the timer and the host closes first does the work.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use tokio::{task::AbortHandle, time::sleep};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        archive_store::ArchiveStore,
        models::{GameTelemetrySummary, SessionArchive, SessionEntity},
        storage::StorageError,
    },
    dto::session::{
        ArchiveResponse, CloseAtaResponse, CloseFffResponse, CreateSessionRequest,
        FffResultsView, FinishRoundRequest, OfflineVoteRequest, OpenAtaRequest, OpenFffRequest,
        RoundOpenedResponse, SelectContestantsResponse, SessionSummary,
    },
    error::ServiceError,
    services::broadcast,
    state::{
        SessionSlot, SharedState,
        ata::AtaTally,
        error::GameError,
        session::{ContestantSelection, DomainEvent, LiveSession, OpenedRound},
        state_machine::SessionStatus,
        telemetry::{GameTelemetry, RoundTelemetry},
    },
};

/// Which engine a timer closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundKind {
    Fff,
    Ata,
}

/// Run `op` on the session under its lock and publish what it accepted.
pub(crate) async fn mutate<T, F>(
    state: &SharedState,
    session_id: Uuid,
    op: F,
) -> Result<T, ServiceError>
where
    F: FnOnce(&mut SessionSlot, SystemTime) -> Result<T, GameError>,
{
    let handle = state.session(session_id)?;
    let mut slot = handle.lock().await;
    let now = SystemTime::now();

    let result = op(&mut *slot, now);
    let events = slot.session.drain_events();
    broadcast::publish(state, &slot.session, &events, now);

    if events
        .iter()
        .any(|event| matches!(event, DomainEvent::PhaseChanged { .. }))
    {
        persist_snapshot(state, SessionEntity::from_session(&slot.session, now));
    }
    drop(slot);

    Ok(result?)
}

/// Best-effort write of the live session row.
fn persist_snapshot(state: &SharedState, entity: SessionEntity) {
    let state = state.clone();
    tokio::spawn(async move {
        let Some(store) = state.archive_store().await else {
            return;
        };
        let session_id = entity.id;
        if let Err(err) = store.save_session(entity).await {
            warn!(session_id = %session_id, error = %err, "failed to persist session snapshot");
        }
    });
}

fn spawn_round_timer(
    state: SharedState,
    session_id: Uuid,
    kind: RoundKind,
    opened: OpenedRound,
) -> AbortHandle {
    let delay = opened
        .deadline
        .duration_since(SystemTime::now())
        .unwrap_or(Duration::ZERO);
    tokio::spawn(async move {
        sleep(delay).await;
        if let Err(err) = close_expired_round(&state, session_id, kind, opened.round_id).await {
            warn!(
                session_id = %session_id,
                round_id = %opened.round_id,
                error = %err,
                "failed to close round on timer"
            );
        }
    })
    .abort_handle()
}

async fn close_expired_round(
    state: &SharedState,
    session_id: Uuid,
    kind: RoundKind,
    round_id: Uuid,
) -> Result<(), ServiceError> {
    let closed = mutate(state, session_id, |slot, now| {
        slot.release_timer(round_id);
        match kind {
            RoundKind::Fff => Ok(slot.session.close_fff(Some(round_id), now)?.is_some()),
            RoundKind::Ata => Ok(slot.session.close_ata(Some(round_id), now)?.is_some()),
        }
    })
    .await?;

    if closed {
        info!(session_id = %session_id, round_id = %round_id, kind = ?kind, "round window elapsed");
    }
    Ok(())
}

/// Create a session in `PreGame`.
pub async fn create_session(
    state: &SharedState,
    request: CreateSessionRequest,
) -> Result<SessionSummary, ServiceError> {
    let now = SystemTime::now();
    let session = LiveSession::new(request.host_name.trim(), now);
    let entity = SessionEntity::from_session(&session, now);
    let summary = SessionSummary::from(&session);
    state.insert_session(session);
    persist_snapshot(state, entity);

    info!(session_id = %summary.id, host = %summary.host_name, "session created");
    Ok(summary)
}

/// Host view of a live session.
pub async fn get_session(state: &SharedState, session_id: Uuid) -> Result<SessionSummary, ServiceError> {
    let handle = state.session(session_id)?;
    let slot = handle.lock().await;
    Ok(SessionSummary::from(&slot.session))
}

/// `PreGame → Lobby`.
pub async fn open_lobby(state: &SharedState, session_id: Uuid) -> Result<SessionSummary, ServiceError> {
    mutate(state, session_id, |slot, now| {
        slot.session.open_lobby(now)?;
        Ok(SessionSummary::from(&slot.session))
    })
    .await
}

/// Pick the next fastest-finger contestants, leaving the lobby first if needed.
pub async fn select_contestants(
    state: &SharedState,
    session_id: Uuid,
    selection: ContestantSelection,
) -> Result<SelectContestantsResponse, ServiceError> {
    mutate(state, session_id, |slot, now| {
        if slot.session.status() == SessionStatus::Lobby {
            slot.session.begin_fff_selection()?;
        }
        let selected = slot.session.select_contestants(selection, now)?;
        Ok(SelectContestantsResponse { selected })
    })
    .await
}

/// Open a fastest-finger question and arm its timer.
pub async fn open_fff(
    state: &SharedState,
    session_id: Uuid,
    request: OpenFffRequest,
) -> Result<RoundOpenedResponse, ServiceError> {
    let question = request.question().map_err(ServiceError::InvalidInput)?;
    let time_limit = request
        .time_limit()
        .unwrap_or(state.config().fff_time_limit);
    let timer_state = state.clone();

    mutate(state, session_id, move |slot, now| {
        let opened = slot.session.open_fff(question, time_limit, now)?;
        let handle = spawn_round_timer(timer_state, session_id, RoundKind::Fff, opened);
        slot.arm_timer(opened.round_id, handle);
        Ok(opened.into())
    })
    .await
}

/// Close the open fastest-finger question now.
pub async fn close_fff(state: &SharedState, session_id: Uuid) -> Result<CloseFffResponse, ServiceError> {
    mutate(state, session_id, |slot, now| {
        slot.disarm_timer();
        let results = slot.session.close_fff(None, now)?;
        Ok(CloseFffResponse {
            closed: results.is_some(),
            results: results.as_ref().map(FffResultsView::from),
        })
    })
    .await
}

/// Open an audience poll and arm its timer.
pub async fn open_ata(
    state: &SharedState,
    session_id: Uuid,
    request: OpenAtaRequest,
) -> Result<RoundOpenedResponse, ServiceError> {
    let window = request.window().unwrap_or(state.config().ata_window);
    let question = request.question();
    let mode = request.mode;
    let timer_state = state.clone();

    mutate(state, session_id, move |slot, now| {
        let opened = slot.session.open_ata(question, window, mode, now)?;
        let handle = spawn_round_timer(timer_state, session_id, RoundKind::Ata, opened);
        slot.arm_timer(opened.round_id, handle);
        Ok(opened.into())
    })
    .await
}

/// Operator vote of an offline poll.
pub async fn cast_offline_vote(
    state: &SharedState,
    session_id: Uuid,
    request: OfflineVoteRequest,
) -> Result<AtaTally, ServiceError> {
    let option = request.option().map_err(ServiceError::InvalidInput)?;
    mutate(state, session_id, |slot, now| {
        slot.session.cast_offline_vote(option, now)
    })
    .await
}

/// Close the open audience poll now.
pub async fn close_ata(state: &SharedState, session_id: Uuid) -> Result<CloseAtaResponse, ServiceError> {
    mutate(state, session_id, |slot, now| {
        slot.disarm_timer();
        let results = slot.session.close_ata(None, now)?;
        Ok(CloseAtaResponse {
            closed: results.is_some(),
            results,
        })
    })
    .await
}

/// End the current contestant playthrough.
pub async fn finish_round(
    state: &SharedState,
    session_id: Uuid,
    request: FinishRoundRequest,
) -> Result<RoundTelemetry, ServiceError> {
    mutate(state, session_id, |slot, now| {
        slot.session.finish_round(
            request.outcome,
            request.final_question_reached,
            request.winnings,
            now,
        )
    })
    .await
}

/// Seal the game, then archive it.
///
/// The session is fenced as soon as it reaches `GameOver`; when archival fails the error is
/// returned and the host retries through [`archive_session`].
pub async fn end_game(state: &SharedState, session_id: Uuid) -> Result<ArchiveResponse, ServiceError> {
    let telemetry = mutate(state, session_id, |slot, now| {
        slot.disarm_timer();
        slot.session.end_game(now)
    })
    .await?;
    info!(session_id = %session_id, rounds = telemetry.total_rounds, "game sealed; archiving");

    archive_session(state, session_id).await
}

/// Archive a sealed session and purge its live data. Safe to call again after a failure.
pub async fn archive_session(
    state: &SharedState,
    session_id: Uuid,
) -> Result<ArchiveResponse, ServiceError> {
    let handle = match state.session(session_id) {
        Ok(handle) => handle,
        Err(not_found) => return already_archived(state, session_id, not_found).await,
    };

    let archive = {
        let mut slot = handle.lock().await;
        let Some(telemetry) = slot.session.sealed_telemetry() else {
            return Err(GameError::IllegalTransition(format!(
                "session `{session_id}` must be over before it is archived"
            ))
            .into());
        };
        SessionArchive::capture(&slot.session, telemetry, SystemTime::now())
    };
    let summary = GameTelemetrySummary::from(&archive.telemetry);

    let store = require_store(state).await?;
    write_with_retry(store.as_ref(), archive, &state.config()).await?;

    {
        let mut slot = handle.lock().await;
        let purged = slot.session.purge();
        info!(session_id = %session_id, purged = purged.len(), "live participants purged");
    }
    state.remove_session(session_id);
    info!(session_id = %session_id, "session archived");

    Ok(ArchiveResponse {
        session_id,
        telemetry: summary,
    })
}

async fn already_archived(
    state: &SharedState,
    session_id: Uuid,
    not_found: GameError,
) -> Result<ArchiveResponse, ServiceError> {
    let store = require_store(state).await?;
    match store.find_game_telemetry(session_id).await? {
        Some(telemetry) => Ok(ArchiveResponse {
            session_id,
            telemetry: GameTelemetrySummary::from(&telemetry),
        }),
        None => Err(not_found.into()),
    }
}

async fn require_store(state: &SharedState) -> Result<Arc<dyn ArchiveStore>, ServiceError> {
    if state.is_degraded().await {
        return Err(ServiceError::Degraded);
    }
    state.archive_store().await.ok_or(ServiceError::Degraded)
}

/// Write `archive`, retrying with exponential backoff.
async fn write_with_retry(
    store: &dyn ArchiveStore,
    archive: SessionArchive,
    config: &AppConfig,
) -> Result<(), ServiceError> {
    let session_id = archive.session_id();
    let mut delay = config.archive_initial_delay;
    let mut attempt = 1;

    loop {
        match store.archive_session(archive.clone()).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt >= config.archive_max_attempts => {
                warn!(session_id = %session_id, attempt, error = %err, "archival failed; giving up");
                return Err(archive_failed(session_id, attempt, err));
            }
            Err(err) => {
                warn!(session_id = %session_id, attempt, error = %err, "archival attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(config.archive_max_delay);
                attempt += 1;
            }
        }
    }
}

fn archive_failed(session_id: Uuid, attempts: u32, source: StorageError) -> ServiceError {
    ServiceError::Archive {
        session_id,
        attempts,
        source,
    }
}

/// Sealed telemetry of an archived session.
pub async fn get_telemetry(
    state: &SharedState,
    session_id: Uuid,
) -> Result<GameTelemetry, ServiceError> {
    let store = require_store(state).await?;
    store
        .find_game_telemetry(session_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("no telemetry for session `{session_id}`")))
}

/// Every archived game.
pub async fn list_telemetry(state: &SharedState) -> Result<Vec<GameTelemetrySummary>, ServiceError> {
    let store = require_store(state).await?;
    Ok(store.list_game_telemetry().await?)
}

/// Store handle used by tests to inspect archives.
#[cfg(test)]
pub(crate) async fn installed_memory_store(
    state: &SharedState,
) -> crate::dao::archive_store::memory::MemoryArchiveStore {
    let store = crate::dao::archive_store::memory::MemoryArchiveStore::new();
    state.set_archive_store(Arc::new(store.clone())).await;
    store
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        dto::phase::GameStateType,
        state::{
            AppState, ata::AtaMode, participant::DeviceInfo, question::AnswerOption,
            telemetry::RoundOutcome,
        },
    };

    fn fast_config() -> AppConfig {
        AppConfig {
            archive_max_attempts: 2,
            archive_initial_delay: Duration::from_millis(1),
            archive_max_delay: Duration::from_millis(2),
            ..AppConfig::default()
        }
    }

    fn fff_request(time_limit_ms: u64) -> OpenFffRequest {
        OpenFffRequest {
            question_id: "q1".into(),
            text: "Order the numbers".into(),
            options: ["two", "one", "four", "three"].map(String::from).to_vec(),
            correct_order: "B,A,D,C".into(),
            time_limit_ms: Some(time_limit_ms),
        }
    }

    async fn lobby(state: &SharedState, names: &[&str]) -> (Uuid, Vec<Uuid>) {
        let summary = create_session(
            state,
            CreateSessionRequest {
                host_name: "Host".into(),
            },
        )
        .await
        .unwrap();
        open_lobby(state, summary.id).await.unwrap();

        let mut ids = Vec::new();
        for name in names {
            let participant = mutate(state, summary.id, |slot, now| {
                slot.session
                    .join(name, Some(Uuid::new_v4()), DeviceInfo::default(), now)
            })
            .await
            .unwrap();
            ids.push(participant.id);
        }
        (summary.id, ids)
    }

    #[tokio::test]
    async fn explicit_close_disarms_the_timer() {
        let state = AppState::new(fast_config());
        let (session_id, ids) = lobby(&state, &["Ada"]).await;
        select_contestants(&state, session_id, ContestantSelection::All)
            .await
            .unwrap();
        let opened = open_fff(&state, session_id, fff_request(60_000)).await.unwrap();

        {
            let handle = state.session(session_id).unwrap();
            let slot = handle.lock().await;
            assert_eq!(slot.armed_round(), Some(opened.round_id));
        }

        mutate(&state, session_id, |slot, now| {
            slot.session
                .submit_fff_answer(ids[0], "B,A,D,C".parse().unwrap(), now)
        })
        .await
        .unwrap();

        let closed = close_fff(&state, session_id).await.unwrap();
        assert!(closed.closed);
        assert_eq!(closed.results.unwrap().winner, Some(ids[0]));

        let again = close_fff(&state, session_id).await.unwrap();
        assert!(!again.closed);

        let summary = get_session(&state, session_id).await.unwrap();
        assert_eq!(summary.status, SessionStatus::MainGame);
        assert_eq!(summary.state, GameStateType::FffResults);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submissions_and_votes_are_counted_once() {
        const PLAYERS: usize = 21;
        const ATTEMPTS: usize = 3;

        let state = AppState::new(fast_config());
        let names = (0..PLAYERS).map(|i| format!("P{i}")).collect::<Vec<_>>();
        let names = names.iter().map(String::as_str).collect::<Vec<_>>();
        let (session_id, ids) = lobby(&state, &names).await;
        select_contestants(&state, session_id, ContestantSelection::All)
            .await
            .unwrap();
        open_fff(&state, session_id, fff_request(60_000)).await.unwrap();

        let mut submissions = tokio::task::JoinSet::new();
        for id in ids.iter().copied() {
            for _ in 0..ATTEMPTS {
                let state = state.clone();
                submissions.spawn(async move {
                    let outcome = mutate(&state, session_id, |slot, now| {
                        slot.session
                            .submit_fff_answer(id, "B,A,D,C".parse().unwrap(), now)
                    })
                    .await;
                    (id, outcome)
                });
            }
        }
        let mut accepted = HashMap::new();
        while let Some(joined) = submissions.join_next().await {
            match joined.unwrap() {
                (id, Ok(_)) => *accepted.entry(id).or_insert(0) += 1,
                (_, Err(err)) => assert!(
                    matches!(err, ServiceError::Game(GameError::DuplicateSubmission)),
                    "{err:?}"
                ),
            }
        }
        assert_eq!(accepted.len(), PLAYERS);
        assert!(accepted.values().all(|count| *count == 1));

        let closed = close_fff(&state, session_id).await.unwrap();
        let results = closed.results.unwrap();
        assert_eq!(results.answers.len(), PLAYERS);
        let winner = results.winner.unwrap();

        open_ata(
            &state,
            session_id,
            OpenAtaRequest {
                question_id: "main-1".into(),
                number: 1,
                text: "Which planet is known as the red planet?".into(),
                options: ["Venus", "Mars", "Jupiter", "Saturn"].map(String::from).to_vec(),
                window_ms: Some(60_000),
                mode: AtaMode::Live,
            },
        )
        .await
        .unwrap();

        let voters = ids.iter().copied().filter(|id| *id != winner).collect::<Vec<_>>();
        let mut votes = tokio::task::JoinSet::new();
        for (i, id) in voters.iter().copied().enumerate() {
            let state = state.clone();
            let option = AnswerOption::ALL[i % AnswerOption::ALL.len()];
            votes.spawn(async move {
                mutate(&state, session_id, |slot, now| {
                    slot.session.cast_vote(id, option, now)
                })
                .await
            });
        }
        while let Some(joined) = votes.join_next().await {
            joined.unwrap().unwrap();
        }

        let closed = close_ata(&state, session_id).await.unwrap();
        let stats = closed.results.unwrap();
        assert_eq!(stats.total_votes as usize, voters.len());
        let sum: f64 = stats.percentages.values().sum();
        assert!((sum - 100.0).abs() <= 0.2, "percentages sum to {sum}");
    }

    #[tokio::test]
    async fn timer_closes_the_round_once() {
        let state = AppState::new(fast_config());
        let (session_id, _) = lobby(&state, &["Ada", "Bob"]).await;
        select_contestants(&state, session_id, ContestantSelection::All)
            .await
            .unwrap();
        open_fff(&state, session_id, fff_request(20)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;

        let summary = get_session(&state, session_id).await.unwrap();
        assert_eq!(summary.status, SessionStatus::FffSelection);
        assert_eq!(summary.state, GameStateType::FffNoResponse);

        let closed = close_fff(&state, session_id).await.unwrap();
        assert!(!closed.closed);
    }

    #[tokio::test]
    async fn failed_archival_keeps_live_data_until_retry() {
        let state = AppState::new(fast_config());
        let store = installed_memory_store(&state).await;
        let (session_id, _) = lobby(&state, &["Ada", "Bob"]).await;

        store.set_available(false);
        let err = end_game(&state, session_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Archive { attempts: 2, .. }));

        // fenced but still live
        let summary = get_session(&state, session_id).await.unwrap();
        assert!(summary.closed);
        assert_eq!(summary.participants.len(), 2);
        let late_join = mutate(&state, session_id, |slot, now| {
            slot.session.join("Cy", None, DeviceInfo::default(), now)
        })
        .await;
        assert!(matches!(
            late_join,
            Err(ServiceError::Game(GameError::NotFound(_)))
        ));

        store.set_available(true);
        let archived = archive_session(&state, session_id).await.unwrap();
        assert_eq!(archived.telemetry.total_participants, 2);
        assert_eq!(store.participant_history_len(session_id).await, 2);
        assert!(matches!(
            get_session(&state, session_id).await,
            Err(ServiceError::Game(GameError::NotFound(_)))
        ));

        // idempotent once purged
        let again = archive_session(&state, session_id).await.unwrap();
        assert_eq!(again.session_id, session_id);
        assert_eq!(list_telemetry(&state).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn two_playthroughs_are_archived() {
        let state = AppState::new(fast_config());
        let store = installed_memory_store(&state).await;
        let (session_id, ids) = lobby(&state, &["Ada", "Bob"]).await;

        for contestant in &ids {
            select_contestants(
                &state,
                session_id,
                ContestantSelection::Explicit {
                    participant_ids: vec![*contestant],
                },
            )
            .await
            .unwrap();
            open_fff(&state, session_id, fff_request(60_000)).await.unwrap();
            mutate(&state, session_id, |slot, now| {
                slot.session
                    .submit_fff_answer(*contestant, "B,A,D,C".parse().unwrap(), now)
            })
            .await
            .unwrap();
            close_fff(&state, session_id).await.unwrap();
            finish_round(
                &state,
                session_id,
                FinishRoundRequest {
                    outcome: RoundOutcome::WalkedAway,
                    final_question_reached: 7,
                    winnings: 4_000,
                },
            )
            .await
            .unwrap();
        }

        let archived = end_game(&state, session_id).await.unwrap();
        assert_eq!(archived.telemetry.total_rounds, 2);
        assert_eq!(archived.telemetry.total_winnings, 8_000);
        assert_eq!(store.archived_submissions(session_id).await, (2, 0));

        let telemetry = get_telemetry(&state, session_id).await.unwrap();
        assert_eq!(telemetry.rounds[1].contestant_id, Some(ids[1]));
    }

    #[tokio::test]
    async fn archival_requires_a_store() {
        let state = AppState::new(fast_config());
        let (session_id, _) = lobby(&state, &[]).await;
        let err = end_game(&state, session_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Degraded));
        assert!(get_session(&state, session_id).await.unwrap().closed);
    }
}
