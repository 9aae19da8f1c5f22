//! Live session aggregate.
//!
//! [`LiveSession`] is the synchronous half of the session orchestrator: it owns the phase
//! machine, the participant registry, both round engines and the telemetry aggregator of one
//! session. Callers serialize access to it (one mutex per session), every operation takes the
//! current time explicitly, and accepted operations queue [`DomainEvent`]s that the transport
//! side drains and fans out.

use std::time::{Duration, SystemTime};

use indexmap::IndexSet;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::{
    ata::{AtaMode, AtaTally, AtaVote, AtaVotingEngine, OFFLINE_VOTER},
    eligibility::{Eligibility, evaluate},
    error::GameError,
    fff::{FffAnswer, FffResults, FffRoundEngine},
    participant::{
        ConnectionId, DeviceInfo, Participant, ParticipantId, ParticipantRegistry,
        ParticipantState,
    },
    question::{AnswerOption, AnswerSequence, FffQuestion, MainGameQuestion},
    state_machine::{FffOutcome, SessionEvent, SessionStateMachine, SessionStatus, Snapshot},
    telemetry::{
        AtaStats, FffStats, GameTelemetry, RoundOutcome, RoundTelemetry, TelemetryAggregator,
    },
};

/// Round engine currently open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub enum SessionMode {
    /// No round open.
    #[default]
    Idle,
    /// Fastest-finger question open.
    #[serde(rename = "FFF")]
    Fff,
    /// Audience poll open.
    #[serde(rename = "ATA")]
    Ata,
}

/// Outcome of the last closed round, used to pick the presentation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastRound {
    /// Fastest-finger round produced a winner.
    FffWinner(ParticipantId),
    /// Fastest-finger round closed without a correct answer.
    FffNoContest {
        /// Whether anybody answered at all.
        had_submissions: bool,
    },
    /// Audience poll closed.
    AtaClosed,
}

/// Which participants the host puts into the next fastest-finger round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContestantSelection {
    /// Every participant that may be selected.
    All,
    /// Exactly these participants.
    Explicit {
        /// Participants to select.
        participant_ids: Vec<Uuid>,
    },
    /// A random draw among the participants that may be selected.
    Random {
        /// Number of participants to draw.
        count: usize,
    },
}

/// Immutable record of something the session accepted, fanned out by the transport side.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// The session phase changed.
    PhaseChanged {
        /// New phase.
        status: SessionStatus,
    },
    /// A participant joined or came back.
    ParticipantJoined {
        /// Participant.
        participant_id: ParticipantId,
        /// Display name.
        display_name: String,
        /// Whether this was a reconnect.
        reconnected: bool,
    },
    /// A participant lost its connection.
    ParticipantLeft {
        /// Participant.
        participant_id: ParticipantId,
    },
    /// The host picked the next fastest-finger players.
    ContestantsSelected {
        /// Picked participants.
        selected: Vec<ParticipantId>,
        /// Live participants that were not picked.
        not_selected: Vec<ParticipantId>,
    },
    /// A fastest-finger question opened.
    FffOpened {
        /// Opening identifier.
        round_id: Uuid,
        /// Question played.
        question: FffQuestion,
        /// Answering window.
        time_limit: Duration,
    },
    /// A fastest-finger answer was accepted.
    FffAnswerAccepted {
        /// The answer.
        answer: FffAnswer,
    },
    /// A fastest-finger question closed and was ranked.
    FffClosed {
        /// Ranked answers.
        results: FffResults,
        /// Folded statistics.
        stats: FffStats,
    },
    /// An audience poll opened.
    AtaOpened {
        /// Opening identifier.
        round_id: Uuid,
        /// Question polled.
        question: MainGameQuestion,
        /// Voting window.
        window: Duration,
        /// Live or offline poll.
        mode: AtaMode,
    },
    /// A vote was counted.
    AtaVoteAccepted {
        /// Voter.
        participant_id: ParticipantId,
        /// Tally after the vote.
        tally: AtaTally,
    },
    /// An audience poll closed.
    AtaClosed {
        /// Frozen tally.
        stats: AtaStats,
    },
    /// A contestant playthrough ended.
    RoundFinished {
        /// The finished round.
        round: RoundTelemetry,
    },
    /// The session reached game over.
    GameOver {
        /// Sealed statistics.
        telemetry: GameTelemetry,
    },
}

/// Timer information for a freshly opened round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenedRound {
    /// Opening identifier the timer must present when it fires.
    pub round_id: Uuid,
    /// When the window elapses.
    pub deadline: SystemTime,
}

/// One live game instance.
#[derive(Debug)]
pub struct LiveSession {
    id: Uuid,
    host_name: String,
    created_at: SystemTime,
    started_at: Option<SystemTime>,
    ended_at: Option<SystemTime>,
    machine: SessionStateMachine,
    mode: SessionMode,
    current_question_id: Option<String>,
    question_start_time: Option<SystemTime>,
    registry: ParticipantRegistry,
    fff: FffRoundEngine,
    ata: AtaVotingEngine,
    ata_question: Option<MainGameQuestion>,
    telemetry: TelemetryAggregator,
    last_round: Option<LastRound>,
    fenced: bool,
    events: Vec<DomainEvent>,
}

impl LiveSession {
    /// Create a session in `PreGame`.
    pub fn new(host_name: &str, now: SystemTime) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            host_name: host_name.to_string(),
            created_at: now,
            started_at: None,
            ended_at: None,
            machine: SessionStateMachine::new(),
            mode: SessionMode::Idle,
            current_question_id: None,
            question_start_time: None,
            registry: ParticipantRegistry::new(),
            fff: FffRoundEngine::new(id),
            ata: AtaVotingEngine::new(id),
            ata_question: None,
            telemetry: TelemetryAggregator::new(id, host_name, now),
            last_round: None,
            fenced: false,
            events: Vec::new(),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Host display name.
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Creation time.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// When the lobby opened.
    pub fn started_at(&self) -> Option<SystemTime> {
        self.started_at
    }

    /// When the game ended.
    pub fn ended_at(&self) -> Option<SystemTime> {
        self.ended_at
    }

    /// Current phase.
    pub fn status(&self) -> SessionStatus {
        self.machine.status()
    }

    /// Phase machine snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.machine.snapshot()
    }

    /// Open round engine.
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Question of the open round.
    pub fn current_question_id(&self) -> Option<&str> {
        self.current_question_id.as_deref()
    }

    /// Start time of the open round.
    pub fn question_start_time(&self) -> Option<SystemTime> {
        self.question_start_time
    }

    /// Outcome of the last closed round.
    pub fn last_round(&self) -> Option<LastRound> {
        self.last_round
    }

    /// Whether archival started; inbound events are refused from then on.
    pub fn is_fenced(&self) -> bool {
        self.fenced
    }

    /// Participant registry.
    pub fn participants(&self) -> &ParticipantRegistry {
        &self.registry
    }

    /// Fastest-finger engine.
    pub fn fff(&self) -> &FffRoundEngine {
        &self.fff
    }

    /// Audience poll engine.
    pub fn ata(&self) -> &AtaVotingEngine {
        &self.ata
    }

    /// Telemetry aggregator.
    pub fn telemetry(&self) -> &TelemetryAggregator {
        &self.telemetry
    }

    /// Rights of one participant in the current phase.
    pub fn eligibility(&self, participant_id: ParticipantId) -> Result<Eligibility, GameError> {
        let participant = self.registry.get(participant_id)?;
        Ok(evaluate(self.status(), participant.state))
    }

    /// Take the events queued by the operations since the last drain.
    pub fn drain_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    /// `PreGame → Lobby`.
    pub fn open_lobby(&mut self, now: SystemTime) -> Result<(), GameError> {
        self.ensure_live()?;
        self.advance(SessionEvent::OpenLobby)?;
        self.started_at = Some(now);
        self.telemetry.set_game_start_time(now);
        info!(session_id = %self.id, "lobby opened");
        Ok(())
    }

    /// Register a participant.
    pub fn join(
        &mut self,
        display_name: &str,
        connection: Option<ConnectionId>,
        device: DeviceInfo,
        now: SystemTime,
    ) -> Result<Participant, GameError> {
        self.ensure_live()?;
        if self.status().is_terminal() {
            return Err(GameError::IllegalTransition("the game is over".into()));
        }

        let participant = self
            .registry
            .join(self.id, display_name, connection, device, now)?
            .clone();
        self.refresh_ata_eligible();

        info!(
            session_id = %self.id,
            participant_id = %participant.id,
            display_name = %participant.display_name,
            "participant joined"
        );
        self.events.push(DomainEvent::ParticipantJoined {
            participant_id: participant.id,
            display_name: participant.display_name.clone(),
            reconnected: false,
        });
        Ok(participant)
    }

    /// Attach a new connection to a disconnected participant presenting its reconnect token.
    pub fn reconnect(
        &mut self,
        participant_id: ParticipantId,
        token: Uuid,
        connection: ConnectionId,
        now: SystemTime,
    ) -> Result<Participant, GameError> {
        self.ensure_live()?;
        let status = self.status();
        let participant = self
            .registry
            .reconnect(participant_id, token, connection, status, now)?
            .clone();
        self.refresh_ata_eligible();

        info!(session_id = %self.id, participant_id = %participant_id, "participant reconnected");
        self.events.push(DomainEvent::ParticipantJoined {
            participant_id,
            display_name: participant.display_name.clone(),
            reconnected: true,
        });
        Ok(participant)
    }

    /// Mark the participant bound to `connection` as disconnected.
    pub fn disconnect(&mut self, connection: ConnectionId, now: SystemTime) -> Option<ParticipantId> {
        if self.fenced {
            return None;
        }
        let participant_id = self.registry.disconnect(connection, now)?;
        self.refresh_ata_eligible();

        info!(session_id = %self.id, participant_id = %participant_id, "participant disconnected");
        self.events.push(DomainEvent::ParticipantLeft { participant_id });
        Some(participant_id)
    }

    /// Refresh the liveness stamp of the participant bound to `connection`.
    pub fn touch(&mut self, participant_id: ParticipantId, now: SystemTime) {
        self.registry.touch(participant_id, now);
    }

    /// `Lobby → FFFSelection`.
    pub fn begin_fff_selection(&mut self) -> Result<(), GameError> {
        self.ensure_live()?;
        if self.status() != SessionStatus::Lobby {
            return Err(GameError::IllegalTransition(format!(
                "contestant selection starts from the lobby, session is {:?}",
                self.status()
            )));
        }
        self.advance(SessionEvent::BeginFffSelection)
    }

    /// Put participants into the next fastest-finger round.
    ///
    /// Replaces any previous selection of the same phase. Either every requested participant is
    /// selected or none is.
    pub fn select_contestants(
        &mut self,
        selection: ContestantSelection,
        now: SystemTime,
    ) -> Result<Vec<ParticipantId>, GameError> {
        self.ensure_live()?;
        if self.status() != SessionStatus::FffSelection {
            return Err(GameError::IllegalTransition(format!(
                "contestants are selected during FFFSelection, session is {:?}",
                self.status()
            )));
        }

        let previously = self
            .registry
            .ids_with_standing(ParticipantState::SelectedForFff);
        let candidates = self
            .registry
            .iter()
            .filter(|p| {
                p.state.can_transition_to(ParticipantState::SelectedForFff)
                    || p.standing() == ParticipantState::SelectedForFff
            })
            .map(|p| p.id)
            .collect::<Vec<_>>();

        let chosen = match selection {
            ContestantSelection::All => candidates.clone(),
            ContestantSelection::Explicit { participant_ids } => {
                let requested = participant_ids.into_iter().collect::<IndexSet<_>>();
                for id in &requested {
                    let participant = self.registry.get(*id)?;
                    if !candidates.contains(id) {
                        return Err(GameError::IllegalTransition(format!(
                            "participant `{id}` cannot be selected while {:?}",
                            participant.state
                        )));
                    }
                }
                requested.into_iter().collect()
            }
            ContestantSelection::Random { count } => candidates
                .choose_multiple(&mut rand::rng(), count)
                .copied()
                .collect(),
        };

        if chosen.is_empty() {
            return Err(GameError::IllegalTransition(
                "no participant can be selected".into(),
            ));
        }

        for id in previously.iter().filter(|id| !chosen.contains(id)) {
            self.registry.settle(*id, ParticipantState::Lobby, now)?;
        }
        for id in chosen.iter().filter(|id| !previously.contains(id)) {
            self.registry.transition(*id, ParticipantState::SelectedForFff, now)?;
        }

        let not_selected = self
            .registry
            .iter()
            .filter(|p| p.is_active && !chosen.contains(&p.id))
            .map(|p| p.id)
            .collect();

        info!(session_id = %self.id, selected = chosen.len(), "contestants selected");
        self.events.push(DomainEvent::ContestantsSelected {
            selected: chosen.clone(),
            not_selected,
        });
        Ok(chosen)
    }

    /// `FFFSelection → FFFActive`: open `question` for the selected participants.
    pub fn open_fff(
        &mut self,
        question: FffQuestion,
        time_limit: Duration,
        now: SystemTime,
    ) -> Result<OpenedRound, GameError> {
        self.ensure_live()?;
        self.ensure_idle()?;

        let players = self
            .registry
            .ids_with_standing(ParticipantState::SelectedForFff);
        if players.is_empty() {
            return Err(GameError::IllegalTransition(
                "no participant is selected for the fastest finger round".into(),
            ));
        }

        let plan = self.machine.plan(SessionEvent::OpenFff)?;
        let opened = match self.fff.open(question.clone(), time_limit, now) {
            Ok(state) => OpenedRound {
                round_id: state.round_id,
                deadline: state.deadline(),
            },
            Err(err) => {
                self.machine.abort(plan.id)?;
                return Err(err);
            }
        };
        self.machine.apply(plan.id)?;

        for id in players {
            self.registry.settle(id, ParticipantState::PlayingFff, now)?;
        }
        self.set_open_round(SessionMode::Fff, &question.id, now);

        info!(
            session_id = %self.id,
            round_id = %opened.round_id,
            question_id = %question.id,
            "fastest finger question opened"
        );
        self.events.push(DomainEvent::PhaseChanged {
            status: self.status(),
        });
        self.events.push(DomainEvent::FffOpened {
            round_id: opened.round_id,
            question,
            time_limit,
        });
        Ok(opened)
    }

    /// Record a fastest-finger answer.
    pub fn submit_fff_answer(
        &mut self,
        participant_id: ParticipantId,
        sequence: AnswerSequence,
        now: SystemTime,
    ) -> Result<FffAnswer, GameError> {
        self.ensure_live()?;
        let eligibility = self.eligibility(participant_id)?;

        let answer = match self.fff.submit(participant_id, sequence, &eligibility, now) {
            Ok(answer) => answer.clone(),
            Err(err) => {
                warn!(
                    session_id = %self.id,
                    participant_id = %participant_id,
                    error = %err,
                    "fastest finger answer rejected"
                );
                return Err(err);
            }
        };
        self.registry.touch(participant_id, now);

        debug!(
            session_id = %self.id,
            participant_id = %participant_id,
            elapsed_ms = answer.time_elapsed_ms,
            "fastest finger answer accepted"
        );
        self.events.push(DomainEvent::FffAnswerAccepted {
            answer: answer.clone(),
        });
        Ok(answer)
    }

    /// Close the open fastest-finger question.
    ///
    /// `expected_round` lets a timer close only the round it was armed for. Returns `Ok(None)`
    /// when there is nothing to close.
    pub fn close_fff(
        &mut self,
        expected_round: Option<Uuid>,
        now: SystemTime,
    ) -> Result<Option<FffResults>, GameError> {
        let matches_round = self
            .fff
            .current()
            .is_some_and(|state| expected_round.is_none_or(|id| id == state.round_id));
        if !matches_round || !self.fff.is_open() {
            return Ok(None);
        }

        let outcome = if self.preview_fff_has_winner() {
            FffOutcome::Winner
        } else {
            FffOutcome::NoContest
        };
        let plan = self.machine.plan(SessionEvent::CloseFff(outcome))?;
        let Some(results) = self.fff.close(now) else {
            self.machine.abort(plan.id)?;
            return Ok(None);
        };
        self.machine.apply(plan.id)?;

        let players = self.registry.ids_with_standing(ParticipantState::PlayingFff);
        for id in &players {
            let target = if Some(*id) == results.winner {
                ParticipantState::Winner
            } else {
                ParticipantState::HasPlayedFff
            };
            self.registry.settle(*id, target, now)?;
        }

        let stats = FffStats::from_answers(
            results.round_id,
            &results.question_id,
            players.len() as u32,
            &results.answers,
        );
        let contestant = results
            .winner
            .and_then(|id| self.registry.get(id).ok())
            .filter(|p| p.standing() == ParticipantState::Winner);
        self.telemetry
            .record_fff(stats.clone(), contestant, self.registry.iter(), now)?;

        self.last_round = Some(match results.winner {
            Some(id) => LastRound::FffWinner(id),
            None => LastRound::FffNoContest {
                had_submissions: !results.answers.is_empty(),
            },
        });
        self.clear_open_round();
        self.fff.discard_closed();

        info!(
            session_id = %self.id,
            round_id = %results.round_id,
            winner = ?results.winner,
            submissions = results.answers.len(),
            "fastest finger question closed"
        );
        self.events.push(DomainEvent::PhaseChanged {
            status: self.status(),
        });
        self.events.push(DomainEvent::FffClosed {
            results: results.clone(),
            stats,
        });
        Ok(Some(results))
    }

    /// `MainGame → ATAActive`: poll the audience on `question`.
    pub fn open_ata(
        &mut self,
        question: MainGameQuestion,
        window: Duration,
        mode: AtaMode,
        now: SystemTime,
    ) -> Result<OpenedRound, GameError> {
        self.ensure_live()?;
        self.ensure_idle()?;

        let eligible = self.count_ata_eligible();
        let plan = self.machine.plan(SessionEvent::OpenAta)?;
        let opened = match self
            .ata
            .open(&question.id, &question.text, window, mode, eligible, now)
        {
            Ok(state) => OpenedRound {
                round_id: state.round_id,
                deadline: state.deadline(),
            },
            Err(err) => {
                self.machine.abort(plan.id)?;
                return Err(err);
            }
        };
        self.machine.apply(plan.id)?;

        for id in self.registry.ids_with_standing(ParticipantState::Winner) {
            if let Ok(contestant) = self.registry.get_mut(id) {
                contestant.has_used_ata = true;
            }
        }
        self.set_open_round(SessionMode::Ata, &question.id, now);
        self.ata_question = Some(question.clone());

        info!(
            session_id = %self.id,
            round_id = %opened.round_id,
            question_id = %question.id,
            mode = ?mode,
            eligible,
            "audience poll opened"
        );
        self.events.push(DomainEvent::PhaseChanged {
            status: self.status(),
        });
        self.events.push(DomainEvent::AtaOpened {
            round_id: opened.round_id,
            question,
            window,
            mode,
        });
        Ok(opened)
    }

    /// Count (or replace) a participant vote.
    pub fn cast_vote(
        &mut self,
        participant_id: ParticipantId,
        option: AnswerOption,
        now: SystemTime,
    ) -> Result<AtaTally, GameError> {
        self.ensure_live()?;
        let eligibility = self.eligibility(participant_id)?;

        let tally = match self.ata.vote(participant_id, option, &eligibility, now) {
            Ok(tally) => tally,
            Err(err) => {
                warn!(
                    session_id = %self.id,
                    participant_id = %participant_id,
                    error = %err,
                    "audience vote rejected"
                );
                return Err(err);
            }
        };
        self.registry.touch(participant_id, now);

        debug!(
            session_id = %self.id,
            participant_id = %participant_id,
            option = %option,
            total_votes = tally.total_votes,
            "audience vote accepted"
        );
        self.events.push(DomainEvent::AtaVoteAccepted {
            participant_id,
            tally: tally.clone(),
        });
        Ok(tally)
    }

    /// Cast the operator vote of an offline poll.
    pub fn cast_offline_vote(
        &mut self,
        option: AnswerOption,
        now: SystemTime,
    ) -> Result<AtaTally, GameError> {
        self.ensure_live()?;
        let tally = self.ata.vote_offline(option, now)?;
        debug!(session_id = %self.id, option = %option, "operator vote accepted");
        self.events.push(DomainEvent::AtaVoteAccepted {
            participant_id: OFFLINE_VOTER,
            tally: tally.clone(),
        });
        Ok(tally)
    }

    /// Close the open audience poll; same contract as [`close_fff`](Self::close_fff).
    pub fn close_ata(
        &mut self,
        expected_round: Option<Uuid>,
        now: SystemTime,
    ) -> Result<Option<AtaStats>, GameError> {
        let matches_round = self
            .ata
            .current()
            .is_some_and(|state| expected_round.is_none_or(|id| id == state.round_id));
        if !matches_round || !self.ata.is_open() {
            return Ok(None);
        }

        let plan = self.machine.plan(SessionEvent::CloseAta)?;
        let Some(stats) = self.ata.close(now) else {
            self.machine.abort(plan.id)?;
            return Ok(None);
        };
        self.machine.apply(plan.id)?;

        let question_number = self.ata_question.take().map(|q| q.number).unwrap_or_default();
        self.telemetry.record_ata(stats.clone(), question_number, now)?;
        self.last_round = Some(LastRound::AtaClosed);
        self.clear_open_round();
        self.ata.discard_closed();

        info!(
            session_id = %self.id,
            round_id = %stats.round_id,
            total_votes = stats.total_votes,
            "audience poll closed"
        );
        self.events.push(DomainEvent::PhaseChanged {
            status: self.status(),
        });
        self.events.push(DomainEvent::AtaClosed {
            stats: stats.clone(),
        });
        Ok(Some(stats))
    }

    /// End the contestant playthrough: `MainGame → FFFSelection`, contestant eliminated.
    pub fn finish_round(
        &mut self,
        outcome: RoundOutcome,
        final_question_reached: u32,
        winnings: u64,
        now: SystemTime,
    ) -> Result<RoundTelemetry, GameError> {
        self.ensure_live()?;
        if self.status() != SessionStatus::MainGame {
            return Err(GameError::IllegalTransition(format!(
                "a playthrough ends during MainGame, session is {:?}",
                self.status()
            )));
        }

        let plan = self.machine.plan(SessionEvent::BeginFffSelection)?;
        let round = match self
            .telemetry
            .finish_round(outcome, final_question_reached, winnings, now)
        {
            Ok(round) => round.clone(),
            Err(err) => {
                self.machine.abort(plan.id)?;
                return Err(err);
            }
        };
        self.machine.apply(plan.id)?;

        for id in self.registry.ids_with_standing(ParticipantState::Winner) {
            self.registry.settle(id, ParticipantState::Eliminated, now)?;
        }
        self.last_round = None;

        info!(
            session_id = %self.id,
            round_number = round.round_number,
            outcome = ?outcome,
            winnings,
            "playthrough finished"
        );
        self.events.push(DomainEvent::PhaseChanged {
            status: self.status(),
        });
        self.events.push(DomainEvent::RoundFinished {
            round: round.clone(),
        });
        Ok(round)
    }

    /// Move to `GameOver`, seal telemetry and fence the session for archival.
    ///
    /// An open round is closed first so its results are part of the sealed telemetry.
    pub fn end_game(&mut self, now: SystemTime) -> Result<GameTelemetry, GameError> {
        self.ensure_live()?;
        if self.status().is_terminal() {
            return Err(GameError::IllegalTransition("the game is already over".into()));
        }

        self.close_fff(None, now)?;
        self.close_ata(None, now)?;
        self.advance(SessionEvent::EndGame)?;

        self.fenced = true;
        self.ended_at = Some(now);
        let telemetry = self.telemetry.seal(now, self.registry.len() as u32);

        info!(
            session_id = %self.id,
            rounds = telemetry.total_rounds,
            duration_ms = telemetry.total_duration_ms,
            "game over"
        );
        self.events.push(DomainEvent::GameOver {
            telemetry: telemetry.clone(),
        });
        Ok(telemetry)
    }

    /// Sealed telemetry, once the game is over.
    pub fn sealed_telemetry(&mut self) -> Option<GameTelemetry> {
        let ended_at = self.ended_at?;
        Some(self.telemetry.seal(ended_at, self.registry.len() as u32))
    }

    /// Every evaluated fastest-finger answer of the session.
    pub fn fff_answers(&self) -> &[FffAnswer] {
        self.fff.history()
    }

    /// Every counted vote of the session.
    pub fn ata_votes(&self) -> &[AtaVote] {
        self.ata.history()
    }

    /// Clear the live participant table after a successful archival.
    pub fn purge(&mut self) -> Vec<Participant> {
        self.registry.drain()
    }

    fn ensure_live(&self) -> Result<(), GameError> {
        if self.fenced {
            return Err(GameError::NotFound(format!("session `{}` is closed", self.id)));
        }
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), GameError> {
        match self.mode {
            SessionMode::Idle => Ok(()),
            SessionMode::Fff => Err(GameError::Conflict(
                "a fastest finger question is still open".into(),
            )),
            SessionMode::Ata => Err(GameError::Conflict("an audience poll is still open".into())),
        }
    }

    fn advance(&mut self, event: SessionEvent) -> Result<(), GameError> {
        let plan = self.machine.plan(event)?;
        let status = self.machine.apply(plan.id)?;
        self.events.push(DomainEvent::PhaseChanged { status });
        Ok(())
    }

    fn preview_fff_has_winner(&self) -> bool {
        let Some(state) = self.fff.current() else {
            return false;
        };
        self.fff
            .pending()
            .iter()
            .any(|a| a.answer_sequence == state.question.correct_order)
    }

    fn set_open_round(&mut self, mode: SessionMode, question_id: &str, now: SystemTime) {
        self.mode = mode;
        self.current_question_id = Some(question_id.to_string());
        self.question_start_time = Some(now);
    }

    fn clear_open_round(&mut self) {
        self.mode = SessionMode::Idle;
        self.current_question_id = None;
        self.question_start_time = None;
    }

    fn count_ata_eligible(&self) -> u32 {
        self.registry
            .iter()
            .filter(|p| evaluate(SessionStatus::AtaActive, p.state).can_vote)
            .count() as u32
    }

    fn refresh_ata_eligible(&mut self) {
        if self.ata.is_open() {
            let eligible = self.count_ata_eligible();
            self.ata.set_eligible(eligible);
        }
    }
}
