//! Round and game statistics folded from round engine outputs.
//!
//! Telemetry is derived data: a [`RoundTelemetry`] is appended to the game once the contestant's
//! playthrough ends and is never touched again, and [`GameTelemetry`] only sums finished rounds.

use std::{
    collections::BTreeMap,
    time::{Duration, SystemTime},
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{TimestampMilliSeconds, serde_as};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::{
    ata::AtaMode,
    error::GameError,
    fff::FffAnswer,
    participant::Participant,
    question::AnswerOption,
};

/// Lifeline tag recorded whenever an audience poll is run.
pub const LIFELINE_ASK_THE_AUDIENCE: &str = "ask_the_audience";

/// Final tallies of one fastest-finger round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FffStats {
    /// Round identifier.
    pub round_id: Uuid,
    /// Question identifier.
    pub question_id: String,
    /// Participants who were playing when the question opened.
    pub players: u32,
    /// Accepted submissions.
    pub total_submissions: u32,
    /// Accepted submissions with the correct ordering.
    pub correct_submissions: u32,
    /// Fastest accepted response time, in milliseconds.
    pub fastest_ms: Option<u64>,
    /// Mean accepted response time, in milliseconds.
    pub mean_ms: Option<f64>,
    /// Slowest accepted response time, in milliseconds.
    pub slowest_ms: Option<u64>,
    /// Participant ranked first, if any.
    pub winner_id: Option<Uuid>,
    /// Response time of the winner, in milliseconds.
    pub winner_time_ms: Option<u64>,
}

impl FffStats {
    /// Compute statistics over the accepted answers of a closed round.
    pub fn from_answers(
        round_id: Uuid,
        question_id: &str,
        players: u32,
        answers: &[FffAnswer],
    ) -> Self {
        let times = answers.iter().map(|a| a.time_elapsed_ms).collect::<Vec<_>>();
        let winner = answers.iter().find(|a| a.rank == Some(1));

        Self {
            round_id,
            question_id: question_id.to_string(),
            players,
            total_submissions: answers.len() as u32,
            correct_submissions: answers.iter().filter(|a| a.is_correct).count() as u32,
            fastest_ms: times.iter().copied().min(),
            mean_ms: (!times.is_empty())
                .then(|| times.iter().sum::<u64>() as f64 / times.len() as f64),
            slowest_ms: times.iter().copied().max(),
            winner_id: winner.map(|a| a.participant_id),
            winner_time_ms: winner.map(|a| a.time_elapsed_ms),
        }
    }
}

/// Final tallies of one audience poll.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AtaStats {
    /// Round identifier.
    pub round_id: Uuid,
    /// Question identifier.
    pub question_id: String,
    /// Question text the audience voted on.
    pub question_text: String,
    /// Live audience or single-operator simulation.
    pub mode: AtaMode,
    /// Number of counted votes.
    pub total_votes: u32,
    /// Votes per option.
    pub vote_counts: IndexMap<AnswerOption, u32>,
    /// Percentage per option, one decimal.
    pub percentages: IndexMap<AnswerOption, f64>,
    /// Participants allowed to vote when the poll closed.
    pub eligible_participants: u32,
    /// `total_votes / eligible_participants`.
    pub completion_rate: f64,
    /// When the poll opened.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    #[schema(value_type = i64)]
    pub opened_at: SystemTime,
    /// When the poll closed.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    #[schema(value_type = i64)]
    pub closed_at: SystemTime,
}

/// Counts of the anonymized device fields of the audience.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DemographicsBreakdown {
    /// Participants counted.
    pub participants: u32,
    /// Participants per device class.
    pub by_device_type: BTreeMap<String, u32>,
    /// Participants per browser family.
    pub by_browser: BTreeMap<String, u32>,
    /// Participants per operating system.
    pub by_os: BTreeMap<String, u32>,
}

impl DemographicsBreakdown {
    /// Count device fields over `participants`; missing fields are filed under `unknown`.
    pub fn from_participants<'a>(participants: impl IntoIterator<Item = &'a Participant>) -> Self {
        fn bump(map: &mut BTreeMap<String, u32>, key: Option<&String>) {
            let key = key.cloned().unwrap_or_else(|| "unknown".to_string());
            *map.entry(key).or_default() += 1;
        }

        let mut breakdown = Self::default();
        for participant in participants {
            breakdown.participants += 1;
            bump(&mut breakdown.by_device_type, participant.device.device_type.as_ref());
            bump(&mut breakdown.by_browser, participant.device.browser.as_ref());
            bump(&mut breakdown.by_os, participant.device.os.as_ref());
        }
        breakdown
    }
}

/// How a contestant playthrough ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoundOutcome {
    /// Answered every question.
    Won,
    /// Left with the current winnings.
    WalkedAway,
    /// Answered wrongly.
    Lost,
    /// The game ended before the playthrough did.
    Interrupted,
}

/// One entry of the lifeline usage log.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LifelineUse {
    /// Lifeline tag.
    pub lifeline: String,
    /// Main game question number the lifeline was used on.
    pub question_number: u32,
    /// When it was used.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    #[schema(value_type = i64)]
    pub used_at: SystemTime,
}

/// Statistics of one contestant playthrough.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RoundTelemetry {
    /// 1-based position of the round in the session.
    pub round_number: u32,
    /// Winning contestant, if a fastest-finger round produced one.
    pub contestant_id: Option<Uuid>,
    /// Display name of the contestant.
    pub contestant_name: Option<String>,
    /// First recorded event of the round.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    #[schema(value_type = i64)]
    pub started_at: SystemTime,
    /// When the playthrough ended.
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    #[schema(value_type = Option<i64>)]
    pub ended_at: Option<SystemTime>,
    /// Audience breakdown when the contestant was decided.
    pub demographics: DemographicsBreakdown,
    /// Every fastest-finger attempt of this round (re-runs included).
    pub fff: Vec<FffStats>,
    /// Every audience poll of this round.
    pub ata: Vec<AtaStats>,
    /// Highest main game question reached.
    pub final_question_reached: u32,
    /// How the playthrough ended.
    pub outcome: Option<RoundOutcome>,
    /// Amount won.
    pub winnings: u64,
    /// Lifelines used, in order.
    pub lifelines: Vec<LifelineUse>,
}

impl RoundTelemetry {
    fn new(round_number: u32, now: SystemTime) -> Self {
        Self {
            round_number,
            contestant_id: None,
            contestant_name: None,
            started_at: now,
            ended_at: None,
            demographics: DemographicsBreakdown::default(),
            fff: Vec::new(),
            ata: Vec::new(),
            final_question_reached: 0,
            outcome: None,
            winnings: 0,
            lifelines: Vec::new(),
        }
    }
}

/// Aggregate statistics of a whole session.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GameTelemetry {
    /// Session identifier.
    pub session_id: Uuid,
    /// Host display name.
    pub host_name: String,
    /// When the session opened its lobby.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    #[schema(value_type = i64)]
    pub game_start_time: SystemTime,
    /// When the session reached game over.
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    #[schema(value_type = Option<i64>)]
    pub game_end_time: Option<SystemTime>,
    /// `game_end_time - game_start_time`, in milliseconds.
    pub total_duration_ms: u64,
    /// Finished rounds in order.
    pub rounds: Vec<RoundTelemetry>,
    /// Number of finished rounds.
    pub total_rounds: u32,
    /// Participants registered when the game ended.
    pub total_participants: u32,
    /// Sum of the questions reached over all rounds.
    pub total_questions: u32,
    /// Sum of lifelines used over all rounds.
    pub total_lifelines_used: u32,
    /// Sum of the winnings over all rounds.
    pub total_winnings: u64,
}

/// Folds engine results into round telemetry and seals the game telemetry.
#[derive(Debug, Clone)]
pub struct TelemetryAggregator {
    current: Option<RoundTelemetry>,
    game: GameTelemetry,
    sealed: bool,
}

impl TelemetryAggregator {
    /// Start aggregating for a session.
    pub fn new(session_id: Uuid, host_name: &str, game_start_time: SystemTime) -> Self {
        Self {
            current: None,
            game: GameTelemetry {
                session_id,
                host_name: host_name.to_string(),
                game_start_time,
                game_end_time: None,
                total_duration_ms: 0,
                rounds: Vec::new(),
                total_rounds: 0,
                total_participants: 0,
                total_questions: 0,
                total_lifelines_used: 0,
                total_winnings: 0,
            },
            sealed: false,
        }
    }

    /// Move the game start stamp (the lobby opened after the session was created).
    pub fn set_game_start_time(&mut self, start: SystemTime) {
        self.game.game_start_time = start;
    }

    fn current_round(&mut self, now: SystemTime) -> &mut RoundTelemetry {
        let next_number = self.game.rounds.len() as u32 + 1;
        self.current
            .get_or_insert_with(|| RoundTelemetry::new(next_number, now))
    }

    /// Fold a closed fastest-finger round into the current round.
    ///
    /// When the round produced a winner, `contestant` becomes the contestant of the round and
    /// `audience` is snapshotted as the round demographics.
    pub fn record_fff<'a>(
        &mut self,
        stats: FffStats,
        contestant: Option<&Participant>,
        audience: impl IntoIterator<Item = &'a Participant>,
        now: SystemTime,
    ) -> Result<(), GameError> {
        self.ensure_open()?;
        let round = self.current_round(now);
        if let Some(contestant) = contestant {
            round.contestant_id = Some(contestant.id);
            round.contestant_name = Some(contestant.display_name.clone());
            round.demographics = DemographicsBreakdown::from_participants(audience);
        }
        round.fff.push(stats);
        Ok(())
    }

    /// Fold a closed audience poll into the current round and log the lifeline.
    pub fn record_ata(
        &mut self,
        stats: AtaStats,
        question_number: u32,
        now: SystemTime,
    ) -> Result<(), GameError> {
        self.ensure_open()?;
        let round = self.current_round(now);
        round.lifelines.push(LifelineUse {
            lifeline: LIFELINE_ASK_THE_AUDIENCE.to_string(),
            question_number,
            used_at: stats.closed_at,
        });
        round.final_question_reached = round.final_question_reached.max(question_number);
        round.ata.push(stats);
        Ok(())
    }

    /// Close the current playthrough and append it to the game.
    pub fn finish_round(
        &mut self,
        outcome: RoundOutcome,
        final_question_reached: u32,
        winnings: u64,
        now: SystemTime,
    ) -> Result<&RoundTelemetry, GameError> {
        self.ensure_open()?;
        let round = self
            .current
            .take()
            .ok_or_else(|| GameError::NotFound("no round in progress".into()))?;
        Ok(self.push_round(round, outcome, final_question_reached, winnings, now))
    }

    fn push_round(
        &mut self,
        mut round: RoundTelemetry,
        outcome: RoundOutcome,
        final_question_reached: u32,
        winnings: u64,
        now: SystemTime,
    ) -> &RoundTelemetry {
        round.outcome = Some(outcome);
        round.final_question_reached = round.final_question_reached.max(final_question_reached);
        round.winnings = winnings;
        round.ended_at = Some(now);
        self.game.rounds.push(round);

        let last = self.game.rounds.len() - 1;
        &self.game.rounds[last]
    }

    /// The playthrough being aggregated, if any.
    pub fn current(&self) -> Option<&RoundTelemetry> {
        self.current.as_ref()
    }

    /// Finished rounds so far.
    pub fn rounds(&self) -> &[RoundTelemetry] {
        &self.game.rounds
    }

    /// Seal the game: interrupt any unfinished round, sum the rounds and stamp the end time.
    ///
    /// Sealing twice returns the already sealed telemetry unchanged.
    pub fn seal(&mut self, game_end_time: SystemTime, total_participants: u32) -> GameTelemetry {
        if self.sealed {
            return self.game.clone();
        }

        if let Some(round) = self.current.take() {
            let reached = round.final_question_reached;
            self.push_round(round, RoundOutcome::Interrupted, reached, 0, game_end_time);
        }

        let game = &mut self.game;
        game.game_end_time = Some(game_end_time);
        game.total_duration_ms = game_end_time
            .duration_since(game.game_start_time)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64;
        game.total_rounds = game.rounds.len() as u32;
        game.total_participants = total_participants;
        game.total_questions = game.rounds.iter().map(|r| r.final_question_reached).sum();
        game.total_lifelines_used = game.rounds.iter().map(|r| r.lifelines.len() as u32).sum();
        game.total_winnings = game.rounds.iter().map(|r| r.winnings).sum();

        self.sealed = true;
        self.game.clone()
    }

    fn ensure_open(&self) -> Result<(), GameError> {
        if self.sealed {
            return Err(GameError::IllegalTransition(
                "game telemetry is already sealed".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::participant::{DeviceInfo, ParticipantRegistry};

    fn at(ms: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_millis(ms)
    }

    fn stats(round_id: Uuid, winner: Option<Uuid>) -> FffStats {
        FffStats {
            round_id,
            question_id: "q1".into(),
            players: 2,
            total_submissions: 2,
            correct_submissions: winner.is_some() as u32,
            fastest_ms: Some(1000),
            mean_ms: Some(1500.0),
            slowest_ms: Some(2000),
            winner_id: winner,
            winner_time_ms: winner.map(|_| 1000),
        }
    }

    #[test]
    fn sealing_two_rounds_sums_them_and_measures_duration_exactly() {
        let session_id = Uuid::new_v4();
        let mut registry = ParticipantRegistry::new();
        let alice = registry
            .join(session_id, "Alice", None, DeviceInfo::default(), at(0))
            .unwrap()
            .clone();

        let mut aggregator = TelemetryAggregator::new(session_id, "Host", at(1_000));
        aggregator
            .record_fff(stats(Uuid::new_v4(), Some(alice.id)), Some(&alice), registry.iter(), at(2_000))
            .unwrap();
        aggregator
            .finish_round(RoundOutcome::WalkedAway, 7, 4_000, at(3_000))
            .unwrap();
        aggregator
            .record_fff(stats(Uuid::new_v4(), Some(alice.id)), Some(&alice), registry.iter(), at(4_000))
            .unwrap();
        aggregator.finish_round(RoundOutcome::Lost, 3, 0, at(5_000)).unwrap();

        let game = aggregator.seal(at(61_500), registry.len() as u32);
        assert_eq!(game.total_rounds, 2);
        assert_eq!(game.total_duration_ms, 60_500);
        assert_eq!(game.game_end_time, Some(at(61_500)));
        assert_eq!(game.total_questions, 10);
        assert_eq!(game.total_winnings, 4_000);
        assert_eq!(game.total_participants, 1);
        assert_eq!(game.rounds[0].round_number, 1);
        assert_eq!(game.rounds[1].round_number, 2);
        assert_eq!(game.rounds[0].demographics.by_device_type.get("unknown"), Some(&1));
    }

    #[test]
    fn seal_interrupts_unfinished_round_and_is_idempotent() {
        let mut aggregator = TelemetryAggregator::new(Uuid::new_v4(), "Host", at(0));
        aggregator
            .record_fff(stats(Uuid::new_v4(), None), None, std::iter::empty(), at(10))
            .unwrap();

        let first = aggregator.seal(at(100), 0);
        assert_eq!(first.total_rounds, 1);
        assert_eq!(first.rounds[0].outcome, Some(RoundOutcome::Interrupted));
        assert_eq!(first.rounds[0].ended_at, Some(at(100)));
        assert_eq!(first.rounds[0].winnings, 0);
        assert!(aggregator.current().is_none());

        let second = aggregator.seal(at(999), 5);
        assert_eq!(first, second);
        assert!(matches!(
            aggregator.finish_round(RoundOutcome::Won, 15, 1, at(1_000)),
            Err(GameError::IllegalTransition(_))
        ));
    }

    #[test]
    fn finishing_without_round_is_rejected() {
        let mut aggregator = TelemetryAggregator::new(Uuid::new_v4(), "Host", at(0));
        assert!(matches!(
            aggregator.finish_round(RoundOutcome::Won, 15, 1_000_000, at(1)),
            Err(GameError::NotFound(_))
        ));
    }
}
