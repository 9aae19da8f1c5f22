//! Ask-the-audience voting engine.

use std::time::{Duration, SystemTime};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{TimestampMilliSeconds, serde_as};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::{
    eligibility::Eligibility,
    error::GameError,
    participant::ParticipantId,
    question::AnswerOption,
    telemetry::AtaStats,
};

/// Synthetic voter used by the single-operator mode.
pub const OFFLINE_VOTER: ParticipantId = Uuid::nil();

/// Who votes in a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AtaMode {
    /// Connected participants vote.
    #[default]
    Live,
    /// The operator casts one vote on behalf of a simulated audience.
    Offline,
}

/// Transient state of the open (or just closed) poll.
#[derive(Debug, Clone)]
pub struct AtaQuestionState {
    /// Identifier of this opening.
    pub round_id: Uuid,
    /// Main game question identifier.
    pub question_id: String,
    /// Question text shown to voters.
    pub question_text: String,
    /// When the poll opened.
    pub start_time: SystemTime,
    /// Voting window.
    pub window: Duration,
    /// Live or offline poll.
    pub mode: AtaMode,
    /// Live percentage per option.
    pub percentages: IndexMap<AnswerOption, f64>,
    /// Number of counted votes.
    pub total_votes: u32,
    /// Cleared exactly once, by the first close.
    pub is_active: bool,
}

impl AtaQuestionState {
    /// Instant after which votes are late.
    pub fn deadline(&self) -> SystemTime {
        self.start_time + self.window
    }
}

/// One counted vote.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AtaVote {
    /// Vote identifier.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Voter; [`OFFLINE_VOTER`] in offline mode.
    pub participant_id: Uuid,
    /// Opening the vote belongs to.
    pub round_id: Uuid,
    /// Question text voted on.
    pub question_text: String,
    /// Chosen option.
    pub selected_option: AnswerOption,
    /// Server receive time of the latest (re)vote.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    #[schema(value_type = i64)]
    pub submitted_at: SystemTime,
}

/// Snapshot of the tally broadcast after every accepted vote.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AtaTally {
    /// Question identifier.
    pub question_id: String,
    /// Percentage per option, one decimal.
    pub percentages: IndexMap<AnswerOption, f64>,
    /// Votes per option.
    pub vote_counts: IndexMap<AnswerOption, u32>,
    /// Number of counted votes.
    pub total_votes: u32,
    /// `total_votes / eligible participants`.
    pub completion_rate: f64,
    /// Live or offline poll.
    pub mode: AtaMode,
}

/// Runs audience polls for one session.
#[derive(Debug, Clone)]
pub struct AtaVotingEngine {
    session_id: Uuid,
    current: Option<AtaQuestionState>,
    votes: IndexMap<ParticipantId, AtaVote>,
    eligible: u32,
    history: Vec<AtaVote>,
}

fn zeroed<T: Default>() -> IndexMap<AnswerOption, T> {
    AnswerOption::ALL.iter().map(|o| (*o, T::default())).collect()
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

impl AtaVotingEngine {
    /// Create an idle engine.
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            current: None,
            votes: IndexMap::new(),
            eligible: 0,
            history: Vec::new(),
        }
    }

    /// Start a poll; every option starts at 0%.
    ///
    /// `eligible` is the number of participants allowed to vote and is forced to 1 in offline
    /// mode.
    pub fn open(
        &mut self,
        question_id: &str,
        question_text: &str,
        window: Duration,
        mode: AtaMode,
        eligible: u32,
        now: SystemTime,
    ) -> Result<&AtaQuestionState, GameError> {
        if self.is_open() {
            return Err(GameError::Conflict("an audience poll is already open".into()));
        }

        self.votes.clear();
        self.eligible = match mode {
            AtaMode::Live => eligible,
            AtaMode::Offline => 1,
        };
        Ok(self.current.insert(AtaQuestionState {
            round_id: Uuid::new_v4(),
            question_id: question_id.to_string(),
            question_text: question_text.to_string(),
            start_time: now,
            window,
            mode,
            percentages: zeroed(),
            total_votes: 0,
            is_active: true,
        }))
    }

    /// Count (or replace) the vote of `participant_id`.
    pub fn vote(
        &mut self,
        participant_id: ParticipantId,
        option: AnswerOption,
        eligibility: &Eligibility,
        now: SystemTime,
    ) -> Result<AtaTally, GameError> {
        let state = self.active_state(now)?;
        if state.mode == AtaMode::Offline {
            return Err(GameError::IneligibleParticipant(
                "the audience poll is run by the operator".into(),
            ));
        }
        if !eligibility.can_vote {
            return Err(GameError::IneligibleParticipant(eligibility.reason.to_string()));
        }

        self.upsert(participant_id, option, now);
        Ok(self.refresh())
    }

    /// Cast the single synthetic vote of an offline poll (last write wins).
    pub fn vote_offline(&mut self, option: AnswerOption, now: SystemTime) -> Result<AtaTally, GameError> {
        let state = self.active_state(now)?;
        if state.mode != AtaMode::Offline {
            return Err(GameError::Conflict(
                "the audience poll is live; operator votes are refused".into(),
            ));
        }

        self.upsert(OFFLINE_VOTER, option, now);
        Ok(self.refresh())
    }

    /// Update the number of participants allowed to vote (joins and drops during the poll).
    pub fn set_eligible(&mut self, eligible: u32) {
        if self.current.as_ref().is_some_and(|s| s.mode == AtaMode::Live) {
            self.eligible = eligible;
        }
    }

    /// Freeze the tally.
    ///
    /// Returns `None` when no poll is open (already closed by a concurrent trigger).
    pub fn close(&mut self, now: SystemTime) -> Option<AtaStats> {
        if !self.is_open() {
            return None;
        }
        let tally = self.refresh();
        let state = self.current.as_mut()?;
        state.is_active = false;

        self.history.extend(self.votes.drain(..).map(|(_, vote)| vote));

        Some(AtaStats {
            round_id: state.round_id,
            question_id: state.question_id.clone(),
            question_text: state.question_text.clone(),
            mode: state.mode,
            total_votes: tally.total_votes,
            vote_counts: tally.vote_counts,
            percentages: tally.percentages,
            eligible_participants: self.eligible,
            completion_rate: tally.completion_rate,
            opened_at: state.start_time,
            closed_at: now,
        })
    }

    /// Whether a poll currently accepts votes.
    pub fn is_open(&self) -> bool {
        self.current.as_ref().is_some_and(|state| state.is_active)
    }

    /// The open poll, or the last closed one.
    pub fn current(&self) -> Option<&AtaQuestionState> {
        self.current.as_ref()
    }

    /// Tally of the open poll.
    pub fn tally(&self) -> Option<AtaTally> {
        let state = self.current.as_ref().filter(|s| s.is_active)?;
        Some(self.compute(state))
    }

    /// Counted votes of the open poll, in first-vote order.
    pub fn votes(&self) -> impl Iterator<Item = &AtaVote> {
        self.votes.values()
    }

    /// Votes of every closed poll.
    pub fn history(&self) -> &[AtaVote] {
        &self.history
    }

    /// Drop the transient poll state once its results were folded into telemetry.
    pub fn discard_closed(&mut self) {
        if !self.is_open() {
            self.current = None;
        }
    }

    fn active_state(&self, now: SystemTime) -> Result<&AtaQuestionState, GameError> {
        let state = self
            .current
            .as_ref()
            .filter(|s| s.is_active)
            .ok_or(GameError::LateSubmission)?;
        if now > state.deadline() {
            return Err(GameError::LateSubmission);
        }
        Ok(state)
    }

    fn upsert(&mut self, participant_id: ParticipantId, option: AnswerOption, now: SystemTime) {
        let Some(state) = self.current.as_ref() else {
            return;
        };
        match self.votes.get_mut(&participant_id) {
            Some(vote) => {
                vote.selected_option = option;
                vote.submitted_at = now;
            }
            None => {
                self.votes.insert(
                    participant_id,
                    AtaVote {
                        id: Uuid::new_v4(),
                        session_id: self.session_id,
                        participant_id,
                        round_id: state.round_id,
                        question_text: state.question_text.clone(),
                        selected_option: option,
                        submitted_at: now,
                    },
                );
            }
        }
    }

    fn compute(&self, state: &AtaQuestionState) -> AtaTally {
        let mut vote_counts = zeroed::<u32>();
        for vote in self.votes.values() {
            *vote_counts.entry(vote.selected_option).or_default() += 1;
        }

        let total_votes = self.votes.len() as u32;
        let percentages = vote_counts
            .iter()
            .map(|(option, count)| {
                let pct = if total_votes == 0 {
                    0.0
                } else {
                    round_one_decimal(*count as f64 / total_votes as f64 * 100.0)
                };
                (*option, pct)
            })
            .collect();
        let completion_rate = if self.eligible == 0 {
            0.0
        } else {
            total_votes as f64 / self.eligible as f64
        };

        AtaTally {
            question_id: state.question_id.clone(),
            percentages,
            vote_counts,
            total_votes,
            completion_rate,
            mode: state.mode,
        }
    }

    fn refresh(&mut self) -> AtaTally {
        let Some(state) = self.current.as_ref() else {
            return AtaTally {
                question_id: String::new(),
                percentages: zeroed(),
                vote_counts: zeroed(),
                total_votes: 0,
                completion_rate: 0.0,
                mode: AtaMode::Live,
            };
        };
        let tally = self.compute(state);
        if let Some(state) = self.current.as_mut() {
            state.percentages = tally.percentages.clone();
            state.total_votes = tally.total_votes;
        }
        tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{
        eligibility::evaluate, participant::ParticipantState, state_machine::SessionStatus,
    };

    const WINDOW: Duration = Duration::from_secs(30);

    fn at(ms: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_millis(ms)
    }

    fn voter() -> Eligibility {
        evaluate(SessionStatus::AtaActive, ParticipantState::Lobby)
    }

    fn live_engine(eligible: u32) -> AtaVotingEngine {
        let mut engine = AtaVotingEngine::new(Uuid::new_v4());
        engine
            .open("q7", "Which river is longest?", WINDOW, AtaMode::Live, eligible, at(0))
            .unwrap();
        engine
    }

    fn sum(percentages: &IndexMap<AnswerOption, f64>) -> f64 {
        percentages.values().sum()
    }

    #[test]
    fn three_votes_resolve_to_rounded_percentages() {
        let mut engine = live_engine(4);
        engine.vote(Uuid::new_v4(), AnswerOption::A, &voter(), at(1)).unwrap();
        engine.vote(Uuid::new_v4(), AnswerOption::A, &voter(), at(2)).unwrap();
        let tally = engine.vote(Uuid::new_v4(), AnswerOption::B, &voter(), at(3)).unwrap();

        assert_eq!(tally.total_votes, 3);
        assert_eq!(tally.percentages[&AnswerOption::A], 66.7);
        assert_eq!(tally.percentages[&AnswerOption::B], 33.3);
        assert_eq!(tally.percentages[&AnswerOption::C], 0.0);
        assert_eq!(tally.percentages[&AnswerOption::D], 0.0);
        assert_eq!(tally.completion_rate, 0.75);
        assert_eq!(engine.current().unwrap().total_votes, 3);
    }

    #[test]
    fn percentages_start_at_zero_and_sum_to_hundred() {
        let mut engine = live_engine(10);
        let tally = engine.tally().unwrap();
        assert_eq!(tally.total_votes, 0);
        assert_eq!(sum(&tally.percentages), 0.0);

        let options = [AnswerOption::A, AnswerOption::B, AnswerOption::C, AnswerOption::D];
        for (index, option) in options.iter().cycle().take(7).enumerate() {
            let tally = engine
                .vote(Uuid::new_v4(), *option, &voter(), at(index as u64))
                .unwrap();
            assert!((sum(&tally.percentages) - 100.0).abs() <= 0.2, "{tally:?}");
        }
    }

    #[test]
    fn revote_replaces_prior_vote() {
        let mut engine = live_engine(2);
        let id = Uuid::new_v4();
        engine.vote(id, AnswerOption::A, &voter(), at(1)).unwrap();
        let tally = engine.vote(id, AnswerOption::C, &voter(), at(2)).unwrap();

        assert_eq!(tally.total_votes, 1);
        assert_eq!(tally.vote_counts[&AnswerOption::A], 0);
        assert_eq!(tally.vote_counts[&AnswerOption::C], 1);
        assert_eq!(engine.votes().count(), 1);
    }

    #[test]
    fn vote_after_close_is_late_and_tally_unchanged() {
        let mut engine = live_engine(2);
        engine.vote(Uuid::new_v4(), AnswerOption::D, &voter(), at(1)).unwrap();
        let stats = engine.close(at(100)).unwrap();
        assert_eq!(stats.total_votes, 1);

        let err = engine
            .vote(Uuid::new_v4(), AnswerOption::A, &voter(), at(101))
            .unwrap_err();
        assert_eq!(err, GameError::LateSubmission);
        assert_eq!(engine.history().len(), 1);
        assert!(engine.close(at(102)).is_none());
    }

    #[test]
    fn contestant_cannot_vote() {
        let mut engine = live_engine(2);
        let contestant = evaluate(SessionStatus::AtaActive, ParticipantState::Winner);
        let err = engine
            .vote(Uuid::new_v4(), AnswerOption::A, &contestant, at(1))
            .unwrap_err();
        assert!(matches!(err, GameError::IneligibleParticipant(_)));
        assert_eq!(engine.tally().unwrap().total_votes, 0);
    }

    #[test]
    fn offline_mode_counts_one_synthetic_voter() {
        let mut engine = AtaVotingEngine::new(Uuid::new_v4());
        engine
            .open("q3", "Capital of Australia?", WINDOW, AtaMode::Offline, 40, at(0))
            .unwrap();

        assert!(engine.vote(Uuid::new_v4(), AnswerOption::A, &voter(), at(1)).is_err());
        engine.vote_offline(AnswerOption::B, at(2)).unwrap();
        let tally = engine.vote_offline(AnswerOption::C, at(3)).unwrap();
        assert_eq!(tally.total_votes, 1);
        assert_eq!(tally.percentages[&AnswerOption::C], 100.0);
        assert_eq!(tally.completion_rate, 1.0);

        let stats = engine.close(at(4)).unwrap();
        assert_eq!(stats.mode, AtaMode::Offline);
        assert_eq!(engine.history()[0].participant_id, OFFLINE_VOTER);
    }

    #[test]
    fn opening_twice_conflicts() {
        let mut engine = live_engine(1);
        assert!(matches!(
            engine.open("q8", "Another?", WINDOW, AtaMode::Live, 1, at(5)),
            Err(GameError::Conflict(_))
        ));
    }
}
