//! Fastest-finger round engine.
//!
//! One question at a time: [`FffRoundEngine::open`] starts the clock, [`FffRoundEngine::submit`]
//! records at most one answer per participant and [`FffRoundEngine::close`] ranks the correct
//! answers. Closing is a one-shot transition: the first close does the work and every later close
//! (explicit or timer driven) returns `None`.

use std::time::{Duration, SystemTime};

use serde::Serialize;
use serde_with::{TimestampMilliSeconds, serde_as};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::{
    eligibility::Eligibility,
    error::GameError,
    participant::ParticipantId,
    question::{AnswerSequence, FffQuestion},
};

/// Transient state of the open (or just closed) fastest-finger question.
#[derive(Debug, Clone)]
pub struct FffQuestionState {
    /// Identifier of this opening; a re-run of the same question gets a fresh one.
    pub round_id: Uuid,
    /// Question being played.
    pub question: FffQuestion,
    /// When the question opened.
    pub start_time: SystemTime,
    /// Answering window.
    pub time_limit: Duration,
    /// Cleared exactly once, by the first close.
    pub is_active: bool,
}

impl FffQuestionState {
    /// Instant after which submissions are late.
    pub fn deadline(&self) -> SystemTime {
        self.start_time + self.time_limit
    }
}

/// One accepted submission.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct FffAnswer {
    /// Answer identifier.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Submitting participant.
    pub participant_id: Uuid,
    /// Question answered.
    pub question_id: String,
    /// Opening the answer belongs to.
    pub round_id: Uuid,
    /// Submitted ordering.
    #[schema(value_type = String, example = "C,A,D,B")]
    pub answer_sequence: AnswerSequence,
    /// Server receive time.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    #[schema(value_type = i64)]
    pub submitted_at: SystemTime,
    /// Milliseconds between question start and receipt.
    pub time_elapsed_ms: u64,
    /// Set when the round closes.
    pub is_correct: bool,
    /// 1-based rank among correct answers, set when the round closes.
    pub rank: Option<u32>,
}

/// Evaluation of a closed question.
#[derive(Debug, Clone)]
pub struct FffResults {
    /// Opening that was closed.
    pub round_id: Uuid,
    /// Question that was played.
    pub question_id: String,
    /// Correct answers by rank, then incorrect answers in arrival order.
    pub answers: Vec<FffAnswer>,
    /// Participant ranked first; `None` for a no-contest.
    pub winner: Option<Uuid>,
    /// When the question closed.
    pub closed_at: SystemTime,
}

impl FffResults {
    /// True when nobody ordered the options correctly.
    pub fn is_no_contest(&self) -> bool {
        self.winner.is_none()
    }
}

/// Runs fastest-finger questions for one session.
#[derive(Debug, Clone)]
pub struct FffRoundEngine {
    session_id: Uuid,
    current: Option<FffQuestionState>,
    // Arrival order doubles as the final tiebreak.
    submissions: Vec<FffAnswer>,
    history: Vec<FffAnswer>,
}

impl FffRoundEngine {
    /// Create an idle engine.
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            current: None,
            submissions: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Start answering on `question`.
    pub fn open(
        &mut self,
        question: FffQuestion,
        time_limit: Duration,
        now: SystemTime,
    ) -> Result<&FffQuestionState, GameError> {
        if self.is_open() {
            return Err(GameError::Conflict(
                "a fastest finger question is already open".into(),
            ));
        }

        self.submissions.clear();
        Ok(self.current.insert(FffQuestionState {
            round_id: Uuid::new_v4(),
            question,
            start_time: now,
            time_limit,
            is_active: true,
        }))
    }

    /// Record a submission.
    ///
    /// Checks run in order: round closed, window elapsed, eligibility, duplicate. A rejected
    /// submission leaves no trace.
    pub fn submit(
        &mut self,
        participant_id: ParticipantId,
        answer_sequence: AnswerSequence,
        eligibility: &Eligibility,
        now: SystemTime,
    ) -> Result<&FffAnswer, GameError> {
        let state = self
            .current
            .as_ref()
            .filter(|state| state.is_active)
            .ok_or(GameError::LateSubmission)?;

        let elapsed = now.duration_since(state.start_time).unwrap_or(Duration::ZERO);
        if elapsed > state.time_limit {
            return Err(GameError::LateSubmission);
        }
        if !eligibility.can_submit_answer {
            return Err(GameError::IneligibleParticipant(eligibility.reason.to_string()));
        }

        let question_id = &state.question.id;
        let already_answered = self
            .submissions
            .iter()
            .chain(self.history.iter())
            .any(|a| a.participant_id == participant_id && &a.question_id == question_id);
        if already_answered {
            return Err(GameError::DuplicateSubmission);
        }

        self.submissions.push(FffAnswer {
            id: Uuid::new_v4(),
            session_id: self.session_id,
            participant_id,
            question_id: question_id.clone(),
            round_id: state.round_id,
            answer_sequence,
            submitted_at: now,
            time_elapsed_ms: elapsed.as_millis() as u64,
            is_correct: false,
            rank: None,
        });
        Ok(&self.submissions[self.submissions.len() - 1])
    }

    /// Close the open question and rank its answers.
    ///
    /// Returns `None` when no question is open (already closed by a concurrent trigger).
    pub fn close(&mut self, now: SystemTime) -> Option<FffResults> {
        let state = self.current.as_mut().filter(|state| state.is_active)?;
        state.is_active = false;

        let correct_order = &state.question.correct_order;
        for answer in &mut self.submissions {
            answer.is_correct = &answer.answer_sequence == correct_order;
            answer.rank = None;
        }

        let mut ranking = self
            .submissions
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_correct)
            .map(|(arrival, a)| (a.time_elapsed_ms, a.submitted_at, arrival))
            .collect::<Vec<_>>();
        ranking.sort();
        for (rank, (_, _, arrival)) in ranking.iter().enumerate() {
            self.submissions[*arrival].rank = Some(rank as u32 + 1);
        }

        let winner = ranking
            .first()
            .map(|(_, _, arrival)| self.submissions[*arrival].participant_id);

        let mut answers = self.submissions.clone();
        answers.sort_by_key(|a| a.rank.unwrap_or(u32::MAX));
        self.history.append(&mut self.submissions);

        Some(FffResults {
            round_id: state.round_id,
            question_id: state.question.id.clone(),
            answers,
            winner,
            closed_at: now,
        })
    }

    /// Whether a question is currently accepting answers.
    pub fn is_open(&self) -> bool {
        self.current.as_ref().is_some_and(|state| state.is_active)
    }

    /// The open question, or the last closed one.
    pub fn current(&self) -> Option<&FffQuestionState> {
        self.current.as_ref()
    }

    /// Accepted submissions of the open question, in arrival order.
    pub fn pending(&self) -> &[FffAnswer] {
        &self.submissions
    }

    /// Evaluated answers of every closed question.
    pub fn history(&self) -> &[FffAnswer] {
        &self.history
    }

    /// Drop the transient question state once its results were folded into telemetry.
    pub fn discard_closed(&mut self) {
        if !self.is_open() {
            self.current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{
        eligibility::evaluate, participant::ParticipantState, state_machine::SessionStatus,
    };

    const LIMIT: Duration = Duration::from_millis(20_000);

    fn at(ms: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_millis(ms)
    }

    fn question() -> FffQuestion {
        FffQuestion {
            id: "q-order".into(),
            text: "Order these planets by distance from the sun".into(),
            options: vec!["Venus".into(), "Mercury".into(), "Mars".into(), "Earth".into()],
            correct_order: "B,A,D,C".parse().unwrap(),
        }
    }

    fn playing() -> Eligibility {
        evaluate(SessionStatus::FffActive, ParticipantState::PlayingFff)
    }

    fn open_engine() -> FffRoundEngine {
        let mut engine = FffRoundEngine::new(Uuid::new_v4());
        engine.open(question(), LIMIT, at(0)).unwrap();
        engine
    }

    #[test]
    fn correct_answer_wins_over_faster_incorrect_one() {
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        let mut engine = open_engine();

        engine.submit(p1, "B,A,D,C".parse().unwrap(), &playing(), at(3_500)).unwrap();
        engine.submit(p2, "A,B,C,D".parse().unwrap(), &playing(), at(2_000)).unwrap();

        let results = engine.close(at(20_000)).unwrap();
        let find = |id| results.answers.iter().find(|a| a.participant_id == id).unwrap();
        assert_eq!(find(p1).rank, Some(1));
        assert!(find(p1).is_correct);
        assert_eq!(find(p1).time_elapsed_ms, 3_500);
        assert_eq!(find(p2).rank, None);
        assert!(!find(p2).is_correct);
        assert_eq!(results.winner, Some(p1));
    }

    #[test]
    fn ranks_are_contiguous_and_follow_elapsed_time() {
        let mut engine = open_engine();
        let ids = (0..5).map(|_| Uuid::new_v4()).collect::<Vec<_>>();
        let times = [9_000, 1_200, 4_000, 700, 4_000];
        let sequences = ["B,A,D,C", "B,A,D,C", "A,B,C,D", "B,A,D,C", "B,A,D,C"];

        for ((id, ms), seq) in ids.iter().zip(times).zip(sequences) {
            engine.submit(*id, seq.parse().unwrap(), &playing(), at(ms)).unwrap();
        }

        let results = engine.close(at(20_000)).unwrap();
        let ranked = results
            .answers
            .iter()
            .filter(|a| a.is_correct)
            .collect::<Vec<_>>();
        assert_eq!(ranked.len(), 4);
        for (index, answer) in ranked.iter().enumerate() {
            assert_eq!(answer.rank, Some(index as u32 + 1));
        }
        assert!(ranked.windows(2).all(|w| w[0].time_elapsed_ms <= w[1].time_elapsed_ms));
        assert_eq!(results.winner, Some(ids[3]));
        assert!(results.answers.iter().filter(|a| !a.is_correct).all(|a| a.rank.is_none()));
    }

    #[test]
    fn equal_times_fall_back_to_arrival_order() {
        let mut engine = open_engine();
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        engine.submit(first, "B,A,D,C".parse().unwrap(), &playing(), at(1_000)).unwrap();
        engine.submit(second, "B,A,D,C".parse().unwrap(), &playing(), at(1_000)).unwrap();

        let results = engine.close(at(2_000)).unwrap();
        assert_eq!(results.winner, Some(first));
    }

    #[test]
    fn second_submission_is_rejected_and_first_kept() {
        let mut engine = open_engine();
        let id = Uuid::new_v4();
        engine.submit(id, "A,B,C,D".parse().unwrap(), &playing(), at(1_000)).unwrap();

        let err = engine
            .submit(id, "B,A,D,C".parse().unwrap(), &playing(), at(1_500))
            .unwrap_err();
        assert_eq!(err, GameError::DuplicateSubmission);
        assert_eq!(engine.pending().len(), 1);
        assert_eq!(engine.pending()[0].answer_sequence.to_string(), "A,B,C,D");
    }

    #[test]
    fn submission_after_close_is_late_and_not_recorded() {
        let mut engine = open_engine();
        engine
            .submit(Uuid::new_v4(), "B,A,D,C".parse().unwrap(), &playing(), at(500))
            .unwrap();
        engine.close(at(5_000)).unwrap();

        let err = engine
            .submit(Uuid::new_v4(), "B,A,D,C".parse().unwrap(), &playing(), at(5_001))
            .unwrap_err();
        assert_eq!(err, GameError::LateSubmission);
        assert_eq!(engine.history().len(), 1);
        assert!(engine.pending().is_empty());
    }

    #[test]
    fn submission_past_time_limit_is_late() {
        let mut engine = open_engine();
        let err = engine
            .submit(Uuid::new_v4(), "B,A,D,C".parse().unwrap(), &playing(), at(20_001))
            .unwrap_err();
        assert_eq!(err, GameError::LateSubmission);
    }

    #[test]
    fn ineligible_participant_is_rejected() {
        let mut engine = open_engine();
        let spectator = evaluate(SessionStatus::FffActive, ParticipantState::Lobby);
        let err = engine
            .submit(Uuid::new_v4(), "B,A,D,C".parse().unwrap(), &spectator, at(100))
            .unwrap_err();
        assert!(matches!(err, GameError::IneligibleParticipant(_)));
        assert!(engine.pending().is_empty());
    }

    #[test]
    fn close_is_one_shot_and_open_conflicts_while_active() {
        let mut engine = open_engine();
        assert!(matches!(
            engine.open(question(), LIMIT, at(1)),
            Err(GameError::Conflict(_))
        ));

        let results = engine.close(at(10)).unwrap();
        assert!(results.is_no_contest());
        assert!(engine.close(at(11)).is_none());
        assert!(!engine.is_open());
    }
}
