use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use serde_with::{TimestampMilliSeconds, serde_as};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    dao::models::GameTelemetrySummary,
    dto::{
        phase::GameStateType,
        validation::{validate_answer_option, validate_answer_sequence, validate_option_texts},
    },
    state::{
        ata::{AtaMode, AtaTally},
        fff::{FffAnswer, FffResults},
        participant::{Participant, ParticipantState},
        question::{AnswerOption, FffQuestion, MainGameQuestion},
        session::{ContestantSelection, LiveSession, OpenedRound, SessionMode},
        state_machine::SessionStatus,
        telemetry::{AtaStats, RoundOutcome},
    },
};

/// Payload used to create a session.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateSessionRequest {
    /// Name of the host running the show.
    #[validate(length(min = 1, max = 64))]
    pub host_name: String,
}

/// Participant row as seen by the host.
#[derive(Debug, Serialize, ToSchema)]
pub struct ParticipantSummary {
    pub id: Uuid,
    pub display_name: String,
    pub state: ParticipantState,
    pub is_active: bool,
    pub has_played_fff: bool,
    pub has_used_ata: bool,
}

impl From<&Participant> for ParticipantSummary {
    fn from(value: &Participant) -> Self {
        Self {
            id: value.id,
            display_name: value.display_name.clone(),
            state: value.state,
            is_active: value.is_active,
            has_played_fff: value.has_played_fff,
            has_used_ata: value.has_used_ata,
        }
    }
}

/// Host view of a live session.
#[serde_as]
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionSummary {
    pub id: Uuid,
    pub host_name: String,
    pub status: SessionStatus,
    /// Presentation state currently broadcast to participants.
    pub state: GameStateType,
    pub mode: SessionMode,
    pub current_question_id: Option<String>,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    #[schema(value_type = Option<i64>)]
    pub question_start_time: Option<SystemTime>,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    #[schema(value_type = i64)]
    pub created_at: SystemTime,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    #[schema(value_type = Option<i64>)]
    pub started_at: Option<SystemTime>,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    #[schema(value_type = Option<i64>)]
    pub ended_at: Option<SystemTime>,
    /// True once the game is over and inbound events are rejected.
    pub closed: bool,
    pub participants: Vec<ParticipantSummary>,
    /// Live tally of the open audience poll.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ata_tally: Option<AtaTally>,
}

impl From<&LiveSession> for SessionSummary {
    fn from(session: &LiveSession) -> Self {
        Self {
            id: session.id(),
            host_name: session.host_name().to_string(),
            status: session.status(),
            state: GameStateType::derive(session.status(), session.last_round()),
            mode: session.mode(),
            current_question_id: session.current_question_id().map(str::to_string),
            question_start_time: session.question_start_time(),
            created_at: session.created_at(),
            started_at: session.started_at(),
            ended_at: session.ended_at(),
            closed: session.is_fenced(),
            participants: session
                .participants()
                .iter()
                .map(ParticipantSummary::from)
                .collect(),
            ata_tally: session.ata().tally(),
        }
    }
}

fn validate_selection(selection: &ContestantSelection) -> Result<(), ValidationError> {
    let valid = match selection {
        ContestantSelection::All => true,
        ContestantSelection::Explicit { participant_ids } => !participant_ids.is_empty(),
        ContestantSelection::Random { count } => *count > 0,
    };
    if valid {
        Ok(())
    } else {
        let mut err = ValidationError::new("selection_empty");
        err.message = Some("Selection must pick at least one participant".into());
        Err(err)
    }
}

/// Contestants for the next fastest-finger round.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SelectContestantsRequest {
    /// Which participants to select; a repeated explicit id counts once.
    #[validate(custom(function = "validate_selection"))]
    pub selection: ContestantSelection,
}

/// Participants put into the next fastest-finger round.
#[derive(Debug, Serialize, ToSchema)]
pub struct SelectContestantsResponse {
    /// Selected participants, each listed once.
    pub selected: Vec<Uuid>,
}

/// Fastest-finger question to open.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct OpenFffRequest {
    #[validate(length(min = 1, max = 128))]
    pub question_id: String,
    #[validate(length(min = 1))]
    pub text: String,
    #[validate(custom(function = "validate_option_texts"))]
    pub options: Vec<String>,
    /// Correct ordering, e.g. `B,A,D,C`.
    #[validate(custom(function = "validate_answer_sequence"))]
    pub correct_order: String,
    /// Overrides the configured answering window.
    #[validate(range(min = 1_000, max = 300_000))]
    pub time_limit_ms: Option<u64>,
}

impl OpenFffRequest {
    /// Build the question; call after validation.
    pub fn question(&self) -> Result<FffQuestion, String> {
        Ok(FffQuestion {
            id: self.question_id.clone(),
            text: self.text.clone(),
            options: self.options.clone(),
            correct_order: self.correct_order.parse().map_err(|err| format!("{err}"))?,
        })
    }

    /// Requested window, if any.
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_ms.map(Duration::from_millis)
    }
}

/// Audience poll to open.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct OpenAtaRequest {
    #[validate(length(min = 1, max = 128))]
    pub question_id: String,
    /// Position on the money ladder.
    #[validate(range(min = 1))]
    pub number: u32,
    #[validate(length(min = 1))]
    pub text: String,
    #[validate(custom(function = "validate_option_texts"))]
    pub options: Vec<String>,
    /// Overrides the configured voting window.
    #[validate(range(min = 1_000, max = 300_000))]
    pub window_ms: Option<u64>,
    #[serde(default)]
    pub mode: AtaMode,
}

impl OpenAtaRequest {
    /// Build the polled question.
    pub fn question(&self) -> MainGameQuestion {
        MainGameQuestion {
            id: self.question_id.clone(),
            number: self.number,
            text: self.text.clone(),
            options: self.options.clone(),
        }
    }

    /// Requested window, if any.
    pub fn window(&self) -> Option<Duration> {
        self.window_ms.map(Duration::from_millis)
    }
}

/// Operator vote of an offline poll.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct OfflineVoteRequest {
    #[validate(custom(function = "validate_answer_option"))]
    pub option: String,
}

impl OfflineVoteRequest {
    /// Parsed option; call after validation.
    pub fn option(&self) -> Result<AnswerOption, String> {
        self.option.parse().map_err(|err| format!("{err}"))
    }
}

/// End of a contestant playthrough.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct FinishRoundRequest {
    pub outcome: RoundOutcome,
    #[validate(range(max = 100))]
    pub final_question_reached: u32,
    pub winnings: u64,
}

/// Timer information of an opened round.
#[serde_as]
#[derive(Debug, Serialize, ToSchema)]
pub struct RoundOpenedResponse {
    pub round_id: Uuid,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    #[schema(value_type = i64)]
    pub deadline: SystemTime,
}

impl From<OpenedRound> for RoundOpenedResponse {
    fn from(value: OpenedRound) -> Self {
        Self {
            round_id: value.round_id,
            deadline: value.deadline,
        }
    }
}

/// Ranking of a closed fastest-finger question.
#[serde_as]
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FffResultsView {
    pub round_id: Uuid,
    pub question_id: String,
    /// Correct answers by rank, then incorrect ones.
    pub answers: Vec<FffAnswer>,
    pub winner: Option<Uuid>,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    #[schema(value_type = i64)]
    pub closed_at: SystemTime,
}

impl From<&FffResults> for FffResultsView {
    fn from(value: &FffResults) -> Self {
        Self {
            round_id: value.round_id,
            question_id: value.question_id.clone(),
            answers: value.answers.clone(),
            winner: value.winner,
            closed_at: value.closed_at,
        }
    }
}

/// Outcome of a close request; `closed` is false when nothing was open.
#[derive(Debug, Serialize, ToSchema)]
pub struct CloseFffResponse {
    pub closed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<FffResultsView>,
}

/// Outcome of a poll close request.
#[derive(Debug, Serialize, ToSchema)]
pub struct CloseAtaResponse {
    pub closed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<AtaStats>,
}

/// Result of an archival request.
#[derive(Debug, Serialize, ToSchema)]
pub struct ArchiveResponse {
    pub session_id: Uuid,
    pub telemetry: GameTelemetrySummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<String> {
        ["Mercury", "Venus", "Earth", "Mars"].map(String::from).to_vec()
    }

    #[test]
    fn open_fff_request_checks_the_ordering() {
        let mut request = OpenFffRequest {
            question_id: "q1".into(),
            text: "Order the planets from the sun".into(),
            options: options(),
            correct_order: "A,B,C,D".into(),
            time_limit_ms: Some(20_000),
        };
        assert!(request.validate().is_ok());
        assert_eq!(request.question().unwrap().correct_order.to_string(), "A,B,C,D");

        request.correct_order = "A,B".into();
        assert!(request.validate().is_err());
    }

    #[test]
    fn selection_requests_must_pick_someone() {
        let request: SelectContestantsRequest =
            serde_json::from_str(r#"{"selection":{"kind":"random","count":0}}"#).unwrap();
        assert!(request.validate().is_err());

        let request: SelectContestantsRequest =
            serde_json::from_str(r#"{"selection":{"kind":"all"}}"#).unwrap();
        assert!(request.validate().is_ok());
    }

    #[test]
    fn too_short_windows_are_rejected() {
        let request = OpenAtaRequest {
            question_id: "m5".into(),
            number: 5,
            text: "Which planet is the hottest?".into(),
            options: options(),
            window_ms: Some(10),
            mode: AtaMode::Live,
        };
        assert!(request.validate().is_err());
    }
}
