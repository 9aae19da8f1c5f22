use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    dao::models::{ParticipantHistoryEntity, SessionEntity},
    state::{
        ata::AtaVote,
        fff::FffAnswer,
        participant::{DeviceInfo, ParticipantState},
        session::SessionMode,
        state_machine::SessionStatus,
        telemetry::{GameTelemetry, RoundTelemetry},
    },
};

fn to_bson_time(value: std::time::SystemTime) -> DateTime {
    DateTime::from_system_time(value)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: String,
    host_name: String,
    status: SessionStatus,
    mode: SessionMode,
    current_question_id: Option<String>,
    question_start_time: Option<DateTime>,
    created_at: DateTime,
    started_at: Option<DateTime>,
    ended_at: Option<DateTime>,
    updated_at: DateTime,
    participant_count: u32,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            host_name: value.host_name,
            status: value.status,
            mode: value.mode,
            current_question_id: value.current_question_id,
            question_start_time: value.question_start_time.map(to_bson_time),
            created_at: to_bson_time(value.created_at),
            started_at: value.started_at.map(to_bson_time),
            ended_at: value.ended_at.map(to_bson_time),
            updated_at: to_bson_time(value.updated_at),
            participant_count: value.participant_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoParticipantHistoryDocument {
    #[serde(rename = "_id")]
    id: String,
    session_id: String,
    display_name: String,
    joined_at: DateTime,
    last_seen_at: DateTime,
    state: ParticipantState,
    has_played_fff: bool,
    has_used_ata: bool,
    selected_for_fff_at: Option<DateTime>,
    became_winner_at: Option<DateTime>,
    disconnected_at: Option<DateTime>,
    archived_at: DateTime,
    device: DeviceInfo,
}

impl From<ParticipantHistoryEntity> for MongoParticipantHistoryDocument {
    fn from(value: ParticipantHistoryEntity) -> Self {
        Self {
            id: value.id.to_string(),
            session_id: value.session_id.to_string(),
            display_name: value.display_name,
            joined_at: to_bson_time(value.joined_at),
            last_seen_at: to_bson_time(value.last_seen_at),
            state: value.state,
            has_played_fff: value.has_played_fff,
            has_used_ata: value.has_used_ata,
            selected_for_fff_at: value.selected_for_fff_at.map(to_bson_time),
            became_winner_at: value.became_winner_at.map(to_bson_time),
            disconnected_at: value.disconnected_at.map(to_bson_time),
            archived_at: to_bson_time(value.archived_at),
            device: value.device,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MongoFffAnswerDocument {
    #[serde(rename = "_id")]
    id: String,
    session_id: String,
    participant_id: String,
    question_id: String,
    round_id: String,
    answer_sequence: String,
    submitted_at: DateTime,
    time_elapsed_ms: i64,
    is_correct: bool,
    rank: Option<u32>,
}

impl From<FffAnswer> for MongoFffAnswerDocument {
    fn from(value: FffAnswer) -> Self {
        Self {
            id: value.id.to_string(),
            session_id: value.session_id.to_string(),
            participant_id: value.participant_id.to_string(),
            question_id: value.question_id,
            round_id: value.round_id.to_string(),
            answer_sequence: value.answer_sequence.to_string(),
            submitted_at: to_bson_time(value.submitted_at),
            time_elapsed_ms: value.time_elapsed_ms as i64,
            is_correct: value.is_correct,
            rank: value.rank,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MongoAtaVoteDocument {
    #[serde(rename = "_id")]
    id: String,
    session_id: String,
    participant_id: String,
    round_id: String,
    question_text: String,
    selected_option: String,
    submitted_at: DateTime,
}

impl From<AtaVote> for MongoAtaVoteDocument {
    fn from(value: AtaVote) -> Self {
        Self {
            id: value.id.to_string(),
            session_id: value.session_id.to_string(),
            participant_id: value.participant_id.to_string(),
            round_id: value.round_id.to_string(),
            question_text: value.question_text,
            selected_option: value.selected_option.to_string(),
            submitted_at: to_bson_time(value.submitted_at),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MongoRoundTelemetryDocument {
    session_id: String,
    #[serde(flatten)]
    round: RoundTelemetry,
}

impl From<(Uuid, RoundTelemetry)> for MongoRoundTelemetryDocument {
    fn from((session_id, round): (Uuid, RoundTelemetry)) -> Self {
        Self {
            session_id: session_id.to_string(),
            round,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoGameTelemetryDocument {
    #[serde(rename = "_id")]
    id: String,
    #[serde(flatten)]
    pub telemetry: GameTelemetry,
}

impl From<GameTelemetry> for MongoGameTelemetryDocument {
    fn from(telemetry: GameTelemetry) -> Self {
        Self {
            id: telemetry.session_id.to_string(),
            telemetry,
        }
    }
}

/// Filter on the string primary key used by every collection.
pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}
