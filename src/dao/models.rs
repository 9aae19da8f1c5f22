use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::{
    ata::AtaVote,
    fff::FffAnswer,
    participant::{DeviceInfo, Participant, ParticipantState},
    session::{LiveSession, SessionMode},
    state_machine::SessionStatus,
    telemetry::{GameTelemetry, RoundTelemetry},
};

/// Live row of a session, refreshed on every phase change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Stable identifier.
    pub id: Uuid,
    /// Host display name.
    pub host_name: String,
    /// Current phase.
    pub status: SessionStatus,
    /// Open round engine.
    pub mode: SessionMode,
    /// Question of the open round.
    pub current_question_id: Option<String>,
    /// Start of the open round.
    pub question_start_time: Option<SystemTime>,
    /// Creation time.
    pub created_at: SystemTime,
    /// When the lobby opened.
    pub started_at: Option<SystemTime>,
    /// When the game ended.
    pub ended_at: Option<SystemTime>,
    /// Last time the row was written.
    pub updated_at: SystemTime,
    /// Registered participants.
    pub participant_count: u32,
}

impl SessionEntity {
    /// Snapshot the live session.
    pub fn from_session(session: &LiveSession, now: SystemTime) -> Self {
        Self {
            id: session.id(),
            host_name: session.host_name().to_string(),
            status: session.status(),
            mode: session.mode(),
            current_question_id: session.current_question_id().map(str::to_string),
            question_start_time: session.question_start_time(),
            created_at: session.created_at(),
            started_at: session.started_at(),
            ended_at: session.ended_at(),
            updated_at: now,
            participant_count: session.participants().len() as u32,
        }
    }
}

/// Archived copy of a participant row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantHistoryEntity {
    /// Participant identifier.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Display name.
    pub display_name: String,
    /// Join time.
    pub joined_at: SystemTime,
    /// Last activity.
    pub last_seen_at: SystemTime,
    /// State when the session ended.
    pub state: ParticipantState,
    /// Took part in a fastest-finger round.
    pub has_played_fff: bool,
    /// Used the audience lifeline as contestant.
    pub has_used_ata: bool,
    /// Selection time.
    pub selected_for_fff_at: Option<SystemTime>,
    /// Win time.
    pub became_winner_at: Option<SystemTime>,
    /// Last disconnect.
    pub disconnected_at: Option<SystemTime>,
    /// Archival time.
    pub archived_at: SystemTime,
    /// Anonymized device fields.
    pub device: DeviceInfo,
}

impl ParticipantHistoryEntity {
    /// Copy a live participant into its history row.
    pub fn from_participant(participant: &Participant, archived_at: SystemTime) -> Self {
        Self {
            id: participant.id,
            session_id: participant.session_id,
            display_name: participant.display_name.clone(),
            joined_at: participant.joined_at,
            last_seen_at: participant.last_seen_at,
            state: participant.state,
            has_played_fff: participant.has_played_fff,
            has_used_ata: participant.has_used_ata,
            selected_for_fff_at: participant.selected_for_fff_at,
            became_winner_at: participant.became_winner_at,
            disconnected_at: participant.disconnected_at,
            archived_at,
            device: participant.device.clone(),
        }
    }
}

/// Listing entry for archived games.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct GameTelemetrySummary {
    /// Session identifier.
    pub session_id: Uuid,
    /// Host display name.
    pub host_name: String,
    /// Number of finished rounds.
    pub total_rounds: u32,
    /// Participants registered at the end.
    pub total_participants: u32,
    /// Sum of the winnings.
    pub total_winnings: u64,
    /// Game length in milliseconds.
    pub total_duration_ms: u64,
}

impl From<&GameTelemetry> for GameTelemetrySummary {
    fn from(value: &GameTelemetry) -> Self {
        Self {
            session_id: value.session_id,
            host_name: value.host_name.clone(),
            total_rounds: value.total_rounds,
            total_participants: value.total_participants,
            total_winnings: value.total_winnings,
            total_duration_ms: value.total_duration_ms,
        }
    }
}

/// Everything written when a session closes; stores apply it atomically.
#[derive(Debug, Clone)]
pub struct SessionArchive {
    /// Final session row.
    pub session: SessionEntity,
    /// Participant history rows.
    pub participants: Vec<ParticipantHistoryEntity>,
    /// Every evaluated fastest-finger answer.
    pub fff_answers: Vec<FffAnswer>,
    /// Every counted vote.
    pub ata_votes: Vec<AtaVote>,
    /// Finished rounds.
    pub rounds: Vec<RoundTelemetry>,
    /// Sealed game statistics.
    pub telemetry: GameTelemetry,
}

impl SessionArchive {
    /// Copy the live rows of a sealed session. The session itself is left untouched.
    pub fn capture(session: &LiveSession, telemetry: GameTelemetry, now: SystemTime) -> Self {
        Self {
            session: SessionEntity::from_session(session, now),
            participants: session
                .participants()
                .iter()
                .map(|p| ParticipantHistoryEntity::from_participant(p, now))
                .collect(),
            fff_answers: session.fff_answers().to_vec(),
            ata_votes: session.ata_votes().to_vec(),
            rounds: telemetry.rounds.clone(),
            telemetry,
        }
    }

    /// Session being archived.
    pub fn session_id(&self) -> Uuid {
        self.session.id
    }
}
