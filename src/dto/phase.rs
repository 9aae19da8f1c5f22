use std::time::SystemTime;

use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::{
    dto::format_system_time,
    state::{session::LastRound, state_machine::SessionStatus},
};

/// Presentation state shown by participant screens.
///
/// Always recomputed from the authoritative session phase; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum GameStateType {
    /// Session created, lobby not open yet.
    InitialLobby,
    /// Lobby open, waiting for the first round.
    WaitingLobby,
    /// Host is picking fastest-finger contestants.
    #[serde(rename = "FFFLobby")]
    FffLobby,
    /// Fastest-finger question open.
    #[serde(rename = "FFFQuestion")]
    FffQuestion,
    /// Answer received, waiting for the results (individual).
    #[serde(rename = "FFFCalculating")]
    FffCalculating,
    /// Fastest-finger question closed without any answer.
    #[serde(rename = "FFFNoResponse")]
    FffNoResponse,
    /// Fastest-finger ranking.
    #[serde(rename = "FFFResults")]
    FffResults,
    /// You won the fastest-finger round (individual).
    #[serde(rename = "FFFWinner")]
    FffWinner,
    /// Contestant is playing; the audience may be polled.
    #[serde(rename = "ATAReady")]
    AtaReady,
    /// Audience poll open.
    #[serde(rename = "ATAVoting")]
    AtaVoting,
    /// Vote counted, waiting for the results (individual).
    #[serde(rename = "ATAVoteSubmitted")]
    AtaVoteSubmitted,
    /// Audience poll percentages.
    #[serde(rename = "ATAResults")]
    AtaResults,
    /// Game over.
    GameComplete,
}

impl GameStateType {
    /// Presentation state broadcast to the whole session for a phase.
    ///
    /// Total over every `(status, last_round)` pair. The individually addressed states
    /// (`FFFCalculating`, `FFFWinner`, `ATAVoteSubmitted`) are never produced here.
    pub fn derive(status: SessionStatus, last_round: Option<LastRound>) -> Self {
        match (status, last_round) {
            (SessionStatus::PreGame, _) => GameStateType::InitialLobby,
            (SessionStatus::Lobby, _) => GameStateType::WaitingLobby,
            (
                SessionStatus::FffSelection,
                Some(LastRound::FffNoContest {
                    had_submissions: false,
                }),
            ) => GameStateType::FffNoResponse,
            (
                SessionStatus::FffSelection,
                Some(LastRound::FffNoContest {
                    had_submissions: true,
                }),
            ) => GameStateType::FffResults,
            (SessionStatus::FffSelection, _) => GameStateType::FffLobby,
            (SessionStatus::FffActive, _) => GameStateType::FffQuestion,
            (SessionStatus::MainGame, Some(LastRound::FffWinner(_))) => GameStateType::FffResults,
            (SessionStatus::MainGame, Some(LastRound::AtaClosed)) => GameStateType::AtaResults,
            (SessionStatus::MainGame, _) => GameStateType::AtaReady,
            (SessionStatus::AtaActive, _) => GameStateType::AtaVoting,
            (SessionStatus::GameOver, _) => GameStateType::GameComplete,
        }
    }
}

/// Frame pushed to participants and mirrored on the host stream.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct GameStateData {
    /// Presentation state.
    pub state: GameStateType,
    /// Text shown by the participant screen.
    pub message: String,
    /// State specific payload.
    #[schema(value_type = Object)]
    pub data: Value,
    /// RFC 3339 emission time.
    pub timestamp: String,
}

impl GameStateData {
    /// Build a frame stamped with `now`.
    pub fn new(
        state: GameStateType,
        message: impl Into<String>,
        data: Value,
        now: SystemTime,
    ) -> Self {
        Self {
            state,
            message: message.into(),
            data,
            timestamp: format_system_time(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn fff_closings_map_to_distinct_states() {
        let winner = Some(LastRound::FffWinner(Uuid::new_v4()));
        assert_eq!(
            GameStateType::derive(SessionStatus::MainGame, winner),
            GameStateType::FffResults
        );
        assert_eq!(
            GameStateType::derive(
                SessionStatus::FffSelection,
                Some(LastRound::FffNoContest {
                    had_submissions: false
                })
            ),
            GameStateType::FffNoResponse
        );
        assert_eq!(
            GameStateType::derive(SessionStatus::FffSelection, None),
            GameStateType::FffLobby
        );
    }

    #[test]
    fn main_game_follows_the_last_poll() {
        assert_eq!(
            GameStateType::derive(SessionStatus::MainGame, None),
            GameStateType::AtaReady
        );
        assert_eq!(
            GameStateType::derive(SessionStatus::MainGame, Some(LastRound::AtaClosed)),
            GameStateType::AtaResults
        );
        assert_eq!(
            GameStateType::derive(SessionStatus::AtaActive, Some(LastRound::AtaClosed)),
            GameStateType::AtaVoting
        );
    }

    #[test]
    fn state_tags_use_client_spelling() {
        let frame = GameStateData::new(
            GameStateType::AtaVoteSubmitted,
            "vote counted",
            Value::Null,
            SystemTime::UNIX_EPOCH,
        );
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["state"], "ATAVoteSubmitted");
        assert_eq!(json["timestamp"], "1970-01-01T00:00:00Z");
    }
}
