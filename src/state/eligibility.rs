use serde::Serialize;
use utoipa::ToSchema;

use crate::state::{participant::ParticipantState, state_machine::SessionStatus};

/// Participation rights of one participant in the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct Eligibility {
    /// May submit a fastest-finger ordering.
    pub can_submit_answer: bool,
    /// May vote in the audience poll.
    pub can_vote: bool,
    /// Neither answering nor voting; only receives updates.
    pub is_spectator: bool,
    /// Short explanation of the verdict.
    pub reason: &'static str,
}

/// Derive participation rights from the session phase and the participant state.
///
/// Pure: identical inputs always produce identical output.
pub fn evaluate(status: SessionStatus, state: ParticipantState) -> Eligibility {
    let can_submit_answer =
        status == SessionStatus::FffActive && state == ParticipantState::PlayingFff;
    let can_vote = status == SessionStatus::AtaActive
        && !matches!(
            state,
            ParticipantState::Winner | ParticipantState::Eliminated | ParticipantState::Disconnected
        );

    let reason = match (status, state) {
        _ if can_submit_answer => "playing the fastest finger question",
        _ if can_vote => "audience poll is open",
        (_, ParticipantState::Disconnected) => "participant is disconnected",
        (SessionStatus::FffActive, _) => "not selected for this fastest finger round",
        (SessionStatus::AtaActive, ParticipantState::Winner) => {
            "contestants do not vote on their own lifeline"
        }
        (SessionStatus::AtaActive, ParticipantState::Eliminated) => "participant is eliminated",
        (SessionStatus::GameOver, _) => "game is over",
        _ => "no round is open",
    };

    Eligibility {
        can_submit_answer,
        can_vote,
        is_spectator: !(can_submit_answer || can_vote),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUSES: [SessionStatus; 7] = [
        SessionStatus::PreGame,
        SessionStatus::Lobby,
        SessionStatus::FffSelection,
        SessionStatus::FffActive,
        SessionStatus::MainGame,
        SessionStatus::AtaActive,
        SessionStatus::GameOver,
    ];

    const STATES: [ParticipantState; 7] = [
        ParticipantState::Lobby,
        ParticipantState::SelectedForFff,
        ParticipantState::PlayingFff,
        ParticipantState::Winner,
        ParticipantState::HasPlayedFff,
        ParticipantState::Eliminated,
        ParticipantState::Disconnected,
    ];

    #[test]
    fn only_playing_participants_answer_during_fff() {
        for status in STATUSES {
            for state in STATES {
                let verdict = evaluate(status, state);
                assert_eq!(
                    verdict.can_submit_answer,
                    status == SessionStatus::FffActive && state == ParticipantState::PlayingFff,
                    "{status:?}/{state:?}"
                );
            }
        }
    }

    #[test]
    fn contestant_and_eliminated_do_not_vote() {
        assert!(!evaluate(SessionStatus::AtaActive, ParticipantState::Winner).can_vote);
        assert!(!evaluate(SessionStatus::AtaActive, ParticipantState::Eliminated).can_vote);
        assert!(!evaluate(SessionStatus::AtaActive, ParticipantState::Disconnected).can_vote);
        assert!(evaluate(SessionStatus::AtaActive, ParticipantState::Lobby).can_vote);
        assert!(evaluate(SessionStatus::AtaActive, ParticipantState::HasPlayedFff).can_vote);
        assert!(!evaluate(SessionStatus::MainGame, ParticipantState::Lobby).can_vote);
    }

    #[test]
    fn evaluation_is_deterministic() {
        for status in STATUSES {
            for state in STATES {
                let first = evaluate(status, state);
                assert_eq!(first, evaluate(status, state));
                assert_eq!(first.is_spectator, !(first.can_submit_answer || first.can_vote));
            }
        }
    }
}
