use thiserror::Error;

use crate::state::state_machine::{AbortError, ApplyError, PlanError};

/// Rejections raised by the session core.
///
/// Every variant is local to the request that caused it: the session and its round engines are
/// left exactly as they were before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// A session or participant state machine refused the requested move.
    #[error("illegal transition: {0}")]
    IllegalTransition(String),
    /// Another participant of the session already uses this display name.
    #[error("display name `{0}` is already taken in this session")]
    DuplicateName(String),
    /// The participant already has an accepted answer for this question.
    #[error("an answer was already accepted for this question")]
    DuplicateSubmission,
    /// The round is closed or its time window has elapsed.
    #[error("submission arrived after the round closed")]
    LateSubmission,
    /// The participant has no right to submit in the current phase.
    #[error("participant is not eligible: {0}")]
    IneligibleParticipant(String),
    /// A round engine is already open.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Unknown session, participant or connection reference.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<PlanError> for GameError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                GameError::Conflict("another session transition is in progress".into())
            }
            PlanError::InvalidTransition(invalid) => GameError::IllegalTransition(invalid.to_string()),
        }
    }
}

impl From<ApplyError> for GameError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => GameError::Conflict("no transition is pending".into()),
            ApplyError::IdMismatch { .. } => {
                GameError::Conflict("pending transition does not match".into())
            }
            ApplyError::PhaseMismatch { expected, actual } => GameError::Conflict(format!(
                "phase changed during transition (expected {expected:?}, got {actual:?})"
            )),
        }
    }
}

impl From<AbortError> for GameError {
    fn from(err: AbortError) -> Self {
        match err {
            AbortError::NoPending => GameError::Conflict("no pending transition".into()),
            AbortError::IdMismatch { .. } => {
                GameError::Conflict("transition plan does not match".into())
            }
        }
    }
}
