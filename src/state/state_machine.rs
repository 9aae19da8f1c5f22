use std::{str::FromStr, time::Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Authoritative phase of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum SessionStatus {
    /// Session created, participants cannot join the lobby yet.
    PreGame,
    /// Participants gather and wait for the first fastest-finger round.
    #[serde(alias = "Waiting")]
    Lobby,
    /// The host is picking contestants for the next fastest-finger round.
    #[serde(rename = "FFFSelection")]
    FffSelection,
    /// A fastest-finger question is open.
    #[serde(rename = "FFFActive")]
    FffActive,
    /// The winning contestant plays the main game.
    #[serde(alias = "Active")]
    MainGame,
    /// An ask-the-audience poll is open.
    #[serde(rename = "ATAActive")]
    AtaActive,
    /// Terminal phase; the session is archived and purged.
    #[serde(alias = "Completed")]
    GameOver,
}

impl SessionStatus {
    /// Whether no further transition can leave this phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::GameOver)
    }
}

/// Raised when a status label matches neither a current nor a legacy value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown session status `{0}`")]
pub struct UnknownStatus(pub String);

impl FromStr for SessionStatus {
    type Err = UnknownStatus;

    /// Parse a status label, accepting the legacy `Waiting/Active/Completed` spellings.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let status = match value.trim().to_ascii_lowercase().as_str() {
            "pregame" | "pre_game" => SessionStatus::PreGame,
            "lobby" | "waiting" => SessionStatus::Lobby,
            "fffselection" | "fff_selection" => SessionStatus::FffSelection,
            "fffactive" | "fff_active" => SessionStatus::FffActive,
            "maingame" | "main_game" | "active" => SessionStatus::MainGame,
            "ataactive" | "ata_active" => SessionStatus::AtaActive,
            "gameover" | "game_over" | "completed" => SessionStatus::GameOver,
            _ => return Err(UnknownStatus(value.to_string())),
        };
        Ok(status)
    }
}

/// How a fastest-finger round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FffOutcome {
    /// At least one correct ordering; the fastest one won.
    Winner,
    /// Nobody answered correctly.
    NoContest,
}

/// Events that can be applied to the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Open the lobby to participants.
    OpenLobby,
    /// Start picking contestants (first round or next contestant).
    BeginFffSelection,
    /// Open a fastest-finger question.
    OpenFff,
    /// Close the fastest-finger question.
    CloseFff(FffOutcome),
    /// Open an ask-the-audience poll.
    OpenAta,
    /// Close the ask-the-audience poll.
    CloseAta,
    /// Finish the session.
    EndGame,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: SessionStatus,
    /// The event that cannot be applied from this phase.
    pub event: SessionEvent,
}

/// Errors that can occur when planning a state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// State machine phase changed since the plan was created.
    PhaseMismatch {
        /// Phase when plan was created.
        expected: SessionStatus,
        /// Current phase.
        actual: SessionStatus,
    },
}

/// Errors that can occur when aborting a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A planned state machine transition that has been validated but not yet applied.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the state machine is currently in.
    pub from: SessionStatus,
    /// Phase the state machine will transition to.
    pub to: SessionStatus,
    /// Event that triggered this transition.
    pub event: SessionEvent,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// Snapshot of the current state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Current phase of the state machine.
    pub status: SessionStatus,
    /// Version number of the state machine (increments on each transition).
    pub version: usize,
    /// Pending transition phase, if a transition is planned but not yet applied.
    pub pending: Option<SessionStatus>,
}

/// Session phase machine: `PreGame → Lobby → FFFSelection → FFFActive → MainGame ⇄ ATAActive → GameOver`.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    status: SessionStatus,
    version: usize,
    pending: Option<Plan>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            status: SessionStatus::PreGame,
            version: 0,
            pending: None,
        }
    }
}

impl SessionStateMachine {
    /// Create a new state machine initialised in the pre-game phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Create a snapshot of the current state machine state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.status,
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to),
        }
    }

    /// Plan a transition by validating that the event can be applied from the current phase.
    /// Returns a Plan that can later be applied or aborted.
    pub fn plan(&mut self, event: SessionEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(event)
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.status,
            to: next,
            event,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, moving the state machine to the next phase.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<SessionStatus, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected,
                got: plan_id,
            });
        }

        if self.status != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.status,
            });
        }

        self.status = plan.to;
        self.version += 1;

        Ok(self.status)
    }

    /// Abort a planned transition without applying it.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(&self, event: SessionEvent) -> Result<SessionStatus, InvalidTransition> {
        use SessionStatus as S;

        let next = match (self.status, event) {
            (S::PreGame, SessionEvent::OpenLobby) => S::Lobby,
            (S::Lobby | S::MainGame, SessionEvent::BeginFffSelection) => S::FffSelection,
            (S::FffSelection, SessionEvent::OpenFff) => S::FffActive,
            (S::FffActive, SessionEvent::CloseFff(FffOutcome::Winner)) => S::MainGame,
            (S::FffActive, SessionEvent::CloseFff(FffOutcome::NoContest)) => S::FffSelection,
            (S::MainGame, SessionEvent::OpenAta) => S::AtaActive,
            (S::AtaActive, SessionEvent::CloseAta) => S::MainGame,
            (from, SessionEvent::EndGame) if !from.is_terminal() => S::GameOver,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}
