use std::time::SystemTime;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::{error::GameError, state_machine::SessionStatus};

/// Identifier of a participant within a session.
pub type ParticipantId = Uuid;
/// Identifier of a transport connection, assigned by the transport layer.
pub type ConnectionId = Uuid;

/// Per-participant state machine.
///
/// `Lobby → SelectedForFFF → PlayingFFF → {Winner | HasPlayedFFF | Eliminated}`, and any live
/// state can drop to `Disconnected`. Reconnecting restores the state held before the drop, which
/// keeps following the game while the participant is offline (see [`Participant::standing`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum ParticipantState {
    /// Waiting in the lobby.
    Lobby,
    /// Picked by the host for the next fastest-finger round.
    #[serde(rename = "SelectedForFFF")]
    SelectedForFff,
    /// Answering the open fastest-finger question.
    #[serde(rename = "PlayingFFF")]
    PlayingFff,
    /// Won the fastest-finger round and plays the main game.
    Winner,
    /// Played a fastest-finger round without winning it.
    #[serde(rename = "HasPlayedFFF")]
    HasPlayedFff,
    /// Out of the game.
    Eliminated,
    /// Transport connection lost.
    Disconnected,
}

impl ParticipantState {
    /// Whether the state machine allows moving from `self` to `target`.
    pub fn can_transition_to(self, target: ParticipantState) -> bool {
        use ParticipantState as P;

        match (self, target) {
            (P::Disconnected, P::Disconnected) => false,
            (_, P::Disconnected) => true,
            (P::Disconnected, P::Lobby) => true,
            (P::Lobby, P::SelectedForFff) => true,
            // A no-contest round may be re-run with the same contestants.
            (P::HasPlayedFff, P::SelectedForFff) => true,
            (P::SelectedForFff, P::Lobby) => true,
            (P::SelectedForFff, P::PlayingFff) => true,
            (P::PlayingFff, P::Winner | P::HasPlayedFff | P::Eliminated) => true,
            (P::Winner, P::Eliminated) => true,
            _ => false,
        }
    }
}

/// Anonymized device fields reported by the client when joining.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeviceInfo {
    /// Device class such as `mobile`, `tablet` or `desktop`.
    #[serde(default)]
    pub device_type: Option<String>,
    /// Browser family.
    #[serde(default)]
    pub browser: Option<String>,
    /// Operating system family.
    #[serde(default)]
    pub os: Option<String>,
}

/// One connected contestant or voter.
#[derive(Debug, Clone)]
pub struct Participant {
    /// Stable identifier.
    pub id: ParticipantId,
    /// Owning session.
    pub session_id: Uuid,
    /// Name shown to other participants (unique per session, case-insensitive).
    pub display_name: String,
    /// When the participant joined.
    pub joined_at: SystemTime,
    /// Last time the transport reported activity for this participant.
    pub last_seen_at: SystemTime,
    /// Transport handle; `None` while disconnected.
    pub connection: Option<ConnectionId>,
    /// Whether the participant currently has a live connection.
    pub is_active: bool,
    /// Current state.
    pub state: ParticipantState,
    /// State restored on reconnect; only meaningful while `Disconnected`.
    pub state_before_disconnect: Option<ParticipantState>,
    /// Secret handed to the participant at join and required to reconnect.
    pub reconnect_token: Uuid,
    /// Whether the participant took part in a fastest-finger round.
    pub has_played_fff: bool,
    /// Whether the participant used the ask-the-audience lifeline as contestant.
    pub has_used_ata: bool,
    /// When the host selected the participant for a fastest-finger round.
    pub selected_for_fff_at: Option<SystemTime>,
    /// When the participant won a fastest-finger round.
    pub became_winner_at: Option<SystemTime>,
    /// When the connection was last lost.
    pub disconnected_at: Option<SystemTime>,
    /// Anonymized device telemetry.
    pub device: DeviceInfo,
}

impl Participant {
    fn normalized_name(name: &str) -> String {
        name.trim().to_lowercase()
    }

    /// State the participant holds in the game, ignoring a lost connection.
    pub fn standing(&self) -> ParticipantState {
        match self.state {
            ParticipantState::Disconnected => self
                .state_before_disconnect
                .unwrap_or(ParticipantState::Lobby),
            state => state,
        }
    }

    fn stamp(&mut self, target: ParticipantState, now: SystemTime) {
        match target {
            ParticipantState::SelectedForFff => self.selected_for_fff_at = Some(now),
            ParticipantState::Winner => {
                self.became_winner_at = Some(now);
                self.has_played_fff = true;
            }
            ParticipantState::HasPlayedFff => self.has_played_fff = true,
            ParticipantState::Disconnected => {
                self.disconnected_at = Some(now);
                self.is_active = false;
                self.connection = None;
            }
            _ => {}
        }
    }
}

fn ensure_transition(
    participant_id: ParticipantId,
    from: ParticipantState,
    target: ParticipantState,
) -> Result<(), GameError> {
    if from.can_transition_to(target) {
        Ok(())
    } else {
        Err(GameError::IllegalTransition(format!(
            "participant `{participant_id}` cannot move from {from:?} to {target:?}"
        )))
    }
}

/// Tracks participants of one session, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ParticipantRegistry {
    participants: IndexMap<ParticipantId, Participant>,
}

impl ParticipantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new participant in the `Lobby` state.
    pub fn join(
        &mut self,
        session_id: Uuid,
        display_name: &str,
        connection: Option<ConnectionId>,
        device: DeviceInfo,
        now: SystemTime,
    ) -> Result<&Participant, GameError> {
        let display_name = display_name.trim();
        let normalized = Participant::normalized_name(display_name);
        if self
            .participants
            .values()
            .any(|p| Participant::normalized_name(&p.display_name) == normalized)
        {
            return Err(GameError::DuplicateName(display_name.to_string()));
        }

        let participant = Participant {
            id: Uuid::new_v4(),
            session_id,
            display_name: display_name.to_string(),
            joined_at: now,
            last_seen_at: now,
            is_active: connection.is_some(),
            connection,
            state: ParticipantState::Lobby,
            state_before_disconnect: None,
            reconnect_token: Uuid::new_v4(),
            has_played_fff: false,
            has_used_ata: false,
            selected_for_fff_at: None,
            became_winner_at: None,
            disconnected_at: None,
            device,
        };

        let id = participant.id;
        self.participants.insert(id, participant);
        Ok(&self.participants[&id])
    }

    /// Attach a fresh connection to a disconnected participant and restore their standing.
    ///
    /// `token` must be the reconnect token issued at join. A participant that still holds a live
    /// connection cannot be taken over.
    pub fn reconnect(
        &mut self,
        participant_id: ParticipantId,
        token: Uuid,
        connection: ConnectionId,
        status: SessionStatus,
        now: SystemTime,
    ) -> Result<&Participant, GameError> {
        if status.is_terminal() {
            return Err(GameError::IllegalTransition(format!(
                "cannot reconnect while session is {status:?}"
            )));
        }

        let participant = self.get_mut(participant_id)?;
        if participant.reconnect_token != token {
            return Err(GameError::IneligibleParticipant(
                "reconnect token does not match".into(),
            ));
        }
        if participant.state != ParticipantState::Disconnected {
            return Err(GameError::Conflict(format!(
                "participant `{participant_id}` is still connected"
            )));
        }

        participant.state = participant.standing();
        participant.state_before_disconnect = None;
        participant.connection = Some(connection);
        participant.is_active = true;
        participant.last_seen_at = now;
        Ok(participant)
    }

    /// Mark the participant bound to `connection` as disconnected without deleting it.
    ///
    /// Returns the participant id when the connection was known.
    pub fn disconnect(&mut self, connection: ConnectionId, now: SystemTime) -> Option<ParticipantId> {
        let participant = self
            .participants
            .values_mut()
            .find(|p| p.connection == Some(connection))?;

        participant.connection = None;
        participant.is_active = false;
        participant.last_seen_at = now;
        participant.disconnected_at = Some(now);
        if participant.state != ParticipantState::Disconnected {
            participant.state_before_disconnect = Some(participant.state);
            participant.state = ParticipantState::Disconnected;
        }
        Some(participant.id)
    }

    /// Move a participant to `target`, stamping the matching timestamps and flags.
    ///
    /// Returns the previous state. Illegal moves leave the participant untouched.
    pub fn transition(
        &mut self,
        participant_id: ParticipantId,
        target: ParticipantState,
        now: SystemTime,
    ) -> Result<ParticipantState, GameError> {
        let participant = self.get_mut(participant_id)?;
        let previous = participant.state;
        ensure_transition(participant_id, previous, target)?;

        if target == ParticipantState::Disconnected {
            participant.state_before_disconnect = Some(previous);
        }
        participant.state = target;
        participant.last_seen_at = now;
        participant.stamp(target, now);
        Ok(previous)
    }

    /// Move a participant's [standing](Participant::standing) to `target`.
    ///
    /// Connected participants transition as with [`transition`](Self::transition). For a
    /// disconnected participant the move is recorded as the state restored on reconnect, with
    /// the same timestamps and flags. Returns the previous standing.
    pub fn settle(
        &mut self,
        participant_id: ParticipantId,
        target: ParticipantState,
        now: SystemTime,
    ) -> Result<ParticipantState, GameError> {
        if self.get(participant_id)?.state != ParticipantState::Disconnected {
            return self.transition(participant_id, target, now);
        }

        let participant = self.get_mut(participant_id)?;
        let previous = participant.standing();
        ensure_transition(participant_id, previous, target)?;
        participant.state_before_disconnect = Some(target);
        participant.stamp(target, now);
        Ok(previous)
    }

    /// Refresh the liveness stamp of a participant.
    pub fn touch(&mut self, participant_id: ParticipantId, now: SystemTime) {
        if let Some(participant) = self.participants.get_mut(&participant_id) {
            participant.last_seen_at = now;
        }
    }

    /// Look a participant up by identifier.
    pub fn get(&self, participant_id: ParticipantId) -> Result<&Participant, GameError> {
        self.participants
            .get(&participant_id)
            .ok_or_else(|| GameError::NotFound(format!("participant `{participant_id}`")))
    }

    /// Mutable lookup by identifier.
    pub fn get_mut(&mut self, participant_id: ParticipantId) -> Result<&mut Participant, GameError> {
        self.participants
            .get_mut(&participant_id)
            .ok_or_else(|| GameError::NotFound(format!("participant `{participant_id}`")))
    }

    /// Iterate participants in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Identifiers of participants currently in `state`.
    pub fn ids_in_state(&self, state: ParticipantState) -> Vec<ParticipantId> {
        self.participants
            .values()
            .filter(|p| p.state == state)
            .map(|p| p.id)
            .collect()
    }

    /// Identifiers of participants whose standing is `state`, connected or not.
    pub fn ids_with_standing(&self, state: ParticipantState) -> Vec<ParticipantId> {
        self.participants
            .values()
            .filter(|p| p.standing() == state)
            .map(|p| p.id)
            .collect()
    }

    /// Number of registered participants (connected or not).
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether nobody joined yet.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Remove every participant, returning them in registration order.
    pub fn drain(&mut self) -> Vec<Participant> {
        self.participants.drain(..).map(|(_, p)| p).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn registry_with(names: &[&str]) -> (ParticipantRegistry, Vec<ParticipantId>) {
        let mut registry = ParticipantRegistry::new();
        let session_id = Uuid::new_v4();
        let ids = names
            .iter()
            .map(|name| {
                registry
                    .join(
                        session_id,
                        name,
                        Some(Uuid::new_v4()),
                        DeviceInfo::default(),
                        SystemTime::UNIX_EPOCH,
                    )
                    .unwrap()
                    .id
            })
            .collect();
        (registry, ids)
    }

    #[test]
    fn display_names_are_unique_case_insensitively() {
        let (mut registry, _) = registry_with(&["Alice"]);
        let err = registry
            .join(
                Uuid::new_v4(),
                "  aLiCe ",
                None,
                DeviceInfo::default(),
                SystemTime::UNIX_EPOCH,
            )
            .unwrap_err();
        assert_eq!(err, GameError::DuplicateName("aLiCe".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn fff_path_stamps_timestamps_and_flags() {
        let (mut registry, ids) = registry_with(&["Alice"]);
        let id = ids[0];
        let t1 = SystemTime::UNIX_EPOCH + Duration::from_secs(1);
        let t2 = SystemTime::UNIX_EPOCH + Duration::from_secs(2);

        registry.transition(id, ParticipantState::SelectedForFff, t1).unwrap();
        registry.transition(id, ParticipantState::PlayingFff, t1).unwrap();
        registry.transition(id, ParticipantState::Winner, t2).unwrap();

        let p = registry.get(id).unwrap();
        assert_eq!(p.state, ParticipantState::Winner);
        assert_eq!(p.selected_for_fff_at, Some(t1));
        assert_eq!(p.became_winner_at, Some(t2));
        assert!(p.has_played_fff);
    }

    #[test]
    fn illegal_transition_leaves_state_untouched() {
        let (mut registry, ids) = registry_with(&["Alice"]);
        let id = ids[0];
        let now = SystemTime::UNIX_EPOCH;
        registry.transition(id, ParticipantState::SelectedForFff, now).unwrap();
        registry.transition(id, ParticipantState::PlayingFff, now).unwrap();
        registry.transition(id, ParticipantState::Winner, now).unwrap();

        let err = registry
            .transition(id, ParticipantState::SelectedForFff, now)
            .unwrap_err();
        assert!(matches!(err, GameError::IllegalTransition(_)));
        assert_eq!(registry.get(id).unwrap().state, ParticipantState::Winner);

        let err = registry.transition(id, ParticipantState::Lobby, now).unwrap_err();
        assert!(matches!(err, GameError::IllegalTransition(_)));
        assert_eq!(registry.get(id).unwrap().state, ParticipantState::Winner);
    }

    #[test]
    fn disconnect_keeps_record_and_reconnect_restores_lobby() {
        let (mut registry, ids) = registry_with(&["Alice"]);
        let id = ids[0];
        let connection = registry.get(id).unwrap().connection.unwrap();
        let token = registry.get(id).unwrap().reconnect_token;
        let later = SystemTime::UNIX_EPOCH + Duration::from_secs(30);

        assert_eq!(registry.disconnect(connection, later), Some(id));
        let p = registry.get(id).unwrap();
        assert_eq!(p.state, ParticipantState::Disconnected);
        assert!(!p.is_active);
        assert_eq!(p.last_seen_at, later);
        assert_eq!(p.connection, None);
        assert_eq!(registry.disconnect(connection, later), None);

        let fresh = Uuid::new_v4();
        let p = registry
            .reconnect(id, token, fresh, SessionStatus::Lobby, later)
            .unwrap();
        assert_eq!(p.state, ParticipantState::Lobby);
        assert_eq!(p.state_before_disconnect, None);
        assert_eq!(p.connection, Some(fresh));
        assert!(p.is_active);
    }

    #[test]
    fn reconnect_restores_winner_and_eliminated() {
        let (mut registry, ids) = registry_with(&["Alice", "Bob"]);
        let now = SystemTime::UNIX_EPOCH;
        for id in &ids {
            registry.transition(*id, ParticipantState::SelectedForFff, now).unwrap();
            registry.transition(*id, ParticipantState::PlayingFff, now).unwrap();
        }
        registry.transition(ids[0], ParticipantState::Winner, now).unwrap();
        registry.transition(ids[1], ParticipantState::Eliminated, now).unwrap();

        for (id, expected) in [
            (ids[0], ParticipantState::Winner),
            (ids[1], ParticipantState::Eliminated),
        ] {
            let p = registry.get(id).unwrap();
            let (connection, token) = (p.connection.unwrap(), p.reconnect_token);
            registry.disconnect(connection, now);
            assert_eq!(registry.get(id).unwrap().standing(), expected);

            let p = registry
                .reconnect(id, token, Uuid::new_v4(), SessionStatus::MainGame, now)
                .unwrap();
            assert_eq!(p.state, expected);
        }
    }

    #[test]
    fn offline_participants_follow_the_game() {
        let (mut registry, ids) = registry_with(&["Alice"]);
        let id = ids[0];
        let t1 = SystemTime::UNIX_EPOCH + Duration::from_secs(1);
        registry.transition(id, ParticipantState::SelectedForFff, t1).unwrap();
        registry.transition(id, ParticipantState::PlayingFff, t1).unwrap();
        let p = registry.get(id).unwrap();
        let (connection, token) = (p.connection.unwrap(), p.reconnect_token);
        registry.disconnect(connection, t1);

        let t2 = SystemTime::UNIX_EPOCH + Duration::from_secs(2);
        let previous = registry.settle(id, ParticipantState::Winner, t2).unwrap();
        assert_eq!(previous, ParticipantState::PlayingFff);
        let p = registry.get(id).unwrap();
        assert_eq!(p.state, ParticipantState::Disconnected);
        assert_eq!(p.became_winner_at, Some(t2));
        assert!(p.has_played_fff);
        assert_eq!(
            registry.ids_with_standing(ParticipantState::Winner),
            vec![id]
        );

        let err = registry
            .settle(id, ParticipantState::SelectedForFff, t2)
            .unwrap_err();
        assert!(matches!(err, GameError::IllegalTransition(_)));

        let p = registry
            .reconnect(id, token, Uuid::new_v4(), SessionStatus::MainGame, t2)
            .unwrap();
        assert_eq!(p.state, ParticipantState::Winner);
    }

    #[test]
    fn reconnect_needs_the_token_and_a_lost_connection() {
        let (mut registry, ids) = registry_with(&["Alice"]);
        let id = ids[0];
        let now = SystemTime::UNIX_EPOCH;
        let p = registry.get(id).unwrap();
        let (connection, token) = (p.connection.unwrap(), p.reconnect_token);

        let err = registry
            .reconnect(id, token, Uuid::new_v4(), SessionStatus::Lobby, now)
            .unwrap_err();
        assert!(matches!(err, GameError::Conflict(_)));
        assert_eq!(registry.get(id).unwrap().connection, Some(connection));

        registry.disconnect(connection, now);
        let err = registry
            .reconnect(id, Uuid::new_v4(), Uuid::new_v4(), SessionStatus::Lobby, now)
            .unwrap_err();
        assert!(matches!(err, GameError::IneligibleParticipant(_)));
        assert_eq!(
            registry.get(id).unwrap().state,
            ParticipantState::Disconnected
        );
    }

    #[test]
    fn reconnect_is_refused_once_game_is_over() {
        let (mut registry, ids) = registry_with(&["Alice"]);
        let id = ids[0];
        let connection = registry.get(id).unwrap().connection.unwrap();
        let token = registry.get(id).unwrap().reconnect_token;
        registry.disconnect(connection, SystemTime::UNIX_EPOCH);

        let err = registry
            .reconnect(
                id,
                token,
                Uuid::new_v4(),
                SessionStatus::GameOver,
                SystemTime::UNIX_EPOCH,
            )
            .unwrap_err();
        assert!(matches!(err, GameError::IllegalTransition(_)));
        assert_eq!(
            registry.get(id).unwrap().state,
            ParticipantState::Disconnected
        );
    }

    #[test]
    fn every_live_state_may_drop_to_disconnected() {
        use ParticipantState as P;
        for state in [
            P::Lobby,
            P::SelectedForFff,
            P::PlayingFff,
            P::Winner,
            P::HasPlayedFff,
            P::Eliminated,
        ] {
            assert!(state.can_transition_to(P::Disconnected), "{state:?}");
        }
        assert!(!P::Disconnected.can_transition_to(P::Winner));
        assert!(!P::Lobby.can_transition_to(P::PlayingFff));
    }
}
