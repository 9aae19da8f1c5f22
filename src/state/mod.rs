pub mod ata;
pub mod eligibility;
pub mod error;
pub mod fff;
pub mod participant;
pub mod question;
pub mod session;
mod sse;
pub mod state_machine;
pub mod telemetry;

use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::{
    sync::{Mutex, MutexGuard, RwLock, mpsc, watch},
    task::AbortHandle,
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::archive_store::ArchiveStore,
    state::{
        error::GameError,
        participant::{ConnectionId, ParticipantId},
        session::LiveSession,
    },
};

pub use self::sse::SseHub;

/// Application state shared by every handler and background task.
pub type SharedState = Arc<AppState>;

#[derive(Clone)]
/// Handle used to push messages to a joined participant socket.
pub struct ParticipantConnection {
    /// Session the socket joined.
    pub session_id: Uuid,
    /// Participant bound to the socket.
    pub participant_id: ParticipantId,
    /// Outbound queue drained by the socket writer task.
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Cancellable expiry of the open round.
struct RoundTimer {
    round_id: Uuid,
    handle: AbortHandle,
}

/// A live session plus its round timer, guarded by one mutex.
pub struct SessionSlot {
    /// The session aggregate.
    pub session: LiveSession,
    timer: Option<RoundTimer>,
}

impl SessionSlot {
    /// Install the timer of a freshly opened round, cancelling any previous one.
    pub fn arm_timer(&mut self, round_id: Uuid, handle: AbortHandle) {
        if let Some(previous) = self.timer.replace(RoundTimer { round_id, handle }) {
            previous.handle.abort();
        }
    }

    /// Cancel the pending timer, if any.
    pub fn disarm_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            debug!(round_id = %timer.round_id, "round timer cancelled");
            timer.handle.abort();
        }
    }

    /// Forget the timer of `round_id` without aborting it; called by the timer task itself.
    pub fn release_timer(&mut self, round_id: Uuid) {
        if self.timer.as_ref().is_some_and(|t| t.round_id == round_id) {
            self.timer = None;
        }
    }

    /// Round the armed timer belongs to.
    pub fn armed_round(&self) -> Option<Uuid> {
        self.timer.as_ref().map(|t| t.round_id)
    }
}

/// Per-session serialization boundary.
pub struct SessionHandle {
    id: Uuid,
    slot: Mutex<SessionSlot>,
}

impl SessionHandle {
    fn new(session: LiveSession) -> Self {
        Self {
            id: session.id(),
            slot: Mutex::new(SessionSlot {
                session,
                timer: None,
            }),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for exclusive access to the session.
    pub async fn lock(&self) -> MutexGuard<'_, SessionSlot> {
        self.slot.lock().await
    }
}

/// Central application state storing live sessions, connections and the archive handle.
pub struct AppState {
    config: Arc<AppConfig>,
    archive_store: RwLock<Option<Arc<dyn ArchiveStore>>>,
    host_sse: SseHub,
    sessions: DashMap<Uuid, Arc<SessionHandle>>,
    connections: DashMap<ConnectionId, ParticipantConnection>,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until an archive store is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            host_sse: SseHub::new(config.channel_capacity),
            config: Arc::new(config),
            archive_store: RwLock::new(None),
            sessions: DashMap::new(),
            connections: DashMap::new(),
            degraded: degraded_tx,
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// Obtain a handle to the current archive store, if one is installed.
    pub async fn archive_store(&self) -> Option<Arc<dyn ArchiveStore>> {
        let guard = self.archive_store.read().await;
        guard.as_ref().cloned()
    }

    /// Install a new archive store implementation and leave degraded mode.
    pub async fn set_archive_store(&self, store: Arc<dyn ArchiveStore>) {
        {
            let mut guard = self.archive_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        if self.archive_store.read().await.is_none() {
            return true;
        }
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Broadcast hub used for the host SSE stream.
    pub fn host_sse(&self) -> &SseHub {
        &self.host_sse
    }

    /// Register a new session.
    pub fn insert_session(&self, session: LiveSession) -> Arc<SessionHandle> {
        let handle = Arc::new(SessionHandle::new(session));
        self.sessions.insert(handle.id(), handle.clone());
        handle
    }

    /// Look up a live session.
    pub fn session(&self, session_id: Uuid) -> Result<Arc<SessionHandle>, GameError> {
        self.sessions
            .get(&session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GameError::NotFound(format!("session `{session_id}` not found")))
    }

    /// Number of sessions held in memory.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop a session and every socket bound to it.
    pub fn remove_session(&self, session_id: Uuid) {
        self.sessions.remove(&session_id);
        self.connections
            .retain(|_, connection| connection.session_id != session_id);
    }

    /// Registry of joined participant sockets keyed by connection.
    pub fn connections(&self) -> &DashMap<ConnectionId, ParticipantConnection> {
        &self.connections
    }

    /// Bind a socket to a participant, replacing any older socket of the same participant.
    pub fn bind_connection(&self, connection_id: ConnectionId, connection: ParticipantConnection) {
        let participant_id = connection.participant_id;
        self.connections
            .retain(|id, existing| *id == connection_id || existing.participant_id != participant_id);
        self.connections.insert(connection_id, connection);
    }

    /// Senders of every socket joined to `session_id`.
    pub fn session_senders(&self, session_id: Uuid) -> Vec<mpsc::UnboundedSender<Message>> {
        self.connections
            .iter()
            .filter(|entry| entry.session_id == session_id)
            .map(|entry| entry.tx.clone())
            .collect()
    }

    /// Sender of the socket currently bound to `participant_id`.
    pub fn participant_sender(
        &self,
        participant_id: ParticipantId,
    ) -> Option<mpsc::UnboundedSender<Message>> {
        self.connections
            .iter()
            .find(|entry| entry.participant_id == participant_id)
            .map(|entry| entry.tx.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::dao::archive_store::memory::MemoryArchiveStore;

    #[tokio::test]
    async fn degraded_until_a_store_is_installed() {
        let state = AppState::new(AppConfig::default());
        assert!(state.is_degraded().await);

        let mut watcher = state.degraded_watcher();
        state
            .set_archive_store(Arc::new(MemoryArchiveStore::new()))
            .await;
        assert!(!state.is_degraded().await);
        assert!(watcher.has_changed().unwrap());
        assert!(!*watcher.borrow_and_update());
    }

    #[tokio::test]
    async fn removing_a_session_drops_its_sockets() {
        let state = AppState::new(AppConfig::default());
        let handle = state.insert_session(LiveSession::new("Host", SystemTime::now()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();
        state.bind_connection(
            connection_id,
            ParticipantConnection {
                session_id: handle.id(),
                participant_id: Uuid::new_v4(),
                tx,
            },
        );
        assert_eq!(state.session_senders(handle.id()).len(), 1);

        state.remove_session(handle.id());
        assert!(state.session(handle.id()).is_err());
        assert!(state.connections().is_empty());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn rebinding_a_participant_replaces_the_old_socket() {
        let state = AppState::new(AppConfig::default());
        let participant_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        for _ in 0..2 {
            let (tx, _rx) = mpsc::unbounded_channel();
            state.bind_connection(
                Uuid::new_v4(),
                ParticipantConnection {
                    session_id,
                    participant_id,
                    tx,
                },
            );
        }
        assert_eq!(state.connections().len(), 1);
    }
}
