//! Process-local archive store, used when no database is configured and by the tests.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    dao::{
        archive_store::ArchiveStore,
        models::{GameTelemetrySummary, ParticipantHistoryEntity, SessionArchive, SessionEntity},
        storage::{StorageError, StorageResult},
    },
    state::{
        ata::AtaVote,
        fff::FffAnswer,
        telemetry::{GameTelemetry, RoundTelemetry},
    },
};

/// Failure injected by [`MemoryArchiveStore::set_available`].
#[derive(Debug, Error)]
#[error("in-memory archive store is offline")]
pub struct MemoryStoreOffline;

#[derive(Default)]
struct Tables {
    sessions: HashMap<Uuid, SessionEntity>,
    participant_history: Vec<ParticipantHistoryEntity>,
    fff_answers: Vec<FffAnswer>,
    ata_votes: Vec<AtaVote>,
    round_telemetry: Vec<(Uuid, RoundTelemetry)>,
    game_telemetry: IndexMap<Uuid, GameTelemetry>,
}

/// Archive store keeping every table in memory behind one lock.
#[derive(Clone, Default)]
pub struct MemoryArchiveStore {
    tables: Arc<RwLock<Tables>>,
    offline: Arc<AtomicBool>,
}

impl MemoryArchiveStore {
    /// Create an empty, available store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    /// Number of archived participant rows for a session.
    pub async fn participant_history_len(&self, session_id: Uuid) -> usize {
        let tables = self.tables.read().await;
        tables
            .participant_history
            .iter()
            .filter(|row| row.session_id == session_id)
            .count()
    }

    /// Number of archived answers and votes for a session.
    pub async fn archived_submissions(&self, session_id: Uuid) -> (usize, usize) {
        let tables = self.tables.read().await;
        let answers = tables
            .fff_answers
            .iter()
            .filter(|a| a.session_id == session_id)
            .count();
        let votes = tables
            .ata_votes
            .iter()
            .filter(|v| v.session_id == session_id)
            .count();
        (answers, votes)
    }

    /// Latest live row of a session.
    pub async fn session(&self, session_id: Uuid) -> Option<SessionEntity> {
        self.tables.read().await.sessions.get(&session_id).cloned()
    }

    fn ensure_available(&self, operation: &str) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(
                format!("cannot {operation}"),
                MemoryStoreOffline,
            ));
        }
        Ok(())
    }
}

impl ArchiveStore for MemoryArchiveStore {
    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_available("save session")?;
            store.tables.write().await.sessions.insert(session.id, session);
            Ok(())
        })
    }

    fn archive_session(&self, archive: SessionArchive) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_available("archive session")?;
            let session_id = archive.session_id();

            let mut tables = store.tables.write().await;
            if tables.game_telemetry.contains_key(&session_id) {
                return Ok(());
            }

            tables.sessions.insert(session_id, archive.session);
            tables.participant_history.extend(archive.participants);
            tables.fff_answers.extend(archive.fff_answers);
            tables.ata_votes.extend(archive.ata_votes);
            tables
                .round_telemetry
                .extend(archive.rounds.into_iter().map(|round| (session_id, round)));
            tables.game_telemetry.insert(session_id, archive.telemetry);
            Ok(())
        })
    }

    fn find_game_telemetry(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<GameTelemetry>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_available("load telemetry")?;
            Ok(store.tables.read().await.game_telemetry.get(&session_id).cloned())
        })
    }

    fn list_game_telemetry(&self) -> BoxFuture<'static, StorageResult<Vec<GameTelemetrySummary>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_available("list telemetry")?;
            let tables = store.tables.read().await;
            Ok(tables.game_telemetry.values().map(Into::into).collect())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_available("answer health check") })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_available("reconnect") })
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::state::{participant::DeviceInfo, session::LiveSession};

    fn sealed_archive() -> SessionArchive {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let mut session = LiveSession::new("Host", now);
        session.open_lobby(now).unwrap();
        session.join("Ada", None, DeviceInfo::default(), now).unwrap();
        let telemetry = session.end_game(now + Duration::from_secs(5)).unwrap();
        SessionArchive::capture(&session, telemetry, now + Duration::from_secs(5))
    }

    #[tokio::test]
    async fn archive_is_written_once() {
        let store = MemoryArchiveStore::new();
        let archive = sealed_archive();
        let session_id = archive.session_id();

        store.archive_session(archive.clone()).await.unwrap();
        store.archive_session(archive).await.unwrap();

        assert_eq!(store.participant_history_len(session_id).await, 1);
        assert!(store.find_game_telemetry(session_id).await.unwrap().is_some());
        assert_eq!(store.list_game_telemetry().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn offline_store_writes_nothing() {
        let store = MemoryArchiveStore::new();
        let archive = sealed_archive();
        let session_id = archive.session_id();

        store.set_available(false);
        assert!(store.archive_session(archive.clone()).await.is_err());
        assert!(store.health_check().await.is_err());

        store.set_available(true);
        assert_eq!(store.participant_history_len(session_id).await, 0);
        assert!(store.find_game_telemetry(session_id).await.unwrap().is_none());

        store.archive_session(archive).await.unwrap();
        assert_eq!(store.participant_history_len(session_id).await, 1);
    }
}
