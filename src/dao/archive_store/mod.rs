pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::{
    dao::{
        models::{GameTelemetrySummary, SessionArchive, SessionEntity},
        storage::StorageResult,
    },
    state::telemetry::GameTelemetry,
};

/// Persistence boundary for live session rows and the append-only archives.
pub trait ArchiveStore: Send + Sync {
    /// Upsert the live session row.
    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Write every archive row of a closed session in one atomic step.
    ///
    /// Archiving a session that is already archived is a no-op.
    fn archive_session(&self, archive: SessionArchive) -> BoxFuture<'static, StorageResult<()>>;
    /// Load the sealed telemetry of one session.
    fn find_game_telemetry(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<GameTelemetry>>>;
    /// List archived games, oldest first.
    fn list_game_telemetry(&self) -> BoxFuture<'static, StorageResult<Vec<GameTelemetrySummary>>>;
    /// Cheap liveness probe.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
