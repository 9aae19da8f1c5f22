use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{Client, Collection, Database, bson::doc, options::IndexOptions};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoAtaVoteDocument, MongoFffAnswerDocument, MongoGameTelemetryDocument,
        MongoParticipantHistoryDocument, MongoRoundTelemetryDocument, MongoSessionDocument, doc_id,
    },
};
use crate::{
    dao::{
        archive_store::ArchiveStore,
        models::{GameTelemetrySummary, SessionArchive, SessionEntity},
        storage::StorageResult,
    },
    state::telemetry::GameTelemetry,
};

const SESSION_COLLECTION: &str = "sessions";
const PARTICIPANT_HISTORY_COLLECTION: &str = "participant_history";
const FFF_ANSWER_COLLECTION: &str = "fff_answers";
const ATA_VOTE_COLLECTION: &str = "ata_votes";
const ROUND_TELEMETRY_COLLECTION: &str = "round_telemetry";
const GAME_TELEMETRY_COLLECTION: &str = "game_telemetry";

/// Archive store backed by MongoDB; archival runs in one multi-document transaction.
#[derive(Clone)]
pub struct MongoArchiveStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoArchiveStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let store = Self {
            inner: Arc::new(MongoInner {
                state: RwLock::new(MongoState { client, database }),
                config,
            }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;
        for collection in [
            PARTICIPANT_HISTORY_COLLECTION,
            FFF_ANSWER_COLLECTION,
            ATA_VOTE_COLLECTION,
            ROUND_TELEMETRY_COLLECTION,
        ] {
            let index = mongodb::IndexModel::builder()
                .keys(doc! {"session_id": 1})
                .options(
                    IndexOptions::builder()
                        .name(Some(format!("{collection}_session_idx")))
                        .build(),
                )
                .build();

            database
                .collection::<mongodb::bson::Document>(collection)
                .create_index(index)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index: "session_id",
                    source,
                })?;
        }
        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn client(&self) -> Client {
        let guard = self.inner.state.read().await;
        guard.client.clone()
    }

    async fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.database().await.collection::<T>(name)
    }

    async fn save_session(&self, session: SessionEntity) -> MongoResult<()> {
        let id = session.id;
        let document: MongoSessionDocument = session.into();
        self.collection::<MongoSessionDocument>(SESSION_COLLECTION)
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveSession { id, source })?;
        Ok(())
    }

    async fn archive_session(&self, archive: SessionArchive) -> MongoResult<()> {
        let id = archive.session_id();
        let fail = |step: &'static str| {
            move |source: mongodb::error::Error| MongoDaoError::ArchiveSession { id, step, source }
        };

        let games = self
            .collection::<MongoGameTelemetryDocument>(GAME_TELEMETRY_COLLECTION)
            .await;
        let already_archived = games
            .find_one(doc_id(id))
            .await
            .map_err(fail("lookup"))?
            .is_some();
        if already_archived {
            debug!(session_id = %id, "session already archived");
            return Ok(());
        }

        let client = self.client().await;
        let mut session = client.start_session().await.map_err(fail("start session"))?;
        session
            .start_transaction()
            .await
            .map_err(fail("start transaction"))?;

        let participants = archive
            .participants
            .into_iter()
            .map(MongoParticipantHistoryDocument::from)
            .collect::<Vec<_>>();
        if !participants.is_empty() {
            self.collection::<MongoParticipantHistoryDocument>(PARTICIPANT_HISTORY_COLLECTION)
                .await
                .insert_many(participants)
                .session(&mut session)
                .await
                .map_err(fail("participant history"))?;
        }

        let answers = archive
            .fff_answers
            .into_iter()
            .map(MongoFffAnswerDocument::from)
            .collect::<Vec<_>>();
        if !answers.is_empty() {
            self.collection::<MongoFffAnswerDocument>(FFF_ANSWER_COLLECTION)
                .await
                .insert_many(answers)
                .session(&mut session)
                .await
                .map_err(fail("fff answers"))?;
        }

        let votes = archive
            .ata_votes
            .into_iter()
            .map(MongoAtaVoteDocument::from)
            .collect::<Vec<_>>();
        if !votes.is_empty() {
            self.collection::<MongoAtaVoteDocument>(ATA_VOTE_COLLECTION)
                .await
                .insert_many(votes)
                .session(&mut session)
                .await
                .map_err(fail("ata votes"))?;
        }

        let rounds = archive
            .rounds
            .into_iter()
            .map(|round| MongoRoundTelemetryDocument::from((id, round)))
            .collect::<Vec<_>>();
        if !rounds.is_empty() {
            self.collection::<MongoRoundTelemetryDocument>(ROUND_TELEMETRY_COLLECTION)
                .await
                .insert_many(rounds)
                .session(&mut session)
                .await
                .map_err(fail("round telemetry"))?;
        }

        games
            .replace_one(doc_id(id), MongoGameTelemetryDocument::from(archive.telemetry))
            .upsert(true)
            .session(&mut session)
            .await
            .map_err(fail("game telemetry"))?;

        let session_row: MongoSessionDocument = archive.session.into();
        self.collection::<MongoSessionDocument>(SESSION_COLLECTION)
            .await
            .replace_one(doc_id(id), &session_row)
            .upsert(true)
            .session(&mut session)
            .await
            .map_err(fail("session"))?;

        session
            .commit_transaction()
            .await
            .map_err(fail("commit"))?;
        Ok(())
    }

    async fn find_game_telemetry(&self, id: Uuid) -> MongoResult<Option<GameTelemetry>> {
        let document = self
            .collection::<MongoGameTelemetryDocument>(GAME_TELEMETRY_COLLECTION)
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadTelemetry { id, source })?;
        Ok(document.map(|doc| doc.telemetry))
    }

    async fn list_game_telemetry(&self) -> MongoResult<Vec<GameTelemetrySummary>> {
        let documents: Vec<MongoGameTelemetryDocument> = self
            .collection::<MongoGameTelemetryDocument>(GAME_TELEMETRY_COLLECTION)
            .await
            .find(doc! {})
            .sort(doc! {"game_start_time": 1})
            .await
            .map_err(|source| MongoDaoError::ListTelemetry { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListTelemetry { source })?;

        Ok(documents
            .iter()
            .map(|doc| GameTelemetrySummary::from(&doc.telemetry))
            .collect())
    }
}

impl ArchiveStore for MongoArchiveStore {
    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_session(session).await.map_err(Into::into) })
    }

    fn archive_session(&self, archive: SessionArchive) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.archive_session(archive).await.map_err(Into::into) })
    }

    fn find_game_telemetry(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<GameTelemetry>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_game_telemetry(session_id)
                .await
                .map_err(Into::into)
        })
    }

    fn list_game_telemetry(&self) -> BoxFuture<'static, StorageResult<Vec<GameTelemetrySummary>>> {
        let store = self.clone();
        Box::pin(async move { store.list_game_telemetry().await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
