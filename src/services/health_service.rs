use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report liveness plus the archive store status, logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.archive_store().await {
        Some(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "archive store health check failed");
            }
        }
        None => warn!("archive store unavailable (degraded mode)"),
    }

    let live_sessions = state.session_count();
    if state.is_degraded().await {
        HealthResponse::degraded(live_sessions)
    } else {
        HealthResponse::ok(live_sessions)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig, dao::archive_store::memory::MemoryArchiveStore, state::AppState,
    };

    #[tokio::test]
    async fn reports_degraded_without_a_store() {
        let state = AppState::new(AppConfig::default());
        assert_eq!(health_status(&state).await.status, "degraded");

        state
            .set_archive_store(Arc::new(MemoryArchiveStore::new()))
            .await;
        let health = health_status(&state).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.live_sessions, 0);
    }
}
