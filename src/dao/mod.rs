/// Archive persistence backends.
pub mod archive_store;
/// Persisted row definitions.
pub mod models;
/// Storage error types shared by every backend.
pub mod storage;
