//! Library crate for trivia-live-back, exposing modules for binaries and integration tests.

/// Runtime configuration loaded from JSON.
pub mod config;
/// Archive persistence.
pub mod dao;
mod dto;
mod error;
/// HTTP, SSE and WebSocket routes.
pub mod routes;
/// Services sitting between the routes and the session aggregate.
pub mod services;
/// Live sessions and their round engines.
pub mod state;
