/// Mapping of domain events to participant frames and host stream events.
pub mod broadcast;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Participant registration and submissions coming from sockets.
pub mod participant_service;
/// Host operations on live sessions, round timers and archival.
pub mod session_service;
/// Server-Sent Events streaming for the host.
pub mod sse_service;
/// Archive store connection supervision and degraded mode.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;
