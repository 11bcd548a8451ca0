//! Agent dispatcher library
//!
//! Core functionality of the dispatcher: configuration, the server API
//! client, the websocket control channel, and the executor supervisor.
//! Used by both the main binary and the integration tests.

/// Server HTTP API client
pub mod api_client;

/// CLI interface module
pub mod cli;

/// Configuration management module
pub mod config;

/// Error types
pub mod errors;

/// Executor supervision module
pub mod executor;

/// Inbound request routing
pub mod router;

/// Agent session lifecycle
pub mod session;

/// Status frames sent over the websocket
pub mod status;

/// Telemetry and observability
pub mod telemetry;

/// WebSocket control channel
pub mod ws_client;
