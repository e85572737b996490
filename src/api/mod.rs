//! API module for HTTP and WebSocket endpoints
//!
//! Serves the broker's WebSocket endpoint plus small health and stats routes.

pub mod http;
pub mod lobby;
pub mod websocket;
