//! WebSocket module for real-time rooms
//!
//! Provides the upgrade endpoint that hands each connection to the broker
//! registry.
//!
//! ## Features
//! - Upgrade gating (`426` for plain HTTP requests)
//! - Per-connection setup callback
//! - axum socket to broker transport adapter

pub mod handler;
pub mod state;

// Re-export commonly used items
pub use handler::{socket_transport, ws_handler};
pub use state::{AppState, SetupFn};
