//! Roomcast
//!
//! An in-process WebSocket broker: connected clients, named rooms, and
//! event dispatch between them.
//!
//! # Features
//!
//! - **Event listeners**: per-client `on`/`once`/`off`, with events that
//!   arrive before any listener buffered and replayed in order
//! - **Rooms**: get-or-create by name, fan-out to members
//! - **Scoping**: `in_room(..).except(..)` set arithmetic over rooms
//! - **Lifecycle**: heartbeats, read timeouts, and a close cascade that
//!   removes the client from every room and the registry
//!
//! # Modules
//!
//! - `broker`: clients, rooms, registry, scoping and the transport seam
//! - `api`: axum router, WebSocket upgrade handler and a demo chat setup
//! - `config`: environment-driven configuration
//! - `error`: error type shared across the crate
//! - `logging`: tracing subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use roomcast::{BrokerConfig, Registry};
//! use roomcast::broker::Transport;
//!
//! # async fn demo() {
//! let registry = Registry::new(BrokerConfig::default());
//! let (transport, _peer) = Transport::memory();
//! registry
//!     .serve(transport, |registry, client| {
//!         client.join("lobby");
//!         let rooms = registry.clone();
//!         client.on("say", move |payload| {
//!             rooms.to("lobby").emit("message", payload.clone());
//!         });
//!     })
//!     .await;
//! # }
//! ```

pub mod api;
pub mod broker;
pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used items at crate root
pub use broker::{Broadcast, Client, ClientId, Envelope, Payload, Registry, Room, RoomManager};
pub use config::BrokerConfig;
pub use error::{BrokerError, BrokerResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
