//! In-process connection and room broker
//!
//! - `client`: one connection, its listeners and its read/write pumps
//! - `room`: named broadcast groups with their own control task
//! - `registry`: directory of clients and rooms, single-writer control task
//! - `manager`: include/exclude room scoping
//! - `broadcast`: emit to everyone but the owner
//! - `message`: wire envelope and payload
//! - `transport`: frame stream/sink seam

pub mod broadcast;
pub mod client;
pub mod listeners;
pub mod manager;
pub mod message;
pub mod registry;
pub mod room;
pub mod transport;

pub use broadcast::Broadcast;
pub use client::{Client, ClientId, Lifecycle};
pub use listeners::{Listener, SubscriptionId};
pub use manager::RoomManager;
pub use message::{Envelope, Payload, BEFORE_CLOSE, CLOSE};
pub use registry::Registry;
pub use room::Room;
pub use transport::{Frame, MemoryPeer, Transport};
