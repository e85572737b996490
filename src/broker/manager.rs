//! Room scoping: emit to the union of some rooms minus the members of others

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::client::{Client, ClientId};
use super::message::{Envelope, Payload};
use super::registry::Registry;
use super::room::Room;

/// Request-scoped selection of rooms
///
/// ```no_run
/// # async fn demo(registry: roomcast::Registry) {
/// registry.manager().in_room("lobby").except("muted").emit("notice", ());
/// # }
/// ```
pub struct RoomManager {
    registry: Registry,
    include: HashMap<String, Arc<Room>>,
    exclude: HashMap<String, Arc<Room>>,
    reset: bool,
}

impl RoomManager {
    /// With `reset`, both selections are cleared after every emit
    pub fn new(registry: Registry, reset: bool) -> Self {
        Self {
            registry,
            include: HashMap::new(),
            exclude: HashMap::new(),
            reset,
        }
    }

    /// Add a room to the selection. A room that does not exist yet is
    /// ignored rather than created.
    pub fn in_room(&mut self, name: &str) -> &mut Self {
        match self.registry.get_room(name) {
            Some(room) => {
                self.include.insert(name.to_string(), room);
            }
            None => tracing::debug!(room = name, "Unknown room ignored in selection"),
        }
        self
    }

    /// Exclude every member of a room from the selection; unknown rooms are
    /// ignored
    pub fn except(&mut self, name: &str) -> &mut Self {
        match self.registry.get_room(name) {
            Some(room) => {
                self.exclude.insert(name.to_string(), room);
            }
            None => tracing::debug!(room = name, "Unknown room ignored in exclusion"),
        }
        self
    }

    /// Clients the current selection resolves to
    pub fn recipients(&self) -> Vec<Arc<Client>> {
        let excluded: HashSet<ClientId> = self
            .exclude
            .values()
            .flat_map(|room| room.client_ids())
            .collect();

        let mut selected: HashMap<ClientId, Arc<Client>> = HashMap::new();
        for room in self.include.values() {
            for client in room.members() {
                if !excluded.contains(client.id()) {
                    selected.entry(client.id().clone()).or_insert(client);
                }
            }
        }
        selected.into_values().collect()
    }

    /// Emit to the selection; returns the number of clients it was queued for
    pub fn emit(&mut self, event: &str, payload: impl Into<Payload>) -> usize {
        let envelope = Envelope::new(event, payload);
        let recipients = self.recipients();
        let delivered = recipients
            .iter()
            .filter(|client| client.send(envelope.clone()))
            .count();

        tracing::debug!(
            event,
            rooms = self.include.len(),
            excluded_rooms = self.exclude.len(),
            delivered,
            "Scoped emit"
        );

        if self.reset {
            self.clear();
        }
        delivered
    }

    pub fn clear(&mut self) {
        self.include.clear();
        self.exclude.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::transport::Transport;
    use crate::config::BrokerConfig;

    #[tokio::test]
    async fn test_unknown_room_is_ignored() {
        let registry = Registry::new(BrokerConfig::default());
        let mut manager = registry.manager();
        manager.in_room("ghost").except("phantom");
        assert!(manager.is_empty());
        assert_eq!(manager.emit("x", ()), 0);
        assert!(!registry.contains_room("ghost"));
    }

    #[tokio::test]
    async fn test_reset_clears_selection() {
        let registry = Registry::new(BrokerConfig::default());
        registry.room("a").await.unwrap();

        let mut resetting = RoomManager::new(registry.clone(), true);
        resetting.in_room("a");
        resetting.emit("e", ());
        assert!(resetting.is_empty());

        let mut sticky = RoomManager::new(registry.clone(), false);
        sticky.in_room("a");
        sticky.emit("e", ());
        assert!(!sticky.is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_rooms_deliver_once() {
        let registry = Registry::new(BrokerConfig::default());
        let (transport, _peer) = Transport::memory();
        let client = registry.spawn(transport, |_, _| {});
        client.join("a");
        client.join("b");
        registry.settle().await;

        let delivered = registry.manager().in_room("a").in_room("b").emit("dup", ());
        assert_eq!(delivered, 1);
    }
}
