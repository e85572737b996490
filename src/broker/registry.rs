//! Process-wide directory of clients and rooms
//!
//! The registry is a service handle: clone it and pass it to whoever needs
//! it. One control task owns the client and room maps and is their only
//! writer; registration, deregistration, room creation and membership
//! requests all reach it as messages. Readers take a read lock on the
//! published directory.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};

use super::client::{Client, ClientId};
use super::manager::RoomManager;
use super::message::{Envelope, Payload};
use super::room::Room;
use super::transport::Transport;
use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};

pub(crate) enum Command {
    Register(Arc<Client>),
    Deregister {
        id: ClientId,
        ack: oneshot::Sender<()>,
    },
    Room {
        name: String,
        reply: oneshot::Sender<Arc<Room>>,
    },
    Join {
        room: String,
        client: Arc<Client>,
    },
    Leave {
        room: String,
        id: ClientId,
    },
    RoomEmptied(String),
    Sync(oneshot::Sender<()>),
}

#[derive(Default)]
struct Directory {
    clients: HashMap<ClientId, Arc<Client>>,
    rooms: HashMap<String, Arc<Room>>,
}

struct Shared {
    config: BrokerConfig,
    commands: mpsc::UnboundedSender<Command>,
    directory: RwLock<Directory>,
}

/// Handle to the broker's registry
#[derive(Clone)]
pub struct Registry {
    shared: Arc<Shared>,
}

impl Registry {
    /// Create a registry and start its control task
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: BrokerConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            commands,
            directory: RwLock::new(Directory::default()),
        });
        tokio::spawn(run(Arc::downgrade(&shared), rx));
        Self { shared }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.shared.config
    }

    // ---------------------------------------------------------------------
    // Connections
    // ---------------------------------------------------------------------

    /// Serve one connection until it closes
    ///
    /// Registers a new client, starts its pumps, joins it to its private
    /// room, runs `setup`, then waits for the client to close and runs the
    /// close cascade.
    pub async fn serve<F>(&self, transport: Transport, setup: F)
    where
        F: FnOnce(&Registry, &Arc<Client>),
    {
        let client = self.attach(transport);
        setup(self, &client);
        client.closing().await;
        client.shutdown().await;
    }

    /// Like [`Registry::serve`], but supervises the client from a background
    /// task and returns it right away
    pub fn spawn<F>(&self, transport: Transport, setup: F) -> Arc<Client>
    where
        F: FnOnce(&Registry, &Arc<Client>),
    {
        let client = self.attach(transport);
        setup(self, &client);

        let supervised = client.clone();
        tokio::spawn(async move {
            supervised.closing().await;
            supervised.shutdown().await;
        });
        client
    }

    fn attach(&self, transport: Transport) -> Arc<Client> {
        let (client, outbound) = Client::new(self.clone(), &self.shared.config);
        self.request(Command::Register(client.clone()));
        client.start(transport, outbound, &self.shared.config);

        // private room for addressed delivery
        client.join(client.id().as_str());

        tracing::info!(client_id = %client.id(), "Client connected");
        client
    }

    // ---------------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------------

    /// Get or create a room; the same name always yields the same room
    pub async fn room(&self, name: &str) -> BrokerResult<Arc<Room>> {
        if let Some(room) = self.get_room(name) {
            return Ok(room);
        }
        let (reply, rx) = oneshot::channel();
        self.request(Command::Room {
            name: name.to_string(),
            reply,
        });
        rx.await.map_err(|_| BrokerError::RegistryStopped)
    }

    pub fn get_room(&self, name: &str) -> Option<Arc<Room>> {
        self.shared.directory.read().rooms.get(name).cloned()
    }

    pub fn contains_room(&self, name: &str) -> bool {
        self.shared.directory.read().rooms.contains_key(name)
    }

    pub fn client(&self, id: &str) -> Option<Arc<Client>> {
        self.shared.directory.read().clients.get(id).cloned()
    }

    pub fn contains_client(&self, id: &str) -> bool {
        self.shared.directory.read().clients.contains_key(id)
    }

    pub fn clients_count(&self) -> usize {
        self.shared.directory.read().clients.len()
    }

    pub fn rooms_count(&self) -> usize {
        self.shared.directory.read().rooms.len()
    }

    pub fn room_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.directory.read().rooms.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn clients(&self) -> Vec<Arc<Client>> {
        self.shared.directory.read().clients.values().cloned().collect()
    }

    // ---------------------------------------------------------------------
    // Fan-out
    // ---------------------------------------------------------------------

    /// Send an event to every registered client, regardless of rooms
    pub fn emit(&self, event: &str, payload: impl Into<Payload>) -> usize {
        let envelope = Envelope::new(event, payload);
        let clients = self.clients();
        let delivered = clients
            .iter()
            .filter(|client| client.send(envelope.clone()))
            .count();
        tracing::debug!(event, clients = clients.len(), delivered, "Global emit");
        delivered
    }

    /// Scope builder that resets after each emit
    pub fn manager(&self) -> RoomManager {
        RoomManager::new(self.clone(), true)
    }

    /// Scope builder already targeting one room
    pub fn to(&self, room: &str) -> RoomManager {
        let mut manager = self.manager();
        manager.in_room(room);
        manager
    }

    // ---------------------------------------------------------------------
    // Control
    // ---------------------------------------------------------------------

    /// Wait until every request sent so far has been handled by the control
    /// task
    pub async fn sync(&self) {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Sync(tx));
        let _ = rx.await;
    }

    /// Wait until pending registry and room commands have all been applied
    pub async fn settle(&self) {
        self.sync().await;
        let rooms: Vec<Arc<Room>> = self.shared.directory.read().rooms.values().cloned().collect();
        futures::future::join_all(rooms.iter().map(|room| room.sync())).await;
    }

    pub(crate) fn request_join(&self, room: &str, client: Arc<Client>) {
        self.request(Command::Join {
            room: room.to_string(),
            client,
        });
    }

    pub(crate) fn request_leave(&self, room: &str, id: ClientId) {
        self.request(Command::Leave {
            room: room.to_string(),
            id,
        });
    }

    pub(crate) async fn deregister(&self, id: &ClientId) {
        let (ack, rx) = oneshot::channel();
        self.request(Command::Deregister { id: id.clone(), ack });
        let _ = rx.await;
    }

    fn request(&self, command: Command) {
        if self.shared.commands.send(command).is_err() {
            tracing::error!("Registry control task is not running");
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("clients", &self.clients_count())
            .field("rooms", &self.rooms_count())
            .finish()
    }
}

/// The control task
async fn run(shared: Weak<Shared>, mut commands: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = commands.recv().await {
        let Some(shared) = shared.upgrade() else { break };

        match command {
            Command::Register(client) => {
                let mut directory = shared.directory.write();
                directory.clients.insert(client.id().clone(), client);
            }
            Command::Deregister { id, ack } => {
                let remaining = {
                    let mut directory = shared.directory.write();
                    directory.clients.remove(&id);
                    directory.clients.len()
                };
                tracing::debug!(client_id = %id, remaining, "Client deregistered");
                let _ = ack.send(());
            }
            Command::Room { name, reply } => {
                let room = get_or_create(&shared, &name);
                let _ = reply.send(room);
            }
            Command::Join { room, client } => {
                get_or_create(&shared, &room).join(client);
            }
            Command::Leave { room, id } => match shared.directory.read().rooms.get(&room) {
                Some(target) => target.leave(id),
                None => tracing::debug!(room = %room, client_id = %id, "Leave for unknown room ignored"),
            },
            Command::RoomEmptied(name) => {
                let mut directory = shared.directory.write();
                let reapable = directory
                    .rooms
                    .get(&name)
                    .map(|room| room.is_empty() && room.pending_joins() == 0)
                    .unwrap_or(false);
                if reapable {
                    directory.rooms.remove(&name);
                    tracing::debug!(room = %name, "Reaped empty room");
                }
            }
            Command::Sync(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Registry control task stopped");
}

fn get_or_create(shared: &Shared, name: &str) -> Arc<Room> {
    let mut directory = shared.directory.write();
    directory
        .rooms
        .entry(name.to_string())
        .or_insert_with(|| {
            tracing::debug!(room = %name, "Created room");
            let reaper = shared
                .config
                .reap_empty_rooms
                .then(|| shared.commands.clone());
            Room::spawn(name.to_string(), reaper)
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::transport::MemoryPeer;
    use std::time::Duration;

    fn connect(registry: &Registry) -> (Arc<Client>, MemoryPeer) {
        let (transport, peer) = Transport::memory();
        (registry.spawn(transport, |_, _| {}), peer)
    }

    #[tokio::test]
    async fn test_room_is_idempotent() {
        let registry = Registry::new(BrokerConfig::default());
        let a = registry.room("lobby").await.unwrap();
        let b = registry.room("lobby").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.contains_room("lobby"));
        assert_eq!(registry.rooms_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_room_creation_yields_one_room() {
        let registry = Registry::new(BrokerConfig::default());
        let (a, b) = tokio::join!(registry.room("race"), registry.room("race"));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    }

    #[tokio::test]
    async fn test_client_registered_and_joined_private_room() {
        let registry = Registry::new(BrokerConfig::default());
        let (client, _peer) = connect(&registry);
        registry.settle().await;

        assert!(registry.contains_client(client.id().as_str()));
        assert_eq!(registry.clients_count(), 1);
        let private = registry.get_room(client.id().as_str()).unwrap();
        assert!(private.contains_client(client.id().as_str()));
        assert!(client.in_room(client.id().as_str()));
    }

    #[tokio::test]
    async fn test_close_deregisters_and_leaves_rooms() {
        let registry = Registry::new(BrokerConfig::default());
        let (client, _peer) = connect(&registry);
        client.join("lobby");
        client.join("games");
        registry.settle().await;
        assert_eq!(client.rooms().len(), 3);

        client.close();
        client.closed().await;

        let id = client.id().as_str();
        assert!(!registry.contains_client(id));
        for name in ["lobby", "games", id] {
            assert!(!registry.get_room(name).unwrap().contains_client(id));
        }
        assert!(client.rooms().is_empty());
    }

    #[tokio::test]
    async fn test_leave_unknown_room_is_noop() {
        let registry = Registry::new(BrokerConfig::default());
        let (client, _peer) = connect(&registry);
        client.leave("nowhere");
        registry.settle().await;
        assert!(!registry.contains_room("nowhere"));
    }

    #[tokio::test]
    async fn test_join_then_leave_applied_in_order() {
        let registry = Registry::new(BrokerConfig::default());
        let (client, _peer) = connect(&registry);
        client.join("flip");
        client.leave("flip");
        client.join("flip");
        registry.settle().await;
        assert!(registry.get_room("flip").unwrap().contains_client(client.id().as_str()));
    }

    #[tokio::test]
    async fn test_global_emit_reaches_everyone() {
        let registry = Registry::new(BrokerConfig::default());
        let (_a, mut peer_a) = connect(&registry);
        let (_b, mut peer_b) = connect(&registry);
        registry.settle().await;

        assert_eq!(registry.emit("notice", ()), 2);
        for peer in [&mut peer_a, &mut peer_b] {
            let text = tokio::time::timeout(Duration::from_secs(2), peer.recv_text())
                .await
                .unwrap()
                .unwrap();
            assert!(text.contains("notice"));
        }
    }

    #[tokio::test]
    async fn test_rooms_persist_without_reaping() {
        let registry = Registry::new(BrokerConfig::default());
        let (client, _peer) = connect(&registry);
        client.join("temp");
        registry.settle().await;
        client.leave("temp");
        registry.settle().await;
        registry.sync().await;
        assert!(registry.contains_room("temp"));
    }

    #[tokio::test]
    async fn test_reaping_removes_emptied_room() {
        let registry = Registry::new(BrokerConfig {
            reap_empty_rooms: true,
            ..Default::default()
        });
        let (client, _peer) = connect(&registry);
        client.join("temp");
        registry.settle().await;
        client.leave("temp");
        registry.settle().await;
        // the room reported itself; let the registry handle that report
        registry.sync().await;
        assert!(!registry.contains_room("temp"));
        assert!(registry.contains_room(client.id().as_str()));
    }
}
