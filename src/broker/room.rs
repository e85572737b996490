//! Named broadcast groups
//!
//! Each room runs one control task that applies join and leave commands in
//! the order they were issued. The member map is only written by that task;
//! the lock around it exists so other tasks can read it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};

use super::client::{Client, ClientId};
use super::message::{Envelope, Payload};
use super::registry::Command as RegistryCommand;

pub(crate) enum RoomCommand {
    Join(Arc<Client>),
    Leave {
        id: ClientId,
        ack: Option<oneshot::Sender<()>>,
    },
    /// Answered once every earlier command has been applied
    Sync(oneshot::Sender<()>),
}

pub struct Room {
    name: String,
    members: RwLock<HashMap<ClientId, Weak<Client>>>,
    commands: mpsc::UnboundedSender<RoomCommand>,
    pending_joins: AtomicUsize,
}

impl Room {
    /// Create a room and start its control task
    ///
    /// With `reaper` set, the room reports itself to the registry whenever a
    /// leave empties it.
    pub(crate) fn spawn(name: String, reaper: Option<mpsc::UnboundedSender<RegistryCommand>>) -> Arc<Room> {
        let (commands, rx) = mpsc::unbounded_channel();
        let room = Arc::new(Room {
            name,
            members: RwLock::new(HashMap::new()),
            commands,
            pending_joins: AtomicUsize::new(0),
        });
        tokio::spawn(run(Arc::downgrade(&room), rx, reaper));
        room
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contains_client(&self, id: &str) -> bool {
        self.members.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.members.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Live members at this instant
    pub(crate) fn members(&self) -> Vec<Arc<Client>> {
        self.members.read().values().filter_map(Weak::upgrade).collect()
    }

    /// Send an event to every current member, the sender included if it is
    /// one. Returns how many members the event was queued for.
    pub fn emit(&self, event: &str, payload: impl Into<Payload>) -> usize {
        let envelope = Envelope::new(event, payload);
        let members = self.members();
        let delivered = members
            .iter()
            .filter(|client| client.send(envelope.clone()))
            .count();
        tracing::debug!(room = %self.name, event, members = members.len(), delivered, "Room emit");
        delivered
    }

    /// Wait until every command sent so far has been applied
    pub async fn sync(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(RoomCommand::Sync(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub(crate) fn join(&self, client: Arc<Client>) {
        self.pending_joins.fetch_add(1, Ordering::SeqCst);
        if self.commands.send(RoomCommand::Join(client)).is_err() {
            self.pending_joins.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn leave(&self, id: ClientId) {
        let _ = self.commands.send(RoomCommand::Leave { id, ack: None });
    }

    /// Leave with an acknowledgement; `None` if the control task is gone
    pub(crate) fn remove(&self, id: &ClientId) -> Option<oneshot::Receiver<()>> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(RoomCommand::Leave {
                id: id.clone(),
                ack: Some(tx),
            })
            .ok()
            .map(|_| rx)
    }

    pub(crate) fn pending_joins(&self) -> usize {
        self.pending_joins.load(Ordering::SeqCst)
    }

    /// Called by the control task through `Client::admit`
    pub(crate) fn insert_member(&self, client: &Arc<Client>) {
        self.members
            .write()
            .insert(client.id().clone(), Arc::downgrade(client));
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("name", &self.name)
            .field("members", &self.len())
            .finish()
    }
}

async fn run(
    handle: Weak<Room>,
    mut commands: mpsc::UnboundedReceiver<RoomCommand>,
    reaper: Option<mpsc::UnboundedSender<RegistryCommand>>,
) {
    while let Some(command) = commands.recv().await {
        let Some(room) = handle.upgrade() else { break };

        match command {
            RoomCommand::Join(client) => {
                let admitted = client.admit(&room);
                room.pending_joins.fetch_sub(1, Ordering::SeqCst);
                if admitted {
                    tracing::debug!(room = %room.name, client_id = %client.id(), members = room.len(), "Joined room");
                } else {
                    tracing::debug!(room = %room.name, client_id = %client.id(), "Ignored join from closing client");
                }
            }
            RoomCommand::Leave { id, ack } => {
                let removed = room.members.write().remove(&id);
                if let Some(client) = removed.as_ref().and_then(Weak::upgrade) {
                    client.forget_room(&room.name);
                }
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
                if removed.is_some() {
                    tracing::debug!(room = %room.name, client_id = %id, members = room.len(), "Left room");
                    if let Some(reaper) = &reaper {
                        if room.is_empty() {
                            let _ = reaper.send(RegistryCommand::RoomEmptied(room.name.clone()));
                        }
                    }
                }
            }
            RoomCommand::Sync(done) => {
                let _ = done.send(());
            }
        }
    }
}
