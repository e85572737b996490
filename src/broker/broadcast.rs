//! "Everyone but me" delivery

use super::client::Client;
use super::message::{Envelope, Payload};

/// Emits to every registered client except its owner
///
/// Unlike [`Room::emit`](super::room::Room::emit), the owner is always left
/// out, whatever rooms it is in.
pub struct Broadcast<'a> {
    owner: &'a Client,
}

impl<'a> Broadcast<'a> {
    pub(crate) fn new(owner: &'a Client) -> Self {
        Self { owner }
    }

    pub fn emit(&self, event: &str, payload: impl Into<Payload>) -> usize {
        let envelope = Envelope::new(event, payload);
        let delivered = self
            .owner
            .registry()
            .clients()
            .iter()
            .filter(|client| client.id() != self.owner.id())
            .filter(|client| client.send(envelope.clone()))
            .count();
        tracing::debug!(client_id = %self.owner.id(), event, delivered, "Broadcast emit");
        delivered
    }
}
