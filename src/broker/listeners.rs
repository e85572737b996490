//! Per-client listener table with pending-event buffer
//!
//! Events that arrive before anyone listens for them are buffered per event
//! name. The first `on` for that name takes the buffer and replays it.
//! The buffer is bounded both per event name and in the number of event
//! names; anything past either bound is dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::message::Payload;

/// Callback invoked with the payload of a dispatched event
pub type Listener = Arc<dyn Fn(&Payload) + Send + Sync>;

/// Token identifying one registration, used to remove it again
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Registration {
    id: SubscriptionId,
    listener: Listener,
    once: bool,
}

/// Result of routing one event through the table
pub(crate) enum Routed {
    /// Listeners to call, in registration order
    Deliver(Vec<Listener>),
    /// Nobody listens yet; the payload was buffered
    Buffered,
    /// Nobody listens yet and the buffer is full; the payload was dropped
    Dropped,
}

pub(crate) struct ListenerTable {
    next_id: u64,
    listeners: HashMap<String, Vec<Registration>>,
    pending: HashMap<String, Vec<Payload>>,
    per_event: usize,
    max_events: usize,
}

impl ListenerTable {
    /// `per_event` payloads at most for one event name, `max_events`
    /// distinct event names at most
    pub(crate) fn new(per_event: usize, max_events: usize) -> Self {
        Self {
            next_id: 0,
            listeners: HashMap::new(),
            pending: HashMap::new(),
            per_event,
            max_events,
        }
    }

    /// Register a listener and hand back anything buffered for the event
    pub(crate) fn add(
        &mut self,
        event: &str,
        listener: Listener,
        once: bool,
    ) -> (SubscriptionId, Vec<Payload>) {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);

        // a one-shot listener with something already buffered is satisfied
        // by the oldest entry and never registered
        if once {
            if let Some(queue) = self.pending.get_mut(event) {
                if !queue.is_empty() {
                    let first = queue.remove(0);
                    if queue.is_empty() {
                        self.pending.remove(event);
                    }
                    return (id, vec![first]);
                }
            }
        }

        self.listeners
            .entry(event.to_string())
            .or_default()
            .push(Registration { id, listener, once });
        let buffered = self.pending.remove(event).unwrap_or_default();
        (id, buffered)
    }

    pub(crate) fn remove(&mut self, event: &str, id: SubscriptionId) -> bool {
        let Some(registrations) = self.listeners.get_mut(event) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            self.listeners.remove(event);
        }
        removed
    }

    /// Collect listeners for an event, buffering the payload if there are none
    ///
    /// One-shot registrations are removed here, so they fire at most once even
    /// when two dispatches race.
    pub(crate) fn route(&mut self, event: &str, payload: &Payload) -> Routed {
        match self.listeners.get_mut(event) {
            Some(registrations) if !registrations.is_empty() => {
                let targets = registrations.iter().map(|r| r.listener.clone()).collect();
                registrations.retain(|r| !r.once);
                if registrations.is_empty() {
                    self.listeners.remove(event);
                }
                Routed::Deliver(targets)
            }
            _ => {
                if !self.pending.contains_key(event) && self.pending.len() >= self.max_events {
                    return Routed::Dropped;
                }
                let queue = self.pending.entry(event.to_string()).or_default();
                if queue.len() >= self.per_event {
                    return Routed::Dropped;
                }
                queue.push(payload.clone());
                Routed::Buffered
            }
        }
    }

    pub(crate) fn listener_count(&self, event: &str) -> usize {
        self.listeners.get(event).map(Vec::len).unwrap_or(0)
    }

    pub(crate) fn pending_count(&self, event: &str) -> usize {
        self.pending.get(event).map(Vec::len).unwrap_or(0)
    }

    /// Drop every listener and buffered payload
    pub(crate) fn clear(&mut self) {
        self.listeners.clear();
        self.pending.clear();
    }
}
