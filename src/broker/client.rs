//! One live connection and its read/write pumps

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use uuid::Uuid;

use super::broadcast::Broadcast;
use super::listeners::{Listener, ListenerTable, Routed, SubscriptionId};
use super::message::{response_event, Envelope, Payload, BEFORE_CLOSE, CLOSE};
use super::registry::Registry;
use super::room::Room;
use super::transport::{Frame, FrameSink, FrameStream, Transport};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};

/// Unique client identifier, also the name of the client's private room
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    pub fn new() -> Self {
        Self(format!("client_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::borrow::Borrow<str> for ClientId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Where a client is in its shutdown
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Open,
    /// `close()` was called; the cascade has not finished yet
    Closing,
    Closed,
}

/// A connected peer
///
/// Always handled through `Arc<Client>`. The connection itself is owned by
/// the two pumps: the read pump holds the inbound half and the write pump is
/// the only writer of the outbound half. Everything the application sends
/// goes through [`Client::emit`] and the outbound queue.
pub struct Client {
    id: ClientId,
    registry: Registry,
    outbound: mpsc::Sender<Envelope>,
    alive: AtomicBool,
    cascade_started: AtomicBool,
    lifecycle: watch::Sender<Lifecycle>,
    listeners: Mutex<ListenerTable>,
    /// Serializes dispatch and buffer replay so listeners see arrival order.
    /// Reentrant: listeners may call back into this client. Held while
    /// listeners run, so `on`/`once` on another client from inside a
    /// listener waits for that client's dispatch.
    dispatch_lock: ReentrantMutex<()>,
    rooms: Mutex<HashMap<String, Weak<Room>>>,
    locals: Mutex<HashMap<String, Value>>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
    connected_at: i64,
}

impl Client {
    pub(crate) fn new(registry: Registry, config: &BrokerConfig) -> (Arc<Self>, mpsc::Receiver<Envelope>) {
        let (outbound, outbound_rx) = mpsc::channel(config.outbound_capacity);
        let (lifecycle, _) = watch::channel(Lifecycle::Open);
        let client = Arc::new(Self {
            id: ClientId::new(),
            registry,
            outbound,
            alive: AtomicBool::new(true),
            cascade_started: AtomicBool::new(false),
            lifecycle,
            listeners: Mutex::new(ListenerTable::new(config.pending_capacity, config.pending_events)),
            dispatch_lock: ReentrantMutex::new(()),
            rooms: Mutex::new(HashMap::new()),
            locals: Mutex::new(HashMap::new()),
            pumps: Mutex::new(Vec::new()),
            connected_at: chrono::Utc::now().timestamp(),
        });
        (client, outbound_rx)
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    /// Unix timestamp of the upgrade
    pub fn connected_at(&self) -> i64 {
        self.connected_at
    }

    // ---------------------------------------------------------------------
    // Rooms
    // ---------------------------------------------------------------------

    /// Ask to join a room, creating it if needed
    ///
    /// Returns immediately; the membership change is applied by the room's
    /// control task.
    pub fn join(self: &Arc<Self>, room: &str) {
        if !self.is_alive() {
            return;
        }
        self.registry.request_join(room, self.clone());
    }

    /// Ask to leave a room; unknown rooms are ignored
    pub fn leave(&self, room: &str) {
        if !self.is_alive() {
            return;
        }
        self.registry.request_leave(room, self.id.clone());
    }

    /// Names of the rooms this client is currently a member of
    pub fn rooms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn in_room(&self, room: &str) -> bool {
        self.rooms.lock().contains_key(room)
    }

    /// Record membership of `room`, unless this client is already closing
    ///
    /// The alive check and the insert happen under the membership lock, which
    /// the close cascade also takes before it snapshots the rooms to leave.
    pub(crate) fn admit(self: &Arc<Self>, room: &Arc<Room>) -> bool {
        let mut memberships = self.rooms.lock();
        if !self.is_alive() {
            return false;
        }
        room.insert_member(self);
        memberships.insert(room.name().to_string(), Arc::downgrade(room));
        true
    }

    pub(crate) fn forget_room(&self, room: &str) {
        self.rooms.lock().remove(room);
    }

    // ---------------------------------------------------------------------
    // Listeners
    // ---------------------------------------------------------------------

    /// Register a listener for an event
    ///
    /// Anything that arrived for `event` before the first listener existed is
    /// replayed to this listener right away, in arrival order.
    ///
    /// Listeners may subscribe on their own client freely. Subscribing on a
    /// *different* client from inside a listener blocks until that client
    /// finishes dispatching; if that client's listeners subscribe back on
    /// this one, the two deadlock. Do cross-client wiring from the setup
    /// callback or a spawned task instead.
    pub fn on<F>(&self, event: &str, listener: F) -> SubscriptionId
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.subscribe(event, Arc::new(listener), false)
    }

    /// Register a listener that fires at most once
    ///
    /// Same cross-client restriction as [`Client::on`].
    pub fn once<F>(&self, event: &str, listener: F) -> SubscriptionId
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.subscribe(event, Arc::new(listener), true)
    }

    /// Remove a listener; returns false if it was not registered
    pub fn off(&self, event: &str, id: SubscriptionId) -> bool {
        self.listeners.lock().remove(event, id)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.lock().listener_count(event)
    }

    pub fn pending_count(&self, event: &str) -> usize {
        self.listeners.lock().pending_count(event)
    }

    fn subscribe(&self, event: &str, listener: Listener, once: bool) -> SubscriptionId {
        let _serial = self.dispatch_lock.lock();
        let (id, buffered) = self.listeners.lock().add(event, listener.clone(), once);
        if !buffered.is_empty() {
            tracing::debug!(
                client_id = %self.id,
                event,
                count = buffered.len(),
                "Replaying buffered events"
            );
        }
        for payload in &buffered {
            listener(payload);
        }
        id
    }

    /// Route an event to its listeners, or buffer it if there are none
    pub(crate) fn dispatch(&self, event: &str, payload: &Payload) {
        let _serial = self.dispatch_lock.lock();
        let routed = self.listeners.lock().route(event, payload);
        match routed {
            Routed::Deliver(targets) => {
                for listener in targets {
                    listener(payload);
                }
            }
            Routed::Buffered => {
                tracing::trace!(client_id = %self.id, event, "No listener yet, buffered");
            }
            Routed::Dropped => {
                tracing::warn!(client_id = %self.id, event, "Pending buffer full, dropping event");
            }
        }
    }

    // ---------------------------------------------------------------------
    // Outbound
    // ---------------------------------------------------------------------

    /// Queue an event for this client
    ///
    /// Dropped silently once the client is closing. When the outbound queue
    /// is full the message is dropped and a warning logged.
    pub fn emit(&self, event: &str, payload: impl Into<Payload>) {
        self.send(Envelope::new(event, payload));
    }

    /// Emit, then call `callback` once with the peer's answer on
    /// `**<event>:response**`
    pub fn emit_with_ack<F>(&self, event: &str, payload: impl Into<Payload>, callback: F) -> SubscriptionId
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        let id = self.once(&response_event(event), callback);
        self.emit(event, payload);
        id
    }

    pub(crate) fn send(&self, envelope: Envelope) -> bool {
        if !self.is_alive() {
            return false;
        }
        match self.outbound.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                tracing::warn!(
                    client_id = %self.id,
                    event = %envelope.event,
                    "Outbound queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Emit to every other connected client
    pub fn broadcast(&self) -> Broadcast<'_> {
        Broadcast::new(self)
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    // ---------------------------------------------------------------------
    // Per-connection store
    // ---------------------------------------------------------------------

    pub fn get(&self, key: &str) -> Option<Value> {
        self.locals.lock().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.locals.lock().insert(key.to_string(), value.into());
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Request shutdown. Idempotent and non-blocking: the supervising task
    /// runs the close cascade.
    pub fn close(&self) {
        let requested = self.lifecycle.send_if_modified(|state| {
            if *state == Lifecycle::Open {
                *state = Lifecycle::Closing;
                true
            } else {
                false
            }
        });
        if requested {
            tracing::debug!(client_id = %self.id, "Close requested");
        }
    }

    /// Resolves once `close()` has been requested
    pub async fn closing(&self) {
        let mut rx = self.lifecycle.subscribe();
        wait_until(&mut rx, |s| s != Lifecycle::Open).await;
    }

    /// Resolves once the close cascade has fully completed
    pub async fn closed(&self) {
        let mut rx = self.lifecycle.subscribe();
        wait_until(&mut rx, |s| s == Lifecycle::Closed).await;
    }

    /// Spawn the read and write pumps over `transport`
    pub(crate) fn start(
        self: &Arc<Self>,
        transport: Transport,
        outbound: mpsc::Receiver<Envelope>,
        config: &BrokerConfig,
    ) {
        let reader = tokio::spawn(read_pump(self.clone(), transport.reader, config.read_timeout));
        let writer = tokio::spawn(write_pump(
            self.clone(),
            transport.writer,
            outbound,
            config.ping_interval(),
            config.write_timeout,
        ));
        self.pumps.lock().extend([reader, writer]);
    }

    /// The close cascade. Runs at most once; later callers wait for the
    /// first one to finish.
    pub(crate) async fn shutdown(self: &Arc<Self>) {
        self.close();
        if self.cascade_started.swap(true, Ordering::SeqCst) {
            self.closed().await;
            return;
        }

        self.dispatch(BEFORE_CLOSE, &Payload::empty());

        let rooms = self.take_memberships();
        let acks: Vec<_> = rooms.iter().filter_map(|room| room.remove(&self.id)).collect();
        futures::future::join_all(acks).await;

        self.registry.deregister(&self.id).await;

        let pumps: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pumps.lock());
        for pump in pumps {
            let _ = pump.await;
        }

        self.dispatch(CLOSE, &Payload::empty());
        self.listeners.lock().clear();
        self.lifecycle.send_replace(Lifecycle::Closed);

        tracing::info!(client_id = %self.id, rooms_left = rooms.len(), "Client closed");
    }

    /// Mark the client dead and take its memberships in one step, so a join
    /// applied concurrently either lands in the snapshot or is refused
    fn take_memberships(&self) -> Vec<Arc<Room>> {
        let mut memberships = self.rooms.lock();
        self.alive.store(false, Ordering::SeqCst);
        memberships.drain().filter_map(|(_, room)| room.upgrade()).collect()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .field("rooms", &self.rooms())
            .finish()
    }
}

async fn wait_until(rx: &mut watch::Receiver<Lifecycle>, done: impl Fn(Lifecycle) -> bool) {
    loop {
        if done(*rx.borrow_and_update()) {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Reads frames until the peer goes away, a frame fails to decode, the read
/// deadline passes, or the client starts closing
async fn read_pump(client: Arc<Client>, mut reader: FrameStream, read_timeout: Duration) {
    let mut lifecycle = client.lifecycle.subscribe();

    loop {
        let next = tokio::select! {
            _ = wait_until(&mut lifecycle, |s| s != Lifecycle::Open) => break,
            next = timeout(read_timeout, reader.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                tracing::info!(client_id = %client.id, ?read_timeout, "Read deadline passed");
                break;
            }
            Ok(None) => {
                tracing::debug!(client_id = %client.id, "Peer disconnected");
                break;
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(client_id = %client.id, error = %e, "Read failed");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Frame::Text(text) => match Envelope::decode(&text) {
                Ok(envelope) => {
                    tracing::trace!(client_id = %client.id, event = %envelope.event, "Inbound event");
                    client.dispatch(&envelope.event, &envelope.payload);
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(client_id = %client.id, error = %e, "Dropped malformed message");
                }
                Err(e) => {
                    tracing::warn!(client_id = %client.id, error = %e, "Undecodable frame");
                    break;
                }
            },
            Frame::Close => {
                tracing::debug!(client_id = %client.id, "Peer sent close");
                break;
            }
            // any frame refreshes the deadline; nothing else to do
            Frame::Ping(_) | Frame::Pong(_) | Frame::Binary(_) => {}
        }
    }

    client.close();
}

enum WriteStep {
    Send(Envelope),
    Heartbeat,
    Stop,
}

/// Sole writer of the connection: queued events plus periodic pings
async fn write_pump(
    client: Arc<Client>,
    mut writer: FrameSink,
    mut outbound: mpsc::Receiver<Envelope>,
    ping_interval: Duration,
    write_timeout: Duration,
) {
    let mut lifecycle = client.lifecycle.subscribe();
    let mut heartbeat = interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        let step = tokio::select! {
            _ = wait_until(&mut lifecycle, |s| s != Lifecycle::Open) => WriteStep::Stop,
            msg = outbound.recv() => match msg {
                Some(envelope) => WriteStep::Send(envelope),
                None => WriteStep::Stop,
            },
            _ = heartbeat.tick() => WriteStep::Heartbeat,
        };

        let result = match step {
            WriteStep::Send(envelope) => write_envelope(&mut writer, &envelope, write_timeout).await,
            WriteStep::Heartbeat => {
                tracing::trace!(client_id = %client.id, "Sending ping");
                write_frame(&mut writer, Frame::Ping(Vec::new()), write_timeout).await
            }
            WriteStep::Stop => {
                // flush what was queued before the close request
                while let Ok(envelope) = outbound.try_recv() {
                    if write_envelope(&mut writer, &envelope, write_timeout).await.is_err() {
                        break;
                    }
                }
                let _ = write_frame(&mut writer, Frame::Close, write_timeout).await;
                break;
            }
        };

        if let Err(e) = result {
            tracing::warn!(client_id = %client.id, error = %e, "Write failed");
            break;
        }
    }

    client.close();
}

async fn write_envelope(writer: &mut FrameSink, envelope: &Envelope, limit: Duration) -> BrokerResult<()> {
    match envelope.encode() {
        Ok(text) => write_frame(writer, Frame::Text(text), limit).await,
        Err(e) => {
            // one unencodable message does not end the connection
            tracing::warn!(event = %envelope.event, error = %e, "Failed to encode message");
            Ok(())
        }
    }
}

async fn write_frame(writer: &mut FrameSink, frame: Frame, limit: Duration) -> BrokerResult<()> {
    match timeout(limit, writer.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(BrokerError::Timeout(limit)),
    }
}
