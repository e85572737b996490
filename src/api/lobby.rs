//! Demo chat wiring used by the server binary
//!
//! Inbound events:
//! - `name [name]`: set the display name
//! - `join [room]` / `leave [room]`
//! - `say [room, text]`: message everyone in a room, sender included
//! - `whisper [client_id, text]`: message one client through its private room
//! - `shout [text]`: message every other connected client

use std::sync::{Arc, Weak};

use serde_json::json;

use crate::broker::{Client, Payload, Registry, BEFORE_CLOSE};
use crate::error::BrokerResult;

/// Wire the demo events onto a freshly connected client
pub fn setup(registry: &Registry, client: &Arc<Client>) {
    let id = client.id().to_string();
    client.set("name", id.clone());
    client.emit("welcome", json!(id));

    handle(client, "name", |client, payload| {
        let name: String = payload.arg(0)?;
        client.set("name", name);
        Ok(())
    });

    let rooms = registry.clone();
    handle(client, "join", move |client, payload| {
        let room: String = payload.arg(0)?;
        // another client's private room would expose its whispers
        if room != client.id().as_str() && rooms.contains_client(&room) {
            tracing::warn!(client_id = %client.id(), room = %room, "Refused join of private room");
            client.emit("error", json!(format!("cannot join room: {room}")));
            return Ok(());
        }
        rooms
            .manager()
            .in_room(&room)
            .except(client.id().as_str())
            .emit("joined", vec![json!(room), json!(display_name(client))]);
        client.join(&room);
        Ok(())
    });

    let rooms = registry.clone();
    handle(client, "leave", move |client, payload| {
        let room: String = payload.arg(0)?;
        client.leave(&room);
        rooms
            .manager()
            .in_room(&room)
            .except(client.id().as_str())
            .emit("left", vec![json!(room), json!(display_name(client))]);
        Ok(())
    });

    let rooms = registry.clone();
    handle(client, "say", move |client, payload| {
        let room: String = payload.arg(0)?;
        let text: String = payload.arg(1)?;
        if !client.in_room(&room) {
            tracing::debug!(client_id = %client.id(), room = %room, "Say outside of room ignored");
            return Ok(());
        }
        rooms
            .to(&room)
            .emit("message", vec![json!(room), json!(display_name(client)), json!(text)]);
        Ok(())
    });

    let rooms = registry.clone();
    handle(client, "whisper", move |client, payload| {
        let target: String = payload.arg(0)?;
        let text: String = payload.arg(1)?;
        let delivered = rooms
            .to(&target)
            .emit("whisper", vec![json!(display_name(client)), json!(text)]);
        if delivered == 0 {
            client.emit("error", json!(format!("no such client: {target}")));
        }
        Ok(())
    });

    handle(client, "shout", |client, payload| {
        let text: String = payload.arg(0)?;
        client
            .broadcast()
            .emit("shout", vec![json!(display_name(client)), json!(text)]);
        Ok(())
    });

    let rooms = registry.clone();
    handle(client, BEFORE_CLOSE, move |client, _| {
        let name = display_name(client);
        for room in client.rooms() {
            if room == client.id().as_str() {
                continue;
            }
            rooms
                .manager()
                .in_room(&room)
                .except(client.id().as_str())
                .emit("left", vec![json!(room), json!(name)]);
        }
        Ok(())
    });
}

/// Register a listener that works on a live client and logs bad arguments
fn handle<F>(client: &Arc<Client>, event: &'static str, handler: F)
where
    F: Fn(&Arc<Client>, &Payload) -> BrokerResult<()> + Send + Sync + 'static,
{
    let weak: Weak<Client> = Arc::downgrade(client);
    client.on(event, move |payload| {
        let Some(client) = weak.upgrade() else { return };
        if let Err(e) = handler(&client, payload) {
            tracing::warn!(client_id = %client.id(), event, error = %e, "Bad event arguments");
        }
    });
}

fn display_name(client: &Client) -> String {
    client
        .get("name")
        .and_then(|name| name.as_str().map(str::to_string))
        .unwrap_or_else(|| client.id().to_string())
}
