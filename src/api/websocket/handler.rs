//! WebSocket upgrade handler

use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{future, SinkExt, StreamExt};

use super::state::AppState;
use crate::broker::{Frame, Transport};
use crate::error::BrokerError;

/// WebSocket upgrade handler
///
/// Requests that are not a valid upgrade get `426 Upgrade Required`.
pub async fn ws_handler(
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            tracing::debug!(reason = %rejection, "Rejected non-upgrade request");
            return (StatusCode::UPGRADE_REQUIRED, "websocket upgrade required").into_response();
        }
    };

    let max_message_size = state.registry.config().max_message_size;
    upgrade
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serve an upgraded connection until the client closes
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let setup = state.setup.clone();
    state
        .registry
        .serve(socket_transport(socket), move |registry, client| setup(registry, client))
        .await;
}

/// Split an axum socket into the broker's frame stream and sink
pub fn socket_transport(socket: WebSocket) -> Transport {
    let (sink, stream) = socket.split();

    let reader = stream.map(|msg| msg.map(Frame::from).map_err(BrokerError::transport));
    let writer = sink
        .sink_map_err(BrokerError::transport)
        .with(|frame: Frame| future::ready(Ok::<Message, BrokerError>(frame.into())));

    Transport::new(reader, writer)
}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => Frame::Text(text),
            Message::Binary(data) => Frame::Binary(data),
            Message::Ping(data) => Frame::Ping(data),
            Message::Pong(data) => Frame::Pong(data),
            Message::Close(_) => Frame::Close,
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
            Frame::Ping(data) => Message::Ping(data),
            Frame::Pong(data) => Message::Pong(data),
            Frame::Close => Message::Close(None),
        }
    }
}
