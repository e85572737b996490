//! Transport seam between clients and the underlying duplex connection
//!
//! A client owns its connection as two halves: a frame stream read only by
//! the read pump and a frame sink written only by the write pump.

use std::pin::Pin;

use futures::{Sink, SinkExt, Stream, StreamExt};

use crate::error::BrokerError;

/// Transport-level frame
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Inbound half of a connection
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, BrokerError>> + Send>>;

/// Outbound half of a connection
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = BrokerError> + Send>>;

/// A connection split into its two halves
pub struct Transport {
    pub reader: FrameStream,
    pub writer: FrameSink,
}

impl Transport {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: Stream<Item = Result<Frame, BrokerError>> + Send + 'static,
        W: Sink<Frame, Error = BrokerError> + Send + 'static,
    {
        Self {
            reader: Box::pin(reader),
            writer: Box::pin(writer),
        }
    }

    /// In-memory transport pair
    ///
    /// Returns the client-side transport and the peer end used to feed
    /// inbound frames and observe outbound ones.
    pub fn memory() -> (Self, MemoryPeer) {
        let (inbound_tx, inbound_rx) = futures::channel::mpsc::unbounded::<Result<Frame, BrokerError>>();
        let (outbound_tx, outbound_rx) = futures::channel::mpsc::unbounded::<Frame>();

        let transport = Transport::new(
            inbound_rx,
            outbound_tx.sink_map_err(BrokerError::transport),
        );
        let peer = MemoryPeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
        };
        (transport, peer)
    }
}

/// Remote end of an in-memory transport
pub struct MemoryPeer {
    inbound: futures::channel::mpsc::UnboundedSender<Result<Frame, BrokerError>>,
    outbound: futures::channel::mpsc::UnboundedReceiver<Frame>,
}

impl MemoryPeer {
    /// Deliver a frame to the client; false once the client stopped reading
    pub fn send(&self, frame: Frame) -> bool {
        self.inbound.unbounded_send(Ok(frame)).is_ok()
    }

    /// Deliver a text frame
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Frame::Text(text.into()))
    }

    /// Inject a transport failure into the client's read side
    pub fn fail(&self, reason: &str) -> bool {
        self.inbound
            .unbounded_send(Err(BrokerError::Transport(reason.to_string())))
            .is_ok()
    }

    /// Next frame written by the client; `None` once the client released
    /// its write half
    pub async fn recv(&mut self) -> Option<Frame> {
        self.outbound.next().await
    }

    /// Next text frame, skipping heartbeats
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.outbound.next().await? {
                Frame::Text(text) => return Some(text),
                Frame::Close => return None,
                _ => continue,
            }
        }
    }

    /// Hang up the inbound side, as a peer disconnect would
    pub fn hang_up(&self) {
        self.inbound.close_channel();
    }
}
