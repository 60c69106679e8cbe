//! Transport seam
//!
//! The overlay rides on a reliable datagram transport supplied by the
//! embedder. The routing core only ever sees opaque [`ConnectionId`]s and
//! byte buffers: outbound traffic goes through the [`Transport`] trait,
//! inbound bytes arrive on an mpsc channel the node drains. Connection
//! pooling, framing, and encryption all belong to the implementor.

use crate::error::TransportError;
use crate::id::ConnectionId;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Bytes received from a peer, tagged with the connection they arrived on
pub type RawMessage = (ConnectionId, Vec<u8>);

/// Sender half handed to the transport implementation
pub type IncomingSender = mpsc::UnboundedSender<RawMessage>;

/// Receiver half drained by the routing node
pub type IncomingReceiver = mpsc::UnboundedReceiver<RawMessage>;

/// Reliable datagram transport consumed by the routing core
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send `bytes` over the connection; resolves once handed to the wire
    async fn send(&self, connection: ConnectionId, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Open a connection to `endpoint`, returning its handle
    async fn connect(&self, endpoint: SocketAddr) -> Result<ConnectionId, TransportError>;

    /// Tear down a connection; dropping an unknown handle is a no-op
    async fn disconnect(&self, connection: ConnectionId);
}
