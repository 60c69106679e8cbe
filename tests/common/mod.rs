//! In-memory transport mesh for integration tests
//!
//! A registry of nodes keyed by id, with endpoint-based connect, per-link
//! forced drops, and a delivery log the tests assert against. Connections
//! are named by the remote node's id, which is also how a still-joining
//! peer's relay leg finds its way back.

#![allow(dead_code)]

use async_trait::async_trait;
use kadmesh::{
    ConnectionId, Functors, IncomingSender, NodeId, Parameters, RoutingNode, RoutingNodeBuilder,
    Transport, TransportError, WireMessage,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// One message that reached a node's inbox
#[derive(Clone)]
pub struct DeliveryRecord {
    pub from: NodeId,
    pub to: NodeId,
    pub message: WireMessage,
    pub at: Instant,
}

/// Shared state of the whole test overlay
#[derive(Default)]
pub struct MeshRegistry {
    endpoints: Mutex<HashMap<SocketAddr, NodeId>>,
    inboxes: Mutex<HashMap<NodeId, IncomingSender>>,
    drops: Mutex<HashMap<(NodeId, NodeId), usize>>,
    log: Mutex<Vec<DeliveryRecord>>,
}

impl MeshRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, node_id: NodeId, endpoint: SocketAddr, inbox: IncomingSender) {
        self.endpoints.lock().insert(endpoint, node_id);
        self.inboxes.lock().insert(node_id, inbox);
    }

    /// Force the next `count` datagrams on the link `from -> to` to vanish
    pub fn drop_next(&self, from: NodeId, to: NodeId, count: usize) {
        self.drops.lock().insert((from, to), count);
    }

    fn consume_drop(&self, from: NodeId, to: NodeId) -> bool {
        let mut drops = self.drops.lock();
        match drops.get_mut(&(from, to)) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn deliver(&self, from: NodeId, to: NodeId, bytes: Vec<u8>) -> Result<(), TransportError> {
        let inbox = self
            .inboxes
            .lock()
            .get(&to)
            .cloned()
            .ok_or_else(|| TransportError::NotConnected(format!("{to:?}")))?;

        if let Ok(message) = kadmesh::protocol::decode_message::<WireMessage>(&bytes) {
            self.log.lock().push(DeliveryRecord {
                from,
                to,
                message,
                at: Instant::now(),
            });
        }
        inbox
            .send((ConnectionId(from), bytes))
            .map_err(|_| TransportError::NotConnected(format!("{to:?}")))
    }

    /// Snapshot of everything delivered so far
    pub fn log(&self) -> Vec<DeliveryRecord> {
        self.log.lock().clone()
    }

    /// Deliveries to `to` matching the given message type
    pub fn delivered_of_type(&self, to: NodeId, msg_type: kadmesh::MessageType) -> Vec<DeliveryRecord> {
        self.log()
            .into_iter()
            .filter(|record| record.to == to && record.message.msg_type == Some(msg_type as i32))
            .collect()
    }

    /// Push raw bytes straight into a node's inbox, as if `from` had sent them
    pub fn inject(&self, from: NodeId, to: NodeId, message: &WireMessage) {
        let bytes = kadmesh::protocol::encode_message(message).expect("encodable test message");
        let _ = self.deliver(from, to, bytes);
    }
}

/// The per-node handle onto the mesh
pub struct MeshTransport {
    registry: Arc<MeshRegistry>,
    local_id: NodeId,
}

#[async_trait]
impl Transport for MeshTransport {
    async fn send(&self, connection: ConnectionId, bytes: Vec<u8>) -> Result<(), TransportError> {
        // A forced drop models datagram loss the sender cannot observe
        if self.registry.consume_drop(self.local_id, connection.0) {
            return Ok(());
        }
        self.registry.deliver(self.local_id, connection.0, bytes)
    }

    async fn connect(&self, endpoint: SocketAddr) -> Result<ConnectionId, TransportError> {
        self.registry
            .endpoints
            .lock()
            .get(&endpoint)
            .copied()
            .map(ConnectionId)
            .ok_or_else(|| TransportError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: "no node listening".into(),
            })
    }

    async fn disconnect(&self, _connection: ConnectionId) {}
}

/// A routing node wired into the mesh
pub struct TestNode {
    pub node: RoutingNode,
    pub id: NodeId,
    pub endpoint: SocketAddr,
}

/// Build a node listening on `127.0.0.1:port` and register it in the mesh
pub fn spawn_node(registry: &Arc<MeshRegistry>, port: u16, params: &Parameters) -> TestNode {
    let id = NodeId::random();
    spawn_node_with_id(registry, port, params, id)
}

/// Same as [`spawn_node`] with a caller-chosen id
pub fn spawn_node_with_id(
    registry: &Arc<MeshRegistry>,
    port: u16,
    params: &Parameters,
    id: NodeId,
) -> TestNode {
    let endpoint: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    registry.register(id, endpoint, inbox_tx);

    let transport = Arc::new(MeshTransport {
        registry: Arc::clone(registry),
        local_id: id,
    });
    let node = RoutingNodeBuilder::new()
        .with_node_id(id)
        .with_endpoint(endpoint)
        .with_parameters(params.clone())
        .build(transport, inbox_rx);

    TestNode { node, id, endpoint }
}

/// Functors recording every delivered payload in `deliveries` and replying
/// with `reply` when one is given
pub fn recording_functors(
    node_id: NodeId,
    deliveries: Arc<Mutex<Vec<(NodeId, Vec<u8>)>>>,
    reply: Option<Vec<u8>>,
) -> Functors {
    let mut functors = Functors::default();
    functors.message_received = Some(Arc::new(move |payload, reply_slot| {
        deliveries.lock().push((node_id, payload));
        if let Some(reply) = reply.clone() {
            reply_slot(reply);
        }
    }));
    functors
}

/// Poll until `predicate` holds or `deadline` elapses; panics on timeout
pub async fn wait_until<F>(deadline: Duration, what: &str, mut predicate: F)
where
    F: FnMut() -> bool,
{
    let started = Instant::now();
    while started.elapsed() < deadline {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}
