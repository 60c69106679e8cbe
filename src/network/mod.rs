//! Outbound send paths
//!
//! [`Network`] owns every way a message leaves this node: direct to a known
//! connection, towards the peer closest to a destination, or back down a
//! relay leg. It wraps the acknowledgement engine around each send that
//! needs per-hop reliability, so callers never touch ack ids themselves.
//!
//! Sends are fire-and-forget from the caller's perspective: the transport
//! future runs on its own task and failures are logged, with ack
//! retransmission masking transient faults.

mod transport;

pub use transport::{IncomingReceiver, IncomingSender, RawMessage, Transport};

use crate::ack::{build_ack_carrier, AckHandler, Acknowledgement};
use crate::config::Parameters;
use crate::id::{ConnectionId, NodeId};
use crate::protocol::{self, WireMessage};
use crate::routing::{ClientRoutingTable, RoutingTable};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// All outbound message dispatch for one routing node
pub struct Network {
    transport: Arc<dyn Transport>,
    routing_table: Arc<RoutingTable>,
    client_table: Arc<ClientRoutingTable>,
    ack: Arc<Acknowledgement>,
    params: Parameters,
    bootstrap: RwLock<Option<ConnectionId>>,
}

impl Network {
    /// Wire the send paths up to their collaborators
    pub fn new(
        transport: Arc<dyn Transport>,
        routing_table: Arc<RoutingTable>,
        client_table: Arc<ClientRoutingTable>,
        ack: Arc<Acknowledgement>,
        params: Parameters,
    ) -> Self {
        Self {
            transport,
            routing_table,
            client_table,
            ack,
            params,
            bootstrap: RwLock::new(None),
        }
    }

    /// Record the bootstrap connection all traffic falls back to while the
    /// routing table is empty
    pub fn set_bootstrap_connection(&self, connection: Option<ConnectionId>) {
        *self.bootstrap.write() = connection;
    }

    /// The bootstrap connection, if one is live
    pub fn bootstrap_connection(&self) -> Option<ConnectionId> {
        *self.bootstrap.read()
    }

    /// The acknowledgement engine backing these send paths
    pub fn ack_engine(&self) -> &Arc<Acknowledgement> {
        &self.ack
    }

    /// The transport underneath
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Send directly over a known connection
    pub fn send_to_direct(
        self: &Arc<Self>,
        message: &WireMessage,
        peer: NodeId,
        connection: ConnectionId,
    ) {
        trace!(peer = %peer, id = message.correlation_id(), "Sending direct");
        self.dispatch(message.clone(), connection);
    }

    /// Send towards the connected peer closest to the message destination.
    ///
    /// Handles the degenerate cases in order: relay-bound traffic with no
    /// destination goes down its relay connection; a destination we are
    /// directly connected to (routing or client table) gets the message
    /// straight; otherwise the closest peer not already on the route
    /// carries it on, with the bootstrap connection as the empty-table
    /// fallback.
    pub fn send_to_closest_node(self: &Arc<Self>, message: &WireMessage) {
        let mut message = message.clone();

        let destination = match message.destination() {
            Some(destination) if !destination.is_zero() => destination,
            _ => {
                // Relay-bound response travelling with its destination cleared
                match message.relay_connection() {
                    Some(relay_connection) => {
                        trace!(id = message.correlation_id(), "Sending down relay connection");
                        self.dispatch(message, ConnectionId(relay_connection));
                    }
                    None => {
                        warn!(
                            id = message.correlation_id(),
                            "Dropping message with neither destination nor relay connection"
                        );
                    }
                }
                return;
            }
        };

        // A response that reached its relay peer turns around here: the
        // destination clears and the original connection carries it home
        if message.is_response() && destination == self.routing_table.node_id() {
            if let Some(relay_connection) = message.relay_connection() {
                if message.relay() != Some(destination) {
                    message.destination_id = None;
                    trace!(id = message.correlation_id(), "Turning response down its relay leg");
                    return self.dispatch(message, ConnectionId(relay_connection));
                }
            }
        }

        if let Some(peer) = self.routing_table.get_peer(&destination) {
            trace!(peer = %peer.node_id, "Destination is a connected peer");
            return self.dispatch(message, peer.connection_id);
        }

        if message.is_direct() && self.client_table.contains(&destination) {
            for client in self.client_table.get_peers(&destination) {
                self.dispatch(message.clone(), client.connection_id);
            }
            return;
        }

        if self.routing_table.is_empty() {
            match self.bootstrap_connection() {
                Some(bootstrap) => {
                    debug!(id = message.correlation_id(), "Empty table, using bootstrap");
                    self.dispatch(message, bootstrap);
                }
                None => {
                    warn!(
                        destination = %destination,
                        "Dropping message: no peers and no bootstrap connection"
                    );
                }
            }
            return;
        }

        // Group traffic records its carriers so replicas do not oscillate
        if !message.is_direct() {
            message.push_route_history(self.routing_table.node_id(), self.params.max_route_history);
        }

        let mut exclude = message.route_history_ids();
        if let Some(last) = message.last_id.as_deref().and_then(NodeId::from_slice) {
            if !exclude.contains(&last) {
                exclude.push(last);
            }
        }

        match self.routing_table.closest_peer_excluding(&destination, &exclude) {
            Some(peer) => {
                trace!(
                    next_hop = %peer.node_id,
                    destination = %destination,
                    "Forwarding towards destination"
                );
                self.dispatch(message, peer.connection_id);
            }
            None => warn!(
                destination = %destination,
                "Routing dead-end: every peer already carried this message"
            ),
        }
    }

    /// Send directly to `peer`, first recording this node on the message's
    /// route so the receiving side can exclude carriers already visited
    pub fn send_to_direct_adjusted_route(
        self: &Arc<Self>,
        message: &WireMessage,
        peer: NodeId,
        connection: ConnectionId,
    ) {
        let mut message = message.clone();
        message.push_route_history(self.routing_table.node_id(), self.params.max_route_history);
        self.send_to_direct(&message, peer, connection);
    }

    /// Send via the bootstrap connection
    pub fn send_to_bootstrap(self: &Arc<Self>, message: &WireMessage) {
        match self.bootstrap_connection() {
            Some(bootstrap) => self.dispatch(message.clone(), bootstrap),
            None => warn!("No bootstrap connection to send through"),
        }
    }

    /// Confirm receipt of `message` to the adjacent sender
    pub fn send_ack(self: &Arc<Self>, message: &WireMessage, from: ConnectionId) {
        let carrier = build_ack_carrier(message, self.routing_table.node_id());
        trace!(ack_id = message.ack_token(), "Confirming receipt to previous hop");
        self.dispatch(carrier, from);
    }

    /// Stamp per-hop state, register with the ack engine when required, and
    /// hand the bytes to the transport on a fresh task
    fn dispatch(self: &Arc<Self>, mut message: WireMessage, connection: ConnectionId) {
        if message.hops_remaining() == 0 {
            warn!(id = message.correlation_id(), "Refusing to transmit exhausted message");
            return;
        }
        message.last_id = Some(self.routing_table.node_id().to_vec());

        if self.ack.needs_ack(&message) {
            // Ack ids are per-hop: a forwarded message sheds the token of the
            // hop it arrived on and takes a fresh one
            message.ack_id = Some(self.ack.new_ack_id());
            let handler = self.retransmit_handler(message.clone(), connection);
            self.ack.add(&message, handler, self.params.ack_timeout);
        }

        self.raw_send(message, connection);
    }

    fn retransmit_handler(self: &Arc<Self>, snapshot: WireMessage, connection: ConnectionId) -> AckHandler {
        let weak = Arc::downgrade(self);
        Arc::new(move || {
            if let Some(network) = weak.upgrade() {
                network.retransmit(snapshot.clone(), connection);
            }
        })
    }

    /// Retransmit preserves the original message bit-for-bit; re-adding
    /// under the same ack id is what advances the attempt counter
    fn retransmit(self: &Arc<Self>, message: WireMessage, connection: ConnectionId) {
        debug!(ack_id = message.ack_token(), "Ack deadline elapsed, retransmitting");
        let handler = self.retransmit_handler(message.clone(), connection);
        self.ack.add(&message, handler, self.params.ack_timeout);
        self.raw_send(message, connection);
    }

    fn raw_send(&self, message: WireMessage, connection: ConnectionId) {
        let bytes = match protocol::encode_message(&message) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(%error, "Failed to encode outbound message");
                return;
            }
        };
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            if let Err(error) = transport.send(connection, bytes).await {
                // Per-hop retransmission masks transient faults
                debug!(%error, "Transport send failed");
            }
        });
    }
}
