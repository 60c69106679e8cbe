//! Peer validation
//!
//! The last step of the admission handshake: once a connect exchange has
//! produced a candidate `{node_id, public_key, endpoint}`, the validator
//! confirms the key with the key-agreement layer (when a lookup functor is
//! registered), attaches the transport, and admits the peer into the
//! routing or client table. Admission failure tears the connection straight
//! back down.

use crate::api::functors::SharedFunctors;
use crate::config::Parameters;
use crate::id::{ConnectionId, NodeId, PeerInfo, PublicKey};
use crate::network::Network;
use crate::protocol::rpcs;
use crate::routing::{ClientRoutingTable, RoutingTable};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives candidate peers through key confirmation into the tables
#[derive(Clone)]
pub struct NodeValidator {
    routing_table: Arc<RoutingTable>,
    client_table: Arc<ClientRoutingTable>,
    network: Arc<Network>,
    functors: SharedFunctors,
    params: Parameters,
}

impl NodeValidator {
    /// Wire the validator up to its collaborators
    pub fn new(
        routing_table: Arc<RoutingTable>,
        client_table: Arc<ClientRoutingTable>,
        network: Arc<Network>,
        functors: SharedFunctors,
        params: Parameters,
    ) -> Self {
        Self {
            routing_table,
            client_table,
            network,
            functors,
            params,
        }
    }

    /// Validate `candidate` and admit it on success.
    ///
    /// When a public-key lookup functor is registered the key-agreement
    /// layer gets the final word; the key carried on the wire is only a
    /// fallback for embedders that skip the lookup.
    pub fn validate(
        &self,
        candidate: NodeId,
        wire_key: PublicKey,
        endpoint: Option<SocketAddr>,
        client: bool,
    ) {
        let lookup = self.functors.read().request_public_key.clone();
        match lookup {
            Some(request_public_key) => {
                let validator = self.clone();
                request_public_key(
                    candidate,
                    Box::new(move |confirmed| {
                        let key = confirmed.unwrap_or(wire_key);
                        validator.attach_and_add(candidate, key, endpoint, client);
                    }),
                );
            }
            None => self.attach_and_add(candidate, wire_key, endpoint, client),
        }
    }

    /// Establish the transport connection and admit the peer
    fn attach_and_add(
        &self,
        candidate: NodeId,
        public_key: PublicKey,
        endpoint: Option<SocketAddr>,
        client: bool,
    ) {
        let validator = self.clone();
        tokio::spawn(async move {
            let connection = match endpoint {
                Some(endpoint) => {
                    match validator.network.transport().connect(endpoint).await {
                        Ok(connection) => connection,
                        Err(error) => {
                            warn!(candidate = %candidate, %error, "Transport connect failed");
                            return;
                        }
                    }
                }
                // No endpoint advertised: the transport pools by peer id
                None => ConnectionId(candidate),
            };

            let mut peer = PeerInfo::new(candidate, public_key, connection);
            peer.endpoint = endpoint;
            peer.is_client = client;

            // An id lives in at most one of the two tables
            let duplicate = if client {
                validator.routing_table.contains(&candidate)
            } else {
                validator.client_table.contains(&candidate)
            };
            if duplicate {
                debug!(candidate = %candidate, "Candidate already known under the other role");
                return;
            }

            let added = if client {
                let bound = validator
                    .routing_table
                    .nth_closest_to_self(validator.params.closest_nodes_size.saturating_sub(1));
                validator.client_table.add(peer, bound)
            } else {
                validator.routing_table.add(peer)
            };

            if !added {
                debug!(candidate = %candidate, client, "Candidate refused, dropping connection");
                validator.network.transport().disconnect(connection).await;
                return;
            }

            info!(candidate = %candidate, client, "Peer admitted");
            if !client {
                validator.broadcast_close_list();
                validator.nudge_furthest_when_full();
            }
            validator.notify_network_status();
        });
    }

    /// Tell our close group what our close list now looks like, keeping
    /// their matrix rows current
    pub fn broadcast_close_list(&self) {
        let close_ids = self
            .routing_table
            .own_close_ids(self.params.closest_nodes_size);
        for peer in self
            .routing_table
            .closest_nodes(&self.routing_table.node_id(), self.params.closest_nodes_size)
        {
            let update = rpcs::closest_nodes_update(
                peer.node_id,
                self.routing_table.node_id(),
                &close_ids,
                self.params.hops_to_live,
            );
            self.network
                .send_to_direct(&update, peer.node_id, peer.connection_id);
        }
    }

    /// Once the table fills up, open the coordinated-eviction conversation
    /// with our furthest peer
    fn nudge_furthest_when_full(&self) {
        if self.routing_table.len() < self.params.max_routing_table_size {
            return;
        }
        if let Some(furthest) = self.routing_table.furthest_peer() {
            let request = rpcs::remove_furthest_request(
                furthest.node_id,
                self.routing_table.node_id(),
                self.params.hops_to_live,
            );
            self.network
                .send_to_direct(&request, furthest.node_id, furthest.connection_id);
        }
    }

    /// Push the current connectivity figure at the embedder
    pub fn notify_network_status(&self) {
        let network_status = self.functors.read().network_status.clone();
        if let Some(network_status) = network_status {
            network_status(self.routing_table.len() as i32);
        }
    }
}
