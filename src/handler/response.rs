//! Response-side protocol handlers
//!
//! Pair the service handlers: each consumes the response leg of a protocol
//! exchange. Responses never travel further, so every handler swallows its
//! message; side effects land in the tables, the validator, or the
//! correlation timer.

use super::HandlerAction;
use crate::config::Parameters;
use crate::handler::service::endpoint_from_wire;
use crate::handler::validation::NodeValidator;
use crate::id::{NodeId, PublicKey};
use crate::network::Network;
use crate::protocol::rpcs;
use crate::protocol::wire::{ConnectResponse, FindNodesResponse, PingResponse, RemoveResponse};
use crate::protocol::{decode_message, WireMessage};
use crate::routing::RoutingTable;
use crate::timer::Timer;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Processors for inbound routing-protocol responses
pub struct ResponseHandler {
    routing_table: Arc<RoutingTable>,
    network: Arc<Network>,
    validator: NodeValidator,
    own_public_key: PublicKey,
    own_endpoint: Option<SocketAddr>,
    params: Parameters,
}

impl ResponseHandler {
    /// Wire the handler up to its collaborators
    pub fn new(
        routing_table: Arc<RoutingTable>,
        network: Arc<Network>,
        validator: NodeValidator,
        own_public_key: PublicKey,
        own_endpoint: Option<SocketAddr>,
        params: Parameters,
    ) -> Self {
        Self {
            routing_table,
            network,
            validator,
            own_public_key,
            own_endpoint,
            params,
        }
    }

    fn own_id(&self) -> NodeId {
        self.routing_table.node_id()
    }

    /// A pong: the peer is alive
    pub fn ping(&self, message: &mut WireMessage) -> HandlerAction {
        match decode_message::<PingResponse>(
            message.data.first().map(Vec::as_slice).unwrap_or_default(),
        ) {
            Ok(response) if response.pong.unwrap_or(false) => {
                debug!(peer = ?message.source(), "Pong received");
            }
            _ => debug!("Malformed ping response dropped"),
        }
        HandlerAction::Consume
    }

    /// An accepted connect feeds the candidate into validation
    pub fn connect(&self, message: &mut WireMessage) -> HandlerAction {
        let Ok(response) = decode_message::<ConnectResponse>(
            message.data.first().map(Vec::as_slice).unwrap_or_default(),
        ) else {
            warn!("Malformed connect response dropped");
            return HandlerAction::Consume;
        };
        if !response.answer.unwrap_or(false) {
            debug!("Connect request was refused");
            return HandlerAction::Consume;
        }
        let Some(candidate) = response.node_id.as_deref().and_then(NodeId::from_slice) else {
            return HandlerAction::Consume;
        };
        if candidate == self.own_id() || !self.routing_table.check_node(&candidate) {
            return HandlerAction::Consume;
        }
        self.validator.validate(
            candidate,
            PublicKey::new(response.public_key.clone().unwrap_or_default()),
            endpoint_from_wire(response.endpoint.as_ref()),
            false,
        );
        HandlerAction::Consume
    }

    /// Discovered candidates each get a connect request
    pub fn find_nodes(&self, message: &mut WireMessage) -> HandlerAction {
        let Ok(response) = decode_message::<FindNodesResponse>(
            message.data.first().map(Vec::as_slice).unwrap_or_default(),
        ) else {
            warn!("Malformed find-nodes response dropped");
            return HandlerAction::Consume;
        };

        // Until the first peer lands, the admission handshake itself rides
        // the relay leg so its response can find the way back
        let relay = if self.routing_table.is_empty() {
            Some(rpcs::RelayLeg {
                relay_id: self.own_id(),
                relay_connection_id: self.own_id(),
            })
        } else {
            None
        };

        for raw in &response.nodes {
            let Some(candidate) = NodeId::from_slice(raw) else {
                continue;
            };
            if candidate == self.own_id() || !self.routing_table.check_node(&candidate) {
                continue;
            }
            debug!(candidate = %candidate, "Requesting connection to discovered node");
            let request = rpcs::connect_request(
                candidate,
                self.own_id(),
                self.own_public_key.as_bytes().to_vec(),
                self.own_endpoint,
                false,
                relay,
                self.params.hops_to_live,
            );
            self.network.send_to_closest_node(&request);
        }
        HandlerAction::Consume
    }

    /// Outcome of a coordinated eviction we asked for
    pub fn remove_furthest(&self, message: &mut WireMessage) -> HandlerAction {
        match decode_message::<RemoveResponse>(
            message.data.first().map(Vec::as_slice).unwrap_or_default(),
        ) {
            Ok(response) => match response.removed_id.as_deref().and_then(NodeId::from_slice) {
                Some(removed) => debug!(removed = %removed, "Peer honoured eviction request"),
                None => debug!("Peer declined eviction request"),
            },
            Err(_) => debug!("Malformed remove response dropped"),
        }
        HandlerAction::Consume
    }

    /// A group composition answer fulfils its pending correlation entry
    pub fn get_group(&self, timer: &Timer, message: &mut WireMessage) -> HandlerAction {
        let id = message.correlation_id();
        if id == 0 || message.data.len() != 1 {
            warn!("Get-group response without correlation id or payload dropped");
            return HandlerAction::Consume;
        }
        timer.add_response(id, message.data[0].clone());
        HandlerAction::Consume
    }
}
