//! Request-side protocol handlers
//!
//! Each handler consumes a routing-protocol request addressed at this node
//! and either rewrites the message in place into its response (the caller
//! then forwards it) or swallows it. The rewrite idiom keeps correlation
//! ids and relay legs intact without copying them field by field: a
//! response built from the request already carries everything the return
//! trip needs.

use super::HandlerAction;
use crate::config::Parameters;
use crate::handler::validation::NodeValidator;
use crate::id::{NodeId, PublicKey};
use crate::network::Network;
use crate::protocol::wire::{
    CloseListUpdate, ConnectRequest, ConnectResponse, Endpoint, FindNodesRequest,
    FindNodesResponse, GetGroupResponse, PingRequest, PingResponse, RemoveRequest, RemoveResponse,
};
use crate::protocol::{decode_message, encode_message, WireMessage};
use crate::routing::{ClientRoutingTable, RoutingTable};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Processors for inbound routing-protocol requests
pub struct Service {
    routing_table: Arc<RoutingTable>,
    client_table: Arc<ClientRoutingTable>,
    network: Arc<Network>,
    validator: NodeValidator,
    own_public_key: PublicKey,
    own_endpoint: Option<SocketAddr>,
    params: Parameters,
}

impl Service {
    /// Wire the service up to its collaborators
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        routing_table: Arc<RoutingTable>,
        client_table: Arc<ClientRoutingTable>,
        network: Arc<Network>,
        validator: NodeValidator,
        own_public_key: PublicKey,
        own_endpoint: Option<SocketAddr>,
        params: Parameters,
    ) -> Self {
        Self {
            routing_table,
            client_table,
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

    /// Rewrite `message` into a direct response: payload replaced,
    /// source/destination swapped, correlation id and relay leg untouched
    fn into_response(&self, message: &mut WireMessage, payload: Vec<u8>) {
        message.destination_id = message.source_id.clone();
        message.source_id = Some(self.own_id().to_vec());
        message.request = Some(false);
        message.direct = Some(true);
        message.replication = Some(1);
        message.visited = None;
        message.group_source = None;
        message.group_destination = None;
        message.route_history.clear();
        message.ack_id = None;
        message.hops_to_live = Some(self.params.hops_to_live as u32);
        message.data = vec![payload];
    }

    /// Echo a pong carrying the original probe payload
    pub fn ping(&self, message: &mut WireMessage) -> HandlerAction {
        if message.destination() != Some(self.own_id()) {
            // Not for us and we should not pass it on
            return HandlerAction::Consume;
        }
        let original = message.data.first().cloned().unwrap_or_default();
        if decode_message::<PingRequest>(&original).is_err() {
            return HandlerAction::Consume;
        }
        let response = PingResponse {
            pong: Some(true),
            original_request: Some(original),
        };
        let Ok(payload) = encode_message(&response) else {
            return HandlerAction::Consume;
        };
        self.into_response(message, payload);
        HandlerAction::SendOn
    }

    /// Answer an admission request, kicking off validation when the
    /// candidate would improve our table
    pub fn connect(&self, message: &mut WireMessage) -> HandlerAction {
        if message.destination() != Some(self.own_id()) {
            return HandlerAction::Consume;
        }
        let Ok(request) = decode_message::<ConnectRequest>(
            message.data.first().map(Vec::as_slice).unwrap_or_default(),
        ) else {
            warn!("Malformed connect request dropped");
            return HandlerAction::Consume;
        };
        let Some(candidate) = request.node_id.as_deref().and_then(NodeId::from_slice) else {
            return HandlerAction::Consume;
        };
        let client = request.client.unwrap_or(false);
        let endpoint = endpoint_from_wire(request.endpoint.as_ref());

        let answer = if client {
            !self.client_table.contains(&candidate)
        } else {
            self.routing_table.check_node(&candidate)
        };
        if answer {
            info!(candidate = %candidate, client, "Accepting connect request");
            self.validator.validate(
                candidate,
                PublicKey::new(request.public_key.clone().unwrap_or_default()),
                endpoint,
                client,
            );
        } else {
            debug!(candidate = %candidate, "Connect request refused");
        }

        let response = ConnectResponse {
            answer: Some(answer),
            node_id: Some(self.own_id().to_vec()),
            public_key: Some(self.own_public_key.as_bytes().to_vec()),
            endpoint: self.own_endpoint.map(|addr| Endpoint {
                ip: Some(addr.ip().to_string()),
                port: Some(addr.port() as u32),
            }),
            original_request: message.data.first().cloned(),
        };
        let Ok(payload) = encode_message(&response) else {
            return HandlerAction::Consume;
        };
        self.into_response(message, payload);
        HandlerAction::SendOn
    }

    /// Return our view of the nodes closest to the requested target
    pub fn find_nodes(&self, message: &mut WireMessage) -> HandlerAction {
        let request = decode_message::<FindNodesRequest>(
            message.data.first().map(Vec::as_slice).unwrap_or_default(),
        )
        .unwrap_or_default();

        let target = request
            .target_id
            .as_deref()
            .and_then(NodeId::from_slice)
            .or_else(|| message.destination())
            .unwrap_or_else(|| self.own_id());
        let requested = request.num_nodes_requested.unwrap_or(0) as usize;
        let count = if requested == 0 {
            self.params.closest_nodes_size
        } else {
            requested
        };

        let mut nodes: Vec<Vec<u8>> = self
            .routing_table
            .closest_nodes(&target, count)
            .into_iter()
            .map(|peer| peer.node_id.to_vec())
            .collect();
        // A small network adds our own id so tiny overlays still converge
        if self.routing_table.len() < self.params.closest_nodes_size {
            nodes.push(self.own_id().to_vec());
        }

        let response = FindNodesResponse { nodes };
        let Ok(payload) = encode_message(&response) else {
            return HandlerAction::Consume;
        };
        self.into_response(message, payload);
        HandlerAction::SendOn
    }

    /// Fold a peer's close-list broadcast into its matrix row
    pub fn closest_nodes_update(&self, message: &mut WireMessage) -> HandlerAction {
        let Ok(update) = decode_message::<CloseListUpdate>(
            message.data.first().map(Vec::as_slice).unwrap_or_default(),
        ) else {
            return HandlerAction::Consume;
        };
        let peer = update
            .node_id
            .as_deref()
            .and_then(NodeId::from_slice)
            .or_else(|| message.source());
        let Some(peer) = peer else {
            return HandlerAction::Consume;
        };
        let close_ids: Vec<NodeId> = update
            .close_ids
            .iter()
            .filter_map(|raw| NodeId::from_slice(raw))
            .collect();
        if !self.routing_table.update_close_ids(&peer, close_ids) {
            debug!(peer = %peer, "Close-list update for unknown peer dropped");
        }
        HandlerAction::Consume
    }

    /// Coordinated eviction: drop our furthest peer when the requester
    /// genuinely outranks it
    pub fn remove_furthest(&self, message: &mut WireMessage) -> HandlerAction {
        let Ok(request) = decode_message::<RemoveRequest>(
            message.data.first().map(Vec::as_slice).unwrap_or_default(),
        ) else {
            return HandlerAction::Consume;
        };
        let requester = request
            .requester_id
            .as_deref()
            .and_then(NodeId::from_slice)
            .or_else(|| message.source());
        let Some(requester) = requester else {
            return HandlerAction::Consume;
        };

        let removed = match self.routing_table.furthest_peer() {
            Some(furthest)
                if requester.closer_to_target(&furthest.node_id, &self.own_id()) =>
            {
                self.routing_table.remove(&furthest.node_id);
                info!(evicted = %furthest.node_id, requester = %requester, "Evicted furthest peer");
                let transport = Arc::clone(self.network.transport());
                let connection = furthest.connection_id;
                tokio::spawn(async move {
                    transport.disconnect(connection).await;
                });
                Some(furthest.node_id)
            }
            _ => None,
        };

        let response = RemoveResponse {
            removed_id: removed.map(|id| id.to_vec()),
        };
        let Ok(payload) = encode_message(&response) else {
            return HandlerAction::Consume;
        };
        self.into_response(message, payload);
        HandlerAction::SendOn
    }

    /// Report the group composition for the addressed target id
    pub fn get_group(&self, message: &mut WireMessage) -> HandlerAction {
        // The replication step rewrites destination_id per member, so the
        // queried group id travels in group_destination
        let target = message
            .group_destination
            .as_deref()
            .and_then(NodeId::from_slice)
            .or_else(|| message.destination());
        let Some(target) = target else {
            return HandlerAction::Consume;
        };

        let mut ids: Vec<NodeId> = self
            .routing_table
            .closest_nodes(&target, self.params.group_size)
            .into_iter()
            .map(|peer| peer.node_id)
            .collect();
        ids.push(self.own_id());
        ids.sort_by(|a, b| a.distance_to(&target).cmp(&b.distance_to(&target)));
        ids.truncate(self.params.group_size);

        let response = GetGroupResponse {
            node_ids: ids.iter().map(NodeId::to_vec).collect(),
        };
        let Ok(payload) = encode_message(&response) else {
            return HandlerAction::Consume;
        };
        self.into_response(message, payload);
        HandlerAction::SendOn
    }
}

/// Parse a wire endpoint back into a socket address
pub fn endpoint_from_wire(endpoint: Option<&Endpoint>) -> Option<SocketAddr> {
    let endpoint = endpoint?;
    let ip = endpoint.ip.as_deref()?.parse().ok()?;
    Some(SocketAddr::new(ip, endpoint.port? as u16))
}
