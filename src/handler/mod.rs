//! Message handling
//!
//! [`MessageHandler::handle`] is the single entry point for every decoded
//! inbound message. It is a decision tree evaluated strictly in order:
//! cache clauses first, then the special regimes (group-to-self, client
//! mode, relay traffic), then destination matching, and finally the
//! closest-node / far-node split that decides between consuming,
//! replicating, and forwarding.
//!
//! The handler is a sink: no clause returns an error. A message that fails
//! a check is dropped, with a diagnostic where the failure is interesting.
//! Nothing here awaits — sends run on their own tasks and responses
//! re-enter through a later `handle` call — and no lock is held across a
//! forwarding call.

mod dispatch;
mod response;
mod service;
mod validation;

pub use validation::NodeValidator;

use crate::api::functors::{ReplyFunctor, SharedFunctors};
use crate::cache::CacheManager;
use crate::config::Parameters;
use crate::id::{ConnectionId, NodeId};
use crate::message::Cacheable;
use crate::network::Network;
use crate::protocol::{self, MessageType, WireMessage};
use crate::routing::{ClientRoutingTable, RoutingTable};
use crate::stats::NetworkStatistics;
use crate::timer::Timer;
use response::ResponseHandler;
use service::Service;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// What a protocol handler did with its message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerAction {
    /// The message was fully consumed
    Consume,
    /// The handler rewrote the message in place; the caller forwards it
    SendOn,
}

/// Classification and dispatch of inbound messages
pub struct MessageHandler {
    routing_table: Arc<RoutingTable>,
    client_table: Arc<ClientRoutingTable>,
    network: Arc<Network>,
    timer: Arc<Timer>,
    stats: Arc<NetworkStatistics>,
    cache: Option<CacheManager>,
    service: Service,
    responses: ResponseHandler,
    functors: SharedFunctors,
    params: Parameters,
}

impl MessageHandler {
    /// Assemble the handler and its protocol processors
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        routing_table: Arc<RoutingTable>,
        client_table: Arc<ClientRoutingTable>,
        network: Arc<Network>,
        timer: Arc<Timer>,
        stats: Arc<NetworkStatistics>,
        cache: Option<CacheManager>,
        validator: NodeValidator,
        own_public_key: crate::id::PublicKey,
        own_endpoint: Option<std::net::SocketAddr>,
        functors: SharedFunctors,
        params: Parameters,
    ) -> Self {
        let service = Service::new(
            Arc::clone(&routing_table),
            Arc::clone(&client_table),
            Arc::clone(&network),
            validator.clone(),
            own_public_key.clone(),
            own_endpoint,
            params.clone(),
        );
        let responses = ResponseHandler::new(
            Arc::clone(&routing_table),
            Arc::clone(&network),
            validator,
            own_public_key,
            own_endpoint,
            params.clone(),
        );
        Self {
            routing_table,
            client_table,
            network,
            timer,
            stats,
            cache,
            service,
            responses,
            functors,
            params,
        }
    }

    fn own_id(&self) -> NodeId {
        self.routing_table.node_id()
    }

    /// Process one inbound message. `from` names the connection it arrived
    /// on, which is where a receipt confirmation goes.
    pub fn handle(self: &Arc<Self>, mut message: WireMessage, from: ConnectionId) {
        // Ack carriers clear their entry and go no further
        if protocol::is_ack_message(&message) {
            self.network.ack_engine().handle_ack_message(message.ack_token());
            return;
        }

        if let Err(error) = protocol::validate_message(&message) {
            warn!(%error, "Dropping structurally invalid message");
            return;
        }

        // Confirm receipt to the previous hop before anything can fail
        if message.ack_token() != 0 && self.network.ack_engine().needs_ack(&message) {
            self.network.send_ack(&message, from);
        }

        message.hops_to_live = Some(message.hops_remaining() - 1);

        if self.is_valid_cacheable_get(&message) {
            trace!(id = message.correlation_id(), "Cacheable get, consulting cache");
            return self.handle_cache_lookup(&message);
        }
        if self.is_valid_cacheable_put(&message) {
            trace!(id = message.correlation_id(), "Cacheable put, teeing into cache");
            if let Some(cache) = &self.cache {
                cache.store_cache_copy(&message);
            }
        }

        if self.is_group_request_to_self(&message) {
            // The closest peer will replicate on our behalf
            trace!("Group message to own id, passing to closest peer");
            return self.network.send_to_closest_node(&message);
        }

        if self.routing_table.client_mode() {
            return self.handle_client_message(message);
        }

        if message.source_missing() {
            return self.handle_relay_request(message, from);
        }

        if message.source().map_or(true, |source| source.is_zero()) {
            warn!(id = message.correlation_id(), "Stray message without valid source dropped");
            return;
        }

        // Addressed at us directly, or home at last: a relay-bound message
        // travels its final leg with the destination cleared
        let own = self.own_id();
        if message.destination() == Some(own)
            || (message.destination().is_none() && message.relay() == Some(own))
        {
            return self.handle_message_for_this_node(message, from);
        }

        if self.is_relay_response_for_this_node(&message) {
            return self.handle_routing_message(message);
        }

        let Some(destination) = message.destination() else {
            warn!("Message without destination dropped");
            return;
        };

        if self.client_table.contains(&destination) && message.is_direct() {
            return self.handle_message_for_client_peers(message);
        }

        let group_traffic = !message.is_direct();
        if self.routing_table.is_in_range(&destination, self.params.group_size)
            || (self.routing_table.is_closest_to(&destination, group_traffic)
                && message.is_visited())
        {
            self.handle_message_as_closest_node(message);
        } else {
            self.handle_message_as_far_node(message);
        }
    }

    // ------------------------------------------------------------------
    // For-this-node pipeline
    // ------------------------------------------------------------------

    fn handle_message_for_this_node(self: &Arc<Self>, mut message: WireMessage, from: ConnectionId) {
        if self.relay_direct_message_if_needed(&mut message) {
            return;
        }
        trace!(id = message.correlation_id(), "Message for this node");
        if protocol::is_routing_message(&message) {
            self.handle_routing_message(message);
        } else {
            self.handle_node_level_message_for_this_node(message, from);
        }
    }

    /// Messages that reached us only to be turned around towards a relay
    /// leg. A message already travelling its final leg (destination
    /// cleared) is home and never turns around again.
    fn relay_direct_message_if_needed(self: &Arc<Self>, message: &mut WireMessage) -> bool {
        let Some(relay) = message.relay() else {
            return false;
        };
        let Some(destination) = message.destination() else {
            return false;
        };

        if message.is_request()
            && message.actual_destination_is_relay_id.unwrap_or(false)
            && destination != relay
        {
            message.destination_id = None;
            message.actual_destination_is_relay_id = None;
            trace!(relay = %relay, "Relaying request onwards");
            self.network.send_to_closest_node(message);
            return true;
        }

        // Only direct responses need the turn-around
        if message.is_response() && destination != relay {
            message.destination_id = None;
            trace!(relay = %relay, "Relaying response back to its origin");
            self.network.send_to_closest_node(message);
            return true;
        }

        false
    }

    fn handle_routing_message(self: &Arc<Self>, mut message: WireMessage) {
        let Ok(msg_type) = protocol::message_type(&message) else {
            return;
        };
        let request = message.is_request();
        let action = match (msg_type, request) {
            (MessageType::Ping, true) => self.service.ping(&mut message),
            (MessageType::Ping, false) => self.responses.ping(&mut message),
            (MessageType::Connect, true) => self.service.connect(&mut message),
            (MessageType::Connect, false) => self.responses.connect(&mut message),
            (MessageType::FindNodes, true) => self.service.find_nodes(&mut message),
            (MessageType::FindNodes, false) => self.responses.find_nodes(&mut message),
            (MessageType::ClosestNodesUpdate, _) => self.service.closest_nodes_update(&mut message),
            (MessageType::RemoveFurthest, true) => self.service.remove_furthest(&mut message),
            (MessageType::RemoveFurthest, false) => self.responses.remove_furthest(&mut message),
            (MessageType::GetGroup, true) => self.service.get_group(&mut message),
            (MessageType::GetGroup, false) => self.responses.get_group(&self.timer, &mut message),
            (MessageType::Acknowledgement | MessageType::NodeLevel, _) => return,
        };

        // Only a request produces a reply to carry onwards
        if !request || action == HandlerAction::Consume {
            return;
        }
        // With no peers at all, the bootstrap connection is the only way
        // out — except for relay-bound replies (destination cleared or our
        // own id), which the closest-node path knows how to turn down
        // their relay leg
        let relay_bound = message
            .destination()
            .map_or(true, |destination| destination == self.own_id());
        if !relay_bound && self.routing_table.is_empty() {
            self.network.send_to_bootstrap(&message);
        } else {
            self.network.send_to_closest_node(&message);
        }
    }

    fn handle_node_level_message_for_this_node(
        self: &Arc<Self>,
        message: WireMessage,
        from: ConnectionId,
    ) {
        let client_mode = self.routing_table.client_mode();
        if message.is_request()
            && !protocol::is_client_to_client_with_different_ids(&message, client_mode)
        {
            debug!(
                source = ?message.source(),
                id = message.correlation_id(),
                "Node-level request delivered"
            );
            let reply_slot = self.reply_functor(&message, from);
            let payload = message.data.first().cloned().unwrap_or_default();

            let message_received = self.functors.read().message_received.clone();
            match message_received {
                Some(message_received) => message_received(payload, reply_slot),
                None => {
                    let typed = self.functors.read().typed_messages.clone();
                    dispatch::invoke_typed_message_functor(&message, &typed);
                }
            }
        } else if message.is_response() {
            debug!(
                source = ?message.source(),
                id = message.correlation_id(),
                "Node-level response delivered"
            );
            if message.correlation_id() == 0 || message.data.len() != 1 {
                warn!("Response without correlation id or single payload dropped");
                return;
            }
            self.timer
                .add_response(message.correlation_id(), message.data[0].clone());
            if let Some(sample) = message
                .average_distance
                .as_deref()
                .and_then(NodeId::from_slice)
            {
                self.stats.update_network_average_distance(&sample);
            }
        } else {
            warn!("Dropping client-to-client message across different ids");
        }
    }

    /// The one-shot closure handed to the application for replying.
    ///
    /// Replying synthesises a response frame: source and destination
    /// swapped, correlation id and relay leg preserved, a fresh hop budget,
    /// and the current network-distance estimate piggybacked.
    fn reply_functor(self: &Arc<Self>, message: &WireMessage, from: ConnectionId) -> ReplyFunctor {
        let weak: Weak<MessageHandler> = Arc::downgrade(self);
        let source_id = message.source_id.clone();
        let msg_type = message.msg_type;
        let client_node = message.client_node;
        let correlation_id = message.id;
        let relay_id = message.relay_id.clone();
        let relay_connection_id = message.relay_connection_id.clone();

        Box::new(move |reply: Vec<u8>| {
            let Some(handler) = weak.upgrade() else {
                return;
            };
            if reply.is_empty() {
                debug!("Empty reply for request, nothing sent");
                return;
            }
            let own = handler.own_id();
            let mut out = WireMessage {
                msg_type,
                request: Some(false),
                direct: Some(true),
                destination_id: source_id.clone(),
                source_id: Some(own.to_vec()),
                last_id: Some(own.to_vec()),
                data: vec![reply],
                id: correlation_id,
                client_node,
                relay_id: relay_id.clone(),
                relay_connection_id: relay_connection_id.clone(),
                hops_to_live: Some(handler.params.hops_to_live as u32),
                ..WireMessage::default()
            };
            if let Some(average) = handler.stats.network_average_distance() {
                out.average_distance = Some(average.to_vec());
            }

            let to_self = out.destination() == Some(own);
            if handler.routing_table.client_mode() && to_self {
                return handler.network.send_to_closest_node(&out);
            }
            if !to_self {
                handler.network.send_to_closest_node(&out);
            } else {
                debug!(id = out.correlation_id(), "Reply addressed to self, handling locally");
                handler.handle(out, from);
            }
        })
    }

    // ------------------------------------------------------------------
    // Closest-node regime
    // ------------------------------------------------------------------

    fn handle_message_as_closest_node(self: &Arc<Self>, message: WireMessage) {
        trace!(
            destination = ?message.destination(),
            id = message.correlation_id(),
            "In closest proximity to destination"
        );
        if message.is_direct() {
            self.handle_direct_message_as_closest_node(message);
        } else {
            self.handle_group_message_as_closest_node(message);
        }
    }

    fn handle_direct_message_as_closest_node(self: &Arc<Self>, mut message: WireMessage) {
        let Some(destination) = message.destination() else {
            return;
        };
        if self.routing_table.is_closest_to_including_matrix(&destination) {
            if self.routing_table.contains(&destination) || self.client_table.contains(&destination)
            {
                self.network.send_to_closest_node(&message);
            } else if !message.is_visited() {
                // Second pass: one more hop may find a connected carrier
                message.visited = Some(true);
                self.network.send_to_closest_node(&message);
            } else {
                warn!(
                    destination = %destination,
                    source = ?message.source(),
                    id = message.correlation_id(),
                    "Dropping message: closest but not connected to destination"
                );
            }
        } else {
            self.network.send_to_closest_node(&message);
        }
    }

    fn handle_group_message_as_closest_node(self: &Arc<Self>, mut message: WireMessage) {
        let Some(destination) = message.destination() else {
            return;
        };
        let have_destination_peer = self.routing_table.contains(&destination);

        if !self.routing_table.is_closest_to(&destination, true) && !have_destination_peer {
            trace!("Not closest for group message, passing on");
            return self.network.send_to_closest_node(&message);
        }

        // Push the message into the dense region before any replication
        if message.visited == Some(false)
            && self.routing_table.len() > self.params.closest_nodes_size
            && !self
                .routing_table
                .is_in_range(&destination, self.params.closest_nodes_size)
        {
            message.visited = Some(true);
            return self.network.send_to_closest_node(&message);
        }

        let mut route_history = message.route_history_ids();
        if route_history.len() > 1 {
            route_history.pop();
        } else if route_history.first() == Some(&self.own_id()) {
            route_history.clear();
        }

        if let Some(better) = self.routing_table.better_group_peer(&destination, &route_history) {
            trace!(via = %better.node_id, "Matrix knows a closer leader, adjusting route");
            return self
                .network
                .send_to_direct_adjusted_route(&message, better.node_id, better.connection_id);
        }

        // This node leads the group and replicates to the other members
        let replication = message.replication.unwrap_or(0) as usize;
        if replication < 1 || replication > self.params.group_size {
            warn!(replication, "Dropping group message with invalid replication");
            return;
        }
        let fan_out = replication - 1; // self counts as one delivery

        message.direct = Some(true);
        message.route_history.clear();

        let own = self.own_id();
        let mut members = self
            .routing_table
            .closest_matrix_nodes(&destination, fan_out + 2);
        members.retain(|id| *id != destination && *id != own);
        members.truncate(fan_out);

        debug!(
            group = %destination,
            members = members.len() + 1,
            id = message.correlation_id(),
            "Replicating group message"
        );
        for member in members {
            message.destination_id = Some(member.to_vec());
            match self.routing_table.get_peer(&member) {
                Some(peer) => {
                    self.network
                        .send_to_direct(&message, peer.node_id, peer.connection_id)
                }
                None => self.network.send_to_closest_node(&message),
            }
        }

        // Local delivery completes the group
        message.destination_id = Some(own.to_vec());
        if protocol::is_routing_message(&message) {
            self.handle_routing_message(message);
        } else {
            self.handle_node_level_message_for_this_node(message, ConnectionId(own));
        }
    }

    fn handle_message_as_far_node(self: &Arc<Self>, mut message: WireMessage) {
        if let Some(destination) = message.destination() {
            if message.visited == Some(false)
                && !message.is_direct()
                && self.routing_table.is_closest_to(&destination, true)
            {
                message.visited = Some(true);
            }
        }
        trace!(
            destination = ?message.destination(),
            id = message.correlation_id(),
            "Not in proximity, sending on"
        );
        self.network.send_to_closest_node(&message);
    }

    // ------------------------------------------------------------------
    // Client mode
    // ------------------------------------------------------------------

    fn handle_client_message(self: &Arc<Self>, message: WireMessage) {
        if message.source_missing() {
            warn!("Stray message at client node dropped: no relays allowed here");
            return;
        }
        if protocol::is_routing_message(&message) {
            self.handle_routing_message(message);
        } else if message.destination() == Some(self.own_id()) {
            let own = self.own_id();
            self.handle_node_level_message_for_this_node(message, ConnectionId(own));
        } else {
            debug!(id = message.correlation_id(), "Client silently drops passing traffic");
        }
    }

    fn handle_message_for_client_peers(self: &Arc<Self>, message: WireMessage) {
        if protocol::is_client_to_client_with_different_ids(&message, true) {
            warn!("Dropping client-to-client message across different ids");
            return;
        }
        trace!(destination = ?message.destination(), "Destination is an attached client");
        self.network.send_to_closest_node(&message);
    }

    // ------------------------------------------------------------------
    // Relay pipeline
    // ------------------------------------------------------------------

    /// Traffic from a peer that has not joined yet: no source id, the
    /// provisional identity parked in the relay fields
    fn handle_relay_request(self: &Arc<Self>, mut message: WireMessage, from: ConnectionId) {
        let own = self.own_id();

        if message.destination() == Some(own) && message.is_request() {
            trace!("Relay request addressed at this node");
            if !message.is_direct() {
                // Group request to our id sent by the joining peer
                message.source_id = Some(own.to_vec());
                return self.network.send_to_closest_node(&message);
            }
            return self.handle_message_for_this_node(message, from);
        }

        if let Some(destination) = message.destination() {
            if message.is_request() && self.routing_table.is_closest_to(&destination, false) {
                if message.is_direct() {
                    return self.handle_direct_relay_request_as_closest_node(message);
                }
                return self.handle_group_relay_request_as_closest_node(message);
            }
        }

        // This node becomes the source and routes responses back later
        message.source_id = Some(own.to_vec());
        self.network.send_to_closest_node(&message);
    }

    fn handle_direct_relay_request_as_closest_node(self: &Arc<Self>, mut message: WireMessage) {
        let Some(destination) = message.destination() else {
            return;
        };
        if self.routing_table.contains(&destination) || self.client_table.contains(&destination) {
            message.source_id = Some(self.own_id().to_vec());
            self.network.send_to_closest_node(&message);
        } else {
            warn!(
                destination = %destination,
                relay = ?message.relay(),
                "Dropping relay message: closest but not connected to destination"
            );
        }
    }

    fn handle_group_relay_request_as_closest_node(self: &Arc<Self>, mut message: WireMessage) {
        let Some(destination) = message.destination() else {
            return;
        };
        let own = self.own_id();
        let have_destination_peer = self.routing_table.contains(&destination);

        if !self.routing_table.is_closest_to(&destination, true) && !have_destination_peer {
            message.source_id = Some(own.to_vec());
            return self.network.send_to_closest_node(&message);
        }

        if let Some(better) = self.routing_table.better_group_peer(&destination, &[]) {
            message.source_id = Some(own.to_vec());
            return self
                .network
                .send_to_direct(&message, better.node_id, better.connection_id);
        }

        let replication = message.replication.unwrap_or(0) as usize;
        if replication < 1 || replication > self.params.group_size {
            warn!(replication, "Dropping relay group message with invalid replication");
            return;
        }
        let mut fan_out = replication - 1;
        message.direct = Some(true);
        if have_destination_peer {
            fan_out += 1;
        }

        let mut members = self.routing_table.closest_nodes(&destination, fan_out);
        if have_destination_peer && !members.is_empty() {
            members.remove(0);
        }

        // This node relays the responses back, so it becomes the source
        message.source_id = Some(own.to_vec());
        for member in members {
            message.destination_id = Some(member.node_id.to_vec());
            self.network
                .send_to_direct(&message, member.node_id, member.connection_id);
        }

        message.destination_id = Some(own.to_vec());
        if protocol::is_routing_message(&message) {
            self.handle_routing_message(message);
        } else {
            self.handle_node_level_message_for_this_node(message, ConnectionId(own));
        }
    }

    /// A relay response that found us over an alternative route
    fn is_relay_response_for_this_node(&self, message: &WireMessage) -> bool {
        protocol::is_routing_message(message) && message.relay() == Some(self.own_id())
    }

    // ------------------------------------------------------------------
    // Special cases and cache clauses
    // ------------------------------------------------------------------

    fn is_group_request_to_self(&self, message: &WireMessage) -> bool {
        let own = Some(self.own_id());
        message.source() == own
            && message.destination() == own
            && message.is_request()
            && !message.is_direct()
    }

    fn is_valid_cacheable_get(&self, message: &WireMessage) -> bool {
        self.cache.is_some()
            && self.params.caching_enabled
            && !self.routing_table.client_mode()
            && protocol::is_node_level_message(message)
            && message.is_request()
            && Cacheable::from(message.cacheable.unwrap_or(0)) == Cacheable::Get
    }

    fn is_valid_cacheable_put(&self, message: &WireMessage) -> bool {
        self.cache.is_some()
            && self.params.caching_enabled
            && !self.routing_table.client_mode()
            && protocol::is_node_level_message(message)
            && message.is_response()
            && Cacheable::from(message.cacheable.unwrap_or(0)) == Cacheable::Put
    }

    fn handle_cache_lookup(self: &Arc<Self>, message: &WireMessage) {
        let Some(cache) = &self.cache else {
            return;
        };
        match cache.handle_cache_lookup(message) {
            Some(response) => self.network.send_to_closest_node(&response),
            // Miss: the request travels on towards its destination
            None => self.network.send_to_closest_node(message),
        }
    }
}
