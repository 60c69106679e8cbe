//! Outbound message constructors
//!
//! One function per protocol message the node originates. Every
//! constructor stamps a full hop budget; the relay variants leave the
//! source empty and carry the provisional id and return connection instead,
//! which is how a still-joining peer sends at all.

use crate::id::NodeId;
use crate::message::Cacheable;
use crate::protocol::wire::{
    CloseListUpdate, ConnectRequest, Endpoint, FindNodesRequest, PingRequest, RemoveRequest,
    WireMessage,
};
use crate::protocol::{encode_message, MessageType};
use std::net::SocketAddr;

/// Relay addressing for a sender that has not joined yet: the provisional
/// id to answer to and the connection the relay must use for the return
#[derive(Debug, Clone, Copy)]
pub struct RelayLeg {
    /// Provisional id of the unjoined sender
    pub relay_id: NodeId,
    /// Connection carrying the return trip
    pub relay_connection_id: NodeId,
}

fn base_request(
    msg_type: MessageType,
    destination: NodeId,
    source: Option<NodeId>,
    relay: Option<RelayLeg>,
    hops_to_live: u8,
) -> WireMessage {
    let mut message = WireMessage {
        msg_type: Some(msg_type as i32),
        request: Some(true),
        direct: Some(true),
        destination_id: Some(destination.to_vec()),
        replication: Some(1),
        hops_to_live: Some(hops_to_live as u32),
        ..WireMessage::default()
    };
    match source {
        Some(source) => message.source_id = Some(source.to_vec()),
        None => {
            if let Some(leg) = relay {
                message.relay_id = Some(leg.relay_id.to_vec());
                message.relay_connection_id = Some(leg.relay_connection_id.to_vec());
            }
        }
    }
    message
}

/// Liveness probe addressed at `destination`
pub fn ping_request(destination: NodeId, source: NodeId, id: u32, hops_to_live: u8) -> WireMessage {
    let mut message = base_request(MessageType::Ping, destination, Some(source), None, hops_to_live);
    message.id = Some(id);
    let payload = PingRequest { ping: Some(true) };
    message.data = vec![encode_message(&payload).unwrap_or_default()];
    message
}

/// Admission request carrying our contact details
#[allow(clippy::too_many_arguments)]
pub fn connect_request(
    destination: NodeId,
    own_id: NodeId,
    public_key: Vec<u8>,
    endpoint: Option<SocketAddr>,
    client: bool,
    relay: Option<RelayLeg>,
    hops_to_live: u8,
) -> WireMessage {
    let source = if relay.is_some() { None } else { Some(own_id) };
    let mut message = base_request(MessageType::Connect, destination, source, relay, hops_to_live);
    message.client_node = Some(client);
    let payload = ConnectRequest {
        node_id: Some(own_id.to_vec()),
        public_key: Some(public_key),
        endpoint: endpoint.map(|addr| Endpoint {
            ip: Some(addr.ip().to_string()),
            port: Some(addr.port() as u32),
        }),
        client: Some(client),
    };
    message.data = vec![encode_message(&payload).unwrap_or_default()];
    message
}

/// Closest-nodes query for `target`.
///
/// Travels as a group message with replication 1 so that whichever node
/// ends up closest to the target consumes and answers it, even when the
/// target id has no exact owner.
pub fn find_nodes_request(
    num_nodes: usize,
    target: NodeId,
    own_id: NodeId,
    relay: Option<RelayLeg>,
    id: u32,
    hops_to_live: u8,
) -> WireMessage {
    let source = if relay.is_some() { None } else { Some(own_id) };
    let mut message = base_request(MessageType::FindNodes, target, source, relay, hops_to_live);
    message.id = Some(id);
    message.direct = Some(false);
    message.visited = Some(false);
    let payload = FindNodesRequest {
        num_nodes_requested: Some(num_nodes as u32),
        target_id: Some(target.to_vec()),
    };
    message.data = vec![encode_message(&payload).unwrap_or_default()];
    message
}

/// Unsolicited broadcast of our close list to `destination`
pub fn closest_nodes_update(
    destination: NodeId,
    own_id: NodeId,
    close_ids: &[NodeId],
    hops_to_live: u8,
) -> WireMessage {
    let mut message = base_request(
        MessageType::ClosestNodesUpdate,
        destination,
        Some(own_id),
        None,
        hops_to_live,
    );
    let payload = CloseListUpdate {
        node_id: Some(own_id.to_vec()),
        close_ids: close_ids.iter().map(NodeId::to_vec).collect(),
    };
    message.data = vec![encode_message(&payload).unwrap_or_default()];
    message
}

/// Ask `destination` to drop its furthest peer in our favour
pub fn remove_furthest_request(destination: NodeId, own_id: NodeId, hops_to_live: u8) -> WireMessage {
    let mut message = base_request(
        MessageType::RemoveFurthest,
        destination,
        Some(own_id),
        None,
        hops_to_live,
    );
    let payload = RemoveRequest {
        requester_id: Some(own_id.to_vec()),
    };
    message.data = vec![encode_message(&payload).unwrap_or_default()];
    message
}

/// Group composition query for `target`; consumed by whichever node is
/// closest to the target id
pub fn get_group_request(target: NodeId, own_id: NodeId, id: u32, hops_to_live: u8) -> WireMessage {
    let mut message = base_request(MessageType::GetGroup, target, Some(own_id), None, hops_to_live);
    message.id = Some(id);
    message.direct = Some(false);
    message.visited = Some(false);
    // The group id doubles as the query; it rides the group_destination
    // field so it survives per-member destination rewrites, and an empty
    // frame keeps the envelope valid
    message.group_destination = Some(target.to_vec());
    message.data = vec![Vec::new()];
    message
}

/// Application payload addressed at a single peer or a group
#[allow(clippy::too_many_arguments)]
pub fn node_level_request(
    destination: NodeId,
    own_id: NodeId,
    data: Vec<u8>,
    direct: bool,
    cacheable: Cacheable,
    replication: u32,
    relay: Option<RelayLeg>,
    client: bool,
    id: u32,
    hops_to_live: u8,
) -> WireMessage {
    let source = if relay.is_some() { None } else { Some(own_id) };
    let mut message = base_request(MessageType::NodeLevel, destination, source, relay, hops_to_live);
    message.id = Some(id);
    message.direct = Some(direct);
    message.replication = Some(replication);
    message.cacheable = Some(cacheable as i32);
    message.client_node = Some(client);
    if !direct {
        message.group_destination = Some(destination.to_vec());
        message.visited = Some(false);
    }
    message.data = vec![data];
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol;

    #[test]
    fn requests_carry_a_full_hop_budget() {
        let message = ping_request(NodeId::random(), NodeId::random(), 1, 10);
        assert_eq!(message.hops_remaining(), 10);
        assert!(message.is_request());
        assert!(protocol::validate_message(&message).is_ok());
    }

    #[test]
    fn relay_requests_travel_without_a_source() {
        let own = NodeId::random();
        let leg = RelayLeg {
            relay_id: own,
            relay_connection_id: NodeId::random(),
        };
        let message = find_nodes_request(8, own, own, Some(leg), 2, 10);
        assert!(message.source_missing());
        assert_eq!(message.relay(), Some(own));
        assert!(message.relay_connection().is_some());
    }

    #[test]
    fn group_requests_set_the_group_destination() {
        let target = NodeId::random();
        let message = node_level_request(
            target,
            NodeId::random(),
            b"payload".to_vec(),
            false,
            Cacheable::None,
            4,
            None,
            false,
            3,
            10,
        );
        assert!(!message.is_direct());
        assert_eq!(message.group_destination, Some(target.to_vec()));
        assert_eq!(message.replication, Some(4));
    }
}
