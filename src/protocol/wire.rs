//! Wire message structs
//!
//! The overlay speaks a tagged, order-independent binary encoding; every
//! field is optional so that intermediate hops can strip or add addressing
//! state without re-framing the payload. The structs here carry the prost
//! field attributes directly, so the schema lives with the code.

use crate::id::NodeId;

/// The envelope every overlay packet travels in.
///
/// Addressing is orthogonal along three axes: single/group source,
/// single/group destination, and an optional relay leg for peers that have
/// not finished joining. The routing core reads and rewrites these fields at
/// every hop; the `data` frames are opaque to it.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireMessage {
    /// Message type tag, see `MessageType`
    #[prost(int32, optional, tag = "1")]
    pub msg_type: Option<i32>,
    /// Request (true) vs response (false)
    #[prost(bool, optional, tag = "2")]
    pub request: Option<bool>,
    /// Direct (single destination) vs group delivery
    #[prost(bool, optional, tag = "3")]
    pub direct: Option<bool>,
    /// Originating node id; absent while the sender is still joining
    #[prost(bytes = "vec", optional, tag = "4")]
    pub source_id: Option<Vec<u8>>,
    /// Target node or group id
    #[prost(bytes = "vec", optional, tag = "5")]
    pub destination_id: Option<Vec<u8>>,
    /// Group the sender speaks for, when the source is a group
    #[prost(bytes = "vec", optional, tag = "6")]
    pub group_source: Option<Vec<u8>>,
    /// Group the message addresses, when the destination is a group
    #[prost(bytes = "vec", optional, tag = "7")]
    pub group_destination: Option<Vec<u8>>,
    /// Id of the original sender behind a relay leg
    #[prost(bytes = "vec", optional, tag = "8")]
    pub relay_id: Option<Vec<u8>>,
    /// Connection the relay must use for the return trip
    #[prost(bytes = "vec", optional, tag = "9")]
    pub relay_connection_id: Option<Vec<u8>>,
    /// Payload frames, opaque to the routing core
    #[prost(bytes = "vec", repeated, tag = "10")]
    pub data: Vec<Vec<u8>>,
    /// End-to-end correlation id
    #[prost(uint32, optional, tag = "11")]
    pub id: Option<u32>,
    /// Per-hop acknowledgement token; zero/absent means no ack expected
    #[prost(uint32, optional, tag = "12")]
    pub ack_id: Option<u32>,
    /// Group replication factor carried by group messages
    #[prost(uint32, optional, tag = "13")]
    pub replication: Option<u32>,
    /// Remaining hop budget
    #[prost(uint32, optional, tag = "14")]
    pub hops_to_live: Option<u32>,
    /// Set once the message has crossed into the destination's neighbourhood
    #[prost(bool, optional, tag = "15")]
    pub visited: Option<bool>,
    /// Ids that already carried this message, for loop avoidance
    #[prost(bytes = "vec", repeated, tag = "16")]
    pub route_history: Vec<Vec<u8>>,
    /// Cache treatment, see `Cacheable`
    #[prost(int32, optional, tag = "17")]
    pub cacheable: Option<i32>,
    /// Whether the originator is a non-routing client
    #[prost(bool, optional, tag = "18")]
    pub client_node: Option<bool>,
    /// Most recent forwarder of this message
    #[prost(bytes = "vec", optional, tag = "19")]
    pub last_id: Option<Vec<u8>>,
    /// Piggybacked network-statistics sample
    #[prost(bytes = "vec", optional, tag = "20")]
    pub average_distance: Option<Vec<u8>>,
    /// Marks a request whose true destination is the relay peer itself
    #[prost(bool, optional, tag = "21")]
    pub actual_destination_is_relay_id: Option<bool>,
}

impl WireMessage {
    /// Parsed source id, if present and well-formed
    pub fn source(&self) -> Option<NodeId> {
        self.source_id.as_deref().and_then(NodeId::from_slice)
    }

    /// Parsed destination id, if present and well-formed
    pub fn destination(&self) -> Option<NodeId> {
        self.destination_id.as_deref().and_then(NodeId::from_slice)
    }

    /// Parsed relay id, if present and well-formed
    pub fn relay(&self) -> Option<NodeId> {
        self.relay_id.as_deref().and_then(NodeId::from_slice)
    }

    /// Parsed relay connection id, if present and well-formed
    pub fn relay_connection(&self) -> Option<NodeId> {
        self.relay_connection_id.as_deref().and_then(NodeId::from_slice)
    }

    /// True when no usable source id is on the message (relay traffic)
    pub fn source_missing(&self) -> bool {
        self.source_id.as_deref().map_or(true, <[u8]>::is_empty)
    }

    /// Correlation id, zero when absent
    pub fn correlation_id(&self) -> u32 {
        self.id.unwrap_or(0)
    }

    /// Per-hop ack token, zero when absent
    pub fn ack_token(&self) -> u32 {
        self.ack_id.unwrap_or(0)
    }

    /// Remaining hop budget, zero when absent
    pub fn hops_remaining(&self) -> u32 {
        self.hops_to_live.unwrap_or(0)
    }

    /// Whether this is a request
    pub fn is_request(&self) -> bool {
        self.request.unwrap_or(false)
    }

    /// Whether this is a response
    pub fn is_response(&self) -> bool {
        !self.is_request()
    }

    /// Whether this message is addressed to a single peer
    pub fn is_direct(&self) -> bool {
        self.direct.unwrap_or(false)
    }

    /// Whether the neighbourhood marker is set
    pub fn is_visited(&self) -> bool {
        self.visited.unwrap_or(false)
    }

    /// Route history parsed into node ids, skipping malformed entries
    pub fn route_history_ids(&self) -> Vec<NodeId> {
        self.route_history
            .iter()
            .filter_map(|raw| NodeId::from_slice(raw))
            .collect()
    }

    /// Record `id` as having carried this message, keeping the newest
    /// `limit` entries
    pub fn push_route_history(&mut self, id: NodeId, limit: usize) {
        if self
            .route_history
            .iter()
            .any(|raw| raw.as_slice() == id.as_bytes().as_slice())
        {
            return;
        }
        self.route_history.push(id.to_vec());
        while self.route_history.len() > limit {
            self.route_history.remove(0);
        }
    }
}

/// A transport endpoint in wire form
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Endpoint {
    /// IP address in presentation form
    #[prost(string, optional, tag = "1")]
    pub ip: Option<String>,
    /// UDP/TCP port
    #[prost(uint32, optional, tag = "2")]
    pub port: Option<u32>,
}

/// Ping request payload
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PingRequest {
    #[prost(bool, optional, tag = "1")]
    pub ping: Option<bool>,
}

/// Ping response payload
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PingResponse {
    #[prost(bool, optional, tag = "1")]
    pub pong: Option<bool>,
    /// Echo of the request payload, for liveness verification
    #[prost(bytes = "vec", optional, tag = "2")]
    pub original_request: Option<Vec<u8>>,
}

/// Connect request payload
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConnectRequest {
    /// Candidate's node id
    #[prost(bytes = "vec", optional, tag = "1")]
    pub node_id: Option<Vec<u8>>,
    /// Candidate's public key bytes
    #[prost(bytes = "vec", optional, tag = "2")]
    pub public_key: Option<Vec<u8>>,
    /// Candidate's reachable endpoint
    #[prost(message, optional, tag = "3")]
    pub endpoint: Option<Endpoint>,
    /// Whether the candidate joins as a non-routing client
    #[prost(bool, optional, tag = "4")]
    pub client: Option<bool>,
}

/// Connect response payload
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConnectResponse {
    /// Whether the responder will accept the connection
    #[prost(bool, optional, tag = "1")]
    pub answer: Option<bool>,
    /// Responder's node id
    #[prost(bytes = "vec", optional, tag = "2")]
    pub node_id: Option<Vec<u8>>,
    /// Responder's public key bytes
    #[prost(bytes = "vec", optional, tag = "3")]
    pub public_key: Option<Vec<u8>>,
    /// Responder's reachable endpoint
    #[prost(message, optional, tag = "4")]
    pub endpoint: Option<Endpoint>,
    /// Echo of the request payload
    #[prost(bytes = "vec", optional, tag = "5")]
    pub original_request: Option<Vec<u8>>,
}

/// Find-nodes request payload
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FindNodesRequest {
    /// How many close ids the requester wants back
    #[prost(uint32, optional, tag = "1")]
    pub num_nodes_requested: Option<u32>,
    /// Id the responder measures closeness against
    #[prost(bytes = "vec", optional, tag = "2")]
    pub target_id: Option<Vec<u8>>,
}

/// Find-nodes response payload
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FindNodesResponse {
    /// Ids closest to the requested target, nearest first
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub nodes: Vec<Vec<u8>>,
}

/// Unsolicited broadcast of a peer's close list
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CloseListUpdate {
    /// The peer the list belongs to
    #[prost(bytes = "vec", optional, tag = "1")]
    pub node_id: Option<Vec<u8>>,
    /// That peer's current close ids
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub close_ids: Vec<Vec<u8>>,
}

/// Remove-furthest-node request payload
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoveRequest {
    /// Peer asking for the eviction
    #[prost(bytes = "vec", optional, tag = "1")]
    pub requester_id: Option<Vec<u8>>,
}

/// Remove-furthest-node response payload
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoveResponse {
    /// Peer that was evicted, absent when nothing was removed
    #[prost(bytes = "vec", optional, tag = "1")]
    pub removed_id: Option<Vec<u8>>,
}

/// Get-group response payload
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetGroupResponse {
    /// The responder's view of the target's group, nearest first
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub node_ids: Vec<Vec<u8>>,
}
