//! Typed message envelopes
//!
//! The wire carries several orthogonal addressing modes; the layer above
//! sees exactly one of five typed shapes. The discriminator is whether the
//! source and destination are single peers or groups, with a dedicated
//! relay shape for senders that have not finished joining.

use crate::id::NodeId;

/// Cache treatment requested for a node-level message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum Cacheable {
    /// No cache interaction
    #[default]
    None = 0,
    /// A request that may be served from cache
    Get = 1,
    /// A response whose payload should be teed into the cache
    Put = 2,
}

impl From<i32> for Cacheable {
    fn from(value: i32) -> Self {
        match value {
            1 => Cacheable::Get,
            2 => Cacheable::Put,
            _ => Cacheable::None,
        }
    }
}

/// A single originating peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleSource(pub NodeId);

/// A single destination peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleId(pub NodeId);

/// A group address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupId(pub NodeId);

/// A message sent on behalf of a group: the group id plus the member that
/// actually emitted this copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSource {
    /// Group the sender speaks for
    pub group_id: GroupId,
    /// The member that emitted this copy
    pub sender_id: SingleId,
}

/// Source of a message that travelled through a relay: the original
/// (still-unjoined) sender, the connection the relay must answer on, and
/// the relay peer itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleRelaySource {
    /// The original sender, identified by its provisional id
    pub origin: SingleSource,
    /// Connection the relay uses for the return trip
    pub connection_id: NodeId,
    /// The relay peer that substituted itself as source
    pub relay_node: SingleSource,
}

/// Peer-to-peer message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleToSingleMessage {
    /// Application payload
    pub contents: Vec<u8>,
    /// Originating peer
    pub source: SingleSource,
    /// Destination peer
    pub destination: SingleId,
    /// Cache treatment
    pub cacheable: Cacheable,
}

/// Peer-to-group message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleToGroupMessage {
    /// Application payload
    pub contents: Vec<u8>,
    /// Originating peer
    pub source: SingleSource,
    /// Destination group
    pub destination: GroupId,
    /// Cache treatment
    pub cacheable: Cacheable,
}

/// Group-to-peer message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupToSingleMessage {
    /// Application payload
    pub contents: Vec<u8>,
    /// Originating group member
    pub source: GroupSource,
    /// Destination peer
    pub destination: SingleId,
    /// Cache treatment
    pub cacheable: Cacheable,
}

/// Group-to-group message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupToGroupMessage {
    /// Application payload
    pub contents: Vec<u8>,
    /// Originating group member
    pub source: GroupSource,
    /// Destination group
    pub destination: GroupId,
    /// Cache treatment
    pub cacheable: Cacheable,
}

/// Peer-to-group message that arrived through a relay leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleToGroupRelayMessage {
    /// Application payload
    pub contents: Vec<u8>,
    /// Relay source triple
    pub source: SingleRelaySource,
    /// Destination group
    pub destination: GroupId,
    /// Cache treatment
    pub cacheable: Cacheable,
}

/// One of the five typed shapes, for the send path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedMessage {
    /// Peer to peer
    SingleToSingle(SingleToSingleMessage),
    /// Peer to group
    SingleToGroup(SingleToGroupMessage),
    /// Group to peer
    GroupToSingle(GroupToSingleMessage),
    /// Group to group
    GroupToGroup(GroupToGroupMessage),
    /// Peer to group through a relay
    SingleToGroupRelay(SingleToGroupRelayMessage),
}
