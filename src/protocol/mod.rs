//! Protocol module
//!
//! Wire message definitions plus the encode/decode and classification
//! helpers the routing core uses on every inbound packet. All overlay
//! traffic uses a tagged binary encoding in which every field is optional
//! and order-independent, so hops can rewrite addressing state in place.

pub mod rpcs;
pub mod wire;

use crate::error::ProtocolError;
use prost::Message;

pub use wire::WireMessage;

/// Maximum encoded message size (1 MiB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// The closed set of message types the overlay understands.
///
/// Routing-protocol types are consumed by the core itself; `NodeLevel`
/// payloads belong to the layer above and are only carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MessageType {
    /// Liveness probe
    Ping = 1,
    /// Connection / admission handshake
    Connect = 2,
    /// Closest-nodes query
    FindNodes = 3,
    /// Unsolicited close-list broadcast
    ClosestNodesUpdate = 4,
    /// Coordinated eviction of a furthest peer
    RemoveFurthest = 5,
    /// Group composition query
    GetGroup = 6,
    /// Per-hop acknowledgement carrier
    Acknowledgement = 7,
    /// Application payload, carried but not consumed by the core
    NodeLevel = 100,
}

impl MessageType {
    /// Whether messages of this type are consumed by the routing core
    pub fn is_routing(self) -> bool {
        !matches!(self, MessageType::NodeLevel)
    }
}

impl TryFrom<i32> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(MessageType::Ping),
            2 => Ok(MessageType::Connect),
            3 => Ok(MessageType::FindNodes),
            4 => Ok(MessageType::ClosestNodesUpdate),
            5 => Ok(MessageType::RemoveFurthest),
            6 => Ok(MessageType::GetGroup),
            7 => Ok(MessageType::Acknowledgement),
            100 => Ok(MessageType::NodeLevel),
            other => Err(ProtocolError::InvalidMessageType(other)),
        }
    }
}

/// Serialize any wire frame to bytes, enforcing the size cap
pub fn encode_message<T: Message>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    message
        .encode(&mut buf)
        .map_err(|e| ProtocolError::EncodeFailed(e.to_string()))?;

    if buf.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(buf.len(), MAX_MESSAGE_SIZE));
    }
    Ok(buf)
}

/// Deserialize bytes into a wire frame, enforcing the size cap
pub fn decode_message<T: Message + Default>(bytes: &[u8]) -> Result<T, ProtocolError> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(bytes.len(), MAX_MESSAGE_SIZE));
    }
    T::decode(bytes).map_err(|e| ProtocolError::DecodeFailed(e.to_string()))
}

/// Parsed message type of a wire message
pub fn message_type(message: &WireMessage) -> Result<MessageType, ProtocolError> {
    MessageType::try_from(message.msg_type.unwrap_or(0))
}

/// Whether the message is a routing-protocol message
pub fn is_routing_message(message: &WireMessage) -> bool {
    message_type(message).map_or(false, MessageType::is_routing)
}

/// Whether the message carries an application payload
pub fn is_node_level_message(message: &WireMessage) -> bool {
    !is_routing_message(message)
}

/// Whether the message is a per-hop acknowledgement carrier
pub fn is_ack_message(message: &WireMessage) -> bool {
    message_type(message) == Ok(MessageType::Acknowledgement)
}

/// Whether the message is a close-list broadcast
pub fn is_group_update(message: &WireMessage) -> bool {
    message_type(message) == Ok(MessageType::ClosestNodesUpdate)
}

/// Structural validation applied before any routing decision.
///
/// A message must name a known type, carry a destination (relay-bound
/// responses travel with the destination cleared, which is also fine), a
/// correlation id where one is required, and a live hop budget.
pub fn validate_message(message: &WireMessage) -> Result<(), ProtocolError> {
    let msg_type = message_type(message)?;

    if message.hops_remaining() == 0 {
        return Err(ProtocolError::InvalidField("hops_to_live"));
    }

    if let Some(raw) = message.destination_id.as_deref() {
        if !raw.is_empty() && message.destination().is_none() {
            return Err(ProtocolError::InvalidField("destination_id"));
        }
    } else if message.relay().is_none() {
        // No destination and no relay leg: nowhere to route this
        return Err(ProtocolError::InvalidField("destination_id"));
    }

    if msg_type == MessageType::NodeLevel && message.correlation_id() == 0 {
        return Err(ProtocolError::InvalidField("id"));
    }

    if msg_type == MessageType::Acknowledgement && message.ack_token() == 0 {
        return Err(ProtocolError::InvalidField("ack_id"));
    }

    Ok(())
}

/// Client peers may only talk to their own id through the overlay; a direct
/// client-to-client frame between different ids is a policy violation.
pub fn is_client_to_client_with_different_ids(message: &WireMessage, client_mode: bool) -> bool {
    if !client_mode || !message.client_node.unwrap_or(false) {
        return false;
    }
    match (message.source(), message.destination()) {
        (Some(source), Some(destination)) => source != destination,
        _ => false,
    }
}
