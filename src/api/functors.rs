//! User callback bundle
//!
//! The layer above hands these in at join time. Callbacks are `Arc`'d so
//! every component that needs to fire one can hold its own handle; the
//! reply and response slots are `FnOnce`, enforcing the at-most-once
//! contract at the type level.

use crate::error::RoutingError;
use crate::id::{NodeId, PublicKey};
use crate::message::{
    GroupToGroupMessage, GroupToSingleMessage, SingleToGroupMessage, SingleToGroupRelayMessage,
    SingleToSingleMessage,
};
use parking_lot::RwLock;
use std::sync::Arc;

/// One-shot slot for replying to a received node-level request
pub type ReplyFunctor = Box<dyn FnOnce(Vec<u8>) + Send>;

/// Delivery of a node-level request payload together with its reply slot
pub type MessageReceivedFunctor = Arc<dyn Fn(Vec<u8>, ReplyFunctor) + Send + Sync>;

/// Periodic notification of the node's connectivity status
pub type NetworkStatusFunctor = Arc<dyn Fn(i32) + Send + Sync>;

/// One-shot slot the key-agreement layer fulfils with a peer's public key
pub type PublicKeyReply = Box<dyn FnOnce(Option<PublicKey>) + Send>;

/// Ask the key-agreement layer for the public key of `NodeId`
pub type RequestPublicKeyFunctor = Arc<dyn Fn(NodeId, PublicKeyReply) + Send + Sync>;

/// One-shot completion of a `send_*` call: the reply payload or a failure
pub type ResponseFunctor = Box<dyn FnOnce(Result<Vec<u8>, RoutingError>) + Send>;

/// Handlers for the five typed envelopes; an unset slot drops its variant
#[derive(Clone, Default)]
pub struct TypedMessageFunctors {
    /// Peer-to-peer deliveries
    pub single_to_single: Option<Arc<dyn Fn(SingleToSingleMessage) + Send + Sync>>,
    /// Peer-to-group deliveries
    pub single_to_group: Option<Arc<dyn Fn(SingleToGroupMessage) + Send + Sync>>,
    /// Group-to-peer deliveries
    pub group_to_single: Option<Arc<dyn Fn(GroupToSingleMessage) + Send + Sync>>,
    /// Group-to-group deliveries
    pub group_to_group: Option<Arc<dyn Fn(GroupToGroupMessage) + Send + Sync>>,
    /// Peer-to-group deliveries that travelled a relay leg
    pub single_to_group_relay: Option<Arc<dyn Fn(SingleToGroupRelayMessage) + Send + Sync>>,
}

/// Everything the embedder can hook into the routing core
#[derive(Clone, Default)]
pub struct Functors {
    /// Untyped node-level delivery; when set, takes precedence over the
    /// typed handlers
    pub message_received: Option<MessageReceivedFunctor>,
    /// Connectivity status changes
    pub network_status: Option<NetworkStatusFunctor>,
    /// Key lookup used while validating candidate peers
    pub request_public_key: Option<RequestPublicKeyFunctor>,
    /// Typed delivery handlers
    pub typed_messages: TypedMessageFunctors,
}

/// Functors shared across the handler, validator, and facade
pub type SharedFunctors = Arc<RwLock<Functors>>;
