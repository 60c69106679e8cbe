//! Application surface
//!
//! [`RoutingNode`] and its builder, plus the callback bundle the embedder
//! hands in at join time.

pub mod functors;
mod node;

pub use functors::{
    Functors, MessageReceivedFunctor, NetworkStatusFunctor, PublicKeyReply, ReplyFunctor,
    RequestPublicKeyFunctor, ResponseFunctor, TypedMessageFunctors,
};
pub use node::{GroupRangeStatus, RoutingNode, RoutingNodeBuilder};
