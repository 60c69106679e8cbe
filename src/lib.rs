//! # kadmesh
//!
//! A self-organising peer-to-peer overlay routing library. Peers identify
//! themselves by 512-bit ids in a flat key space; the overlay delivers
//! application messages best-effort to the peer owning an id (direct
//! routing) or to the ids numerically closest to a target (group routing),
//! replicating group traffic to the target's close set.
//!
//! The routing pipeline classifies every inbound message and walks it
//! through a strict decision order: cache clauses, the special regimes
//! (group-to-self, client mode, relay traffic), destination matching, and
//! finally the closest-node / far-node split. Per-hop reliability comes
//! from an acknowledgement engine that retransmits until the adjacent peer
//! confirms; end-to-end request/response matching runs through a
//! correlation timer with deadlines.
//!
//! ## Quick start
//!
//! ```no_run
//! use kadmesh::{Functors, RoutingNodeBuilder};
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     transport: Arc<dyn kadmesh::Transport>,
//! #     incoming: kadmesh::IncomingReceiver,
//! #     bootstrap: std::net::SocketAddr,
//! # ) -> kadmesh::Result<()> {
//! let node = RoutingNodeBuilder::new().build(transport, incoming);
//! node.join(Functors::default(), vec![bootstrap]).await?;
//! # Ok(())
//! # }
//! ```
//!
//! The transport, cryptographic identity, content cache, and bootstrap
//! discovery are all external collaborators consumed through seams:
//! [`Transport`], opaque [`PublicKey`]s, [`CacheStore`], and the endpoint
//! list handed to [`RoutingNode::join`].

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod ack;
pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod handler;
pub mod id;
pub mod message;
pub mod network;
pub mod protocol;
pub mod routing;
pub mod stats;
pub mod timer;

// Re-export main types
pub use api::{
    Functors, GroupRangeStatus, MessageReceivedFunctor, NetworkStatusFunctor, ResponseFunctor,
    RoutingNode, RoutingNodeBuilder, TypedMessageFunctors,
};
pub use cache::CacheStore;
pub use config::Parameters;
pub use error::{Error, ProtocolError, Result, RoutingError, TransportError};
pub use id::{ConnectionId, Distance, NodeId, PeerInfo, PublicKey, ID_LEN};
pub use message::{
    Cacheable, GroupId, GroupSource, GroupToGroupMessage, GroupToSingleMessage, SingleId,
    SingleRelaySource, SingleSource, SingleToGroupMessage, SingleToGroupRelayMessage,
    SingleToSingleMessage, TypedMessage,
};
pub use network::{IncomingReceiver, IncomingSender, RawMessage, Transport};
pub use protocol::{MessageType, WireMessage};
pub use routing::{ClientRoutingTable, RoutingTable};
