//! Client routing table
//!
//! Directly-attached non-routing peers. A client borrows this node's place
//! in the overlay: it is admitted only while its id falls inside our close
//! neighbourhood, and it never appears in forwarding decisions other than
//! the final hop to itself.

use crate::id::{ConnectionId, NodeId, PeerInfo};
use dashmap::DashMap;
use tracing::debug;

/// Table of directly-attached leaf peers.
///
/// A single client id may hold several live connections (reconnects racing
/// disconnect notices), so each id maps to a list of records.
pub struct ClientRoutingTable {
    node_id: NodeId,
    capacity: usize,
    clients: DashMap<NodeId, Vec<PeerInfo>>,
}

impl ClientRoutingTable {
    /// Create an empty client table owned by `node_id`
    pub fn new(node_id: NodeId, capacity: usize) -> Self {
        Self {
            node_id,
            capacity,
            clients: DashMap::new(),
        }
    }

    /// Add a client peer.
    ///
    /// `furthest_close_node` bounds admission: the client's id must be
    /// closer to us than the furthest member of our own close group, or the
    /// client belongs with some other routing node.
    pub fn add(&self, peer: PeerInfo, furthest_close_node: Option<NodeId>) -> bool {
        if peer.node_id == self.node_id || peer.node_id.is_zero() {
            return false;
        }
        if self.len() >= self.capacity {
            return false;
        }
        if let Some(bound) = furthest_close_node {
            if !peer.node_id.closer_to_target(&bound, &self.node_id) {
                debug!(client = %peer.node_id, "Client outside close range, refusing");
                return false;
            }
        }
        let mut records = self.clients.entry(peer.node_id).or_default();
        if records.iter().any(|p| p.connection_id == peer.connection_id) {
            return false;
        }
        records.push(peer);
        true
    }

    /// Whether any record exists for `node_id`
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.clients.contains_key(node_id)
    }

    /// All records registered under `node_id`
    pub fn get_peers(&self, node_id: &NodeId) -> Vec<PeerInfo> {
        self.clients
            .get(node_id)
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Remove every record for `node_id`, returning the removed records
    pub fn remove(&self, node_id: &NodeId) -> Vec<PeerInfo> {
        self.clients
            .remove(node_id)
            .map(|(_, records)| records)
            .unwrap_or_default()
    }

    /// Remove the record attached to a dropped transport connection
    pub fn remove_connection(&self, connection_id: &ConnectionId) -> Option<PeerInfo> {
        let mut removed = None;
        self.clients.retain(|_, records| {
            if removed.is_none() {
                if let Some(pos) = records.iter().position(|p| p.connection_id == *connection_id) {
                    removed = Some(records.remove(pos));
                }
            }
            !records.is_empty()
        });
        removed
    }

    /// Total number of client records
    pub fn len(&self) -> usize {
        self.clients.iter().map(|entry| entry.len()).sum()
    }

    /// Whether the table holds no clients
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
