//! The routing table
//!
//! An ordered view of the peers this node is connected to, kept sorted by
//! XOR distance from the local id, together with the "group matrix": each
//! peer's own close list. The matrix lets closeness predicates look one hop
//! beyond the direct table, which is what group replication relies on when
//! deciding whether this node really is the leader for a target id.
//!
//! The table is read on every forwarding decision and written only on peer
//! join/leave, so all state sits behind one `RwLock`.

use crate::id::{NodeId, PeerInfo};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tracing::debug;

/// Spread constraint: one distance-rank bucket never monopolises the table
const MAX_BUCKET_OCCUPANCY: usize = 8;

/// Number of leading bits shared between the local id and `other`, used as
/// the bucket rank for the spread constraint
fn bucket_index(own: &NodeId, other: &NodeId) -> usize {
    for (i, (a, b)) in own.as_bytes().iter().zip(other.as_bytes().iter()).enumerate() {
        let diff = a ^ b;
        if diff != 0 {
            return i * 8 + diff.leading_zeros() as usize;
        }
    }
    crate::id::ID_LEN * 8
}

struct Inner {
    /// Connected peers, ascending XOR distance from the local id
    peers: Vec<PeerInfo>,
}

/// The peer's structured view of the overlay
pub struct RoutingTable {
    node_id: NodeId,
    client_mode: bool,
    capacity: usize,
    inner: RwLock<Inner>,
}

impl RoutingTable {
    /// Create an empty table owned by `node_id`
    pub fn new(node_id: NodeId, client_mode: bool, capacity: usize) -> Self {
        Self {
            node_id,
            client_mode,
            capacity,
            inner: RwLock::new(Inner { peers: Vec::new() }),
        }
    }

    /// The local node's id
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Whether this node runs as a non-routing client
    pub fn client_mode(&self) -> bool {
        self.client_mode
    }

    /// Number of connected peers
    pub fn len(&self) -> usize {
        self.inner.read().peers.len()
    }

    /// Whether the table holds no peers
    pub fn is_empty(&self) -> bool {
        self.inner.read().peers.is_empty()
    }

    /// Admission predicate: would `candidate` be accepted right now?
    ///
    /// A candidate is admitted iff the table has room, or it is strictly
    /// closer to the local id than the current furthest peer — subject to
    /// the bucket spread constraint.
    pub fn check_node(&self, candidate: &NodeId) -> bool {
        if *candidate == self.node_id || candidate.is_zero() {
            return false;
        }
        let inner = self.inner.read();
        self.check_node_locked(&inner, candidate)
    }

    fn check_node_locked(&self, inner: &Inner, candidate: &NodeId) -> bool {
        if inner.peers.iter().any(|p| p.node_id == *candidate) {
            return false;
        }
        let bucket = bucket_index(&self.node_id, candidate);
        let occupancy = inner
            .peers
            .iter()
            .filter(|p| bucket_index(&self.node_id, &p.node_id) == bucket)
            .count();
        if occupancy >= MAX_BUCKET_OCCUPANCY {
            return false;
        }
        if inner.peers.len() < self.capacity {
            return true;
        }
        match inner.peers.last() {
            Some(furthest) => candidate.closer_to_target(&furthest.node_id, &self.node_id),
            None => true,
        }
    }

    /// Add a peer, evicting the furthest one if the table is at capacity.
    ///
    /// Fails silently (returns false) for the local id, duplicates, and
    /// candidates that do not improve the table.
    pub fn add(&self, peer: PeerInfo) -> bool {
        if peer.node_id == self.node_id || peer.node_id.is_zero() {
            return false;
        }
        let mut inner = self.inner.write();
        if !self.check_node_locked(&inner, &peer.node_id) {
            return false;
        }
        if inner.peers.len() >= self.capacity {
            if let Some(evicted) = inner.peers.pop() {
                debug!(evicted = %evicted.node_id, "Evicting furthest peer for closer candidate");
            }
        }
        let own = self.node_id;
        let idx = inner
            .peers
            .partition_point(|p| p.node_id.distance_to(&own) < peer.node_id.distance_to(&own));
        inner.peers.insert(idx, peer);
        true
    }

    /// Remove a peer, returning its record if it was present
    pub fn remove(&self, node_id: &NodeId) -> Option<PeerInfo> {
        let mut inner = self.inner.write();
        let pos = inner.peers.iter().position(|p| p.node_id == *node_id)?;
        Some(inner.peers.remove(pos))
    }

    /// Remove the peer attached to a dropped transport connection
    pub fn remove_connection(&self, connection_id: &crate::id::ConnectionId) -> Option<PeerInfo> {
        let mut inner = self.inner.write();
        let pos = inner
            .peers
            .iter()
            .position(|p| p.connection_id == *connection_id)?;
        Some(inner.peers.remove(pos))
    }

    /// Whether the table holds `node_id`
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.inner.read().peers.iter().any(|p| p.node_id == *node_id)
    }

    /// Look up a peer's record
    pub fn get_peer(&self, node_id: &NodeId) -> Option<PeerInfo> {
        self.inner
            .read()
            .peers
            .iter()
            .find(|p| p.node_id == *node_id)
            .cloned()
    }

    /// Snapshot of all connected peers, ascending distance from the local id
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.inner.read().peers.clone()
    }

    /// The `n` peers with smallest XOR distance to `target`, nearest first
    pub fn closest_nodes(&self, target: &NodeId, n: usize) -> Vec<PeerInfo> {
        let mut peers = self.inner.read().peers.clone();
        peers.sort_by(|a, b| {
            a.node_id
                .distance_to(target)
                .cmp(&b.node_id.distance_to(target))
        });
        peers.truncate(n);
        peers
    }

    /// The connected peer closest to `target` that is not in `exclude`
    pub fn closest_peer_excluding(&self, target: &NodeId, exclude: &[NodeId]) -> Option<PeerInfo> {
        self.inner
            .read()
            .peers
            .iter()
            .filter(|p| !exclude.contains(&p.node_id))
            .min_by_key(|p| p.node_id.distance_to(target))
            .cloned()
    }

    /// The local node's own close list, for matrix broadcasts
    pub fn own_close_ids(&self, size: usize) -> Vec<NodeId> {
        self.inner
            .read()
            .peers
            .iter()
            .take(size)
            .map(|p| p.node_id)
            .collect()
    }

    /// True iff no connected peer is strictly closer to `target` than this
    /// node. With `exclude_target_peer` set, a peer whose id equals the
    /// target does not count (group traffic addressed at an existing id).
    pub fn is_closest_to(&self, target: &NodeId, exclude_target_peer: bool) -> bool {
        let own_distance = self.node_id.distance_to(target);
        !self.inner.read().peers.iter().any(|p| {
            if exclude_target_peer && p.node_id == *target {
                return false;
            }
            p.node_id.distance_to(target) < own_distance
        })
    }

    /// True iff this node ranks within the `size` closest to `target` over
    /// the union of the local id and all connected peers
    pub fn is_in_range(&self, target: &NodeId, size: usize) -> bool {
        let own_distance = self.node_id.distance_to(target);
        let closer = self
            .inner
            .read()
            .peers
            .iter()
            .filter(|p| p.node_id.distance_to(target) < own_distance)
            .count();
        closer < size
    }

    /// The furthest connected peer from the local id
    pub fn furthest_peer(&self) -> Option<PeerInfo> {
        self.inner.read().peers.last().cloned()
    }

    /// The id of the `n`-th closest peer to the local id (0-based); used as
    /// the admission bound for client peers
    pub fn nth_closest_to_self(&self, n: usize) -> Option<NodeId> {
        self.inner.read().peers.get(n).map(|p| p.node_id)
    }

    /// A uniformly random connected peer
    pub fn random_peer(&self) -> Option<PeerInfo> {
        self.inner
            .read()
            .peers
            .choose(&mut rand::thread_rng())
            .cloned()
    }

    // ------------------------------------------------------------------
    // Group matrix
    // ------------------------------------------------------------------

    /// Replace the matrix row of `peer_id` with `close_ids`.
    ///
    /// Returns false when the peer is not connected (its broadcast raced a
    /// disconnect).
    pub fn update_close_ids(&self, peer_id: &NodeId, close_ids: Vec<NodeId>) -> bool {
        let mut inner = self.inner.write();
        match inner.peers.iter_mut().find(|p| p.node_id == *peer_id) {
            Some(peer) => {
                peer.close_ids = close_ids;
                true
            }
            None => false,
        }
    }

    /// Union of connected peer ids and every matrix row, the local id
    /// excluded, deduplicated
    fn matrix_ids_locked(inner: &Inner, own: &NodeId) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = Vec::new();
        for peer in &inner.peers {
            if !ids.contains(&peer.node_id) {
                ids.push(peer.node_id);
            }
            for close in &peer.close_ids {
                if *close != *own && !close.is_zero() && !ids.contains(close) {
                    ids.push(*close);
                }
            }
        }
        ids
    }

    /// The `n` matrix ids with smallest XOR distance to `target`
    pub fn closest_matrix_nodes(&self, target: &NodeId, n: usize) -> Vec<NodeId> {
        let inner = self.inner.read();
        let mut ids = Self::matrix_ids_locked(&inner, &self.node_id);
        ids.sort_by(|a, b| a.distance_to(target).cmp(&b.distance_to(target)));
        ids.truncate(n);
        ids
    }

    /// [`Self::is_closest_to`] evaluated over the matrix rather than the
    /// direct table
    pub fn is_closest_to_including_matrix(&self, target: &NodeId) -> bool {
        let own_distance = self.node_id.distance_to(target);
        let inner = self.inner.read();
        !Self::matrix_ids_locked(&inner, &self.node_id)
            .iter()
            .any(|id| id.distance_to(target) < own_distance)
    }

    /// Group-leader test for `target`.
    ///
    /// Returns `None` when no matrix id outside `route_history` is closer to
    /// `target` than this node (this node leads the group and should
    /// replicate). Otherwise returns the connected peer to forward through:
    /// the closer id itself if directly connected, else the connected peer
    /// whose matrix row contains it.
    pub fn better_group_peer(
        &self,
        target: &NodeId,
        route_history: &[NodeId],
    ) -> Option<PeerInfo> {
        let own_distance = self.node_id.distance_to(target);
        let inner = self.inner.read();

        let mut candidates: Vec<NodeId> = Self::matrix_ids_locked(&inner, &self.node_id)
            .into_iter()
            .filter(|id| id != target && !route_history.contains(id))
            .filter(|id| id.distance_to(target) < own_distance)
            .collect();
        candidates.sort_by(|a, b| a.distance_to(target).cmp(&b.distance_to(target)));

        for candidate in candidates {
            if let Some(peer) = inner.peers.iter().find(|p| p.node_id == candidate) {
                return Some(peer.clone());
            }
            // Not directly connected: route through the carrier of its row
            let carrier = inner
                .peers
                .iter()
                .filter(|p| !route_history.contains(&p.node_id))
                .filter(|p| p.close_ids.contains(&candidate))
                .min_by_key(|p| p.node_id.distance_to(target))
                .cloned();
            if carrier.is_some() {
                return carrier;
            }
        }
        None
    }
}
