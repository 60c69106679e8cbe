//! Node identity and XOR closeness
//!
//! Every peer is named by a 512-bit [`NodeId`] drawn from a flat key space.
//! Closeness between ids is XOR distance: `d(a, b) = a ^ b`, compared as a
//! 512-bit unsigned integer. The same id space is used for naming peers and
//! for addressing groups, so "the group of `t`" is simply the `group_size`
//! known ids with the smallest XOR distance to `t`.

use rand::RngCore;
use std::fmt;
use std::net::SocketAddr;

/// Length of a node id in bytes (512 bits)
pub const ID_LEN: usize = 64;

/// A 512-bit identifier used for both naming and closeness
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; ID_LEN]);

impl NodeId {
    /// The all-zero id, reserved as "absent" on the wire
    pub fn zero() -> Self {
        Self([0u8; ID_LEN])
    }

    /// Whether this is the reserved all-zero id
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Construct from a raw 64-byte array
    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Construct from a byte slice; `None` unless exactly 64 bytes long
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != ID_LEN {
            return None;
        }
        let mut out = [0u8; ID_LEN];
        out.copy_from_slice(bytes);
        Some(Self(out))
    }

    /// Derive a node id from a peer's public key.
    ///
    /// The id is the 64-byte BLAKE3 extended output of the key bytes, giving
    /// a uniform spread across the key space.
    ///
    /// # Example
    ///
    /// ```
    /// use kadmesh::{NodeId, PublicKey};
    ///
    /// let key = PublicKey::new(vec![1, 2, 3]);
    /// // The same key always derives the same id
    /// assert_eq!(NodeId::from_public_key(&key), NodeId::from_public_key(&key));
    /// ```
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(public_key.as_bytes());
        let mut out = [0u8; ID_LEN];
        hasher.finalize_xof().fill(&mut out);
        Self(out)
    }

    /// A uniformly random id
    pub fn random() -> Self {
        let mut out = [0u8; ID_LEN];
        rand::thread_rng().fill_bytes(&mut out);
        Self(out)
    }

    /// Raw bytes of this id
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Raw bytes as an owned vector (wire form)
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// XOR distance from this id to `other`
    ///
    /// # Example
    ///
    /// ```
    /// use kadmesh::{Distance, NodeId};
    ///
    /// let a = NodeId::random();
    /// let b = NodeId::random();
    /// assert_eq!(a.distance_to(&a), Distance::zero());
    /// assert_eq!(a.distance_to(&b), b.distance_to(&a));
    /// ```
    pub fn distance_to(&self, other: &NodeId) -> Distance {
        let mut out = [0u8; ID_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }

    /// True iff `self` is strictly closer to `target` than `other` is
    pub fn closer_to_target(&self, other: &NodeId, target: &NodeId) -> bool {
        self.distance_to(target) < other.distance_to(target)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First six bytes are enough to tell peers apart in logs
        for byte in &self.0[..6] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..")
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// XOR distance between two ids, compared as a 512-bit unsigned integer
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance(pub(crate) [u8; ID_LEN]);

impl Distance {
    /// The zero distance (an id's distance to itself)
    pub fn zero() -> Self {
        Self([0u8; ID_LEN])
    }

    /// Raw big-endian bytes of the distance
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..6] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..")
    }
}

/// An opaque public key handed over by the key-agreement layer
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    /// Wrap raw key bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Opaque handle naming a live transport connection.
///
/// The transport names connections by the node id negotiated during its
/// handshake; a still-bootstrapping peer gets a random placeholder id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ConnectionId(pub NodeId);

impl ConnectionId {
    /// A random placeholder connection id for a peer without a settled id
    pub fn random() -> Self {
        Self(NodeId::random())
    }
}

/// Everything the routing core tracks about a known peer
#[derive(Clone, Debug)]
pub struct PeerInfo {
    /// The peer's id
    pub node_id: NodeId,
    /// The peer's public key, held opaquely
    pub public_key: PublicKey,
    /// Transport handle for the live connection to this peer
    pub connection_id: ConnectionId,
    /// Last known endpoint, if the transport exposed one
    pub endpoint: Option<SocketAddr>,
    /// Whether the peer joined as a non-routing (leaf) client
    pub is_client: bool,
    /// The peer's own close list: its view of the ids nearest to it
    pub close_ids: Vec<NodeId>,
}

impl PeerInfo {
    /// A routing peer with no matrix row yet
    pub fn new(node_id: NodeId, public_key: PublicKey, connection_id: ConnectionId) -> Self {
        Self {
            node_id,
            public_key,
            connection_id,
            endpoint: None,
            is_client: false,
            close_ids: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_with_first_byte(byte: u8) -> NodeId {
        let mut bytes = [0u8; ID_LEN];
        bytes[0] = byte;
        NodeId::from_bytes(bytes)
    }

    #[test]
    fn distance_is_symmetric_and_reflexive() {
        let a = NodeId::random();
        let b = NodeId::random();
        assert_eq!(a.distance_to(&b), b.distance_to(&a));
        assert_eq!(a.distance_to(&a), Distance::zero());
    }

    #[test]
    fn closer_to_target_orders_by_xor() {
        let target = id_with_first_byte(0x18);
        let near = id_with_first_byte(0x10);
        let far = id_with_first_byte(0x80);
        assert!(near.closer_to_target(&far, &target));
        assert!(!far.closer_to_target(&near, &target));
        // Strict: an id is not closer than itself
        assert!(!near.closer_to_target(&near, &target));
    }

    #[test]
    fn zero_id_round_trip() {
        assert!(NodeId::zero().is_zero());
        assert!(!NodeId::random().is_zero());
        let id = NodeId::random();
        assert_eq!(NodeId::from_slice(&id.to_vec()), Some(id));
        assert_eq!(NodeId::from_slice(&[0u8; 3]), None);
    }

    #[test]
    fn public_key_derivation_is_stable() {
        let key = PublicKey::new(vec![7u8; 32]);
        let first = NodeId::from_public_key(&key);
        let second = NodeId::from_public_key(&key);
        assert_eq!(first, second);
        assert!(!first.is_zero());

        let other = NodeId::from_public_key(&PublicKey::new(vec![8u8; 32]));
        assert_ne!(first, other);
    }
}
