//! Network statistics
//!
//! Responses crossing the overlay may piggyback an `average_distance`
//! sample: the sender's current estimate of the mean XOR distance between
//! close ids. Aggregating the samples gives each node a cheap estimate of
//! network density without any dedicated traffic.

use crate::id::{NodeId, ID_LEN};
use parking_lot::Mutex;

/// Width of the running sum: 512-bit samples plus carry headroom for 2^64
/// of them
const SUM_LEN: usize = ID_LEN + 8;

struct Inner {
    /// Big-endian running sum of all samples
    sum: [u8; SUM_LEN],
    count: u64,
}

/// Running mean of piggybacked distance samples
pub struct NetworkStatistics {
    node_id: NodeId,
    inner: Mutex<Inner>,
}

impl NetworkStatistics {
    /// New, empty estimate for the node owning `node_id`
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            inner: Mutex::new(Inner {
                sum: [0u8; SUM_LEN],
                count: 0,
            }),
        }
    }

    /// The id whose samples feed this estimate
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Fold one piggybacked sample into the running mean
    pub fn update_network_average_distance(&self, sample: &NodeId) {
        let mut inner = self.inner.lock();
        let mut carry = 0u16;
        let sample_bytes = sample.as_bytes();
        for i in 0..SUM_LEN {
            let sum_idx = SUM_LEN - 1 - i;
            let add = if i < ID_LEN {
                sample_bytes[ID_LEN - 1 - i] as u16
            } else {
                0
            };
            let total = inner.sum[sum_idx] as u16 + add + carry;
            inner.sum[sum_idx] = total as u8;
            carry = total >> 8;
        }
        inner.count = inner.count.saturating_add(1);
    }

    /// Current mean distance, or `None` before any sample arrived
    pub fn network_average_distance(&self) -> Option<NodeId> {
        let inner = self.inner.lock();
        if inner.count == 0 {
            return None;
        }
        // Big-endian long division of the sum by the sample count; the
        // quotient never exceeds the largest sample, so it fits an id
        let divisor = inner.count as u128;
        let mut remainder = 0u128;
        let mut quotient = [0u8; SUM_LEN];
        for i in 0..SUM_LEN {
            remainder = (remainder << 8) | inner.sum[i] as u128;
            quotient[i] = (remainder / divisor) as u8;
            remainder %= divisor;
        }
        let mut id_bytes = [0u8; ID_LEN];
        id_bytes.copy_from_slice(&quotient[SUM_LEN - ID_LEN..]);
        Some(NodeId::from_bytes(id_bytes))
    }

    /// Number of samples folded in so far
    pub fn sample_count(&self) -> u64 {
        self.inner.lock().count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_from(byte: u8) -> NodeId {
        let mut bytes = [0u8; ID_LEN];
        bytes[ID_LEN - 1] = byte;
        NodeId::from_bytes(bytes)
    }

    #[test]
    fn empty_estimate_reports_none() {
        let stats = NetworkStatistics::new(NodeId::random());
        assert_eq!(stats.network_average_distance(), None);
        assert_eq!(stats.sample_count(), 0);
    }

    #[test]
    fn mean_of_small_samples() {
        let stats = NetworkStatistics::new(NodeId::random());
        stats.update_network_average_distance(&id_from(10));
        stats.update_network_average_distance(&id_from(20));
        stats.update_network_average_distance(&id_from(30));
        assert_eq!(stats.network_average_distance(), Some(id_from(20)));
        assert_eq!(stats.sample_count(), 3);
    }

    #[test]
    fn sum_carries_across_byte_boundaries() {
        let stats = NetworkStatistics::new(NodeId::random());
        stats.update_network_average_distance(&id_from(200));
        stats.update_network_average_distance(&id_from(100));
        // (200 + 100) / 2 = 150, whose sum 300 does not fit one byte
        assert_eq!(stats.network_average_distance(), Some(id_from(150)));
    }
}
