//! Cache hooks
//!
//! The routing core touches content caching in exactly two places: a
//! cacheable GET request may be served out of the local store instead of
//! travelling further, and a cacheable PUT response is teed into the store
//! on its way past. Everything else about storage lives above this crate,
//! behind the [`CacheStore`] seam.

use crate::id::NodeId;
use crate::protocol::WireMessage;
use std::sync::Arc;
use tracing::debug;

/// Content store consumed by the routing core
pub trait CacheStore: Send + Sync {
    /// Look up the content a GET request names; `None` on miss
    fn get(&self, request: &[u8]) -> Option<Vec<u8>>;

    /// Record the payload of a PUT response passing through
    fn put(&self, response: &[u8]);
}

/// Serves cacheable traffic out of a [`CacheStore`]
pub struct CacheManager {
    node_id: NodeId,
    store: Arc<dyn CacheStore>,
}

impl CacheManager {
    /// Wrap `store` for the node owning `node_id`
    pub fn new(node_id: NodeId, store: Arc<dyn CacheStore>) -> Self {
        Self { node_id, store }
    }

    /// Try to satisfy a cacheable GET locally.
    ///
    /// On a hit, returns the synthesised response frame: source and
    /// destination swapped, the relay leg preserved for the return trip. On
    /// a miss returns `None` and the caller forwards the request as usual.
    pub fn handle_cache_lookup(&self, message: &WireMessage) -> Option<WireMessage> {
        let request = message.data.first()?;
        let content = self.store.get(request)?;
        debug!(id = message.correlation_id(), "Cache hit, answering locally");

        let mut response = message.clone();
        response.request = Some(false);
        response.direct = Some(true);
        response.destination_id = message.source_id.clone();
        response.source_id = Some(self.node_id.to_vec());
        response.last_id = Some(self.node_id.to_vec());
        response.data = vec![content];
        response.ack_id = None;
        response.route_history.clear();
        Some(response)
    }

    /// Tee the payload of a cacheable PUT response into the store
    pub fn store_cache_copy(&self, message: &WireMessage) {
        if let Some(payload) = message.data.first() {
            self.store.put(payload);
        }
    }
}
