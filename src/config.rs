//! Routing parameters
//!
//! All tunables recognised by the routing core, bundled into a single
//! [`Parameters`] value so that every component shares one consistent view.
//! The defaults match a small-to-medium overlay; tests shrink several of them.

use std::time::Duration;

/// Recognised configuration values for a routing node
#[derive(Debug, Clone)]
pub struct Parameters {
    /// Replication factor for group messages
    pub group_size: usize,

    /// Neighbourhood size used for in-range predicates
    pub closest_nodes_size: usize,

    /// Maximum number of peers held in the routing table
    pub max_routing_table_size: usize,

    /// Maximum number of directly-attached client peers
    pub max_client_table_size: usize,

    /// Per-hop ack retries before giving up
    pub max_ack_attempts: u8,

    /// Per-hop ack deadline
    pub ack_timeout: Duration,

    /// Initial hop budget stamped on new messages
    pub hops_to_live: u8,

    /// Deadline for end-to-end request/response correlation
    pub response_timeout: Duration,

    /// Pause between repeated find-nodes rounds while joining
    pub find_nodes_retry_interval: Duration,

    /// How many find-nodes rounds a join attempts before settling for
    /// whatever the table holds
    pub max_find_nodes_rounds: usize,

    /// Upper bound on the `route_history` trail carried by group messages
    pub max_route_history: usize,

    /// Master switch for GET/PUT caching
    pub caching_enabled: bool,
}

impl Parameters {
    /// Parameters suitable for unit and integration tests: small tables,
    /// short deadlines.
    pub fn for_tests() -> Self {
        Self {
            max_routing_table_size: 16,
            ack_timeout: Duration::from_millis(200),
            response_timeout: Duration::from_secs(2),
            find_nodes_retry_interval: Duration::from_millis(250),
            ..Self::default()
        }
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            group_size: 4,
            closest_nodes_size: 8,
            max_routing_table_size: 64,
            max_client_table_size: 64,
            max_ack_attempts: 3,
            ack_timeout: Duration::from_secs(2),
            hops_to_live: 10,
            response_timeout: Duration::from_secs(10),
            find_nodes_retry_interval: Duration::from_secs(1),
            max_find_nodes_rounds: 5,
            max_route_history: 3,
            caching_enabled: false,
        }
    }
}
