//! Routing node facade
//!
//! [`RoutingNode`] assembles the routing core around a transport and
//! exposes the application surface: joining, direct and group sends with
//! response correlation, typed sends, group queries, and the closeness
//! predicates the layer above builds its consensus on.

use crate::ack::Acknowledgement;
use crate::api::functors::{Functors, ResponseFunctor, SharedFunctors};
use crate::cache::{CacheManager, CacheStore};
use crate::config::Parameters;
use crate::error::{Result, RoutingError};
use crate::handler::{MessageHandler, NodeValidator};
use crate::id::{ConnectionId, NodeId, PublicKey};
use crate::message::{Cacheable, TypedMessage};
use crate::network::{IncomingReceiver, Network, Transport};
use crate::protocol::wire::GetGroupResponse;
use crate::protocol::{self, rpcs, WireMessage};
use crate::routing::{ClientRoutingTable, RoutingTable};
use crate::stats::NetworkStatistics;
use crate::timer::Timer;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where a target id falls relative to this node's neighbourhood
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRangeStatus {
    /// Within the `group_size` closest known ids
    InRange,
    /// Outside the group but within the close neighbourhood
    InProximalRange,
    /// Beyond the close neighbourhood
    OutOfRange,
}

/// Builder for [`RoutingNode`] with progressive configuration
pub struct RoutingNodeBuilder {
    node_id: Option<NodeId>,
    public_key: PublicKey,
    client_mode: bool,
    endpoint: Option<SocketAddr>,
    cache_store: Option<Arc<dyn CacheStore>>,
    params: Parameters,
}

impl RoutingNodeBuilder {
    /// Start from defaults: routing mode, default parameters, random id
    pub fn new() -> Self {
        Self {
            node_id: None,
            public_key: PublicKey::default(),
            client_mode: false,
            endpoint: None,
            cache_store: None,
            params: Parameters::default(),
        }
    }

    /// Fix the node id instead of deriving it from the public key
    pub fn with_node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// Set the public key other peers will see; the node id is derived
    /// from it unless one was fixed explicitly
    pub fn with_public_key(mut self, public_key: PublicKey) -> Self {
        self.public_key = public_key;
        self
    }

    /// Run as a non-routing client
    pub fn with_client_mode(mut self, client_mode: bool) -> Self {
        self.client_mode = client_mode;
        self
    }

    /// Advertise this endpoint in connect handshakes
    pub fn with_endpoint(mut self, endpoint: SocketAddr) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Attach a content store for the cacheable GET/PUT path
    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Override the routing parameters
    pub fn with_parameters(mut self, params: Parameters) -> Self {
        self.params = params;
        self
    }

    /// Assemble the node on top of `transport`, draining `incoming`.
    ///
    /// Must run inside a tokio runtime: the receive loop starts
    /// immediately.
    pub fn build(self, transport: Arc<dyn Transport>, incoming: IncomingReceiver) -> RoutingNode {
        let node_id = self.node_id.unwrap_or_else(|| {
            if self.public_key.as_bytes().is_empty() {
                NodeId::random()
            } else {
                NodeId::from_public_key(&self.public_key)
            }
        });

        let params = self.params;
        let routing_table = Arc::new(RoutingTable::new(
            node_id,
            self.client_mode,
            params.max_routing_table_size,
        ));
        let client_table = Arc::new(ClientRoutingTable::new(node_id, params.max_client_table_size));
        let ack = Arc::new(Acknowledgement::new(params.max_ack_attempts));
        let network = Arc::new(Network::new(
            transport,
            Arc::clone(&routing_table),
            Arc::clone(&client_table),
            ack,
            params.clone(),
        ));
        let timer = Arc::new(Timer::new());
        let stats = Arc::new(NetworkStatistics::new(node_id));
        let functors: SharedFunctors = Arc::new(RwLock::new(Functors::default()));
        let validator = NodeValidator::new(
            Arc::clone(&routing_table),
            Arc::clone(&client_table),
            Arc::clone(&network),
            Arc::clone(&functors),
            params.clone(),
        );
        let cache = if self.client_mode {
            None
        } else {
            self.cache_store
                .map(|store| CacheManager::new(node_id, store))
        };

        let handler = Arc::new(MessageHandler::new(
            Arc::clone(&routing_table),
            Arc::clone(&client_table),
            Arc::clone(&network),
            Arc::clone(&timer),
            Arc::clone(&stats),
            cache,
            validator.clone(),
            self.public_key.clone(),
            self.endpoint,
            Arc::clone(&functors),
            params.clone(),
        ));

        let receive_task = spawn_receive_loop(Arc::clone(&handler), incoming);

        RoutingNode {
            routing_table,
            client_table,
            network,
            timer,
            stats,
            handler,
            validator,
            functors,
            params,
            public_key: self.public_key,
            receive_task,
        }
    }
}

impl Default for RoutingNodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_receive_loop(handler: Arc<MessageHandler>, mut incoming: IncomingReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((connection, bytes)) = incoming.recv().await {
            match protocol::decode_message::<WireMessage>(&bytes) {
                Ok(message) => handler.handle(message, connection),
                Err(error) => warn!(%error, "Dropping malformed inbound bytes"),
            }
        }
        debug!("Transport inbound channel closed, receive loop ending");
    })
}

/// A running routing node
pub struct RoutingNode {
    routing_table: Arc<RoutingTable>,
    client_table: Arc<ClientRoutingTable>,
    network: Arc<Network>,
    timer: Arc<Timer>,
    stats: Arc<NetworkStatistics>,
    #[allow(dead_code)]
    handler: Arc<MessageHandler>,
    validator: NodeValidator,
    functors: SharedFunctors,
    params: Parameters,
    public_key: PublicKey,
    receive_task: JoinHandle<()>,
}

impl RoutingNode {
    /// This node's id
    pub fn node_id(&self) -> NodeId {
        self.routing_table.node_id()
    }

    /// Install the user callbacks and join through the given bootstrap
    /// endpoints.
    ///
    /// Connects to the first reachable endpoint and issues the initial
    /// find-nodes for our own id through it; table population continues as
    /// responses and connect exchanges come back, with a few repeated
    /// find-nodes rounds to pick up candidates discovered since.
    pub async fn join(&self, functors: Functors, bootstrap: Vec<SocketAddr>) -> Result<()> {
        *self.functors.write() = functors;

        for endpoint in bootstrap {
            match self.network.transport().connect(endpoint).await {
                Ok(connection) => {
                    info!(%endpoint, "Connected to bootstrap");
                    self.network.set_bootstrap_connection(Some(connection));
                    self.send_find_nodes_round();
                    self.spawn_find_nodes_refresh();
                    return Ok(());
                }
                Err(error) => {
                    warn!(%endpoint, %error, "Bootstrap endpoint unreachable");
                }
            }
        }
        Err(RoutingError::NotJoined.into())
    }

    /// One find-nodes round for our own id; anonymous over the relay leg
    /// until the first peer lands in the table
    fn send_find_nodes_round(&self) {
        let own = self.node_id();
        let request = rpcs::find_nodes_request(
            self.params.closest_nodes_size,
            own,
            own,
            self.relay_leg(),
            self.timer.new_request_id(),
            self.params.hops_to_live,
        );
        self.network.send_to_closest_node(&request);
    }

    fn spawn_find_nodes_refresh(&self) {
        let routing_table = Arc::clone(&self.routing_table);
        let network = Arc::clone(&self.network);
        let timer = Arc::clone(&self.timer);
        let params = self.params.clone();
        tokio::spawn(async move {
            for _ in 0..params.max_find_nodes_rounds {
                tokio::time::sleep(params.find_nodes_retry_interval).await;
                if routing_table.len() >= params.closest_nodes_size {
                    break;
                }
                let own = routing_table.node_id();
                let relay = if routing_table.is_empty() {
                    Some(rpcs::RelayLeg {
                        relay_id: own,
                        relay_connection_id: own,
                    })
                } else {
                    None
                };
                debug!(peers = routing_table.len(), "Repeating find-nodes round");
                let request = rpcs::find_nodes_request(
                    params.closest_nodes_size,
                    own,
                    own,
                    relay,
                    timer.new_request_id(),
                    params.hops_to_live,
                );
                network.send_to_closest_node(&request);
            }
        });
    }

    /// Send `data` to the peer owning `destination`; `on_response` resolves
    /// with the reply or a timeout
    pub fn send_direct(
        &self,
        destination: NodeId,
        data: Vec<u8>,
        cacheable: Cacheable,
        on_response: ResponseFunctor,
    ) {
        let id = self.timer.new_request_id();
        self.timer
            .add_request(id, self.params.response_timeout, on_response);
        let message = rpcs::node_level_request(
            destination,
            self.node_id(),
            data,
            true,
            cacheable,
            1,
            self.relay_leg(),
            self.routing_table.client_mode(),
            id,
            self.params.hops_to_live,
        );
        self.network.send_to_closest_node(&message);
    }

    /// Send `data` to the `group_size` peers closest to `destination`
    pub fn send_group(
        &self,
        destination: NodeId,
        data: Vec<u8>,
        cacheable: Cacheable,
        on_response: ResponseFunctor,
    ) {
        let id = self.timer.new_request_id();
        self.timer
            .add_request(id, self.params.response_timeout, on_response);
        let message = rpcs::node_level_request(
            destination,
            self.node_id(),
            data,
            false,
            cacheable,
            self.params.group_size as u32,
            self.relay_leg(),
            self.routing_table.client_mode(),
            id,
            self.params.hops_to_live,
        );
        self.network.send_to_closest_node(&message);
    }

    /// Send one of the five typed envelopes
    pub fn send(&self, message: TypedMessage) {
        let own = self.node_id();
        let id = self.timer.new_request_id();
        let hops = self.params.hops_to_live;
        let client = self.routing_table.client_mode();

        let wire = match message {
            TypedMessage::SingleToSingle(m) => rpcs::node_level_request(
                m.destination.0,
                own,
                m.contents,
                true,
                m.cacheable,
                1,
                None,
                client,
                id,
                hops,
            ),
            TypedMessage::SingleToGroup(m) => rpcs::node_level_request(
                m.destination.0,
                own,
                m.contents,
                false,
                m.cacheable,
                self.params.group_size as u32,
                None,
                client,
                id,
                hops,
            ),
            TypedMessage::GroupToSingle(m) => {
                let mut wire = rpcs::node_level_request(
                    m.destination.0,
                    own,
                    m.contents,
                    true,
                    m.cacheable,
                    1,
                    None,
                    client,
                    id,
                    hops,
                );
                wire.group_source = Some(m.source.group_id.0.to_vec());
                wire
            }
            TypedMessage::GroupToGroup(m) => {
                let mut wire = rpcs::node_level_request(
                    m.destination.0,
                    own,
                    m.contents,
                    false,
                    m.cacheable,
                    self.params.group_size as u32,
                    None,
                    client,
                    id,
                    hops,
                );
                wire.group_source = Some(m.source.group_id.0.to_vec());
                wire
            }
            TypedMessage::SingleToGroupRelay(m) => {
                let mut wire = rpcs::node_level_request(
                    m.destination.0,
                    m.source.relay_node.0,
                    m.contents,
                    false,
                    m.cacheable,
                    self.params.group_size as u32,
                    None,
                    client,
                    id,
                    hops,
                );
                wire.relay_id = Some(m.source.origin.0.to_vec());
                wire.relay_connection_id = Some(m.source.connection_id.to_vec());
                wire
            }
        };
        self.network.send_to_closest_node(&wire);
    }

    /// Ask the overlay for the composition of `target`'s group
    pub fn get_group(
        &self,
        target: NodeId,
    ) -> impl std::future::Future<Output = Result<Vec<NodeId>>> {
        let id = self.timer.new_request_id();
        let (tx, rx) = oneshot::channel();
        self.timer.add_request(
            id,
            self.params.response_timeout,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        let request = rpcs::get_group_request(target, self.node_id(), id, self.params.hops_to_live);
        self.network.send_to_closest_node(&request);

        async move {
            let payload = rx
                .await
                .map_err(|_| RoutingError::Cancelled)?
                .map_err(crate::error::Error::from)?;
            let response: GetGroupResponse = protocol::decode_message(&payload)
                .map_err(crate::error::Error::from)?;
            Ok(response
                .node_ids
                .iter()
                .filter_map(|raw| NodeId::from_slice(raw))
                .collect())
        }
    }

    /// Whether this node is closest to `target` among its known peers
    pub fn closest_to_id(&self, target: &NodeId) -> bool {
        self.routing_table.is_closest_to(target, true)
    }

    /// Where `target` falls relative to this node's neighbourhood
    pub fn is_in_group_range(&self, target: &NodeId) -> GroupRangeStatus {
        if self.routing_table.is_in_range(target, self.params.group_size) {
            GroupRangeStatus::InRange
        } else if self
            .routing_table
            .is_in_range(target, self.params.closest_nodes_size)
        {
            GroupRangeStatus::InProximalRange
        } else {
            GroupRangeStatus::OutOfRange
        }
    }

    /// A uniformly random connected peer id
    pub fn random_connected_node(&self) -> Option<NodeId> {
        self.routing_table.random_peer().map(|peer| peer.node_id)
    }

    /// Connectivity figure: the routing table size once joined, negative
    /// before that
    pub fn network_status(&self) -> i32 {
        if self.routing_table.is_empty() {
            -1
        } else {
            self.routing_table.len() as i32
        }
    }

    /// The public key peers see in our handshakes
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Current mean of piggybacked network-distance samples
    pub fn network_average_distance(&self) -> Option<NodeId> {
        self.stats.network_average_distance()
    }

    /// Transport notification: a connection dropped.
    ///
    /// Removes whichever peer record was attached to it and tells the close
    /// group about the change.
    pub fn connection_lost(&self, connection: ConnectionId) {
        if let Some(peer) = self.routing_table.remove_connection(&connection) {
            info!(peer = %peer.node_id, "Routing peer disconnected");
            self.validator.broadcast_close_list();
            self.validator.notify_network_status();
            return;
        }
        if let Some(client) = self.client_table.remove_connection(&connection) {
            info!(client = %client.node_id, "Client peer disconnected");
        }
    }

    /// While unjoined, traffic travels a relay leg instead of claiming a
    /// source id
    fn relay_leg(&self) -> Option<rpcs::RelayLeg> {
        if self.routing_table.is_empty() {
            let own = self.node_id();
            Some(rpcs::RelayLeg {
                relay_id: own,
                relay_connection_id: own,
            })
        } else {
            None
        }
    }
}

impl Drop for RoutingNode {
    fn drop(&mut self) {
        self.receive_task.abort();
        self.timer.cancel_all();
        self.network.ack_engine().remove_all();
    }
}
