//! End-to-end overlay scenarios on the in-memory mesh

mod common;

use common::{recording_functors, spawn_node, wait_until, MeshRegistry, TestNode};
use kadmesh::protocol::rpcs;
use kadmesh::{Cacheable, MessageType, NodeId, Parameters, RoutingError, WireMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

type Deliveries = Arc<Mutex<Vec<(NodeId, Vec<u8>)>>>;

/// Bring up `n` nodes: the first seeds the overlay, the rest join through
/// it. Returns once every node sees the expected number of peers.
async fn build_network(
    registry: &Arc<MeshRegistry>,
    n: usize,
    base_port: u16,
    params: &Parameters,
) -> (Vec<TestNode>, Deliveries) {
    let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));

    let mut nodes = Vec::new();
    for i in 0..n {
        nodes.push(spawn_node(registry, base_port + i as u16, params));
    }

    // The seed has nothing to join; it only installs its callbacks
    let seed_functors = recording_functors(nodes[0].id, Arc::clone(&deliveries), Some(b"ok".to_vec()));
    let _ = nodes[0].node.join(seed_functors, vec![]).await;

    let seed_endpoint = nodes[0].endpoint;
    for node in nodes.iter().skip(1) {
        let functors = recording_functors(node.id, Arc::clone(&deliveries), Some(b"ok".to_vec()));
        node.node
            .join(functors, vec![seed_endpoint])
            .await
            .expect("bootstrap endpoint reachable");
        wait_until(Duration::from_secs(10), "joining node to see a peer", || {
            node.node.network_status() >= 1
        })
        .await;
    }

    // In a small overlay every node ends up seeing all-but-one peers
    let expected = (n - 1).min(params.max_routing_table_size) as i32;
    wait_until(Duration::from_secs(20), "network to converge", || {
        nodes.iter().all(|n| n.node.network_status() >= expected)
    })
    .await;

    (nodes, deliveries)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_node_join_populates_both_tables() {
    let registry = MeshRegistry::new();
    let params = Parameters::for_tests();
    let (nodes, _) = build_network(&registry, 2, 6000, &params).await;

    assert_eq!(nodes[0].node.network_status(), 1);
    assert_eq!(nodes[1].node.network_status(), 1);
    assert_eq!(nodes[0].node.random_connected_node(), Some(nodes[1].id));
    assert_eq!(nodes[1].node.random_connected_node(), Some(nodes[0].id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn find_nodes_bootstrapping_fills_tables() {
    let registry = MeshRegistry::new();
    let params = Parameters::for_tests();
    let n = 9;
    let (nodes, _) = build_network(&registry, n, 6100, &params).await;

    for node in &nodes {
        let status = node.node.network_status();
        assert!(
            status >= (n as i32) - 1,
            "node {:?} only reached {} peers",
            node.id,
            status
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn direct_send_round_trip_resolves_response() {
    let registry = MeshRegistry::new();
    let params = Parameters::for_tests();
    let (nodes, deliveries) = build_network(&registry, 4, 6200, &params).await;

    let (tx, rx) = oneshot::channel();
    nodes[1].node.send_direct(
        nodes[3].id,
        b"direct-payload".to_vec(),
        Cacheable::None,
        Box::new(move |result| {
            let _ = tx.send(result);
        }),
    );

    let result = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("response before deadline")
        .expect("slot fulfilled");
    assert_eq!(result, Ok(b"ok".to_vec()));

    let delivered = deliveries.lock().clone();
    assert!(delivered
        .iter()
        .any(|(node, payload)| *node == nodes[3].id && payload == b"direct-payload"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn group_send_replicates_to_group_size_peers() {
    let registry = MeshRegistry::new();
    let params = Parameters::for_tests();
    let (nodes, deliveries) = build_network(&registry, 9, 6300, &params).await;
    deliveries.lock().clear();

    let target = NodeId::random();
    let (tx, rx) = oneshot::channel();
    nodes[2].node.send_group(
        target,
        b"group-payload".to_vec(),
        Cacheable::None,
        Box::new(move |result| {
            let _ = tx.send(result);
        }),
    );

    wait_until(Duration::from_secs(5), "group replication", || {
        deliveries
            .lock()
            .iter()
            .filter(|(_, payload)| payload == b"group-payload")
            .count()
            >= params.group_size
    })
    .await;

    // One of the group members' replies resolves the correlation slot
    let result = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("response before deadline")
        .expect("slot fulfilled");
    assert_eq!(result, Ok(b"ok".to_vec()));

    // Give duplicates a chance to show up, then assert there are none
    tokio::time::sleep(Duration::from_millis(500)).await;
    let recipients: Vec<NodeId> = deliveries
        .lock()
        .iter()
        .filter(|(_, payload)| payload == b"group-payload")
        .map(|(node, _)| *node)
        .collect();
    assert_eq!(recipients.len(), params.group_size, "exactly group_size deliveries");
    let mut unique = recipients.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), recipients.len(), "every recipient distinct");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ack_retransmission_masks_datagram_loss() {
    let registry = MeshRegistry::new();
    let params = Parameters::for_tests();
    let (nodes, deliveries) = build_network(&registry, 2, 6400, &params).await;

    // Let the join chatter die down so the forced drops hit our message
    tokio::time::sleep(Duration::from_secs(2)).await;
    deliveries.lock().clear();
    registry.drop_next(nodes[0].id, nodes[1].id, 2);

    let started = Instant::now();
    let (tx, rx) = oneshot::channel();
    nodes[0].node.send_direct(
        nodes[1].id,
        b"retry-me".to_vec(),
        Cacheable::None,
        Box::new(move |result| {
            let _ = tx.send(result);
        }),
    );

    let result = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("response before deadline")
        .expect("slot fulfilled");
    assert_eq!(result, Ok(b"ok".to_vec()));

    // Two losses mean the delivery that got through waited out two deadlines
    assert!(
        started.elapsed() >= params.ack_timeout * 2,
        "third attempt cannot beat two ack deadlines"
    );

    let delivered = deliveries.lock().clone();
    let got_through = delivered
        .iter()
        .filter(|(node, payload)| *node == nodes[1].id && payload == b"retry-me")
        .count();
    assert_eq!(got_through, 1, "receiver sees the payload exactly once");

    // The surviving copy was confirmed back to the sender exactly once
    let request_ack = registry
        .log()
        .into_iter()
        .find(|record| {
            record.to == nodes[1].id
                && record.message.msg_type == Some(MessageType::NodeLevel as i32)
                && record.message.data.first().map(Vec::as_slice) == Some(b"retry-me".as_ref())
        })
        .expect("delivered request in log")
        .message
        .ack_id;
    let acks = registry
        .delivered_of_type(nodes[0].id, MessageType::Acknowledgement)
        .into_iter()
        .filter(|record| record.message.ack_id == request_ack)
        .count();
    assert_eq!(acks, 1, "exactly one ack for the delivered copy");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ping_request_earns_pong_and_single_ack() {
    let registry = MeshRegistry::new();
    let params = Parameters::for_tests();
    let (nodes, _) = build_network(&registry, 2, 6500, &params).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let mut ping = rpcs::ping_request(nodes[1].id, nodes[0].id, 77, params.hops_to_live);
    ping.ack_id = Some(4242);
    registry.inject(nodes[0].id, nodes[1].id, &ping);

    wait_until(Duration::from_secs(3), "pong to come back", || {
        registry
            .delivered_of_type(nodes[0].id, MessageType::Ping)
            .iter()
            .any(|record| record.message.is_response())
    })
    .await;

    let acks = registry
        .delivered_of_type(nodes[0].id, MessageType::Acknowledgement)
        .into_iter()
        .filter(|record| record.message.ack_id == Some(4242))
        .count();
    assert_eq!(acks, 1, "the ping was confirmed exactly once");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn relay_request_from_unjoined_peer_round_trips() {
    let registry = MeshRegistry::new();
    let params = Parameters::for_tests();
    let (nodes, deliveries) = build_network(&registry, 3, 6600, &params).await;
    deliveries.lock().clear();

    // A fresh peer that has not joined yet sends through the seed as relay
    let outsider = spawn_node(&registry, 6650, &params);
    let functors = recording_functors(outsider.id, Arc::clone(&deliveries), None);
    outsider
        .node
        .join(functors, vec![nodes[0].endpoint])
        .await
        .expect("relay reachable");

    // Fire before the table fills: the message travels the relay leg
    let (tx, rx) = oneshot::channel();
    outsider.node.send_direct(
        nodes[2].id,
        b"via-relay".to_vec(),
        Cacheable::None,
        Box::new(move |result| {
            let _ = tx.send(result);
        }),
    );

    let result = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("response before deadline")
        .expect("slot fulfilled");
    assert_eq!(result, Ok(b"ok".to_vec()));

    // The final hop travelled with the destination cleared and the
    // outsider's id in the relay field
    let final_leg = registry
        .log()
        .into_iter()
        .find(|record| {
            record.to == outsider.id
                && record.message.msg_type == Some(MessageType::NodeLevel as i32)
                && record.message.is_response()
        })
        .expect("relayed response reached the outsider");
    assert!(final_leg.message.destination_id.is_none());
    assert_eq!(
        final_leg.message.relay_id,
        Some(outsider.id.to_vec()),
        "relay id names the original sender"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hop_exhaustion_stops_forwarding() {
    let registry = MeshRegistry::new();
    let params = Parameters::for_tests();
    let (nodes, _) = build_network(&registry, 5, 6700, &params).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    // A far-away destination no one owns, with a single hop left
    let far = NodeId::random();
    let message = WireMessage {
        msg_type: Some(MessageType::NodeLevel as i32),
        request: Some(true),
        direct: Some(true),
        source_id: Some(nodes[0].id.to_vec()),
        destination_id: Some(far.to_vec()),
        id: Some(909),
        data: vec![b"exhausted".to_vec()],
        hops_to_live: Some(1),
        ..WireMessage::default()
    };
    registry.inject(nodes[0].id, nodes[1].id, &message);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let forwarded = registry
        .log()
        .into_iter()
        .filter(|record| record.message.id == Some(909) && record.from == nodes[1].id)
        .count();
    assert_eq!(forwarded, 0, "the exhausted message must not leave the first forwarder");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oversized_replication_is_dropped_at_the_leader() {
    let registry = MeshRegistry::new();
    let params = Parameters::for_tests();
    let (nodes, deliveries) = build_network(&registry, 6, 6800, &params).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    deliveries.lock().clear();

    let target = NodeId::random();
    let leader = nodes
        .iter()
        .min_by_key(|node| node.id.distance_to(&target))
        .unwrap();

    let message = WireMessage {
        msg_type: Some(MessageType::NodeLevel as i32),
        request: Some(true),
        direct: Some(false),
        source_id: Some(nodes[0].id.to_vec()),
        destination_id: Some(target.to_vec()),
        group_destination: Some(target.to_vec()),
        id: Some(1234),
        replication: Some(params.group_size as u32 + 3),
        visited: Some(true),
        data: vec![b"too-wide".to_vec()],
        hops_to_live: Some(params.hops_to_live as u32),
        ..WireMessage::default()
    };
    registry.inject(nodes[0].id, leader.id, &message);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(
        deliveries.lock().is_empty(),
        "an over-replicated group message delivers nowhere"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_destination_times_out() {
    let registry = MeshRegistry::new();
    let params = Parameters::for_tests();
    let (nodes, _) = build_network(&registry, 2, 6900, &params).await;

    let (tx, rx) = oneshot::channel();
    nodes[0].node.send_direct(
        NodeId::random(),
        b"nobody-home".to_vec(),
        Cacheable::None,
        Box::new(move |result| {
            let _ = tx.send(result);
        }),
    );

    let result = tokio::time::timeout(params.response_timeout + Duration::from_secs(2), rx)
        .await
        .expect("timeout before test deadline")
        .expect("slot fulfilled");
    assert_eq!(result, Err(RoutingError::Timeout));
}
