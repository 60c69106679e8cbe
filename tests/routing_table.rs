//! Routing table invariants exercised through the public API

use kadmesh::{ConnectionId, NodeId, PeerInfo, PublicKey, RoutingTable, ID_LEN};

fn id_with_prefix(byte: u8) -> NodeId {
    let mut bytes = [0u8; ID_LEN];
    bytes[0] = byte;
    NodeId::from_bytes(bytes)
}

fn peer(id: NodeId) -> PeerInfo {
    PeerInfo::new(id, PublicKey::default(), ConnectionId(id))
}

#[test]
fn closest_nodes_is_sorted_bounded_and_duplicate_free() {
    let own = NodeId::random();
    let table = RoutingTable::new(own, false, 64);

    let mut inserted = Vec::new();
    for _ in 0..40 {
        let id = NodeId::random();
        if table.add(peer(id)) {
            inserted.push(id);
        }
    }

    for _ in 0..25 {
        let target = NodeId::random();
        for n in [1usize, 4, 11, 64] {
            let closest = table.closest_nodes(&target, n);
            assert_eq!(closest.len(), n.min(table.len()));
            for window in closest.windows(2) {
                assert!(
                    window[0].node_id.distance_to(&target)
                        <= window[1].node_id.distance_to(&target),
                    "closest_nodes must be ordered by XOR distance"
                );
            }
            let mut seen: Vec<NodeId> = closest.iter().map(|p| p.node_id).collect();
            seen.sort();
            seen.dedup();
            assert_eq!(seen.len(), closest.len(), "no duplicate entries");
        }
    }
}

#[test]
fn is_closest_to_agrees_with_exhaustive_distance_check() {
    let own = NodeId::random();
    let table = RoutingTable::new(own, false, 64);
    let mut members = Vec::new();
    for _ in 0..24 {
        let id = NodeId::random();
        if table.add(peer(id)) {
            members.push(id);
        }
    }

    for _ in 0..50 {
        let target = NodeId::random();
        let expected = members
            .iter()
            .all(|id| own.distance_to(&target) <= id.distance_to(&target));
        assert_eq!(table.is_closest_to(&target, false), expected);
    }
}

#[test]
fn in_range_widens_with_the_neighbourhood_size() {
    let own = NodeId::random();
    let table = RoutingTable::new(own, false, 64);
    for _ in 0..24 {
        table.add(peer(NodeId::random()));
    }

    let target = NodeId::random();
    let mut last = false;
    for size in 1..=25 {
        let now = table.is_in_range(&target, size);
        // Once in range, growing the neighbourhood can never lose us
        assert!(now || !last, "in_range must be monotone in size");
        last = now;
    }
    assert!(table.is_in_range(&target, 25));
}

#[test]
fn duplicates_and_non_improving_candidates_fail_silently() {
    let own = id_with_prefix(0);
    let table = RoutingTable::new(own, false, 4);
    for byte in [0x10u8, 0x20, 0x30, 0x40] {
        assert!(table.add(peer(id_with_prefix(byte))));
    }
    assert_eq!(table.len(), 4);

    // Duplicate
    assert!(!table.add(peer(id_with_prefix(0x10))));
    // Further than the current furthest
    assert!(!table.add(peer(id_with_prefix(0x80))));
    assert_eq!(table.len(), 4);

    // Strictly closer than the furthest: admitted, furthest evicted
    assert!(table.add(peer(id_with_prefix(0x01))));
    assert_eq!(table.len(), 4);
    assert!(!table.contains(&id_with_prefix(0x40)));
}

#[test]
fn matrix_rows_feed_the_wider_closeness_view() {
    let own = id_with_prefix(0);
    let table = RoutingTable::new(own, false, 64);
    let carrier = id_with_prefix(0x30);
    table.add(peer(carrier));

    let hidden = id_with_prefix(0x07);
    assert!(table.update_close_ids(&carrier, vec![hidden]));

    // Directly we would be closest to 0x06..; the matrix knows better
    let target = id_with_prefix(0x06);
    assert!(table.is_closest_to(&target, false));
    assert!(!table.is_closest_to_including_matrix(&target));

    let matrix = table.closest_matrix_nodes(&target, 2);
    assert_eq!(matrix[0], hidden);
    assert_eq!(matrix[1], carrier);
}
