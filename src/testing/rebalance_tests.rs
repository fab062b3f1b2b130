//! End-to-end rebalancing scenarios over the loopback transport.

use super::{build_node, link, LoopbackTransport, TestNode};
use crate::config::CachePolicy;
use crate::error::{ErrorKind, Result, TransportError};
use crate::network::rpc::{Message, MoveFragment};
use crate::network::Transport;
use crate::partition::Partition;
use crate::rebalance::FragmentPackage;
use crate::routing::RoutingUpdate;
use crate::storage::{Entry, Fragment};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Seed a data map with raw (hkey, value, timestamp) triples.
async fn seed_map(part: &Arc<Partition>, name: &str, entries: &[(u64, &[u8], i64)]) {
    let dm = part.get_or_create_map(name, Some(&CachePolicy::default()));
    let mut state = dm.lock().await;
    for (hkey, value, timestamp) in entries {
        state
            .fragment
            .put(
                *hkey,
                Entry::with_timestamp(hkey.to_be_bytes().to_vec(), value.to_vec(), *timestamp),
            )
            .unwrap();
    }
}

/// Read one entry's value out of a data map.
async fn read_value(part: &Arc<Partition>, name: &str, hkey: u64) -> Option<Vec<u8>> {
    let dm = part.map(name)?;
    let state = dm.lock().await;
    state.fragment.get(hkey).ok().map(|e| e.value.clone())
}

fn two_nodes(transport: &Arc<LoopbackTransport>) -> (TestNode, TestNode) {
    let a = build_node(transport.clone(), "127.0.0.1:4220", 100, 2, 1);
    let b = build_node(transport.clone(), "127.0.0.1:4221", 100, 2, 1);
    transport.register(a.node.clone());
    transport.register(b.node.clone());
    link(&[&a, &b]);
    (a, b)
}

#[tokio::test]
async fn test_primary_handoff() {
    super::init_tracing();
    let transport = LoopbackTransport::new();
    let (a, b) = two_nodes(&transport);

    seed_map(a.node.partition(0), "m", &[(1, b"v1", 10)]).await;

    // The routing table says B owns partition 0; A keeps partition 1.
    let update = RoutingUpdate::new()
        .set_primary(0, vec![b.node.local_member().clone()])
        .set_primary(1, vec![a.node.local_member().clone()]);
    a.node.apply_routing_update(update.clone());
    b.node.apply_routing_update(update);

    a.node.rebalance().await;

    // A deleted its copy, B holds the entry.
    assert_eq!(a.node.partition(0).length(), 0);
    assert_eq!(
        read_value(b.node.partition(0), "m", 1).await,
        Some(b"v1".to_vec())
    );
    let dm = b.node.partition(0).map("m").unwrap();
    assert_eq!(dm.lock().await.fragment.get(1).unwrap().timestamp, 10);
}

#[tokio::test]
async fn test_merge_prefers_newer_version() {
    let transport = LoopbackTransport::new();
    let (a, b) = two_nodes(&transport);

    seed_map(a.node.partition(0), "m", &[(1, b"stale", 10)]).await;
    seed_map(b.node.partition(0), "m", &[(1, b"fresh", 20)]).await;

    let update = RoutingUpdate::new().set_primary(0, vec![b.node.local_member().clone()]);
    a.node.apply_routing_update(update.clone());
    b.node.apply_routing_update(update);

    a.node.rebalance().await;

    assert_eq!(a.node.partition(0).length(), 0);
    assert_eq!(
        read_value(b.node.partition(0), "m", 1).await,
        Some(b"fresh".to_vec())
    );
}

#[tokio::test]
async fn test_access_log_first_writer_wins() {
    let transport = LoopbackTransport::new();
    let (a, b) = two_nodes(&transport);

    // A's log: h1 at 50, h2 at 75. B already saw h1 at 100.
    seed_map(a.node.partition(0), "m", &[(1, b"v1", 10), (2, b"v2", 10)]).await;
    {
        let dm = a.node.partition(0).map("m").unwrap();
        let mut state = dm.lock().await;
        let cache = state.cache.as_mut().unwrap();
        cache.touch(1, 50);
        cache.touch(2, 75);
    }
    seed_map(b.node.partition(0), "m", &[]).await;
    {
        let dm = b.node.partition(0).map("m").unwrap();
        let mut state = dm.lock().await;
        state.cache.as_mut().unwrap().touch(1, 100);
    }

    let update = RoutingUpdate::new().set_primary(0, vec![b.node.local_member().clone()]);
    a.node.apply_routing_update(update.clone());
    b.node.apply_routing_update(update);

    a.node.rebalance().await;

    let dm = b.node.partition(0).map("m").unwrap();
    let state = dm.lock().await;
    let cache = state.cache.as_ref().unwrap();
    assert_eq!(cache.last_access(1), Some(100));
    assert_eq!(cache.last_access(2), Some(75));
}

#[tokio::test]
async fn test_ownership_rejection_keeps_local_map() {
    let transport = LoopbackTransport::new();
    let (a, b) = two_nodes(&transport);

    seed_map(a.node.partition(0), "m", &[(1, b"v1", 10)]).await;

    // A still believes B owns partition 0; B has already observed the next
    // epoch, in which A owns it.
    a.node.apply_routing_update(
        RoutingUpdate::new().set_primary(0, vec![b.node.local_member().clone()]),
    );
    b.node.apply_routing_update(
        RoutingUpdate::new().set_primary(0, vec![a.node.local_member().clone()]),
    );

    a.node.rebalance().await;

    // B refused; A's copy is untouched and B stored nothing.
    assert_eq!(a.node.partition(0).length(), 1);
    assert_eq!(b.node.partition(0).length(), 0);
    assert_eq!(
        read_value(a.node.partition(0), "m", 1).await,
        Some(b"v1".to_vec())
    );
}

#[tokio::test]
async fn test_stale_incarnation_is_rejected_by_id() {
    let transport = LoopbackTransport::new();
    let a = build_node(transport.clone(), "127.0.0.1:4220", 100, 2, 1);
    // B restarted: the live node has a newer birthdate than what the
    // routing table still references.
    let b = build_node(transport.clone(), "127.0.0.1:4221", 200, 2, 1);
    transport.register(a.node.clone());
    transport.register(b.node.clone());
    link(&[&a, &b]);

    seed_map(a.node.partition(0), "m", &[(1, b"v1", 10)]).await;

    let stale_b = crate::cluster::Member::new("127.0.0.1:4221", 100);
    let update = RoutingUpdate::new().set_primary(0, vec![stale_b]);
    a.node.apply_routing_update(update.clone());
    b.node.apply_routing_update(update);

    a.node.rebalance().await;

    // The sender compared by name and shipped; the receiver compared by
    // exact identity and refused. Data stays where it was.
    assert_eq!(transport.sent_count(), 1);
    assert_eq!(a.node.partition(0).length(), 1);
    assert_eq!(b.node.partition(0).length(), 0);
}

#[tokio::test]
async fn test_own_previous_incarnation_is_never_shipped() {
    let transport = LoopbackTransport::new();
    let (a, _b) = two_nodes(&transport);

    seed_map(a.node.partition(0), "m", &[(1, b"v1", 10)]).await;

    // The table still names A's previous incarnation. By name that is
    // still "me", so nothing moves.
    let previous_self = crate::cluster::Member::new("127.0.0.1:4220", 1);
    a.node
        .apply_routing_update(RoutingUpdate::new().set_primary(0, vec![previous_self]));

    a.node.rebalance().await;

    assert_eq!(transport.sent_count(), 0);
    assert_eq!(a.node.partition(0).length(), 1);
}

#[tokio::test]
async fn test_empty_partitions_send_nothing() {
    let transport = LoopbackTransport::new();
    let (a, b) = two_nodes(&transport);

    let update = RoutingUpdate::new()
        .set_primary(0, vec![b.node.local_member().clone()])
        .set_primary(1, vec![b.node.local_member().clone()]);
    a.node.apply_routing_update(update);

    a.node.rebalance().await;

    assert_eq!(transport.sent_count(), 0);
}

#[tokio::test]
async fn test_duplicate_delivery_is_idempotent() {
    let transport = LoopbackTransport::new();
    let (a, b) = two_nodes(&transport);
    let _ = a;

    b.node.apply_routing_update(
        RoutingUpdate::new().set_primary(0, vec![b.node.local_member().clone()]),
    );

    let mut fragment = Fragment::new();
    fragment
        .put(1, Entry::with_timestamp(b"k1".to_vec(), b"v1".to_vec(), 10))
        .unwrap();
    fragment
        .put(2, Entry::with_timestamp(b"k2".to_vec(), b"v2".to_vec(), 5))
        .unwrap();
    let mut access_log = HashMap::new();
    access_log.insert(1u64, 42i64);
    let package = FragmentPackage {
        part_id: 0,
        backup: false,
        name: "m".to_string(),
        payload: fragment.export().unwrap(),
        access_log,
    }
    .encode()
    .unwrap();

    for _ in 0..2 {
        let response = b
            .node
            .handle_message(Message::MoveFragment(MoveFragment {
                package: package.clone(),
            }))
            .await;
        assert!(matches!(response, Message::Ok));
    }

    let dm = b.node.partition(0).map("m").unwrap();
    let state = dm.lock().await;
    assert_eq!(state.fragment.len(), 2);
    assert_eq!(state.fragment.get(1).unwrap().value, b"v1");
    assert_eq!(state.fragment.get(2).unwrap().value, b"v2");
}

/// Transport that republishes the routing table on the first send, so the
/// pass observes an epoch change while a move is in flight.
#[derive(Debug)]
struct EpochBumpTransport {
    inner: Arc<LoopbackTransport>,
    node: OnceLock<Arc<crate::node::Node>>,
    fired: AtomicBool,
}

#[async_trait]
impl Transport for EpochBumpTransport {
    async fn send(&self, addr: &str, msg: Message) -> Result<Message> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            if let Some(node) = self.node.get() {
                node.apply_routing_update(RoutingUpdate::new());
            }
        }
        self.inner.send(addr, msg).await
    }
}

#[tokio::test]
async fn test_epoch_change_cancels_pass() {
    let inner = LoopbackTransport::new();
    let transport = Arc::new(EpochBumpTransport {
        inner: inner.clone(),
        node: OnceLock::new(),
        fired: AtomicBool::new(false),
    });

    let part_count = 8u64;
    let a = build_node(transport.clone(), "127.0.0.1:4220", 100, part_count, 1);
    let b = build_node(inner.clone(), "127.0.0.1:4221", 100, part_count, 1);
    inner.register(a.node.clone());
    inner.register(b.node.clone());
    link(&[&a, &b]);
    transport.node.set(a.node.clone()).unwrap();

    let mut update = RoutingUpdate::new();
    for part_id in 0..part_count {
        seed_map(a.node.partition(part_id), "m", &[(1, b"v", 10)]).await;
        update = update.set_primary(part_id, vec![b.node.local_member().clone()]);
    }
    a.node.apply_routing_update(update.clone());
    b.node.apply_routing_update(update);

    a.node.rebalance().await;

    // The in-flight move for partition 0 completed; the epoch change
    // stopped the pass before any further partition was touched.
    assert_eq!(a.node.partition(0).length(), 0);
    for part_id in 1..part_count {
        assert_eq!(a.node.partition(part_id).length(), 1, "partition {}", part_id);
    }
    assert_eq!(inner.sent_count(), 1);
}

#[tokio::test]
async fn test_fragmented_merge_still_acknowledges() {
    let transport = LoopbackTransport::new();
    let (a, b) = two_nodes(&transport);

    seed_map(a.node.partition(0), "m", &[(1, b"tiny", 20)]).await;

    // B's local fragment trips the garbage threshold on the first
    // overwrite.
    {
        let dm = b
            .node
            .partition(0)
            .get_or_create_map("m", Some(&CachePolicy::default()));
        let mut state = dm.lock().await;
        state.fragment = Fragment::with_garbage_threshold(8);
        state
            .fragment
            .put(
                1,
                Entry::with_timestamp(b"k".to_vec(), vec![0u8; 256], 10),
            )
            .unwrap();
    }

    let update = RoutingUpdate::new().set_primary(0, vec![b.node.local_member().clone()]);
    a.node.apply_routing_update(update.clone());
    b.node.apply_routing_update(update);

    a.node.rebalance().await;

    // The fragmented signal was treated as success: A got the ack and the
    // newer entry won.
    assert_eq!(a.node.partition(0).length(), 0);
    assert_eq!(
        read_value(b.node.partition(0), "m", 1).await,
        Some(b"tiny".to_vec())
    );

    // The scheduled compaction reclaims the garbage.
    let dm = b.node.partition(0).map("m").unwrap();
    for _ in 0..100 {
        if dm.lock().await.fragment.garbage_bytes() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("compaction never ran");
}

#[tokio::test]
async fn test_backup_with_exact_replica_budget_is_noop() {
    let transport = LoopbackTransport::new();
    let a = build_node(transport.clone(), "127.0.0.1:4220", 100, 2, 2);
    let b = build_node(transport.clone(), "127.0.0.1:4221", 100, 2, 2);
    transport.register(a.node.clone());
    transport.register(b.node.clone());
    link(&[&a, &b]);

    seed_map(a.node.backup_partition(0), "m", &[(1, b"v", 10)]).await;

    // replica_count 2 means one backup owner; the list already has exactly
    // one entry, so the configuration is satisfied.
    let update = RoutingUpdate::new().set_backup(0, vec![b.node.local_member().clone()]);
    a.node.apply_routing_update(update);

    a.node.rebalance().await;

    assert_eq!(transport.sent_count(), 0);
    assert_eq!(a.node.backup_partition(0).length(), 1);
}

#[tokio::test]
async fn test_backup_handoff_to_tail_owner() {
    let transport = LoopbackTransport::new();
    let a = build_node(transport.clone(), "127.0.0.1:4220", 100, 2, 2);
    let b = build_node(transport.clone(), "127.0.0.1:4221", 100, 2, 2);
    transport.register(a.node.clone());
    transport.register(b.node.clone());
    link(&[&a, &b]);

    seed_map(a.node.backup_partition(0), "m", &[(1, b"v", 10)]).await;

    // Two listed owners against a budget of one: the tail owner B is the
    // current replica, A is stale and hands its data off.
    let update = RoutingUpdate::new().set_backup(
        0,
        vec![
            a.node.local_member().clone(),
            b.node.local_member().clone(),
        ],
    );
    a.node.apply_routing_update(update.clone());
    b.node.apply_routing_update(update);

    a.node.rebalance().await;

    assert_eq!(a.node.backup_partition(0).length(), 0);
    assert_eq!(
        read_value(b.node.backup_partition(0), "m", 1).await,
        Some(b"v".to_vec())
    );
}

#[tokio::test]
async fn test_backup_tail_clamps_when_owners_are_short() {
    let transport = LoopbackTransport::new();
    let a = build_node(transport.clone(), "127.0.0.1:4220", 100, 2, 3);
    let b = build_node(transport.clone(), "127.0.0.1:4221", 100, 2, 3);
    transport.register(a.node.clone());
    transport.register(b.node.clone());
    link(&[&a, &b]);

    seed_map(a.node.backup_partition(0), "m", &[(1, b"v", 10)]).await;

    // Budget is two but only one owner is listed. The tail offset clamps
    // to zero and the single listed owner still receives the data.
    let update = RoutingUpdate::new().set_backup(0, vec![b.node.local_member().clone()]);
    a.node.apply_routing_update(update.clone());
    b.node.apply_routing_update(update);

    a.node.rebalance().await;

    assert_eq!(a.node.backup_partition(0).length(), 0);
    assert_eq!(
        read_value(b.node.backup_partition(0), "m", 1).await,
        Some(b"v".to_vec())
    );
}

/// Transport that parks every request long enough for a second rebalance
/// trigger to arrive, then fails so the map stays put.
#[derive(Debug, Default)]
struct SlowFailTransport {
    sent: AtomicU64,
}

#[async_trait]
impl Transport for SlowFailTransport {
    async fn send(&self, _addr: &str, _msg: Message) -> Result<Message> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        Err(TransportError::ConnectionClosed.into())
    }
}

#[tokio::test]
async fn test_overlapping_triggers_collapse() {
    let transport = Arc::new(SlowFailTransport::default());
    let a = build_node(transport.clone(), "127.0.0.1:4220", 100, 1, 1);
    let b_member = crate::cluster::Member::new("127.0.0.1:4221", 100);

    seed_map(a.node.partition(0), "m", &[(1, b"v", 10)]).await;
    a.node
        .apply_routing_update(RoutingUpdate::new().set_primary(0, vec![b_member]));

    let node = a.node.clone();
    let first = tokio::spawn(async move { node.rebalance().await });
    tokio::time::sleep(Duration::from_millis(30)).await;

    // The first pass is parked inside the transport; this trigger must
    // coalesce instead of starting a second pass.
    a.node.rebalance().await;
    first.await.unwrap();

    assert_eq!(transport.sent.load(Ordering::SeqCst), 1);
    // The send failed, so the map is retained for a later pass.
    assert_eq!(a.node.partition(0).length(), 1);
}

#[tokio::test]
async fn test_transport_error_keeps_map_for_retry() {
    let transport = LoopbackTransport::new();
    let a = build_node(transport.clone(), "127.0.0.1:4220", 100, 2, 1);
    let b = build_node(transport.clone(), "127.0.0.1:4221", 100, 2, 1);
    transport.register(a.node.clone());
    // B is unreachable: registered in discovery but not on the network.
    link(&[&a, &b]);

    seed_map(a.node.partition(0), "m", &[(1, b"v1", 10)]).await;
    let update = RoutingUpdate::new().set_primary(0, vec![b.node.local_member().clone()]);
    a.node.apply_routing_update(update.clone());
    b.node.apply_routing_update(update);

    a.node.rebalance().await;
    assert_eq!(a.node.partition(0).length(), 1);

    // The peer comes back; the next pass succeeds.
    transport.register(b.node.clone());
    a.node.rebalance().await;
    assert_eq!(a.node.partition(0).length(), 0);
    assert_eq!(
        read_value(b.node.partition(0), "m", 1).await,
        Some(b"v1".to_vec())
    );
}

#[tokio::test]
async fn test_receiver_rejects_while_not_operable() {
    let transport = LoopbackTransport::new();
    let (a, b) = two_nodes(&transport);
    let _ = a;

    let package = FragmentPackage {
        part_id: 0,
        backup: false,
        name: "m".to_string(),
        payload: Fragment::new().export().unwrap(),
        access_log: HashMap::new(),
    }
    .encode()
    .unwrap();

    b.node.shutdown().await;
    let response = b
        .node
        .handle_message(Message::MoveFragment(MoveFragment { package }))
        .await;

    match response {
        Message::Error(resp) => assert_eq!(resp.kind, ErrorKind::NotOperable),
        other => panic!("expected error response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_receiver_rejects_out_of_range_partition() {
    let transport = LoopbackTransport::new();
    let (_a, b) = two_nodes(&transport);

    let package = FragmentPackage {
        part_id: 99,
        backup: false,
        name: "m".to_string(),
        payload: Fragment::new().export().unwrap(),
        access_log: HashMap::new(),
    }
    .encode()
    .unwrap();

    let response = b
        .node
        .handle_message(Message::MoveFragment(MoveFragment { package }))
        .await;

    match response {
        Message::Error(resp) => assert_eq!(resp.kind, ErrorKind::InvalidArgument),
        other => panic!("expected error response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_receiver_rejects_garbage_payload() {
    let transport = LoopbackTransport::new();
    let (_a, b) = two_nodes(&transport);

    let response = b
        .node
        .handle_message(Message::MoveFragment(MoveFragment {
            package: vec![0xde, 0xad, 0xbe, 0xef],
        }))
        .await;

    match response {
        Message::Error(resp) => assert_eq!(resp.kind, ErrorKind::Decode),
        other => panic!("expected error response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_handoff_over_tcp() {
    use crate::network::TcpTransport;
    use tokio::net::{TcpListener, TcpStream};

    // Grab an OS-assigned port for B's server.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let tcp = Arc::new(TcpTransport::new(
        Duration::from_secs(1),
        Duration::from_secs(5),
    ));
    let a = build_node(tcp.clone(), "127.0.0.1:4220", 100, 2, 1);

    let b = {
        let name = addr.to_string();
        let member = crate::cluster::Member::new(name.clone(), 100);
        let discovery = Arc::new(crate::cluster::StaticDiscovery::new(member));
        let mut config = crate::config::Config::new(addr).with_partition_count(2);
        config.rebalance_interval = Duration::from_secs(3600);
        let node = crate::node::Node::new(config, discovery, tcp.clone()).unwrap();
        node.mark_bootstrapped();
        node
    };
    b.start();

    // Wait until the server accepts connections.
    for _ in 0..100 {
        if TcpStream::connect(addr).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    seed_map(a.node.partition(0), "m", &[(1, b"v1", 10)]).await;
    let update = RoutingUpdate::new().set_primary(0, vec![b.local_member().clone()]);
    a.node.apply_routing_update(update.clone());
    b.apply_routing_update(update);

    a.node.rebalance().await;

    assert_eq!(a.node.partition(0).length(), 0);
    assert_eq!(
        read_value(b.partition(0), "m", 1).await,
        Some(b"v1".to_vec())
    );

    b.shutdown().await;
}
