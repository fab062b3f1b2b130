//! Testing utilities: in-process clusters over a loopback transport.
//!
//! The loopback transport dispatches requests straight into the target
//! node's message handler, so multi-node rebalancing scenarios run in one
//! process without sockets.

#[cfg(test)]
mod rebalance_tests;

use crate::cluster::{Member, StaticDiscovery};
use crate::config::Config;
use crate::error::{Result, TransportError};
use crate::network::rpc::Message;
use crate::network::Transport;
use crate::node::Node;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Transport that routes requests to in-process nodes by advertised name.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    nodes: DashMap<String, Arc<Node>>,
    sent: AtomicU64,
}

impl LoopbackTransport {
    /// Create an empty loopback network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make a node reachable under its advertised name.
    pub fn register(&self, node: Arc<Node>) {
        self.nodes
            .insert(node.local_member().name.clone(), node);
    }

    /// Remove a node from the network; requests to it fail afterwards.
    pub fn deregister(&self, name: &str) {
        self.nodes.remove(name);
    }

    /// Number of requests sent through this transport.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, addr: &str, msg: Message) -> Result<Message> {
        self.sent.fetch_add(1, Ordering::Relaxed);
        let node = self
            .nodes
            .get(addr)
            .map(|n| n.value().clone())
            .ok_or_else(|| TransportError::ConnectionFailed {
                addr: addr.to_string(),
                reason: "no such node".to_string(),
            })?;
        Ok(node.handle_message(msg).await)
    }
}

/// A node plus the handles tests mutate directly.
pub struct TestNode {
    /// The node under test.
    pub node: Arc<Node>,

    /// Its discovery, for registering peers.
    pub discovery: Arc<StaticDiscovery>,
}

/// Build a bootstrapped node wired to the given transport.
pub fn build_node(
    transport: Arc<dyn Transport>,
    name: &str,
    birthdate: i64,
    partition_count: u64,
    replica_count: usize,
) -> TestNode {
    let member = Member::new(name, birthdate);
    let discovery = Arc::new(StaticDiscovery::new(member));

    let mut config = Config::default()
        .with_partition_count(partition_count)
        .with_replica_count(replica_count)
        // The periodic trigger stays out of the way; tests drive passes.
        .with_rebalance_interval(Duration::from_secs(3600));
    config.name = name.to_string();

    let node = Node::new(config, discovery.clone(), transport).expect("valid test config");
    node.mark_bootstrapped();

    TestNode { node, discovery }
}

/// Register every node's member in every other node's discovery.
pub fn link(nodes: &[&TestNode]) {
    for a in nodes {
        for b in nodes {
            a.discovery.register(b.node.local_member().clone());
        }
    }
}

/// Install a log subscriber for test debugging; honors `RUST_LOG`.
#[cfg(test)]
pub(crate) fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
