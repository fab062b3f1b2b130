//! Configuration types for the distributed cache.

use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::time::Duration;

/// Lowest permitted replica count: a single copy, no backups.
pub const MINIMUM_REPLICA_COUNT: usize = 1;

/// Default cluster-wide partition count. Prime, so keys spread evenly even
/// for hash functions with weak low bits. Must be identical on every node.
pub const DEFAULT_PARTITION_COUNT: u64 = 271;

/// Main configuration for a cache node.
#[derive(Debug, Clone)]
pub struct Config {
    /// Advertised name of this node, `host:port`. Peers dial this address,
    /// and the routing table identifies the node by it.
    pub name: String,

    /// Address to bind the system-message server to.
    pub bind_addr: SocketAddr,

    /// Number of partitions the keyspace is split into. Fixed for the
    /// lifetime of the cluster.
    pub partition_count: u64,

    /// Total copies of each partition, primaries included. With 1 there are
    /// no backup partitions and the backup rebalance pass never runs.
    pub replica_count: usize,

    /// Interval of the periodic rebalance trigger.
    pub rebalance_interval: Duration,

    /// Timeout for establishing a connection to a peer.
    pub connect_timeout: Duration,

    /// Timeout for one request/response round trip, connection included.
    pub request_timeout: Duration,

    /// Access-log policy for data maps. None disables access tracking.
    pub cache: Option<CachePolicy>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "127.0.0.1:4220".to_string(),
            bind_addr: "127.0.0.1:4220".parse().unwrap(),
            partition_count: DEFAULT_PARTITION_COUNT,
            replica_count: MINIMUM_REPLICA_COUNT,
            rebalance_interval: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(30),
            cache: None,
        }
    }
}

impl Config {
    /// Create a configuration advertising and binding the given address.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            name: bind_addr.to_string(),
            bind_addr,
            ..Default::default()
        }
    }

    /// Set the partition count.
    pub fn with_partition_count(mut self, count: u64) -> Self {
        self.partition_count = count;
        self
    }

    /// Set the replica count (primaries included).
    pub fn with_replica_count(mut self, count: usize) -> Self {
        self.replica_count = count;
        self
    }

    /// Set the periodic rebalance interval.
    pub fn with_rebalance_interval(mut self, interval: Duration) -> Self {
        self.rebalance_interval = interval;
        self
    }

    /// Set the peer connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the request/response timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enable access tracking with the given policy.
    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache = Some(policy);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("node name must not be empty".into()));
        }
        if self.partition_count == 0 {
            return Err(Error::Config("partition count must be positive".into()));
        }
        if self.replica_count < MINIMUM_REPLICA_COUNT {
            return Err(Error::Config(format!(
                "replica count must be at least {}",
                MINIMUM_REPLICA_COUNT
            )));
        }
        Ok(())
    }
}

/// Eviction-related policy for data maps. The rebalancer only carries the
/// access log across moves; eviction itself runs in the storage layer.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// Entries idle longer than this are eligible for eviction.
    pub max_idle: Option<Duration>,

    /// Upper bound on keys per data map. 0 means unbounded.
    pub max_keys: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            max_idle: None,
            max_keys: 0,
        }
    }
}

impl CachePolicy {
    /// Policy tracking idle time with no key bound.
    pub fn with_max_idle(max_idle: Duration) -> Self {
        Self {
            max_idle: Some(max_idle),
            max_keys: 0,
        }
    }
}
