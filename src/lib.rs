//! Distributed, sharded in-memory key-value cache with peer rebalancing.
//!
//! This crate provides a partitioned cache node that:
//! - Splits the keyspace into a fixed number of **partitions**, each
//!   holding named **data maps**
//! - Consumes routing tables from a pluggable membership layer and detects
//!   when local data no longer matches the table
//! - **Rebalances** by moving whole data maps to their new owners over a
//!   framed TCP protocol, merging conflicting entries by version
//!
//! # Example
//!
//! ```rust,no_run
//! use cortado::{Config, Member, Node, RoutingUpdate, StaticDiscovery, TcpTransport};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new("127.0.0.1:4220".parse()?);
//!     let member = Member::new(config.name.clone(), cortado::unix_millis());
//!     let discovery = Arc::new(StaticDiscovery::new(member.clone()));
//!     let transport = Arc::new(TcpTransport::new(
//!         config.connect_timeout,
//!         config.request_timeout,
//!     ));
//!
//!     let node = Node::new(config, discovery, transport)?;
//!     node.start();
//!
//!     // The membership layer publishes routing tables; the first one
//!     // completes bootstrap.
//!     let update = RoutingUpdate::new().set_primary(0, vec![member]);
//!     node.apply_routing_update(update);
//!     node.mark_bootstrapped();
//!
//!     node.put("sessions", b"user:123", b"alice").await?;
//!     let value = node.get("sessions", b"user:123").await?;
//!     println!("Found: {:?}", value);
//!
//!     node.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             Membership layer                │
//! │   (gossip / static; external collaborator)  │
//! └─────────────────────────────────────────────┘
//!            │ routing updates + epoch
//!            ▼
//! ┌─────────────────────────────────────────────┐
//! │                   Node                      │
//! │  partitions[0..P)          backups[0..P)    │
//! │   └─ DataMap: fragment + access log         │
//! └─────────────────────────────────────────────┘
//!      │                               ▲
//!      │ Rebalancer: export,           │ Merger: validate
//!      │ MoveFragment, delete          │ ownership, resolve
//!      ▼                               │ versions, import
//! ┌─────────────────────────────────────────────┐
//! │       Framed TCP system messages            │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Consistency model
//!
//! The routing table is eventually consistent; the rebalancer converges
//! physical placement toward it. Per-key conflicts between copies are
//! settled deterministically by write timestamp, and a routing-epoch check
//! cancels a pass as soon as a newer table supersedes it.

pub mod cluster;
pub mod config;
pub mod error;
pub mod network;
pub mod node;
pub mod partition;
pub mod rebalance;
pub mod routing;
pub mod storage;
pub mod testing;
pub mod types;

// Re-export main types for convenience
pub use cluster::{Discovery, Member, StaticDiscovery};
pub use config::{CachePolicy, Config, DEFAULT_PARTITION_COUNT, MINIMUM_REPLICA_COUNT};
pub use error::{Error, ErrorKind, MembershipError, Result, StorageError, TransportError};
pub use node::Node;
pub use routing::{RoutingEpoch, RoutingUpdate};
pub use types::{hash_key, partition_id_for, unix_millis, HKey, PartitionId};

// Re-export the storage and partition surface
pub use partition::{AccessCache, DataMap, MapState, Partition};
pub use storage::{Entry, Fragment};

// Re-export the wire surface
pub use network::{
    MessageHandler, NetworkServer, TcpTransport, Transport,
};
pub use rebalance::FragmentPackage;
