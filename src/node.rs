//! The node context: partition arrays, routing state, and lifecycle.

use crate::cluster::{Discovery, Member};
use crate::config::Config;
use crate::error::{Error, Result, StorageError};
use crate::network::rpc::{ErrorResponse, Message};
use crate::network::server::{MessageHandler, NetworkServer};
use crate::network::Transport;
use crate::partition::{DataMap, Partition};
use crate::routing::{RoutingEpoch, RoutingUpdate};
use crate::storage::Entry;
use crate::types::{hash_key, partition_id_for, unix_millis, HKey, PartitionId};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// One cache node.
///
/// The node hosts two parallel partition arrays, `partitions` and
/// `backups`, both of length `partition_count`. All process-wide
/// rebalancing state lives here rather than in globals: the routing epoch,
/// the rebalance single-flight mutex, the shutdown token, and the tracker
/// joining background compactions.
#[derive(Debug)]
pub struct Node {
    config: Config,
    this: Member,
    discovery: Arc<dyn Discovery>,
    transport: Arc<dyn Transport>,
    partitions: Vec<Arc<Partition>>,
    backups: Vec<Arc<Partition>>,
    routing_epoch: RoutingEpoch,
    rebalance_mtx: Mutex<()>,
    bootstrapped: AtomicBool,
    cancel: CancellationToken,
    compactions: TaskTracker,
}

impl Node {
    /// Create a node. It is not operable until
    /// [`mark_bootstrapped`](Node::mark_bootstrapped) is called, typically
    /// after the membership layer has delivered the first routing table.
    pub fn new(
        config: Config,
        discovery: Arc<dyn Discovery>,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let this = discovery.local_member();

        let partitions = (0..config.partition_count)
            .map(|id| Arc::new(Partition::new(id, false)))
            .collect();
        let backups = (0..config.partition_count)
            .map(|id| Arc::new(Partition::new(id, true)))
            .collect();

        Ok(Arc::new(Self {
            config,
            this,
            discovery,
            transport,
            partitions,
            backups,
            routing_epoch: RoutingEpoch::new(),
            rebalance_mtx: Mutex::new(()),
            bootstrapped: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            compactions: TaskTracker::new(),
        }))
    }

    /// Node configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Identity of this node.
    pub fn local_member(&self) -> &Member {
        &self.this
    }

    /// The membership layer.
    pub(crate) fn discovery(&self) -> &Arc<dyn Discovery> {
        &self.discovery
    }

    /// The outbound transport.
    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// The routing epoch counter.
    pub fn routing_epoch(&self) -> &RoutingEpoch {
        &self.routing_epoch
    }

    /// The rebalance single-flight mutex.
    pub(crate) fn rebalance_mutex(&self) -> &Mutex<()> {
        &self.rebalance_mtx
    }

    /// Primary partition by index. Panics on out-of-range indices; callers
    /// validate ids coming off the wire first.
    pub fn partition(&self, id: PartitionId) -> &Arc<Partition> {
        &self.partitions[id as usize]
    }

    /// Backup partition by index.
    pub fn backup_partition(&self, id: PartitionId) -> &Arc<Partition> {
        &self.backups[id as usize]
    }

    fn partition_for(&self, hkey: HKey) -> &Arc<Partition> {
        self.partition(partition_id_for(hkey, self.config.partition_count))
    }

    /// Whether the node is still running.
    pub fn is_alive(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Whether the node can serve requests: bootstrapped and not shutting
    /// down.
    pub fn is_operable(&self) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::NotOperable("node is shutting down".into()));
        }
        if !self.bootstrapped.load(Ordering::Acquire) {
            return Err(Error::NotOperable("node is not bootstrapped yet".into()));
        }
        Ok(())
    }

    /// Mark bootstrap complete.
    pub fn mark_bootstrapped(&self) {
        self.bootstrapped.store(true, Ordering::Release);
    }

    /// Apply a routing publication: replace owner lists and bump the
    /// epoch. Partitions absent from the update keep their owners.
    pub fn apply_routing_update(&self, update: RoutingUpdate) {
        for (part_id, owners) in update.partitions {
            if part_id >= self.config.partition_count {
                warn!(part_id, "Routing update references unknown partition");
                continue;
            }
            self.partitions[part_id as usize].set_owners(owners);
        }
        for (part_id, owners) in update.backups {
            if part_id >= self.config.partition_count {
                warn!(part_id, "Routing update references unknown backup partition");
                continue;
            }
            self.backups[part_id as usize].set_owners(owners);
        }

        let epoch = self.routing_epoch.bump();
        debug!(epoch, "Routing table published");
    }

    /// Apply a routing publication and wake the rebalancer.
    pub fn publish_routing_update(self: &Arc<Self>, update: RoutingUpdate) {
        self.apply_routing_update(update);
        self.trigger_rebalance();
    }

    /// Wake the rebalancer without blocking the caller.
    pub fn trigger_rebalance(self: &Arc<Self>) {
        let node = self.clone();
        tokio::spawn(async move {
            node.rebalance().await;
        });
    }

    /// Start the system-message server and the periodic rebalance trigger.
    pub fn start(self: &Arc<Self>) {
        let node = self.clone();
        tokio::spawn(async move {
            let server = NetworkServer::new(
                node.config.bind_addr,
                node.clone(),
                node.cancel.clone(),
            );
            if let Err(e) = server.run().await {
                error!(error = %e, "System message server failed");
            }
        });

        let node = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(node.config.rebalance_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => node.rebalance().await,
                    _ = node.cancel.cancelled() => return,
                }
            }
        });
    }

    /// Stop the node: cancel the server and the rebalance loop, then join
    /// outstanding compaction tasks.
    pub async fn shutdown(&self) {
        info!(node = %self.this, "Shutting down");
        self.cancel.cancel();
        self.compactions.close();
        self.compactions.wait().await;
    }

    /// Schedule an asynchronous compaction of a data map.
    pub(crate) fn spawn_compaction(&self, dm: Arc<DataMap>) {
        if self.compactions.is_closed() {
            return;
        }
        self.compactions.spawn(async move {
            let mut state = dm.lock().await;
            state.fragment.compact();
            debug!(
                map = %dm.name(),
                part_id = dm.partition_id(),
                "Compacted fragment"
            );
        });
    }

    /// Store a value in the named data map. The map is created on first
    /// write.
    pub async fn put(&self, map: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.is_operable()?;
        let hkey = hash_key(key);
        let part = self.partition_for(hkey);
        let dm = part.get_or_create_map(map, self.config.cache.as_ref());

        let mut state = dm.lock().await;
        let now = unix_millis();
        match state.fragment.put(hkey, Entry::new(key, value)) {
            Ok(()) => {}
            Err(StorageError::Fragmented) => self.spawn_compaction(dm.clone()),
            Err(e) => return Err(e.into()),
        }
        if let Some(cache) = state.cache.as_mut() {
            cache.touch(hkey, now);
        }
        Ok(())
    }

    /// Read a value from the named data map.
    pub async fn get(&self, map: &str, key: &[u8]) -> Result<Vec<u8>> {
        self.is_operable()?;
        let hkey = hash_key(key);
        let part = self.partition_for(hkey);
        let dm = part
            .map(map)
            .ok_or(Error::Storage(StorageError::KeyNotFound))?;

        let mut state = dm.lock().await;
        let now = unix_millis();
        let value = {
            let entry = state.fragment.get(hkey)?;
            if entry.is_expired(now) {
                return Err(StorageError::KeyNotFound.into());
            }
            entry.value.clone()
        };
        if let Some(cache) = state.cache.as_mut() {
            cache.touch(hkey, now);
        }
        Ok(value)
    }

    /// Remove a key from the named data map. Removing an absent key is a
    /// no-op.
    pub async fn delete(&self, map: &str, key: &[u8]) -> Result<()> {
        self.is_operable()?;
        let hkey = hash_key(key);
        let part = self.partition_for(hkey);
        let Some(dm) = part.map(map) else {
            return Ok(());
        };

        let mut state = dm.lock().await;
        match state.fragment.delete(hkey) {
            Ok(()) => {}
            Err(StorageError::Fragmented) => self.spawn_compaction(dm.clone()),
            Err(e) => return Err(e.into()),
        }
        if let Some(cache) = state.cache.as_mut() {
            cache.forget(hkey);
        }
        Ok(())
    }

    /// Dispatch an incoming system message.
    pub async fn handle_message(&self, msg: Message) -> Message {
        match msg {
            Message::MoveFragment(req) => self.move_fragment_operation(req).await,
            other => {
                let e = Error::InvalidArgument(format!("unexpected request: {:?}", other));
                Message::Error(ErrorResponse::from_error(&e))
            }
        }
    }
}

#[async_trait]
impl MessageHandler for Node {
    async fn handle(&self, msg: Message) -> Message {
        self.handle_message(msg).await
    }
}
