//! Named data maps and their access cache.

use crate::config::CachePolicy;
use crate::storage::Fragment;
use crate::types::{HKey, PartitionId};
use std::collections::HashMap;
use tokio::sync::{Mutex, MutexGuard};

/// A named key-value container living inside one partition.
///
/// All structural mutation goes through the single async lock: local
/// writes, merges of incoming fragments, compaction, and the export phase
/// of a move. The lock is async because the move sender holds it across
/// the network round trip; a torn export is worse than writes briefly
/// blocking on a map that is leaving this node anyway.
///
/// A data map refers to its partition by id, not by reference, so maps,
/// partitions and the node form no ownership cycle.
#[derive(Debug)]
pub struct DataMap {
    partition_id: PartitionId,
    name: String,
    state: Mutex<MapState>,
}

/// Lock-protected state of a data map.
#[derive(Debug)]
pub struct MapState {
    /// The keyed entry store.
    pub fragment: Fragment,

    /// Access tracking, present when a cache policy is configured.
    pub cache: Option<AccessCache>,
}

impl DataMap {
    /// Create an empty data map.
    pub fn new(partition_id: PartitionId, name: &str, policy: Option<&CachePolicy>) -> Self {
        Self {
            partition_id,
            name: name.to_string(),
            state: Mutex::new(MapState {
                fragment: Fragment::new(),
                cache: policy.map(AccessCache::new),
            }),
        }
    }

    /// Id of the owning partition.
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Name of the map.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire the map lock.
    pub async fn lock(&self) -> MutexGuard<'_, MapState> {
        self.state.lock().await
    }
}

/// Access log plus the eviction policy it feeds.
///
/// The log maps hkeys to their last-access timestamp. It travels with the
/// map across moves but is never fused into storage; on receive, incoming
/// timestamps fill gaps only (first writer wins).
#[derive(Debug)]
pub struct AccessCache {
    policy: CachePolicy,
    access_log: HashMap<HKey, i64>,
}

impl AccessCache {
    /// Create an empty access cache under the given policy.
    pub fn new(policy: &CachePolicy) -> Self {
        Self {
            policy: policy.clone(),
            access_log: HashMap::new(),
        }
    }

    /// The eviction policy this cache enforces.
    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Record an access.
    pub fn touch(&mut self, hkey: HKey, now: i64) {
        self.access_log.insert(hkey, now);
    }

    /// Forget an hkey, e.g. after a delete.
    pub fn forget(&mut self, hkey: HKey) {
        self.access_log.remove(&hkey);
    }

    /// Last-access timestamp of an hkey.
    pub fn last_access(&self, hkey: HKey) -> Option<i64> {
        self.access_log.get(&hkey).copied()
    }

    /// Number of tracked hkeys.
    pub fn len(&self) -> usize {
        self.access_log.len()
    }

    /// True if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.access_log.is_empty()
    }

    /// Snapshot of the log for a transfer payload.
    pub fn export_log(&self) -> HashMap<HKey, i64> {
        self.access_log.clone()
    }

    /// Merge an incoming log: insert each pair only if the hkey is absent
    /// locally.
    pub fn merge_absent(&mut self, incoming: &HashMap<HKey, i64>) {
        for (hkey, ts) in incoming {
            self.access_log.entry(*hkey).or_insert(*ts);
        }
    }
}
