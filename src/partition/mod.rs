//! Partitions: fixed-index shards of the keyspace.

mod data_map;

pub use data_map::{AccessCache, DataMap, MapState};

use crate::cluster::Member;
use crate::config::CachePolicy;
use crate::types::PartitionId;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// One shard of the keyspace.
///
/// A partition holds named data maps and the ordered list of members the
/// routing table currently assigns to it. For a primary partition the
/// designated primary sits at position 0. The owners list is replaced
/// wholesale on every routing publication (copy-on-publish), so readers
/// take a cheap `Arc` snapshot and never block the publisher.
#[derive(Debug)]
pub struct Partition {
    id: PartitionId,
    backup: bool,
    owners: RwLock<Arc<Vec<Member>>>,
    maps: DashMap<String, Arc<DataMap>>,
}

impl Partition {
    /// Create an empty partition.
    pub fn new(id: PartitionId, backup: bool) -> Self {
        Self {
            id,
            backup,
            owners: RwLock::new(Arc::new(Vec::new())),
            maps: DashMap::new(),
        }
    }

    /// Partition index.
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// Whether this is a backup partition.
    pub fn is_backup(&self) -> bool {
        self.backup
    }

    /// Number of data maps currently resident.
    pub fn length(&self) -> usize {
        self.maps.len()
    }

    /// Snapshot of the ordered owners list. Holders must treat it as
    /// read-only; the list is replaced, never mutated in place.
    pub fn owners(&self) -> Arc<Vec<Member>> {
        self.owners.read().clone()
    }

    /// Replace the owners list. Called on routing publications.
    pub fn set_owners(&self, owners: Vec<Member>) {
        *self.owners.write() = Arc::new(owners);
    }

    /// The designated primary: position 0 of the owners list.
    pub fn primary_owner(&self) -> Option<Member> {
        self.owners().first().cloned()
    }

    /// Whether any owner matches `member` by exact identity (name and
    /// birthdate).
    pub fn has_owner_by_id(&self, member: &Member) -> bool {
        self.owners().iter().any(|o| o.same_identity(member))
    }

    /// Look up a data map by name.
    pub fn map(&self, name: &str) -> Option<Arc<DataMap>> {
        self.maps.get(name).map(|dm| dm.value().clone())
    }

    /// Fetch a data map, creating it if absent. The policy applies only
    /// when the map is created by this call.
    pub fn get_or_create_map(&self, name: &str, policy: Option<&CachePolicy>) -> Arc<DataMap> {
        self.maps
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(DataMap::new(self.id, name, policy)))
            .value()
            .clone()
    }

    /// Store a data map under `name`, replacing any existing one.
    pub fn store_map(&self, name: &str, dm: Arc<DataMap>) {
        self.maps.insert(name.to_string(), dm);
    }

    /// Remove a data map. The backing memory is reclaimed once the last
    /// reference drops.
    pub fn delete_map(&self, name: &str) {
        self.maps.remove(name);
    }

    /// Snapshot the resident data maps as `(name, map)` pairs.
    ///
    /// Iterating a snapshot instead of the live table lets callers delete
    /// maps mid-walk without holding table shards locked.
    pub fn map_snapshot(&self) -> Vec<(String, Arc<DataMap>)> {
        self.maps
            .iter()
            .map(|item| (item.key().clone(), item.value().clone()))
            .collect()
    }

    /// Visit resident maps. The visitor returns whether iteration
    /// continues.
    pub fn range<F>(&self, mut visitor: F)
    where
        F: FnMut(&str, &Arc<DataMap>) -> bool,
    {
        for item in self.maps.iter() {
            if !visitor(item.key(), item.value()) {
                break;
            }
        }
    }
}
