//! Routing table epoch and update types.
//!
//! The routing table itself is computed by the membership layer; this crate
//! receives the result as a [`RoutingUpdate`] and stores the owner lists on
//! the partitions. The [`RoutingEpoch`] is bumped atomically after every
//! publication and doubles as the rebalancer's cancellation signal: a pass
//! snapshots the epoch up front and stops issuing moves once the live value
//! diverges from the snapshot.

use crate::cluster::Member;
use crate::types::PartitionId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide monotonic counter of routing-table publications.
#[derive(Debug, Default)]
pub struct RoutingEpoch(AtomicU64);

impl RoutingEpoch {
    /// Create an epoch counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the current epoch.
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Advance the epoch after a publication. Returns the new value.
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// One routing-table publication: ordered owner lists per partition.
///
/// For a primary partition the designated primary sits at position 0; for a
/// backup partition the list holds replica owners in order, current owners
/// last. Partitions absent from the maps keep their previous owners.
#[derive(Debug, Clone, Default)]
pub struct RoutingUpdate {
    /// Owner lists for primary partitions.
    pub partitions: HashMap<PartitionId, Vec<Member>>,

    /// Owner lists for backup partitions.
    pub backups: HashMap<PartitionId, Vec<Member>>,
}

impl RoutingUpdate {
    /// Empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the owner list of a primary partition.
    pub fn set_primary(mut self, part_id: PartitionId, owners: Vec<Member>) -> Self {
        self.partitions.insert(part_id, owners);
        self
    }

    /// Set the owner list of a backup partition.
    pub fn set_backup(mut self, part_id: PartitionId, owners: Vec<Member>) -> Self {
        self.backups.insert(part_id, owners);
        self
    }
}
