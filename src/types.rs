//! Core types shared across the cache.

use std::hash::Hasher;
use std::time::{SystemTime, UNIX_EPOCH};
use twox_hash::XxHash64;

/// Index of a partition in the cluster-wide partition array.
pub type PartitionId = u64;

/// 64-bit hash of a user key; all storage is addressed by hkey.
pub type HKey = u64;

/// Seed for key hashing. Changing it invalidates every hkey in a cluster,
/// so all nodes must agree on it.
const HASH_SEED: u64 = 0;

/// Hash a raw key into the 64-bit keyspace.
pub fn hash_key(key: &[u8]) -> HKey {
    let mut hasher = XxHash64::with_seed(HASH_SEED);
    hasher.write(key);
    hasher.finish()
}

/// Map an hkey onto a partition index.
pub fn partition_id_for(hkey: HKey, partition_count: u64) -> PartitionId {
    hkey % partition_count
}

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Used to stamp entries at write time and as the member birthdate source.
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
