//! Transfer payload codec.

use crate::error::{Error, Result};
use crate::types::{HKey, PartitionId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Everything needed to re-home one data map.
///
/// Encoded as msgpack with field names, so the format is self-describing
/// and receivers ignore fields they do not know; new fields can ride along
/// without breaking older peers. The fragment payload itself stays opaque
/// here; only the storage engine interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentPackage {
    /// Partition index on the receiver.
    pub part_id: PartitionId,

    /// Selects the primary or backup partition array on the receiver.
    pub backup: bool,

    /// Data map identifier.
    pub name: String,

    /// Exported fragment bytes.
    pub payload: Vec<u8>,

    /// Last-access timestamps carried across the move. Empty when the map
    /// tracks no accesses.
    #[serde(default)]
    pub access_log: HashMap<HKey, i64>,
}

impl FragmentPackage {
    /// Encode the package for the wire.
    pub fn encode(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self)
            .map_err(|e| Error::Internal(format!("encode fragment package: {}", e)))
    }

    /// Decode a package received from a peer.
    pub fn decode(data: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(data).map_err(|e| Error::Decode(format!("fragment package: {}", e)))
    }
}
