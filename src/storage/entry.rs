//! Stored entry record.

use crate::types::unix_millis;
use serde::{Deserialize, Serialize};

/// One stored record.
///
/// The original key bytes travel with the entry because the hkey is not
/// reversible. `timestamp` orders concurrent writes during merges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Raw user key.
    pub key: Vec<u8>,

    /// Stored value.
    pub value: Vec<u8>,

    /// Write time in milliseconds since the Unix epoch.
    pub timestamp: i64,

    /// Absolute expiration time in milliseconds since the Unix epoch.
    /// Zero means the entry does not expire.
    pub ttl: i64,
}

impl Entry {
    /// Create an entry stamped with the current time.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            timestamp: unix_millis(),
            ttl: 0,
        }
    }

    /// Create an entry with an explicit write timestamp.
    pub fn with_timestamp(
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        timestamp: i64,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            timestamp,
            ttl: 0,
        }
    }

    /// Set an absolute expiration time.
    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = ttl;
        self
    }

    /// Whether the entry is expired at `now` (milliseconds since epoch).
    pub fn is_expired(&self, now: i64) -> bool {
        self.ttl != 0 && self.ttl <= now
    }

    /// Approximate in-memory cost of the entry in bytes. Drives the
    /// fragment's garbage accounting.
    pub fn cost(&self) -> usize {
        self.key.len() + self.value.len() + 16
    }
}
