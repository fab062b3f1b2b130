//! Keyed entry store behind one data map.
//!
//! # Export format
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │ MAGIC: [u8; 4] = "CDFR"                         │
//! ├─────────────────────────────────────────────────┤
//! │ VERSION: u32 = 1                                │
//! ├─────────────────────────────────────────────────┤
//! │ FLAGS: u32                                      │
//! │   bit 0: compressed (LZ4)                       │
//! │   bits 1-31: reserved                           │
//! ├─────────────────────────────────────────────────┤
//! │ ENTRY_COUNT: u64                                │
//! ├─────────────────────────────────────────────────┤
//! │ DATA_SIZE: u64 (uncompressed size)              │
//! ├─────────────────────────────────────────────────┤
//! │ RESERVED: [u8; 4]                               │
//! ├─────────────────────────────────────────────────┤
//! │ DATA BLOCK (possibly LZ4 compressed)            │
//! ├─────────────────────────────────────────────────┤
//! │ CRC32: u32 (header + data block)                │
//! └─────────────────────────────────────────────────┘
//!
//! Header size: 28 bytes
//! ```
//!
//! The data block layout is private to this engine; only the framing above
//! is stable. `import(export(f))` yields a fragment holding the same
//! `hkey -> entry` mapping as `f`.

use crate::error::StorageError;
use crate::storage::Entry;
use crate::types::HKey;
use crc::{Crc, CRC_32_ISCSI};
use std::collections::HashMap;

/// Magic number for fragment exports.
const MAGIC: [u8; 4] = [b'C', b'D', b'F', b'R'];

/// Current export format version.
const VERSION: u32 = 1;

/// Export header size in bytes.
const HEADER_SIZE: usize = 28;

/// Flag: data block is LZ4 compressed.
const FLAG_COMPRESSED: u32 = 1 << 0;

/// Garbage bytes a fragment may accumulate before `put` starts raising the
/// fragmented signal.
const DEFAULT_GARBAGE_THRESHOLD: usize = 1 << 20;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// In-memory mapping from hkey to entry with garbage accounting.
///
/// Overwrites and deletes leave garbage behind; once it crosses the
/// threshold, mutating operations return [`StorageError::Fragmented`].
/// That signal is not a failure: the triggering write has been applied,
/// and the caller is expected to schedule [`compact`](Fragment::compact)
/// asynchronously and carry on.
#[derive(Debug, Clone)]
pub struct Fragment {
    entries: HashMap<HKey, Entry>,
    live_bytes: usize,
    dead_bytes: usize,
    garbage_threshold: usize,
}

impl Fragment {
    /// Create an empty fragment with the default garbage threshold.
    pub fn new() -> Self {
        Self::with_garbage_threshold(DEFAULT_GARBAGE_THRESHOLD)
    }

    /// Create an empty fragment with a custom garbage threshold.
    pub fn with_garbage_threshold(garbage_threshold: usize) -> Self {
        Self {
            entries: HashMap::new(),
            live_bytes: 0,
            dead_bytes: 0,
            garbage_threshold,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the fragment holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Approximate live payload size in bytes.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Garbage bytes accumulated since the last compaction.
    pub fn garbage_bytes(&self) -> usize {
        self.dead_bytes
    }

    /// Look up an entry.
    pub fn get(&self, hkey: HKey) -> Result<&Entry, StorageError> {
        self.entries.get(&hkey).ok_or(StorageError::KeyNotFound)
    }

    /// Store an entry.
    ///
    /// A [`StorageError::Fragmented`] return means the entry WAS stored and
    /// a compaction should be scheduled.
    pub fn put(&mut self, hkey: HKey, entry: Entry) -> Result<(), StorageError> {
        self.live_bytes += entry.cost();
        if let Some(old) = self.entries.insert(hkey, entry) {
            let cost = old.cost();
            self.live_bytes = self.live_bytes.saturating_sub(cost);
            self.dead_bytes += cost;
        }
        self.check_garbage()
    }

    /// Remove an entry. Removing an absent hkey is a no-op.
    ///
    /// Like `put`, may raise [`StorageError::Fragmented`] after applying
    /// the mutation.
    pub fn delete(&mut self, hkey: HKey) -> Result<(), StorageError> {
        if let Some(old) = self.entries.remove(&hkey) {
            let cost = old.cost();
            self.live_bytes = self.live_bytes.saturating_sub(cost);
            self.dead_bytes += cost;
        }
        self.check_garbage()
    }

    fn check_garbage(&self) -> Result<(), StorageError> {
        if self.dead_bytes > self.garbage_threshold {
            return Err(StorageError::Fragmented);
        }
        Ok(())
    }

    /// Visit every entry. The visitor returns whether iteration continues.
    /// Order is unspecified but stable for the duration of one call.
    pub fn range<F>(&self, mut visitor: F)
    where
        F: FnMut(HKey, &Entry) -> bool,
    {
        for (hkey, entry) in &self.entries {
            if !visitor(*hkey, entry) {
                break;
            }
        }
    }

    /// Reclaim garbage left behind by overwrites and deletes.
    pub fn compact(&mut self) {
        self.entries.shrink_to_fit();
        self.dead_bytes = 0;
    }

    /// Serialize the fragment into a self-contained byte payload.
    pub fn export(&self) -> Result<Vec<u8>, StorageError> {
        let records: Vec<(&HKey, &Entry)> = self.entries.iter().collect();
        let data = bincode::serialize(&records)
            .map_err(|e| StorageError::Internal(format!("serialize fragment: {}", e)))?;

        let compressed = lz4_flex::compress_prepend_size(&data);
        let (block, flags) = if compressed.len() < data.len() {
            (compressed, FLAG_COMPRESSED)
        } else {
            (data.clone(), 0)
        };

        let mut out = Vec::with_capacity(HEADER_SIZE + block.len() + 4);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());
        out.extend_from_slice(&(data.len() as u64).to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&block);

        let crc = CRC32.checksum(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        Ok(out)
    }

    /// Rebuild a fragment from an exported payload.
    pub fn import(payload: &[u8]) -> Result<Fragment, StorageError> {
        if payload.len() < HEADER_SIZE + 4 {
            return Err(StorageError::Corrupt("payload too short".into()));
        }

        let (body, trailer) = payload.split_at(payload.len() - 4);
        let expected = u32::from_le_bytes(trailer.try_into().unwrap());
        let actual = CRC32.checksum(body);
        if expected != actual {
            return Err(StorageError::Corrupt(format!(
                "checksum mismatch: expected {}, got {}",
                expected, actual
            )));
        }

        if body[0..4] != MAGIC {
            return Err(StorageError::Corrupt("invalid magic number".into()));
        }
        let version = u32::from_le_bytes(body[4..8].try_into().unwrap());
        if version > VERSION {
            return Err(StorageError::Corrupt(format!(
                "unsupported version: {}",
                version
            )));
        }
        let flags = u32::from_le_bytes(body[8..12].try_into().unwrap());
        let entry_count = u64::from_le_bytes(body[12..20].try_into().unwrap());

        let block = &body[HEADER_SIZE..];
        let data = if flags & FLAG_COMPRESSED != 0 {
            lz4_flex::decompress_size_prepended(block)
                .map_err(|e| StorageError::Corrupt(format!("decompression failed: {}", e)))?
        } else {
            block.to_vec()
        };

        let records: Vec<(HKey, Entry)> = bincode::deserialize(&data)
            .map_err(|e| StorageError::Corrupt(format!("deserialize fragment: {}", e)))?;
        if records.len() as u64 != entry_count {
            return Err(StorageError::Corrupt(format!(
                "entry count mismatch: header says {}, block holds {}",
                entry_count,
                records.len()
            )));
        }

        let mut fragment = Fragment::new();
        for (hkey, entry) in records {
            fragment.live_bytes += entry.cost();
            fragment.entries.insert(hkey, entry);
        }
        Ok(fragment)
    }
}
