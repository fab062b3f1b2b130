//! Per-entry conflict resolution.

use crate::storage::Entry;
use std::cmp::Ordering;

/// Total order on entry versions, newest first.
///
/// Primary criterion is the write timestamp, descending. Ties fall through
/// to a byte-lexicographic comparison of value and then key, so the order
/// is total and does not depend on which replica evaluated it.
fn version_order(a: &Entry, b: &Entry) -> Ordering {
    b.timestamp
        .cmp(&a.timestamp)
        .then_with(|| b.value.cmp(&a.value))
        .then_with(|| b.key.cmp(&a.key))
}

/// Pick the entry that survives a merge of two versions of the same hkey.
///
/// Deterministic and symmetric: `resolve(a, b)` and `resolve(b, a)` name
/// the same winner.
pub fn resolve<'a>(a: &'a Entry, b: &'a Entry) -> &'a Entry {
    let mut versions = [a, b];
    versions.sort_by(|x, y| version_order(x, y));
    versions[0]
}
