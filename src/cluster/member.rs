//! Node identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Identity of a node in the cluster.
///
/// A member is a stable DNS-like `name` plus a `birthdate`, the instance
/// start timestamp that tells incarnations of the same name apart across
/// restarts. Two comparison modes exist and are used deliberately in
/// different places:
///
/// - [`same_identity`](Member::same_identity) compares name AND birthdate.
///   The receive side of a fragment move uses it so a stale peer cannot
///   force data onto a node that no longer owns the partition.
/// - [`same_name`](Member::same_name) compares the name only. The send side
///   uses it when asking "is this still me?", because the routing table is
///   eventually consistent and may briefly address a prior incarnation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Advertised `host:port` of the node. Used to dial it.
    pub name: String,

    /// Process start time in milliseconds since the Unix epoch.
    pub birthdate: i64,

    /// Hash of name and birthdate; the discovery layer resolves members by
    /// this id.
    pub id: u64,
}

impl Member {
    /// Create a member, deriving its id from name and birthdate.
    pub fn new(name: impl Into<String>, birthdate: i64) -> Self {
        let name = name.into();
        let id = Self::derive_id(&name, birthdate);
        Self {
            name,
            birthdate,
            id,
        }
    }

    fn derive_id(name: &str, birthdate: i64) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(name.as_bytes());
        hasher.write(&birthdate.to_le_bytes());
        hasher.finish()
    }

    /// True iff both name and birthdate match: the exact same incarnation.
    pub fn same_identity(&self, other: &Member) -> bool {
        self.name == other.name && self.birthdate == other.birthdate
    }

    /// True iff the names match, regardless of incarnation.
    pub fn same_name(&self, other: &Member) -> bool {
        self.name == other.name
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
