//! Cluster discovery trait and a static implementation.
//!
//! Discovery is pluggable so different membership layers (gossip, etcd,
//! static lists) can back the cache. The rebalancer needs only two things
//! from it: the local identity and member resolution by id.

use crate::cluster::Member;
use crate::error::{MembershipError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

/// Contract the cache requires from the membership layer.
#[async_trait]
pub trait Discovery: Send + Sync + fmt::Debug {
    /// Identity of the local node.
    fn local_member(&self) -> Member;

    /// Resolve a member by its id.
    async fn find_member_by_id(&self, id: u64) -> Result<Member>;
}

/// Discovery over a fixed member set.
///
/// Suitable for statically configured clusters and for tests. Members can
/// still be registered and removed at runtime by whatever drives the
/// routing updates.
#[derive(Debug)]
pub struct StaticDiscovery {
    local: Member,
    members: RwLock<HashMap<u64, Member>>,
}

impl StaticDiscovery {
    /// Create a discovery that knows only the local member.
    pub fn new(local: Member) -> Self {
        let mut members = HashMap::new();
        members.insert(local.id, local.clone());
        Self {
            local,
            members: RwLock::new(members),
        }
    }

    /// Register a member.
    pub fn register(&self, member: Member) {
        self.members.write().insert(member.id, member);
    }

    /// Remove a member by id.
    pub fn remove(&self, id: u64) {
        self.members.write().remove(&id);
    }

    /// Number of known members.
    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    /// True if no members are known.
    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    fn local_member(&self) -> Member {
        self.local.clone()
    }

    async fn find_member_by_id(&self, id: u64) -> Result<Member> {
        self.members
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| MembershipError::MemberNotFound(id).into())
    }
}
