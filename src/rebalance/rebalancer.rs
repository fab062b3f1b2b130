//! Send side: the rebalancer passes and the move protocol.

use crate::cluster::Member;
use crate::config::MINIMUM_REPLICA_COUNT;
use crate::error::{Result, TransportError};
use crate::network::rpc::{Message, MoveFragment};
use crate::node::Node;
use crate::partition::{DataMap, Partition};
use crate::rebalance::FragmentPackage;
use std::collections::HashMap;
use tracing::{debug, info};

impl Node {
    /// Run one rebalance pass.
    ///
    /// At most one pass executes at a time; a trigger that finds a pass
    /// already running returns immediately. The running pass notices epoch
    /// changes itself, and the periodic trigger covers whatever it skipped.
    pub async fn rebalance(&self) {
        let Ok(_guard) = self.rebalance_mutex().try_lock() else {
            debug!("Rebalance already in flight, coalescing");
            return;
        };

        if let Err(e) = self.is_operable() {
            debug!(error = %e, "Rebalancer awaits bootstrapping");
            return;
        }

        self.rebalance_primary_partitions().await;
        if self.config().replica_count > MINIMUM_REPLICA_COUNT {
            self.rebalance_backup_partitions().await;
        }
    }

    /// Walk the primary partitions and ship every map whose partition the
    /// routing table assigns to another node.
    async fn rebalance_primary_partitions(&self) {
        let epoch = self.routing_epoch().current();
        for part_id in 0..self.config().partition_count {
            if !self.is_alive() {
                break;
            }
            if epoch != self.routing_epoch().current() {
                // Routing table was republished. Quit; the pass over the
                // new table supersedes this one.
                debug!("Routing table updated, yielding primary pass");
                break;
            }

            let part = self.partition(part_id);
            if part.length() == 0 {
                continue;
            }
            let Some(owner) = part.primary_owner() else {
                continue;
            };
            // Compared by name on purpose: the routing table is eventually
            // consistent and may still address a previous incarnation of
            // this node. Exact-identity matching here would ship data to
            // ourselves.
            if owner.same_name(self.local_member()) {
                continue;
            }

            for (name, dm) in part.map_snapshot() {
                info!(
                    map = %name,
                    part_id,
                    backup = false,
                    owner = %owner,
                    "Moving data map"
                );
                if let Err(e) = self.move_data_map(part, &name, &dm, &owner).await {
                    info!(
                        map = %name,
                        part_id,
                        owner = %owner,
                        error = %e,
                        "Failed to move data map"
                    );
                }
                if epoch != self.routing_epoch().current() {
                    break;
                }
            }
        }
    }

    /// Walk the backup partitions and ship maps to the owners inside the
    /// replica budget.
    async fn rebalance_backup_partitions(&self) {
        let epoch = self.routing_epoch().current();
        let budget = self.config().replica_count - 1;

        for part_id in 0..self.config().partition_count {
            if !self.is_alive() {
                break;
            }

            let part = self.backup_partition(part_id);
            if part.length() == 0 {
                continue;
            }
            let owners = part.owners();
            if owners.len() == budget {
                // Exactly the configured replicas; nothing to hand off.
                continue;
            }

            // The last `budget` owners are the current replicas; everything
            // before them is stale. When the list is shorter than the
            // budget the offset clamps to zero and the whole list is the
            // target set.
            let offset = owners.len().saturating_sub(budget);
            let mut ids = Vec::new();
            for owner in owners[offset..].iter().rev() {
                // By name, same reasoning as the primary pass.
                if owner.same_name(self.local_member()) {
                    continue;
                }
                ids.push(owner.id);
            }

            for id in ids {
                if !self.is_alive() {
                    break;
                }
                if epoch != self.routing_epoch().current() {
                    debug!("Routing table updated, yielding backup pass");
                    break;
                }

                let owner = match self.discovery().find_member_by_id(id).await {
                    Ok(owner) => owner,
                    Err(e) => {
                        info!(id, error = %e, "Failed to resolve member by id");
                        continue;
                    }
                };

                for (name, dm) in part.map_snapshot() {
                    info!(
                        map = %name,
                        part_id,
                        backup = true,
                        owner = %owner,
                        "Moving data map"
                    );
                    if let Err(e) = self.move_data_map(part, &name, &dm, &owner).await {
                        info!(
                            map = %name,
                            part_id,
                            owner = %owner,
                            error = %e,
                            "Failed to move backup data map"
                        );
                    }
                    if epoch != self.routing_epoch().current() {
                        break;
                    }
                }
            }
        }
    }

    /// Move one data map to `owner`: export under the map lock, send, and
    /// delete locally once the peer acknowledges.
    ///
    /// The lock is held across the whole round trip. Writes mutating the
    /// map mid-export would produce a torn snapshot; blocking them is
    /// acceptable because the map is already on the wrong node and the
    /// transfer is bounded by payload size. On any error the map stays put
    /// and a later pass retries.
    pub(crate) async fn move_data_map(
        &self,
        part: &Partition,
        name: &str,
        dm: &DataMap,
        owner: &Member,
    ) -> Result<()> {
        let state = dm.lock().await;

        let payload = state.fragment.export()?;
        let mut package = FragmentPackage {
            part_id: part.id(),
            backup: part.is_backup(),
            name: name.to_string(),
            payload,
            access_log: HashMap::new(),
        };
        // The receiver rebuilds its cache structure; only the raw access
        // log travels.
        if let Some(cache) = &state.cache {
            if !cache.is_empty() {
                package.access_log = cache.export_log();
            }
        }
        let encoded = package.encode()?;

        let response = self
            .transport()
            .send(
                &owner.name,
                Message::MoveFragment(MoveFragment { package: encoded }),
            )
            .await?;

        match response {
            Message::Ok => {
                // Acknowledged: drop our copy. The allocation is freed once
                // the last reference goes away.
                part.delete_map(name);
                Ok(())
            }
            Message::Error(resp) => Err(resp.into_error()),
            other => Err(TransportError::UnexpectedResponse(format!("{:?}", other)).into()),
        }
    }
}
