//! Receive side of a fragment move.

use crate::error::{Error, Result, StorageError};
use crate::network::rpc::{ErrorResponse, Message, MoveFragment};
use crate::node::Node;
use crate::partition::Partition;
use crate::rebalance::FragmentPackage;
use crate::storage::{version, Fragment};
use std::sync::Arc;
use tracing::{info, warn};

impl Node {
    /// Handle a `MoveFragment` request: validate, merge, acknowledge.
    pub(crate) async fn move_fragment_operation(&self, req: MoveFragment) -> Message {
        if let Err(e) = self.is_operable() {
            return Message::Error(ErrorResponse::from_error(&e));
        }

        let package = match FragmentPackage::decode(&req.package) {
            Ok(package) => package,
            Err(e) => {
                warn!(error = %e, "Failed to decode fragment package");
                return Message::Error(ErrorResponse::from_error(&e));
            }
        };

        if package.part_id >= self.config().partition_count {
            let e = Error::InvalidArgument(format!(
                "partition {} out of range",
                package.part_id
            ));
            return Message::Error(ErrorResponse::from_error(&e));
        }
        let part = if package.backup {
            self.backup_partition(package.part_id)
        } else {
            self.partition(package.part_id)
        };

        // Ownership is checked by exact identity before anything is merged.
        // During a network partition a sender may still believe this node
        // owns a partition it has lost; its data must not land here.
        if !part.has_owner_by_id(self.local_member()) {
            warn!(
                map = %package.name,
                part_id = package.part_id,
                backup = package.backup,
                node = %self.local_member(),
                "Received data map that doesn't belong to this node"
            );
            let e = Error::InvalidArgument(format!(
                "partition {} (backup: {}) doesn't belong to {}",
                package.part_id,
                package.backup,
                self.local_member()
            ));
            return Message::Error(ErrorResponse::from_error(&e));
        }

        info!(
            map = %package.name,
            part_id = package.part_id,
            backup = package.backup,
            "Received data map"
        );

        match self.merge_data_maps(part, package).await {
            Ok(()) => Message::Ok,
            Err(e) => {
                warn!(error = %e, "Failed to merge data map");
                Message::Error(ErrorResponse::from_error(&e))
            }
        }
    }

    /// Merge an incoming fragment into the local data map.
    ///
    /// Re-delivering the same package is harmless: version resolution is
    /// deterministic and the access-log merge only fills gaps.
    async fn merge_data_maps(
        &self,
        part: &Arc<Partition>,
        package: FragmentPackage,
    ) -> Result<()> {
        let dm = part.get_or_create_map(&package.name, self.config().cache.as_ref());

        // Nobody else works on the map while it is merged.
        let mut state = dm.lock().await;

        let incoming = Fragment::import(&package.payload)?;

        // Incoming access timestamps fill gaps only; local ones win.
        if !package.access_log.is_empty() {
            if let Some(cache) = state.cache.as_mut() {
                cache.merge_absent(&package.access_log);
            }
        }

        if state.fragment.is_empty() {
            // No local keys. Adopt the imported fragment wholesale; the old
            // one is dropped with this assignment.
            state.fragment = incoming;
        } else {
            let mut merge_err: Result<()> = Ok(());
            incoming.range(|hkey, entry| {
                let winner = match state.fragment.get(hkey) {
                    Ok(current) => version::resolve(current, entry).clone(),
                    Err(StorageError::KeyNotFound) => entry.clone(),
                    Err(e) => {
                        merge_err = Err(e.into());
                        return false;
                    }
                };
                match state.fragment.put(hkey, winner) {
                    Ok(()) => true,
                    Err(StorageError::Fragmented) => {
                        // The write landed; reclaim garbage off the merge path.
                        self.spawn_compaction(dm.clone());
                        true
                    }
                    Err(e) => {
                        merge_err = Err(e.into());
                        false
                    }
                }
            });
            merge_err?;
        }

        part.store_map(&package.name, dm.clone());
        Ok(())
    }
}
