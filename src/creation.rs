//! Subvolume/snapshot creation protocol (SPEC_FULL.md §4.5): the single
//! entry point used both for "make me a fresh subvolume" and "snapshot an
//! existing one," run as one retried transaction (see [`crate::txn`]).

use btree_host::{BtreeHost, Transaction, Tree};

use crate::config::EngineConfig;
use crate::equiv_cache::EquivCache;
use crate::error::{EngineError, StoreError};
use crate::flags::SubvolumeFlags;
use crate::row::SubvolumeRow;
use crate::snapshot_store;
use crate::subvolume_store;
use crate::txn::run_txn;

/// Result of a successful `create` call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Created {
    pub subvol_id: u32,
    pub snapshot_id: u32,
}

/// `create(inode, src_subvol_id_or_0, read_only)`. When `src_subvol_id` is
/// non-zero this snapshots it; otherwise it allocates a fresh, parentless
/// subvolume.
pub fn create<H: BtreeHost>(
    host: &H,
    cache: &mut EquivCache,
    config: &EngineConfig,
    inode: u64,
    src_subvol_id: u32,
    read_only: bool,
) -> Result<Created, EngineError> {
    run_txn(host, |txn| run(txn, cache, config, inode, src_subvol_id, read_only))
}

fn run(
    txn: &mut dyn Transaction,
    cache: &mut EquivCache,
    config: &EngineConfig,
    inode: u64,
    src_subvol_id: u32,
    read_only: bool,
) -> Result<Created, StoreError> {
    // Step 1: claim a subvolume slot.
    let new_slot = subvolume_store::allocate_slot(txn, config)?;

    // Step 2-4: allocate the snapshot node(s).
    let new_snapshot_id;
    let mut flags = SubvolumeFlags::empty();
    if read_only {
        flags.insert(SubvolumeFlags::READ_ONLY);
    }

    if src_subvol_id != 0 {
        // Step 3: snapshotting an existing subvolume.
        let mut src = subvolume_store::get(txn, src_subvol_id, true)?;
        let parent = src.snapshot;
        let snapshot_subvols = [new_slot, src_subvol_id];

        let new_nodes = snapshot_store::create(txn, cache, parent, &snapshot_subvols)?;
        debug_assert_eq!(new_nodes.len(), 2);

        // The source keeps the *second* allocated node; the first becomes
        // the rebase target for the new subvolume, so it can itself be
        // snapshotted further without colliding with the source's lineage.
        new_snapshot_id = new_nodes[0];
        src.snapshot = new_nodes[1];
        txn.write_row(Tree::Subvolume, src_subvol_id, src.encode().to_vec())?;

        flags.insert(SubvolumeFlags::IS_SNAPSHOT);
    } else {
        // Step 4: fresh subvolume, no parent.
        let new_nodes = snapshot_store::create(txn, cache, 0, &[new_slot])?;
        debug_assert_eq!(new_nodes.len(), 1);
        new_snapshot_id = new_nodes[0];
    }

    // Step 5: materialize the subvolume row.
    let row = SubvolumeRow::new(new_snapshot_id, inode, flags);
    txn.write_row(Tree::Subvolume, new_slot, row.encode().to_vec())?;

    Ok(Created { subvol_id: new_slot, snapshot_id: new_snapshot_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use btree_host::MemHost;

    #[test]
    fn fresh_subvolume_has_no_parent_and_no_snapshot_flag() {
        let host = MemHost::new();
        let mut cache = EquivCache::new();
        let config = EngineConfig::default();

        let created = create(&host, &mut cache, &config, 42, 0, false).unwrap();

        let mut txn = host.begin();
        let subvol = subvolume_store::get(&mut *txn, created.subvol_id, true).unwrap();
        assert_eq!(subvol.snapshot, created.snapshot_id);
        assert!(!subvol.is_snapshot());
        let snap = snapshot_store::lookup(&mut *txn, created.snapshot_id).unwrap();
        assert_eq!(snap.parent, 0);
    }

    #[test]
    fn snapshotting_rebases_source_onto_sibling_node() {
        let host = MemHost::new();
        let mut cache = EquivCache::new();
        let config = EngineConfig::default();

        let src = create(&host, &mut cache, &config, 1, 0, false).unwrap();
        let snap = create(&host, &mut cache, &config, 2, src.subvol_id, true).unwrap();

        let mut txn = host.begin();
        let src_row = subvolume_store::get(&mut *txn, src.subvol_id, true).unwrap();
        let snap_row = subvolume_store::get(&mut *txn, snap.subvol_id, true).unwrap();

        assert!(snap_row.read_only());
        assert!(snap_row.is_snapshot());
        assert_ne!(src_row.snapshot, src.snapshot_id, "source must be rebased onto a new node");

        let new_snap = snapshot_store::lookup(&mut *txn, snap.snapshot_id).unwrap();
        let rebased_src = snapshot_store::lookup(&mut *txn, src_row.snapshot).unwrap();
        assert_eq!(new_snap.parent, rebased_src.parent);
    }

    #[test]
    fn no_space_when_subvolume_range_is_exhausted() {
        let host = MemHost::new();
        let mut cache = EquivCache::new();
        let config = EngineConfig { subvol_max: 1, ..EngineConfig::default() };

        create(&host, &mut cache, &config, 1, 0, false).unwrap();
        let result = create(&host, &mut cache, &config, 2, 0, false);
        assert!(matches!(result, Err(EngineError::NoSpace)));
    }

    #[test]
    fn retries_transparently_past_injected_restarts() {
        let host = MemHost::new();
        let mut cache = EquivCache::new();
        let config = EngineConfig::default();

        host.inject_restarts(2);
        let created = create(&host, &mut cache, &config, 1, 0, false).unwrap();

        let mut txn = host.begin();
        assert!(subvolume_store::get(&mut *txn, created.subvol_id, true).is_ok());
    }
}
