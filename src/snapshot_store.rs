//! Snapshot node store (SPEC_FULL.md §4.3): transactional read/write/delete
//! of individual snapshot nodes, with parent<->child pointer symmetry
//! maintained on every mutation.
//!
//! Every function here runs inside a transaction body and returns
//! [`StoreError`] rather than [`EngineError`] directly, so a host restart
//! encountered three calls deep still reaches [`crate::txn::run_txn`] as a
//! restart rather than being flattened into a terminal error.

use std::collections::HashSet;

use btree_host::{Transaction, Tree};

use crate::config::EngineConfig;
use crate::equiv_cache::EquivCache;
use crate::error::{EngineError, StoreError};
use crate::flags::SnapshotFlags;
use crate::row::{SnapshotRow, ID_MAX, ID_MIN};

pub(crate) fn lookup(txn: &mut dyn Transaction, id: u32) -> Result<SnapshotRow, StoreError> {
    let bytes = txn.read_row(Tree::Snapshot, id)?;
    match bytes {
        Some(b) => SnapshotRow::decode(&b).ok_or_else(|| {
            EngineError::Inconsistent(format!("snapshot {id}: corrupt row")).into()
        }),
        None => Err(EngineError::NotFound.into()),
    }
}

fn try_lookup(txn: &mut dyn Transaction, id: u32) -> Result<Option<SnapshotRow>, StoreError> {
    if id == 0 {
        // id 0 is never live; treated as "absent, harmless" (SPEC_FULL.md §4.6 phase 1).
        return Ok(None);
    }
    match lookup(txn, id) {
        Ok(row) => Ok(Some(row)),
        Err(StoreError::Engine(EngineError::NotFound)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn write(
    txn: &mut dyn Transaction,
    cache: &mut EquivCache,
    id: u32,
    row: &SnapshotRow,
) -> Result<(), StoreError> {
    txn.write_row(Tree::Snapshot, id, row.encode().to_vec())?;
    cache.update_from_row(id, row)?;
    Ok(())
}

/// Set `DELETED` on `id`. No-op if already set. `INCONSISTENT` if missing.
pub(crate) fn mark_deleted(
    txn: &mut dyn Transaction,
    cache: &mut EquivCache,
    id: u32,
) -> Result<(), StoreError> {
    let mut row = match lookup(txn, id) {
        Ok(row) => row,
        Err(StoreError::Engine(EngineError::NotFound)) => {
            log::warn!("snapshot {id}: mark_deleted on missing row");
            return Err(EngineError::Inconsistent(format!("snapshot {id}: missing row")).into());
        }
        Err(e) => return Err(e),
    };

    if row.is_deleted() {
        return Ok(());
    }

    row.flags.insert(SnapshotFlags::DELETED);
    write(txn, cache, id, &row)
}

/// Physically remove a `DELETED` snapshot row, clearing the parent's
/// back-pointer to it and re-normalizing the parent's children array.
pub(crate) fn delete_physical(
    txn: &mut dyn Transaction,
    cache: &mut EquivCache,
    config: &EngineConfig,
    id: u32,
) -> Result<(), StoreError> {
    let row = lookup(txn, id)?;
    if !row.is_deleted() {
        return Err(EngineError::Invalid(format!("snapshot {id}: delete_physical on live row")).into());
    }

    if row.parent != 0 {
        match try_lookup(txn, row.parent)? {
            Some(mut parent) => {
                let found = parent.children.iter().position(|&c| c == id);
                match found {
                    Some(i) => parent.children[i] = 0,
                    None => {
                        log::warn!(
                            "snapshot {id}: parent {} does not list it among children",
                            row.parent
                        );
                        if !config.tolerant_missing_backpointer {
                            return Err(EngineError::Inconsistent(format!(
                                "snapshot {id}: missing back-pointer in parent {}",
                                row.parent
                            ))
                            .into());
                        }
                    }
                }
                parent.normalize_children();
                write(txn, cache, row.parent, &parent)?;
            }
            None => {
                log::warn!("snapshot {id}: parent {} missing", row.parent);
            }
        }
    }

    txn.delete_row(Tree::Snapshot, id)?;
    cache.remove(id);
    Ok(())
}

/// Allocate `n` (1 or 2) new snapshot nodes under `parent_id`, linking them
/// in and clearing `IS_SUBVOL` on the parent. Returns the new ids in the
/// same order as `subvol_ids`.
pub(crate) fn create(
    txn: &mut dyn Transaction,
    cache: &mut EquivCache,
    parent_id: u32,
    subvol_ids: &[u32],
) -> Result<Vec<u32>, StoreError> {
    let n = subvol_ids.len();
    assert!(n == 1 || n == 2, "snapshot_store::create only supports 1 or 2 new nodes");

    let occupied: HashSet<u32> = txn
        .iter_rows_from(Tree::Snapshot, ID_MIN)?
        .into_iter()
        .map(|(id, _)| id)
        .collect();

    let new_ids = find_free_run(&occupied, n, ID_MIN, ID_MAX).ok_or(EngineError::NoSpace)?;

    for (i, &new_id) in new_ids.iter().enumerate() {
        let row = SnapshotRow::new(parent_id, subvol_ids[i], SnapshotFlags::IS_SUBVOL);
        write(txn, cache, new_id, &row)?;
    }

    if parent_id != 0 {
        let mut parent = lookup(txn, parent_id)?;
        if parent.children != [0, 0] {
            return Err(EngineError::Invalid(format!(
                "snapshot {parent_id}: already has children, cannot assign more"
            ))
            .into());
        }
        parent.children = if new_ids.len() == 2 {
            [new_ids[0], new_ids[1]]
        } else {
            [new_ids[0], 0]
        };
        parent.normalize_children();
        parent.flags.remove(SnapshotFlags::IS_SUBVOL);
        write(txn, cache, parent_id, &parent)?;
    }

    Ok(new_ids)
}

/// Walk backward from `max_id` for `n` ids not in `occupied`, consecutively
/// (SPEC_FULL.md §4.3 step 1). Returns them in ascending order. `min_id`
/// bounds how far down the search gives up and reports `NO_SPACE`.
fn find_free_run(occupied: &HashSet<u32>, n: usize, min_id: u32, max_id: u32) -> Option<Vec<u32>> {
    let mut run = Vec::with_capacity(n);
    let mut id = max_id;
    loop {
        if occupied.contains(&id) {
            run.clear();
        } else {
            run.push(id);
            if run.len() == n {
                run.sort_unstable();
                return Some(run);
            }
        }
        if id == min_id {
            return None;
        }
        id -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btree_host::{BtreeHost, MemHost};

    fn unwrap_engine<T>(r: Result<T, StoreError>) -> T {
        match r {
            Ok(v) => v,
            Err(StoreError::Restart) => panic!("unexpected restart in test"),
            Err(StoreError::Engine(e)) => panic!("unexpected engine error: {e}"),
        }
    }

    fn engine_err<T: std::fmt::Debug>(r: Result<T, StoreError>) -> EngineError {
        match r {
            Err(StoreError::Engine(e)) => e,
            other => panic!("expected a terminal engine error, got {other:?}"),
        }
    }

    #[test]
    fn create_fresh_subvolume_node() {
        let host = MemHost::new();
        let mut cache = EquivCache::new();
        let mut txn = host.begin();
        let ids = unwrap_engine(create(&mut *txn, &mut cache, 0, &[100]));
        assert_eq!(ids.len(), 1);
        let row = unwrap_engine(lookup(&mut *txn, ids[0]));
        assert_eq!(row.parent, 0);
        assert_eq!(row.subvol, 100);
        assert!(row.is_subvol());
        assert_eq!(row.children, [0, 0]);
    }

    #[test]
    fn create_two_children_normalizes_and_clears_parent_subvol_flag() {
        let host = MemHost::new();
        let mut cache = EquivCache::new();
        let mut txn = host.begin();
        let roots = unwrap_engine(create(&mut *txn, &mut cache, 0, &[1]));
        let parent = roots[0];

        let children = unwrap_engine(create(&mut *txn, &mut cache, parent, &[2, 3]));
        let parent_row = unwrap_engine(lookup(&mut *txn, parent));
        assert!(!parent_row.is_subvol());
        assert_eq!(parent_row.children[0].max(parent_row.children[1]), children.iter().copied().max().unwrap());
        assert!(parent_row.children[0] >= parent_row.children[1]);
    }

    #[test]
    fn delete_physical_clears_parent_backpointer() {
        let host = MemHost::new();
        let mut cache = EquivCache::new();
        let config = EngineConfig::default();
        let mut txn = host.begin();

        let roots = unwrap_engine(create(&mut *txn, &mut cache, 0, &[1]));
        let parent = roots[0];
        let children = unwrap_engine(create(&mut *txn, &mut cache, parent, &[2, 3]));

        unwrap_engine(mark_deleted(&mut *txn, &mut cache, children[0]));
        unwrap_engine(delete_physical(&mut *txn, &mut cache, &config, children[0]));

        assert_eq!(engine_err(lookup(&mut *txn, children[0])), EngineError::NotFound);
        let parent_row = unwrap_engine(lookup(&mut *txn, parent));
        assert_eq!(parent_row.children, [children[1], 0]);
    }

    #[test]
    fn find_free_run_reports_no_space_when_no_run_is_long_enough() {
        // A tiny simulated id space, [1, 10]; every id but the top one is
        // occupied, leaving a single free slot — not enough for n = 2.
        let occupied: HashSet<u32> = (1..10).collect();
        assert!(find_free_run(&occupied, 2, 1, 10).is_none());
        assert_eq!(find_free_run(&occupied, 1, 1, 10), Some(vec![10]));
    }

    #[test]
    fn find_free_run_finds_consecutive_slots_below_a_gap() {
        let occupied: HashSet<u32> = [10].into_iter().collect();
        assert_eq!(find_free_run(&occupied, 2, 1, 10), Some(vec![8, 9]));
    }
}
