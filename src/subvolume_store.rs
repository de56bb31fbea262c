//! Subvolume store (SPEC_FULL.md §4.4): transactional read/write/delete of
//! subvolume rows, plus the free-slot scan used by the creation protocol.

use btree_host::{Transaction, Tree};

use crate::config::EngineConfig;
use crate::equiv_cache::EquivCache;
use crate::error::{EngineError, StoreError};
use crate::row::{SubvolumeRow, SUBVOL_MIN};
use crate::snapshot_store;

/// Fetch a subvolume row. If absent and `inconsistent_if_absent` is set,
/// the caller is telling us the id came from a place that should always
/// have a live row backing it — log before handing back `NOT_FOUND`.
pub(crate) fn get(
    txn: &mut dyn Transaction,
    id: u32,
    inconsistent_if_absent: bool,
) -> Result<SubvolumeRow, StoreError> {
    let bytes = txn.read_row(Tree::Subvolume, id)?;
    match bytes {
        Some(b) => SubvolumeRow::decode(&b).ok_or_else(|| {
            EngineError::Inconsistent(format!("subvolume {id}: corrupt row")).into()
        }),
        None => {
            if inconsistent_if_absent {
                log::warn!("subvolume {id}: expected row is missing");
            }
            Err(EngineError::NotFound.into())
        }
    }
}

/// Convenience: fetch the snapshot id a subvolume currently points at.
pub(crate) fn get_snapshot(txn: &mut dyn Transaction, id: u32) -> Result<u32, StoreError> {
    Ok(get(txn, id, true)?.snapshot)
}

fn write(txn: &mut dyn Transaction, id: u32, row: &SubvolumeRow) -> Result<(), StoreError> {
    txn.write_row(Tree::Subvolume, id, row.encode().to_vec())?;
    Ok(())
}

/// Scan `[SUBVOL_MIN, config.subvol_max]` for the first id with no row,
/// returning it without writing anything. `NO_SPACE` if the range is full.
pub(crate) fn allocate_slot(
    txn: &mut dyn Transaction,
    config: &EngineConfig,
) -> Result<u32, StoreError> {
    for id in SUBVOL_MIN..=config.subvol_max {
        if txn.read_row(Tree::Subvolume, id)?.is_none() {
            return Ok(id);
        }
    }
    Err(EngineError::NoSpace.into())
}

/// Delete a subvolume: `expect_snapshot_flag` is `Some(true)`/`Some(false)`
/// to require the row's `IS_SNAPSHOT` flag to match, or `None` to accept
/// either. Disagreement is reported as `NOT_FOUND`, matching the source's
/// "wrong kind of handle" treatment (SPEC_FULL.md §4.4).
pub(crate) fn delete(
    txn: &mut dyn Transaction,
    cache: &mut EquivCache,
    id: u32,
    expect_snapshot_flag: Option<bool>,
) -> Result<(), StoreError> {
    let row = get(txn, id, true)?;

    if let Some(expect) = expect_snapshot_flag {
        if row.is_snapshot() != expect {
            return Err(EngineError::NotFound.into());
        }
    }

    txn.delete_row(Tree::Subvolume, id)?;
    snapshot_store::mark_deleted(txn, cache, row.snapshot)?;

    // Reclamation is only ever a background hint; the commit hook fires
    // whether or not anyone is listening for it in this transaction.
    txn.on_commit(Box::new(|| {
        log::debug!("subvolume delete committed, reclamation may be queued");
    }));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::SubvolumeFlags;
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

    fn seed(txn: &mut dyn Transaction, id: u32, snapshot: u32, flags: SubvolumeFlags) {
        let row = SubvolumeRow::new(snapshot, 0, flags);
        unwrap_engine(write(txn, id, &row));
    }

    #[test]
    fn allocate_slot_finds_first_free_id() {
        let host = MemHost::new();
        let config = EngineConfig { subvol_max: 4, ..EngineConfig::default() };
        let mut txn = host.begin();
        seed(&mut *txn, 1, 10, SubvolumeFlags::empty());
        seed(&mut *txn, 2, 20, SubvolumeFlags::empty());
        let slot = unwrap_engine(allocate_slot(&mut *txn, &config));
        assert_eq!(slot, 3);
    }

    #[test]
    fn allocate_slot_reports_no_space_when_full() {
        let host = MemHost::new();
        let config = EngineConfig { subvol_max: 2, ..EngineConfig::default() };
        let mut txn = host.begin();
        seed(&mut *txn, 1, 10, SubvolumeFlags::empty());
        seed(&mut *txn, 2, 20, SubvolumeFlags::empty());
        assert_eq!(engine_err(allocate_slot(&mut *txn, &config)), EngineError::NoSpace);
    }

    #[test]
    fn get_reports_not_found_for_missing_row() {
        let host = MemHost::new();
        let mut txn = host.begin();
        assert_eq!(engine_err(get(&mut *txn, 1, true)), EngineError::NotFound);
    }

    #[test]
    fn delete_rejects_mismatched_snapshot_flag() {
        let host = MemHost::new();
        let mut txn = host.begin();
        let mut cache = EquivCache::new();
        seed(&mut *txn, 1, 10, SubvolumeFlags::empty());
        assert_eq!(engine_err(delete(&mut *txn, &mut cache, 1, Some(true))), EngineError::NotFound);
    }

    #[test]
    fn delete_marks_snapshot_deleted_and_removes_row() {
        let host = MemHost::new();
        let mut txn = host.begin();
        let mut cache = EquivCache::new();

        // A real snapshot row must back this subvolume for mark_deleted to succeed.
        unwrap_engine(snapshot_store::create(&mut *txn, &mut cache, 0, &[1]));
        seed(&mut *txn, 1, 1, SubvolumeFlags::IS_SNAPSHOT);

        unwrap_engine(delete(&mut *txn, &mut cache, 1, Some(true)));

        assert_eq!(engine_err(get(&mut *txn, 1, false)), EngineError::NotFound);
        let snap = unwrap_engine(snapshot_store::lookup(&mut *txn, 1));
        assert!(snap.is_deleted());
    }
}
