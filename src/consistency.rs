//! Consistency checker (SPEC_FULL.md §4.7): the fsck-time pass over
//! snapshot and subvolume rows. Runs as two passes in one transaction and
//! never mutates anything — every failure is logged and collected; the
//! checker only reports `ok` if nothing failed.

use btree_host::{BtreeHost, Transaction, Tree};

use crate::error::EngineError;
use crate::row::{SnapshotRow, ID_MAX, ID_MIN, SUBVOL_MAX, SUBVOL_MIN};
use crate::snapshot_store;
use crate::subvolume_store;
use crate::txn::run_txn;

/// One fsck failure, already logged at `warn!` by the time the caller sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckFailure(pub String);

impl std::fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run both passes of SPEC_FULL.md §4.7. Returns every failure found;
/// `Ok(())` iff the list is empty.
pub fn check(host: &dyn BtreeHost) -> Result<Vec<CheckFailure>, EngineError> {
    run_txn(host, |txn| {
        let mut failures = Vec::new();
        check_snapshot_rows(txn, &mut failures);
        check_subvolume_rows(txn, &mut failures);
        Ok::<_, crate::error::StoreError>(failures)
    })
}

fn fail(failures: &mut Vec<CheckFailure>, msg: String) {
    log::warn!("fsck: {msg}");
    failures.push(CheckFailure(msg));
}

/// Pass 1: every snapshot row's subvol/parent/children back-pointers.
fn check_snapshot_rows(txn: &mut dyn Transaction, failures: &mut Vec<CheckFailure>) {
    let rows = match txn.iter_rows_from(Tree::Snapshot, ID_MIN) {
        Ok(rows) => rows,
        Err(e) => {
            fail(failures, format!("could not iterate snapshot rows: {e}"));
            return;
        }
    };

    let decoded: Vec<(u32, SnapshotRow)> = rows
        .into_iter()
        .filter(|(id, _)| *id <= ID_MAX)
        .filter_map(|(id, bytes)| match SnapshotRow::decode(&bytes) {
            Some(row) => Some((id, row)),
            None => {
                fail(failures, format!("snapshot {id}: corrupt row"));
                None
            }
        })
        .collect();

    for &(id, row) in &decoded {
        if row.is_subvol() {
            match subvolume_store::get(txn, row.subvol, false) {
                Ok(subvol) if subvol.snapshot != id => {
                    fail(
                        failures,
                        format!(
                            "snapshot {id}: IS_SUBVOL set, but subvolume {} points at {} instead",
                            row.subvol, subvol.snapshot
                        ),
                    );
                }
                Ok(_) => {}
                Err(_) => fail(
                    failures,
                    format!("snapshot {id}: IS_SUBVOL set, but subvolume {} is missing", row.subvol),
                ),
            }
        } else if row.subvol != 0 {
            fail(
                failures,
                format!("snapshot {id}: subvol field {} set without IS_SUBVOL", row.subvol),
            );
        }

        if row.parent != 0 {
            match snapshot_store::lookup(txn, row.parent) {
                Ok(parent) => {
                    if !parent.children.contains(&id) {
                        fail(
                            failures,
                            format!("snapshot {id}: parent {} does not list it among children", row.parent),
                        );
                    }
                }
                Err(_) => fail(failures, format!("snapshot {id}: parent {} is missing", row.parent)),
            }
        }

        for &child in row.children.iter().filter(|&&c| c != 0) {
            match snapshot_store::lookup(txn, child) {
                Ok(child_row) if child_row.parent != id => {
                    fail(
                        failures,
                        format!("snapshot {id}: child {child} has parent {} instead", child_row.parent),
                    );
                }
                Ok(_) => {}
                Err(_) => fail(failures, format!("snapshot {id}: child {child} is missing")),
            }
        }
    }
}

/// Pass 2: every subvolume row names a live snapshot row.
fn check_subvolume_rows(txn: &mut dyn Transaction, failures: &mut Vec<CheckFailure>) {
    let rows = match txn.iter_rows_from(Tree::Subvolume, SUBVOL_MIN) {
        Ok(rows) => rows,
        Err(e) => {
            fail(failures, format!("could not iterate subvolume rows: {e}"));
            return;
        }
    };

    for (id, bytes) in rows.into_iter().filter(|(id, _)| *id <= SUBVOL_MAX) {
        let Some(row) = crate::row::SubvolumeRow::decode(&bytes) else {
            fail(failures, format!("subvolume {id}: corrupt row"));
            continue;
        };
        match snapshot_store::lookup(txn, row.snapshot) {
            Ok(snap) if snap.is_deleted() => fail(
                failures,
                format!("subvolume {id}: snapshot {} is marked deleted", row.snapshot),
            ),
            Ok(_) => {}
            Err(_) => fail(
                failures,
                format!("subvolume {id}: snapshot {} does not exist", row.snapshot),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::creation::create;
    use crate::equiv_cache::EquivCache;
    use crate::flags::SnapshotFlags;
    use crate::row::SnapshotRow;
    use btree_host::MemHost;

    #[test]
    fn clean_tree_passes() {
        let host = MemHost::new();
        let mut cache = EquivCache::new();
        let config = EngineConfig::default();
        create(&host, &mut cache, &config, 1, 0, false).unwrap();

        let failures = check(&host).unwrap();
        assert!(failures.is_empty(), "{failures:?}");
    }

    #[test]
    fn detects_subvolume_pointing_at_missing_snapshot() {
        let host = MemHost::new();
        let mut cache = EquivCache::new();
        let config = EngineConfig::default();
        create(&host, &mut cache, &config, 1, 0, false).unwrap();

        {
            let mut txn = host.begin();
            let row = crate::row::SubvolumeRow::new(999, 1, crate::flags::SubvolumeFlags::empty());
            txn.write_row(Tree::Subvolume, 42, row.encode().to_vec()).unwrap();
            txn.commit().unwrap();
        }

        let failures = check(&host).unwrap();
        assert!(failures.iter().any(|f| f.0.contains("subvolume 42")));
    }

    #[test]
    fn detects_child_whose_parent_back_pointer_is_wrong() {
        let host = MemHost::new();
        let mut cache = EquivCache::new();
        let mut txn = host.begin();

        let parent_ids = crate::snapshot_store::create(&mut *txn, &mut cache, 0, &[1]).unwrap();
        let parent = parent_ids[0];

        // A standalone child row that names `parent` as its own parent, but
        // which `parent`'s own children array never lists.
        let child = SnapshotRow::new(parent, 0, SnapshotFlags::empty());
        txn.write_row(Tree::Snapshot, parent + 5, child.encode().to_vec()).unwrap();
        txn.commit().unwrap();

        let failures = check(&host).unwrap();
        assert!(failures.iter().any(|f| f.0.contains("does not list it among children")));
    }
}
