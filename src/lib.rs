//! Snapshot and subvolume engine for a copy-on-write, B-tree-backed
//! filesystem (SPEC_FULL.md §1). This crate owns the snapshot tree data
//! model, subvolume lifecycle, dead-snapshot reclamation, and the fsck pass
//! over both; it is written entirely against the [`btree_host`] trait seam
//! rather than any real clustered B-tree, which is an external collaborator.
//!
//! [`Engine`] is the single entry point the rest of a filesystem would call
//! into: `subvolume_create`/`subvolume_delete`/`subvolume_get_snapshot` for
//! the VFS-facing lifecycle, `snapshots_start`/`snapshots_check`/
//! `snapshots_exit` for mount/fsck/unmount integration.

pub mod config;
pub mod consistency;
pub mod creation;
pub mod equiv_cache;
pub mod error;
pub mod flags;
pub mod reclamation;
pub mod render;
pub mod row;
pub mod snapshot_store;
pub mod subvolume_store;
mod txn;

use std::sync::{Arc, Mutex};

use btree_host::{BtreeHost, Tree};

pub use config::EngineConfig;
pub use consistency::CheckFailure;
pub use creation::Created;
pub use error::EngineError;
pub use row::{SnapshotRow, SubvolumeRow};

use equiv_cache::EquivCache;
use reclamation::{NamedTree, SnapshotBearingTree};
use row::ID_MIN;

/// The engine's full public surface, bound to one host for its lifetime.
/// Cheap to construct; the expensive state (the equivalence cache) lives
/// behind an `Arc<Mutex<_>>` so the reclamation job, which runs on its own
/// worker (SPEC_FULL.md §5), can share it with foreground callers.
pub struct Engine<H: BtreeHost + Clone + 'static> {
    host: H,
    cache: Arc<Mutex<EquivCache>>,
    config: EngineConfig,
    trees: Arc<Vec<Box<dyn SnapshotBearingTree>>>,
}

impl<H: BtreeHost + Clone + 'static> Engine<H> {
    /// Construct an engine over `host`, registering every snapshot-bearing
    /// tree the host itself knows about (SPEC_FULL.md §4.6 expansion note).
    /// Does not touch the host's rows; call [`Engine::snapshots_start`]
    /// before normal operation.
    pub fn new(host: H, config: EngineConfig) -> Self {
        let trees = host
            .registered_trees()
            .into_iter()
            .map(|name| Box::new(NamedTree(name)) as Box<dyn SnapshotBearingTree>)
            .collect();
        Engine {
            host,
            cache: Arc::new(Mutex::new(EquivCache::new())),
            config,
            trees: Arc::new(trees),
        }
    }

    /// `subvolume_get_snapshot(subvol_id) -> snapshot_id`.
    pub fn subvolume_get_snapshot(&self, subvol_id: u32) -> Result<u32, EngineError> {
        txn::run_txn(&self.host, |txn| subvolume_store::get_snapshot(txn, subvol_id))
    }

    /// `subvolume_create(inode, src_subvol_or_0, read_only) -> (new_subvol, new_snapshot)`
    /// (SPEC_FULL.md §4.5).
    pub fn subvolume_create(
        &self,
        inode: u64,
        src_subvol_id: u32,
        read_only: bool,
    ) -> Result<Created, EngineError> {
        let mut cache = self.cache.lock().unwrap();
        creation::create(&self.host, &mut cache, &self.config, inode, src_subvol_id, read_only)
    }

    /// `subvolume_delete(subvol_id, expect_snapshot_flag)`. Deletes the
    /// subvolume row, marks its snapshot `DELETED`, and enqueues reclamation
    /// (a no-op if already pending).
    pub fn subvolume_delete(
        &self,
        subvol_id: u32,
        expect_snapshot_flag: Option<bool>,
    ) -> Result<(), EngineError> {
        {
            let mut cache = self.cache.lock().unwrap();
            txn::run_txn(&self.host, |txn| {
                subvolume_store::delete(txn, &mut cache, subvol_id, expect_snapshot_flag)
            })?;
        }
        self.enqueue_reclamation();
        Ok(())
    }

    /// `snapshots_start()`: populate the in-core cache from on-disk rows and
    /// re-queue reclamation if any row is left `DELETED` from a prior,
    /// interrupted pass (SPEC_FULL.md §4.6 crash semantics).
    pub fn snapshots_start(&self) -> Result<(), EngineError> {
        let rows = btree_host::lockrestart_do(&self.host, |txn| {
            txn.iter_rows_from(Tree::Snapshot, ID_MIN)
        })
        .map_err(EngineError::from)?;

        let mut cache = self.cache.lock().unwrap();
        let mut any_deleted = false;
        for (id, bytes) in rows {
            let Some(row) = row::SnapshotRow::decode(&bytes) else {
                log::warn!("snapshots_start: snapshot {id}: corrupt row, skipping cache load");
                continue;
            };
            cache.update_from_row(id, &row)?;
            any_deleted |= row.is_deleted();
        }
        cache.recompute_equiv();
        drop(cache);

        if any_deleted {
            log::info!("snapshots_start: found DELETED rows from a prior pass, re-queuing reclamation");
            self.enqueue_reclamation();
        }
        Ok(())
    }

    /// `snapshots_check()`: run the fsck pass (SPEC_FULL.md §4.7).
    pub fn snapshots_check(&self) -> Result<Vec<CheckFailure>, EngineError> {
        consistency::check(&self.host)
    }

    /// `snapshots_exit()`: drop the in-core cache. The reference host has
    /// nothing else to release; a real mount would also wait out any
    /// in-flight reclamation job here via its write gate.
    pub fn snapshots_exit(&self) {
        let mut cache = self.cache.lock().unwrap();
        *cache = EquivCache::new();
    }

    /// Run reclamation synchronously on the calling thread, bypassing the
    /// job queue. Exposed for tests and the debug CLI's `fsck`/`reclaim`
    /// subcommand, which want to observe the pass complete before going on.
    pub fn reclaim_now(&self) -> Result<(), EngineError> {
        let mut cache = self.cache.lock().unwrap();
        reclamation::reclaim(&self.host, &mut cache, &self.config, &self.trees)
    }

    fn enqueue_reclamation(&self) {
        reclamation::schedule(&self.host, Arc::clone(&self.cache), self.config, Arc::clone(&self.trees));
    }

    /// Every snapshot and subvolume row currently on disk, for the debug
    /// CLI's `list` subcommand. Not part of the spec's formal engine API
    /// (SPEC_FULL.md §6 names only the six operations above); ambient
    /// tooling support only.
    pub fn debug_list(&self) -> Result<(Vec<(u32, SnapshotRow)>, Vec<(u32, SubvolumeRow)>), EngineError> {
        btree_host::lockrestart_do(&self.host, |txn| {
            let snaps = txn
                .iter_rows_from(Tree::Snapshot, ID_MIN)
                .map(|rows| {
                    rows.into_iter()
                        .filter_map(|(id, bytes)| row::SnapshotRow::decode(&bytes).map(|r| (id, r)))
                        .collect::<Vec<_>>()
                })?;
            let subvols = txn
                .iter_rows_from(Tree::Subvolume, row::SUBVOL_MIN)
                .map(|rows| {
                    rows.into_iter()
                        .filter_map(|(id, bytes)| row::SubvolumeRow::decode(&bytes).map(|r| (id, r)))
                        .collect::<Vec<_>>()
                })?;
            Ok((snaps, subvols))
        })
        .map_err(EngineError::from)
    }
}
