//! The trait boundary this crate exists to draw: a stand-in for the real
//! clustered B-tree (node layout, journalling, on-disk free space — all of
//! that lives outside this crate). Everything above this module is written
//! only against these traits; [`crate::memhost`] is a reference
//! implementation used by tests and the debug CLI, not a second production
//! backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::HostError;

pub type RowId = u32;

/// Which fixed-row tree a [`Transaction`] row operation addresses.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Tree {
    Snapshot,
    Subvolume,
}

/// A key in one of the "snapshot-bearing" trees (inodes, dirents, extents,
/// xattrs, ...): a non-snapshot position plus the snapshot id that tags it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapKey {
    pub pos: u64,
    pub snapshot: RowId,
}

/// One attempt at a transactional body. Operations may fail with
/// [`HostError::Restart`] at any point; callers should run the whole body
/// through [`lockrestart_do`] rather than handling `Restart` themselves.
///
/// Row reads/writes return owned buffers rather than borrowed slices: the
/// real B-tree would stream through an iterator cursor, but a reference
/// host has no cursor to keep alive across calls, so it materializes.
pub trait Transaction {
    fn restart_count(&self) -> u32;

    fn read_row(&mut self, tree: Tree, id: RowId) -> Result<Option<Vec<u8>>, HostError>;
    fn write_row(&mut self, tree: Tree, id: RowId, value: Vec<u8>) -> Result<(), HostError>;
    fn delete_row(&mut self, tree: Tree, id: RowId) -> Result<(), HostError>;
    /// Rows with id >= `from`, ascending, id 0 excluded (id 0 is never a live row).
    fn iter_rows_from(&mut self, tree: Tree, from: RowId) -> Result<Vec<(RowId, Vec<u8>)>, HostError>;

    /// Names of registered snapshot-bearing trees (inodes, dirents, ...).
    fn registered_trees(&self) -> Vec<String>;
    fn iter_keys(&mut self, tree_name: &str) -> Result<Vec<SnapKey>, HostError>;
    fn delete_key(&mut self, tree_name: &str, key: SnapKey) -> Result<(), HostError>;
    /// For inode-keyed trees: flush a cached row for `pos`. Returns `Ok(true)`
    /// when the flush was deferred (caller should skip `pos` this scan and
    /// retry on the next one).
    fn flush_cached(&mut self, tree_name: &str, pos: u64) -> Result<bool, HostError>;

    /// Commit the transaction. On the reference host this always succeeds
    /// once the body itself returned `Ok`; a real host could still fail here.
    fn commit(&mut self) -> Result<(), HostError>;
    /// Register a callback to run after a successful commit. Mirrors a
    /// transaction commit-hook mechanism; see DESIGN.md for why the
    /// reference host runs these synchronously right after `commit`.
    fn on_commit(&mut self, hook: Box<dyn FnOnce() + Send>);
}

/// Entry point for starting transactions and reaching the ambient
/// filesystem-wide resources (write gate, background job queue).
pub trait BtreeHost: Send + Sync {
    fn begin(&self) -> Box<dyn Transaction>;
    fn registered_trees(&self) -> Vec<String>;
    fn write_gate(&self) -> &dyn WriteGate;
    fn job_queue(&self) -> &dyn JobQueue;
}

/// `loop while contended`: re-run `f` from scratch every time it reports
/// `HostError::Restart`, exactly as the teacher's `lockrestart_do` re-runs a
/// C `bch2_trans_begin`/retry body. No durable effect of a retried attempt
/// is ever observed — `f` gets a fresh `Transaction` each time, and only a
/// non-restart result is committed.
pub fn lockrestart_do<T, F>(host: &dyn BtreeHost, mut f: F) -> Result<T, HostError>
where
    F: FnMut(&mut dyn Transaction) -> Result<T, HostError>,
{
    loop {
        let mut txn = host.begin();
        match f(&mut *txn) {
            Err(e) if e.is_restart() => continue,
            Err(e) => return Err(e),
            Ok(v) => {
                txn.commit()?;
                return Ok(v);
            }
        }
    }
}

/// Filesystem-wide write reference: held while reclamation (or any other
/// background writer) is in flight, so unmount can wait for it to drain.
pub trait WriteGate: Send + Sync {
    fn take(&self) -> WriteRefGuard;
    fn count(&self) -> usize;
}

pub struct WriteRefGuard(Arc<AtomicUsize>);

impl WriteRefGuard {
    pub fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        WriteRefGuard(counter)
    }
}

impl Drop for WriteRefGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A background work queue that coalesces: at most one pending instance of
/// "the" job (reclamation) is ever queued. The real deferred-work
/// infrastructure (a long-lived worker pool) is out of scope for this
/// crate; this trait is the narrow seam the engine calls through.
pub trait JobQueue: Send + Sync {
    /// Enqueue `job` unless one is already pending. Returns `true` if this
    /// call actually enqueued work.
    fn enqueue_if_idle(&self, job: Box<dyn FnOnce() + Send + 'static>) -> bool;
}
