//! An in-memory reference [`BtreeHost`], used by this crate's own tests and
//! by the debug CLI. It is a test double, not a second production backend:
//! the whole store sits behind one [`Mutex`], row iteration materializes
//! into a `Vec` instead of streaming through a cursor, and the "worker
//! pool" is one thread spawned per enqueued job. None of that would be
//! acceptable for the real clustered B-tree; all of it is fine for
//! exercising the engine built on top.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use log::trace;

use crate::error::HostError;
use crate::host::{BtreeHost, JobQueue, RowId, SnapKey, Transaction, Tree, WriteGate, WriteRefGuard};

#[derive(Default)]
struct MemState {
    snapshot_rows: BTreeMap<RowId, Vec<u8>>,
    subvol_rows: BTreeMap<RowId, Vec<u8>>,
    keyed_trees: HashMap<String, BTreeMap<SnapKey, Vec<u8>>>,
    /// Positions whose next `flush_cached` call should report "deferred".
    deferred_once: HashSet<u64>,
}

impl MemState {
    fn tree(&self, which: Tree) -> &BTreeMap<RowId, Vec<u8>> {
        match which {
            Tree::Snapshot => &self.snapshot_rows,
            Tree::Subvolume => &self.subvol_rows,
        }
    }

    fn tree_mut(&mut self, which: Tree) -> &mut BTreeMap<RowId, Vec<u8>> {
        match which {
            Tree::Snapshot => &mut self.snapshot_rows,
            Tree::Subvolume => &mut self.subvol_rows,
        }
    }
}

/// A reference `BtreeHost`. Cheap to clone (everything behind `Arc`); a
/// clone observes the same state and the same write-gate/job-queue.
#[derive(Clone)]
pub struct MemHost {
    state: Arc<Mutex<MemState>>,
    write_refs: Arc<AtomicUsize>,
    job_pending: Arc<AtomicBool>,
    /// Remaining forced `Restart` responses; consumed one per row/key op.
    inject_restarts: Arc<AtomicUsize>,
    trees: Vec<String>,
}

impl MemHost {
    pub fn new() -> Self {
        MemHost {
            state: Arc::new(Mutex::new(MemState::default())),
            write_refs: Arc::new(AtomicUsize::new(0)),
            job_pending: Arc::new(AtomicBool::new(false)),
            inject_restarts: Arc::new(AtomicUsize::new(0)),
            trees: Vec::new(),
        }
    }

    /// Register a snapshot-bearing tree by name (inodes, dirents, ...). Must
    /// be called before any transaction references it.
    pub fn register_tree(&mut self, name: &str) {
        self.trees.push(name.to_string());
        self.state
            .lock()
            .unwrap()
            .keyed_trees
            .entry(name.to_string())
            .or_default();
    }

    /// Force the next `inject_restarts` row/key operations across any
    /// transaction to report `HostError::Restart` once each. Used by tests
    /// to prove the `lockrestart_do` retry loop actually retries.
    pub fn inject_restarts(&self, n: usize) {
        self.inject_restarts.store(n, Ordering::SeqCst);
    }

    /// Insert a raw key directly, bypassing the engine. Test setup only.
    pub fn seed_key(&self, tree_name: &str, key: SnapKey, value: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .keyed_trees
            .entry(tree_name.to_string())
            .or_default()
            .insert(key, value);
    }

    /// Mark `pos` in `tree_name` so the next `flush_cached(pos)` call
    /// reports "deferred" exactly once.
    pub fn defer_flush_once(&self, pos: u64) {
        self.state.lock().unwrap().deferred_once.insert(pos);
    }

    /// Snapshot of which keys currently exist in `tree_name`, for assertions.
    pub fn keys_in(&self, tree_name: &str) -> Vec<SnapKey> {
        self.state
            .lock()
            .unwrap()
            .keyed_trees
            .get(tree_name)
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Block until no background job is pending and the write gate has
    /// drained, the way unmount does. Reference-host only: a real mount
    /// path has its own shutdown sequencing.
    pub fn wait_for_background(&self) {
        while self.job_pending.load(Ordering::SeqCst) || self.write_refs.load(Ordering::SeqCst) > 0 {
            thread::yield_now();
        }
    }

    fn maybe_inject_restart(&self) -> Result<(), HostError> {
        let remaining = self.inject_restarts.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .inject_restarts
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            trace!("memhost: injecting restart ({remaining} remaining)");
            return Err(HostError::Restart);
        }
        Ok(())
    }
}

impl Default for MemHost {
    fn default() -> Self {
        Self::new()
    }
}

struct MemTransaction {
    host: MemHost,
    restart_count: u32,
    hooks: Vec<Box<dyn FnOnce() + Send>>,
}

impl Transaction for MemTransaction {
    fn restart_count(&self) -> u32 {
        self.restart_count
    }

    fn read_row(&mut self, tree: Tree, id: RowId) -> Result<Option<Vec<u8>>, HostError> {
        self.host.maybe_inject_restart()?;
        Ok(self.host.state.lock().unwrap().tree(tree).get(&id).cloned())
    }

    fn write_row(&mut self, tree: Tree, id: RowId, value: Vec<u8>) -> Result<(), HostError> {
        self.host.maybe_inject_restart()?;
        self.host.state.lock().unwrap().tree_mut(tree).insert(id, value);
        Ok(())
    }

    fn delete_row(&mut self, tree: Tree, id: RowId) -> Result<(), HostError> {
        self.host.maybe_inject_restart()?;
        self.host.state.lock().unwrap().tree_mut(tree).remove(&id);
        Ok(())
    }

    fn iter_rows_from(&mut self, tree: Tree, from: RowId) -> Result<Vec<(RowId, Vec<u8>)>, HostError> {
        self.host.maybe_inject_restart()?;
        let state = self.host.state.lock().unwrap();
        Ok(state
            .tree(tree)
            .range(from.max(1)..)
            .map(|(k, v)| (*k, v.clone()))
            .collect())
    }

    fn registered_trees(&self) -> Vec<String> {
        self.host.trees.clone()
    }

    fn iter_keys(&mut self, tree_name: &str) -> Result<Vec<SnapKey>, HostError> {
        self.host.maybe_inject_restart()?;
        let state = self.host.state.lock().unwrap();
        Ok(state
            .keyed_trees
            .get(tree_name)
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default())
    }

    fn delete_key(&mut self, tree_name: &str, key: SnapKey) -> Result<(), HostError> {
        self.host.maybe_inject_restart()?;
        if let Some(t) = self.host.state.lock().unwrap().keyed_trees.get_mut(tree_name) {
            t.remove(&key);
        }
        Ok(())
    }

    fn flush_cached(&mut self, _tree_name: &str, pos: u64) -> Result<bool, HostError> {
        self.host.maybe_inject_restart()?;
        let mut state = self.host.state.lock().unwrap();
        Ok(state.deferred_once.remove(&pos))
    }

    fn commit(&mut self) -> Result<(), HostError> {
        for hook in self.hooks.drain(..) {
            hook();
        }
        Ok(())
    }

    fn on_commit(&mut self, hook: Box<dyn FnOnce() + Send>) {
        self.hooks.push(hook);
    }
}

impl BtreeHost for MemHost {
    fn begin(&self) -> Box<dyn Transaction> {
        Box::new(MemTransaction {
            host: self.clone(),
            restart_count: 0,
            hooks: Vec::new(),
        })
    }

    fn registered_trees(&self) -> Vec<String> {
        self.trees.clone()
    }

    fn write_gate(&self) -> &dyn WriteGate {
        self
    }

    fn job_queue(&self) -> &dyn JobQueue {
        self
    }
}

impl WriteGate for MemHost {
    fn take(&self) -> WriteRefGuard {
        WriteRefGuard::new(self.write_refs.clone())
    }

    fn count(&self) -> usize {
        self.write_refs.load(Ordering::SeqCst)
    }
}

impl JobQueue for MemHost {
    fn enqueue_if_idle(&self, job: Box<dyn FnOnce() + Send + 'static>) -> bool {
        if self
            .job_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let pending = self.job_pending.clone();
        thread::spawn(move || {
            job();
            pending.store(false, Ordering::SeqCst);
        });
        true
    }
}
