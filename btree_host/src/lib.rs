//! Trait seam for the transactional B-tree host that the snapshot/subvolume
//! engine in `bcachefs_snapshots` is written against, plus an in-memory
//! reference implementation (`memhost`) used by that crate's tests and its
//! debug CLI.
//!
//! Nothing in here implements a real B-tree: node layout, on-disk free
//! space, and write-ahead journalling are all external collaborators (see
//! SPEC_FULL.md §1). What lives here is only the boundary: transactions
//! with restart semantics, fixed-row read/write/delete, snapshot-aware key
//! iteration, a write-reference gate, and a coalescing background job
//! queue.

pub mod error;
pub mod host;
pub mod memhost;

pub use error::HostError;
pub use host::{
    lockrestart_do, BtreeHost, JobQueue, RowId, SnapKey, Transaction, Tree, WriteGate,
    WriteRefGuard,
};
pub use memhost::MemHost;
