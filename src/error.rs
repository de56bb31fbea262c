use std::fmt;

use btree_host::HostError;

/// Error taxonomy surfaced by the snapshot/subvolume engine (see
/// SPEC_FULL.md §7). `Restart` is deliberately absent: every public
/// operation runs its body through `lockrestart_do` and restarts are
/// retried transparently before any `EngineError` is constructed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineError {
    /// A required snapshot or subvolume row is absent.
    NotFound,
    /// The snapshot id space or the subvolume slot range is exhausted.
    NoSpace,
    /// An argument was out of range, or the validator rejected a row.
    Invalid(String),
    /// The equivalence cache or the reclamation `deleted` list could not grow.
    OutOfMemory,
    /// On-disk state violates an invariant. Always carries the ids involved;
    /// the caller has already had this logged at `warn!` by the time they
    /// see it.
    Inconsistent(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EngineError::NotFound => write!(f, "not found"),
            EngineError::NoSpace => write!(f, "no space"),
            EngineError::Invalid(why) => write!(f, "invalid: {why}"),
            EngineError::OutOfMemory => write!(f, "out of memory"),
            EngineError::Inconsistent(why) => write!(f, "inconsistent: {why}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<HostError> for EngineError {
    fn from(e: HostError) -> Self {
        match e {
            HostError::NotFound => EngineError::NotFound,
            HostError::NoSpace => EngineError::NoSpace,
            HostError::Invalid => EngineError::Invalid("host rejected operation".into()),
            HostError::Restart => {
                // The retry loop (see `StoreError`/`run_txn`) must have caught
                // this before it reaches engine error conversion; surfacing
                // it would mean a caller observes a transient condition as a
                // permanent failure.
                debug_assert!(false, "HostError::Restart leaked past the retry loop");
                EngineError::Inconsistent("transaction restart leaked to caller".into())
            }
        }
    }
}

/// Internal result carrier for code that runs inside a transaction body.
///
/// `HostError::Restart` (SPEC_FULL.md §5: "loop while contended") must
/// propagate all the way out to [`crate::txn::run_txn`] undisturbed so the
/// whole attempt can be re-run; every other failure is a real, terminal
/// [`EngineError`]. Splitting the two here means `snapshot_store` and
/// `subvolume_store` can use plain `?` on both host calls and their own
/// validation errors without the restart signal getting flattened into
/// `EngineError` along the way — which is the one thing the public
/// `EngineError` taxonomy (SPEC_FULL.md §7) is not allowed to represent.
#[derive(Debug)]
pub(crate) enum StoreError {
    Restart,
    Engine(EngineError),
}

impl From<HostError> for StoreError {
    fn from(e: HostError) -> Self {
        match e {
            HostError::Restart => StoreError::Restart,
            other => StoreError::Engine(EngineError::from(other)),
        }
    }
}

impl From<EngineError> for StoreError {
    fn from(e: EngineError) -> Self {
        StoreError::Engine(e)
    }
}
