//! Engine-level counterpart of [`btree_host::lockrestart_do`]: the same
//! "loop while contended" shape, but closing over [`StoreError`] instead of
//! [`btree_host::HostError`] so a transaction body can mix host restarts
//! with the engine's own validation failures and still have only the
//! restart retried.

use btree_host::{BtreeHost, Transaction};

use crate::error::{EngineError, StoreError};

pub(crate) fn run_txn<H, T, F>(host: &H, mut f: F) -> Result<T, EngineError>
where
    H: BtreeHost,
    F: FnMut(&mut dyn Transaction) -> Result<T, StoreError>,
{
    loop {
        let mut txn = host.begin();
        match f(&mut *txn) {
            Ok(v) => {
                txn.commit().map_err(EngineError::from)?;
                return Ok(v);
            }
            Err(StoreError::Restart) => continue,
            Err(StoreError::Engine(e)) => return Err(e),
        }
    }
}
