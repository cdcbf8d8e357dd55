//! Transaction helper
//!
//! Multi-statement writes (record versions, migrations) go through
//! `execute_in_transaction()` and are all-or-nothing.

use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Run `operation` inside a transaction opened with `behavior`
///
/// Commits when `operation` returns `Ok`. On `Err` the transaction is dropped,
/// which rolls it back, and the error is returned unchanged.
///
/// `TransactionBehavior::Immediate` takes the write lock at `BEGIN`, so a
/// read-then-write sequence inside `operation` cannot interleave with another
/// writer; it waits on the connection's busy timeout instead.
pub fn execute_in_transaction<F, T, E>(
    conn: &mut Connection,
    behavior: TransactionBehavior,
    operation: F,
) -> Result<T, E>
where
    F: FnOnce(&Transaction) -> Result<T, E>,
    E: From<rusqlite::Error>,
{
    let tx = conn.transaction_with_behavior(behavior)?;

    match operation(&tx) {
        Ok(result) => {
            tx.commit()?;
            Ok(result)
        }
        // Rollback happens via Drop
        Err(e) => Err(e),
    }
}
