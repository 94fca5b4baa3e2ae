//! A mutable connection cell over immutable database values.
//!
//! The engine itself never synchronizes; writers must be serialized
//! externally (readers always work on a snapshot). `Conn` is that
//! serialization primitive: a read-write lock holding the current value,
//! swapping in `db_after` on every successful transaction.

use crate::database::Database;
use crate::error::DbResult;
use crate::tx::{TxForm, TxReport};
use parking_lot::RwLock;

/// A shared, lockable cell holding the latest database value.
#[derive(Debug)]
pub struct Conn {
    current: RwLock<Database>,
}

impl Conn {
    /// Wraps a database value in a connection.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            current: RwLock::new(db),
        }
    }

    /// A snapshot of the current value. The snapshot is unaffected by
    /// later transactions.
    #[must_use]
    pub fn db(&self) -> Database {
        self.current.read().clone()
    }

    /// Transacts against the current value and, on success, installs the
    /// after-value. The write lock is held across the whole transaction,
    /// serializing writers.
    ///
    /// # Errors
    ///
    /// Propagates the transaction diagnostics; the held value is unchanged
    /// on failure.
    pub fn transact(&self, forms: impl IntoIterator<Item = TxForm>) -> DbResult<TxReport> {
        let mut guard = self.current.write();
        let report = guard.transact(forms)?;
        *guard = report.db_after.clone();
        Ok(report)
    }
}

impl From<Database> for Conn {
    fn from(db: Database) -> Self {
        Self::new(db)
    }
}
