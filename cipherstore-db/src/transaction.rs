//! Safe wrapper around a `SQLite` transaction.

use log::warn;

use super::connection::Connection;
use super::error::DbResult;
use super::result_set::ResultSet;
use super::statement::Statement;

/// Transaction locking behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// `BEGIN IMMEDIATE`: takes the write lock up front so a batch never
    /// fails half-way with a lock upgrade error.
    ReadWrite,
    /// `BEGIN DEFERRED` with `PRAGMA query_only` set for the duration; any
    /// write fails with a read-only error.
    ReadOnly,
}

/// An open database transaction.
///
/// Automatically rolls back on drop unless explicitly committed.
pub struct Transaction<'conn> {
    conn: &'conn Connection,
    mode: TransactionMode,
    finished: bool,
}

impl<'conn> Transaction<'conn> {
    /// Begins a new transaction on `conn`.
    pub(super) fn begin(conn: &'conn Connection, mode: TransactionMode) -> DbResult<Self> {
        match mode {
            TransactionMode::ReadWrite => conn.execute_batch("BEGIN IMMEDIATE")?,
            TransactionMode::ReadOnly => {
                conn.execute_batch("BEGIN DEFERRED")?;
                if let Err(err) = conn.execute_batch("PRAGMA query_only = ON") {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(err);
                }
            }
        }
        Ok(Self {
            conn,
            mode,
            finished: false,
        })
    }

    /// Returns the transaction mode.
    #[must_use]
    pub const fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// See [`Connection::execute`].
    ///
    /// # Errors
    ///
    /// Returns the classified engine error. The transaction stays open; the
    /// caller decides whether to roll back (usually by dropping it).
    pub fn execute(&self, statement: &Statement) -> DbResult<ResultSet> {
        self.conn.execute(statement)
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if `COMMIT` fails (deferred constraint, busy). The
    /// transaction is then rolled back on drop.
    pub fn commit(mut self) -> DbResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    /// Rolls the transaction back explicitly.
    ///
    /// # Errors
    ///
    /// Returns an error if `ROLLBACK` fails.
    pub fn rollback(mut self) -> DbResult<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.conn.is_autocommit() {
            // Best-effort rollback; the engine may already have rolled back
            // on its own after a fatal error.
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                warn!("rollback on drop failed: {err}");
            }
        }
        if self.mode == TransactionMode::ReadOnly {
            if let Err(err) = self.conn.execute_batch("PRAGMA query_only = OFF") {
                warn!("clearing query_only after read-only transaction failed: {err}");
            }
        }
    }
}
