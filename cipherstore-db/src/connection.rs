//! Safe wrapper around an encrypted `SQLite` connection.

use std::path::Path;
use std::time::Duration;

use rusqlite::{params_from_iter, OpenFlags, OptionalExtension};
use serde::Deserialize;

use super::error::DbResult;
use super::result_set::ResultSet;
use super::statement::Statement;
use super::transaction::{Transaction, TransactionMode};
use super::value::Value;

/// `SQLite` journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    /// Write-ahead log (concurrent readers during writes).
    #[default]
    Wal,
    /// Rollback journal deleted after each transaction.
    Delete,
}

impl JournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
        }
    }
}

/// `SQLite` synchronous mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Every commit is fsynced before it is reported.
    #[default]
    Full,
    /// Fsync at checkpoints only.
    Normal,
}

impl SyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Normal => "NORMAL",
        }
    }
}

/// Engine-level settings applied right after the key is verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Journal mode.
    pub journal_mode: JournalMode,
    /// Synchronous mode.
    pub sync_mode: SyncMode,
    /// How long the engine retries a locked file before failing with busy.
    pub busy_timeout: Duration,
    /// `SQLCipher` major-version compatibility level (`1..=4`), if pinned.
    pub cipher_compatibility: Option<u8>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::default(),
            sync_mode: SyncMode::default(),
            busy_timeout: Duration::from_millis(5_000),
            cipher_compatibility: None,
        }
    }
}

/// An open `SQLite` connection.
///
/// The connection is closed when dropped. It is `Send` but not `Sync`; the
/// session layer keeps it behind a mutex so exactly one batch touches it at
/// a time.
#[derive(Debug)]
pub struct Connection {
    inner: rusqlite::Connection,
}

impl Connection {
    /// Opens (or creates) the database file at `path`.
    ///
    /// The file is still opaque until a key is applied; see
    /// [`cipher::open_encrypted`](super::cipher::open_encrypted).
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot open or create the file.
    pub fn open(path: &Path) -> DbResult<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let inner = rusqlite::Connection::open_with_flags(path, flags)?;
        Ok(Self { inner })
    }

    /// Opens an unencrypted in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot allocate the database.
    pub fn open_in_memory() -> DbResult<Self> {
        Ok(Self {
            inner: rusqlite::Connection::open_in_memory()?,
        })
    }

    /// Executes one or more `;`-separated statements, discarding any rows.
    ///
    /// Suitable for DDL, PRAGMAs and fixed scripts; never pass caller data
    /// through here.
    ///
    /// # Errors
    ///
    /// Returns the first statement failure.
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        Ok(self.inner.execute_batch(sql)?)
    }

    /// Sets the busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the timeout.
    pub fn set_busy_timeout(&self, timeout: Duration) -> DbResult<()> {
        Ok(self.inner.busy_timeout(timeout)?)
    }

    fn total_changes(&self) -> DbResult<i64> {
        Ok(self
            .inner
            .query_row("SELECT total_changes()", [], |row| row.get(0))?)
    }

    /// Runs `statement` and materializes every row it returns.
    ///
    /// # Errors
    ///
    /// Returns the classified engine error if preparation, binding or any
    /// step fails.
    pub fn execute(&self, statement: &Statement) -> DbResult<ResultSet> {
        let rowid_before = self.inner.last_insert_rowid();
        let changes_before = self.total_changes()?;
        let mut stmt = self.inner.prepare(statement.text())?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_owned)
            .collect();

        let mut rows = Vec::new();
        {
            let mut cursor = stmt.query(params_from_iter(statement.params().iter()))?;
            while let Some(row) = cursor.next()? {
                let mut values = Vec::with_capacity(columns.len());
                for idx in 0..columns.len() {
                    values.push(Value::from(row.get_ref(idx)?));
                }
                rows.push(values);
            }
        }

        // `changes()` keeps the count of the last row-changing statement, so
        // it only belongs to this one if the running total moved.
        let rows_affected = if columns.is_empty() && self.total_changes()? != changes_before {
            u64::try_from(self.inner.changes()).unwrap_or(u64::MAX)
        } else {
            0
        };
        let rowid_after = self.inner.last_insert_rowid();
        let insert_id = (rows_affected > 0 && rowid_after != rowid_before).then_some(rowid_after);

        Ok(ResultSet::new(columns, rows, rows_affected, insert_id))
    }

    /// Runs `sql` and returns the first column of the first row, if any.
    ///
    /// # Errors
    ///
    /// Returns the classified engine error.
    pub fn query_value(&self, sql: &str) -> DbResult<Option<Value>> {
        let value = self
            .inner
            .query_row(sql, [], |row| row.get_ref(0).map(Value::from))
            .optional()?;
        Ok(value)
    }

    /// Begins a transaction in the given mode.
    ///
    /// # Errors
    ///
    /// Returns an error if `BEGIN` fails (for example, when the database is
    /// busy).
    pub fn transaction(&self, mode: TransactionMode) -> DbResult<Transaction<'_>> {
        Transaction::begin(self, mode)
    }

    /// Returns `true` when no transaction is open on this connection.
    #[must_use]
    pub fn is_autocommit(&self) -> bool {
        self.inner.is_autocommit()
    }

    /// Closes the connection, handing it back if the engine refuses.
    ///
    /// # Errors
    ///
    /// Returns the connection and the engine error if statements are still
    /// pending.
    pub fn close(self) -> Result<(), (Self, super::DbError)> {
        self.inner
            .close()
            .map_err(|(inner, err)| (Self { inner }, err.into()))
    }
}
