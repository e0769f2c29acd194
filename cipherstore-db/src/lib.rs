//! Minimal safe wrapper over a `SQLCipher`-encrypted `SQLite` database.
//!
//! The engine itself comes from `rusqlite` built against its bundled
//! `SQLCipher` amalgamation. This crate narrows that surface to what the
//! session layer needs:
//!
//! * [`cipher`] opens a file, applies the key, verifies it, and configures
//!   the connection (journal mode, sync mode, foreign keys).
//! * [`Statement`] is an immutable `(text, params)` pair whose placeholder
//!   arity is checked before the engine ever sees it.
//! * [`Connection::execute`] runs one statement and materializes every row
//!   into a [`ResultSet`].
//! * [`Transaction`] groups statements and rolls back when dropped without a
//!   commit.
//!
//! Consumer code never touches `rusqlite` types directly; engine failures
//! are classified into [`DbErrorKind`] so callers can react to "wrong key"
//! or "schema missing" without string matching.

mod connection;
pub mod error;
mod key;
mod result_set;
mod statement;
mod transaction;
pub mod value;

pub mod cipher;

pub use connection::{Connection, ConnectionOptions, JournalMode, SyncMode};
pub use error::{DbError, DbErrorKind, DbResult};
pub use key::DatabaseKey;
pub use result_set::{ResultSet, Row};
pub use statement::{placeholder_count, Statement};
pub use transaction::{Transaction, TransactionMode};
pub use value::Value;
