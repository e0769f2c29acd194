//! Database error types for the safe `SQLite` wrapper.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Coarse classification of an engine failure.
///
/// The session layer maps these one-to-one onto its public taxonomy, so the
/// classification must never depend on anything but the engine result code
/// and the engine's own message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// The file could not be decrypted with the supplied key.
    KeyMismatch,
    /// A referenced schema object (table, column, index, view) is missing.
    NotReady,
    /// Bound parameter count does not match the statement's placeholders.
    BindingArity {
        /// Placeholders found in the statement text.
        expected: usize,
        /// Parameters supplied by the caller.
        actual: usize,
    },
    /// The statement text could not be parsed.
    Syntax,
    /// A uniqueness, foreign-key, `NOT NULL` or `CHECK` constraint failed.
    Constraint,
    /// A write was attempted on a read-only connection or transaction.
    ReadOnly,
    /// The database file is locked by another connection.
    Busy,
    /// The linked engine has no page-level encryption support.
    CipherUnavailable,
    /// Anything else reported by the engine.
    Other,
}

/// Error returned by database operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("sqlite error ({kind:?}): {message}")]
pub struct DbError {
    /// Classified failure kind.
    pub kind: DbErrorKind,
    /// Human-readable error message from the engine when available.
    pub message: String,
}

impl DbError {
    /// Creates a new database error.
    pub fn new(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Builds the error raised when placeholder and parameter counts differ.
    #[must_use]
    pub fn binding_arity(expected: usize, actual: usize) -> Self {
        Self::new(
            DbErrorKind::BindingArity { expected, actual },
            format!("statement has {expected} placeholders but {actual} parameters were bound"),
        )
    }

    /// Returns `true` if the failure means a schema object is missing.
    #[must_use]
    pub fn is_not_ready(&self) -> bool {
        self.kind == DbErrorKind::NotReady
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        let message = err.to_string();
        let kind = classify(&err, &message);
        Self { kind, message }
    }
}

/// Maps a `rusqlite` failure onto a [`DbErrorKind`].
fn classify(err: &rusqlite::Error, message: &str) -> DbErrorKind {
    if let rusqlite::Error::InvalidParameterCount(actual, expected) = err {
        return DbErrorKind::BindingArity {
            expected: *expected,
            actual: *actual,
        };
    }
    match err.sqlite_error_code() {
        Some(ErrorCode::NotADatabase) => DbErrorKind::KeyMismatch,
        Some(ErrorCode::ConstraintViolation) => DbErrorKind::Constraint,
        Some(ErrorCode::ReadOnly) => DbErrorKind::ReadOnly,
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => DbErrorKind::Busy,
        Some(ErrorCode::Unknown) => classify_generic(message),
        _ => DbErrorKind::Other,
    }
}

/// `SQLITE_ERROR` covers both parse failures and missing schema objects; the
/// engine only distinguishes them in its message.
fn classify_generic(message: &str) -> DbErrorKind {
    const MISSING: [&str; 5] = [
        "no such table",
        "no such column",
        "no such index",
        "no such view",
        "no such trigger",
    ];
    const SYNTAX: [&str; 3] = ["syntax error", "incomplete input", "unrecognized token"];

    if MISSING.iter().any(|needle| message.contains(needle)) {
        DbErrorKind::NotReady
    } else if SYNTAX.iter().any(|needle| message.contains(needle)) {
        DbErrorKind::Syntax
    } else {
        DbErrorKind::Other
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
