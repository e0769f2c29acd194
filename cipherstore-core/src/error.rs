//! Error types for sessions, the registry and seed migration.

use cipherstore_db::{DbError, DbErrorKind};
use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised by the session layer.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The supplied key does not decrypt the database.
    #[error("key mismatch: {0}")]
    KeyMismatch(String),

    /// A table, column or other schema object the statement needs is missing.
    #[error("schema not ready: {0}")]
    NotReady(String),

    /// Placeholder and parameter counts differ.
    #[error("statement has {expected} placeholders but {actual} parameters were bound")]
    BindingArity {
        /// Placeholders in the statement text.
        expected: usize,
        /// Parameters supplied.
        actual: usize,
    },

    /// The statement text could not be parsed.
    #[error("sql syntax error: {0}")]
    SqlSyntax(String),

    /// A uniqueness, foreign-key, `NOT NULL` or `CHECK` constraint failed.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A write was attempted inside a read-only transaction.
    #[error("read-only: {0}")]
    ReadOnly(String),

    /// The engine gave up waiting for a file lock.
    #[error("database busy: {0}")]
    Busy(String),

    /// Any other engine failure.
    #[error("engine error: {0}")]
    Engine(String),

    /// The linked engine was built without encryption.
    #[error("encryption unavailable: {0}")]
    CipherUnavailable(String),

    /// The name is already open with a different key, or held by another
    /// process.
    #[error("database `{0}` is already open")]
    AlreadyOpen(String),

    /// No open session exists for the name, or the session is closing.
    #[error("database `{0}` is not open")]
    NotOpen(String),

    /// The database cannot be deleted while a session holds it.
    #[error("database `{0}` is still open")]
    StillOpen(String),

    /// No database file exists for the name.
    #[error("database `{0}` not found")]
    NotFound(String),

    /// The seed asset could not be located.
    #[error("seed asset not found: {0}")]
    AssetNotFound(String),

    /// A transaction was rolled back.
    ///
    /// `index` is the position of the failing statement in submission
    /// order, or `None` when the body itself failed or the commit was
    /// refused.
    #[error("transaction aborted{}: {source}", fmt_index(.index))]
    TransactionAborted {
        /// Position of the failing statement, if a statement failed.
        index: Option<usize>,
        /// The underlying failure.
        source: Box<SessionError>,
    },

    /// The transaction body gave up on its own.
    #[error("aborted: {0}")]
    Aborted(String),

    /// The database name is not a single, plain file name.
    #[error("invalid database name `{0}`")]
    InvalidName(String),

    /// Registry configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// File system failure outside the engine.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The cross-process lock file could not be used.
    #[error("lock error: {0}")]
    Lock(String),

    /// A worker task failed unexpectedly.
    #[error("internal error: {0}")]
    Internal(String),
}

fn fmt_index(index: &Option<usize>) -> String {
    index.map_or_else(String::new, |index| format!(" at statement {index}"))
}

impl SessionError {
    /// Builds the error for a failed transaction.
    #[must_use]
    pub fn aborted_at(index: Option<usize>, source: Self) -> Self {
        Self::TransactionAborted {
            index,
            source: Box::new(source),
        }
    }

    /// Returns the innermost error, looking through
    /// [`SessionError::TransactionAborted`].
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        let mut current = self;
        while let Self::TransactionAborted { source, .. } = current {
            current = source.as_ref();
        }
        current
    }

    /// Returns `true` when the root cause is a missing schema object.
    #[must_use]
    pub fn is_not_ready(&self) -> bool {
        matches!(self.root_cause(), Self::NotReady(_))
    }
}

impl From<DbError> for SessionError {
    fn from(err: DbError) -> Self {
        match err.kind {
            DbErrorKind::KeyMismatch => Self::KeyMismatch(err.message),
            DbErrorKind::NotReady => Self::NotReady(err.message),
            DbErrorKind::BindingArity { expected, actual } => {
                Self::BindingArity { expected, actual }
            }
            DbErrorKind::Syntax => Self::SqlSyntax(err.message),
            DbErrorKind::Constraint => Self::ConstraintViolation(err.message),
            DbErrorKind::ReadOnly => Self::ReadOnly(err.message),
            DbErrorKind::Busy => Self::Busy(err.message),
            DbErrorKind::CipherUnavailable => Self::CipherUnavailable(err.message),
            DbErrorKind::Other => Self::Engine(err.message),
        }
    }
}

impl From<tokio::task::JoinError> for SessionError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("blocking worker failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_looks_through_aborted() {
        let inner = SessionError::NotReady("no such table: Version".to_string());
        let err = SessionError::aborted_at(Some(2), SessionError::aborted_at(None, inner));
        assert!(matches!(err.root_cause(), SessionError::NotReady(_)));
        assert!(err.is_not_ready());
        assert!(err.to_string().contains("at statement 2"));
    }

    #[test]
    fn test_db_errors_map_onto_taxonomy() {
        let err = SessionError::from(DbError::binding_arity(3, 2));
        assert!(matches!(
            err,
            SessionError::BindingArity {
                expected: 3,
                actual: 2
            }
        ));
        let err = SessionError::from(DbError::new(DbErrorKind::Constraint, "UNIQUE"));
        assert!(matches!(err, SessionError::ConstraintViolation(_)));
        assert!(!err.is_not_ready());
    }
}
