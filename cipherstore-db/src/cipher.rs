//! `SQLCipher` keying and connection configuration.
//!
//! # Open sequence
//!
//! 1. **Open**: `sqlite3_open_v2` creates or opens the file. Nothing can be
//!    read yet; every page is ciphertext.
//! 2. **Key**: `PRAGMA key` hands the passphrase (or raw key) to `SQLCipher`.
//!    An optional `PRAGMA cipher_compatibility` pins the on-disk format
//!    version before the first page is read.
//! 3. **Verify**: `PRAGMA cipher_version` confirms the engine was built with
//!    encryption, then a read of `sqlite_master` touches page 1. With the
//!    wrong key the decrypted header does not carry the `SQLite` magic and
//!    the engine fails with `SQLITE_NOTADB`, surfaced as
//!    [`DbErrorKind::KeyMismatch`].
//! 4. **Configure**: busy timeout, journal mode, sync mode, and foreign
//!    keys.
//!
//! A brand-new file accepts any key; the key becomes binding at the first
//! write.

use std::path::Path;

use log::debug;

use super::connection::{Connection, ConnectionOptions};
use super::error::{DbError, DbErrorKind, DbResult};
use super::key::DatabaseKey;
use super::value::Value;

/// Opens a database, applies the encryption key, and configures the
/// connection.
///
/// # Errors
///
/// Returns [`DbErrorKind::KeyMismatch`] when the key does not decrypt the
/// file, [`DbErrorKind::CipherUnavailable`] when the engine has no
/// encryption support, or any other engine error raised while opening.
pub fn open_encrypted(
    path: &Path,
    key: &DatabaseKey,
    options: &ConnectionOptions,
) -> DbResult<Connection> {
    let conn = Connection::open(path)?;
    apply_key(&conn, key, options.cipher_compatibility)?;
    configure_connection(&conn, options)?;
    Ok(conn)
}

/// Opens a database written by an older `SQLCipher` major version and
/// upgrades it in place with `PRAGMA cipher_migrate`.
///
/// # Errors
///
/// Returns [`DbErrorKind::KeyMismatch`] if the migration reports failure
/// (wrong key or not a legacy file).
pub fn open_legacy_and_migrate(
    path: &Path,
    key: &DatabaseKey,
    options: &ConnectionOptions,
) -> DbResult<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(&key.pragma())?;
    let outcome = conn.query_value("PRAGMA cipher_migrate;")?;
    let migrated = match outcome {
        Some(Value::Integer(code)) => code == 0,
        Some(Value::Text(code)) => code.trim() == "0",
        _ => false,
    };
    if !migrated {
        return Err(DbError::new(
            DbErrorKind::KeyMismatch,
            "cipher_migrate could not upgrade the database with the supplied key",
        ));
    }
    debug!("legacy cipher format upgraded at {}", path.display());
    verify_key(&conn)?;
    configure_connection(&conn, options)?;
    Ok(conn)
}

/// Applies the key and verifies it by touching the first page.
fn apply_key(conn: &Connection, key: &DatabaseKey, compatibility: Option<u8>) -> DbResult<()> {
    // The Zeroizing wrapper clears the PRAGMA text, key included, on drop.
    let pragma = key.pragma();
    conn.execute_batch(&pragma)?;

    if let Some(level) = compatibility {
        conn.execute_batch(&format!("PRAGMA cipher_compatibility = {level};"))?;
    }

    let cipher_version = conn.query_value("PRAGMA cipher_version;")?;
    match cipher_version {
        Some(Value::Text(version)) if !version.trim().is_empty() => {}
        _ => {
            return Err(DbError::new(
                DbErrorKind::CipherUnavailable,
                "sqlcipher not available in this build",
            ))
        }
    }

    verify_key(conn)
}

fn verify_key(conn: &Connection) -> DbResult<()> {
    conn.execute_batch("SELECT count(*) FROM sqlite_master;")
        .map_err(|e| {
            if e.kind == DbErrorKind::KeyMismatch {
                DbError::new(
                    DbErrorKind::KeyMismatch,
                    format!(
                        "encryption key verification failed (is the key correct?): {}",
                        e.message
                    ),
                )
            } else {
                e
            }
        })
}

/// Applies busy timeout, journal mode, sync mode, and foreign keys.
fn configure_connection(conn: &Connection, options: &ConnectionOptions) -> DbResult<()> {
    conn.set_busy_timeout(options.busy_timeout)?;
    conn.execute_batch(&format!(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = {};
         PRAGMA synchronous = {};",
        options.journal_mode.pragma_value(),
        options.sync_mode.pragma_value(),
    ))
}

/// Runs `PRAGMA integrity_check` and returns whether the database is healthy.
///
/// # Errors
///
/// Returns an error if the check cannot be executed.
pub fn integrity_check(conn: &Connection) -> DbResult<bool> {
    let result = conn.query_value("PRAGMA integrity_check;")?;
    Ok(matches!(result, Some(Value::Text(ref text)) if text.trim() == "ok"))
}
