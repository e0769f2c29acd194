//! One open, keyed database handle.
//!
//! All engine work for a session is serialized through a single async
//! mutex around the connection. Each call takes the mutex with
//! `lock_owned`, moves the guard into a blocking worker, and the guard is
//! released when the worker finishes, whether the batch commits or fails
//! and even if the awaiting caller has gone away.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use cipherstore_db::{
    cipher, Connection, DatabaseKey, ResultSet, Statement, TransactionMode, Value,
};
use log::{debug, warn};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::coordinator::{commit_batch, TransactionBuilder};
use super::error::{SessionError, SessionResult};
use super::lock::DatabaseLockGuard;

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting work.
    Open,
    /// A close is waiting for in-flight work to finish; new work is refused.
    Closing,
    /// The handle has been released.
    Closed,
}

/// Result of [`Session::ensure_schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStatus {
    /// The probe succeeded; nothing was changed.
    Ready,
    /// The probe reported a missing schema object and the bootstrap batch
    /// was committed.
    Bootstrapped,
}

struct Handle {
    conn: Connection,
    _lock: DatabaseLockGuard,
}

/// An open handle to a named encrypted database.
///
/// Obtained from [`SessionRegistry::open`](crate::SessionRegistry::open);
/// cheap to share as `Arc<Session>`.
pub struct Session {
    name: String,
    path: PathBuf,
    key: DatabaseKey,
    state: Arc<Mutex<SessionState>>,
    handle: Arc<AsyncMutex<Option<Handle>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(
        name: String,
        path: PathBuf,
        key: DatabaseKey,
        conn: Connection,
        lock: DatabaseLockGuard,
    ) -> Self {
        Self {
            name,
            path,
            key,
            state: Arc::new(Mutex::new(SessionState::Open)),
            handle: Arc::new(AsyncMutex::new(Some(Handle { conn, _lock: lock }))),
        }
    }

    /// Returns the database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the path of the encrypted database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        load_state(&self.state)
    }

    pub(crate) fn key_matches(&self, key: &DatabaseKey) -> bool {
        self.key.matches(key)
    }

    /// Runs one statement as its own transaction.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::BindingArity`] before touching the engine if
    /// the parameter count is wrong, [`SessionError::NotOpen`] if the
    /// session is closing, or the statement's classified engine error.
    pub async fn execute_sql(
        &self,
        text: impl Into<String>,
        params: impl Into<Vec<Value>>,
    ) -> SessionResult<ResultSet> {
        let statement = Statement::new(text, params)?;
        self.with_connection(move |conn| Ok(conn.execute(&statement)?))
            .await
    }

    /// Runs `body` to queue statements, then commits them atomically.
    ///
    /// The body only records statements; nothing reaches the engine until
    /// it returns. Result sets come back in submission order.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransactionAborted`] if the body fails or
    /// any statement fails; the whole batch is rolled back either way.
    pub async fn transaction<F>(&self, body: F) -> SessionResult<Vec<ResultSet>>
    where
        F: FnOnce(&mut TransactionBuilder) -> SessionResult<()>,
    {
        self.run_body(body, TransactionMode::ReadWrite).await
    }

    /// Like [`transaction`](Self::transaction), but every statement runs
    /// read-only; a write aborts the batch with [`SessionError::ReadOnly`]
    /// as its root cause.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransactionAborted`] on any failure.
    pub async fn read_transaction<F>(&self, body: F) -> SessionResult<Vec<ResultSet>>
    where
        F: FnOnce(&mut TransactionBuilder) -> SessionResult<()>,
    {
        self.run_body(body, TransactionMode::ReadOnly).await
    }

    /// Commits a prepared list of statements atomically.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransactionAborted`] on any failure.
    pub async fn sql_batch(&self, statements: Vec<Statement>) -> SessionResult<Vec<ResultSet>> {
        self.with_connection(move |conn| {
            commit_batch(conn, &statements, TransactionMode::ReadWrite)
        })
        .await
    }

    /// Runs `probe`; if it fails because a schema object is missing, commits
    /// `bootstrap` instead.
    ///
    /// Probe and bootstrap run under one hold of the session lock, so no
    /// other caller observes the half-way state.
    ///
    /// # Errors
    ///
    /// Returns any probe error other than a missing schema object unchanged,
    /// or [`SessionError::TransactionAborted`] if the bootstrap fails.
    pub async fn ensure_schema(
        &self,
        probe: Statement,
        bootstrap: Vec<Statement>,
    ) -> SessionResult<SchemaStatus> {
        let name = self.name.clone();
        self.with_connection(move |conn| match conn.execute(&probe) {
            Ok(_) => Ok(SchemaStatus::Ready),
            Err(err) if err.is_not_ready() => {
                debug!("schema missing in {name} ({err}), bootstrapping");
                commit_batch(conn, &bootstrap, TransactionMode::ReadWrite)?;
                Ok(SchemaStatus::Bootstrapped)
            }
            Err(err) => Err(err.into()),
        })
        .await
    }

    /// Runs the engine's integrity check.
    ///
    /// # Errors
    ///
    /// Returns an error if the check cannot be executed.
    pub async fn integrity_check(&self) -> SessionResult<bool> {
        self.with_connection(|conn| Ok(cipher::integrity_check(conn)?))
            .await
    }

    async fn run_body<F>(&self, body: F, mode: TransactionMode) -> SessionResult<Vec<ResultSet>>
    where
        F: FnOnce(&mut TransactionBuilder) -> SessionResult<()>,
    {
        self.ensure_open()?;
        let mut builder = TransactionBuilder::new();
        if let Err(err) = body(&mut builder) {
            debug!("transaction body for {} failed: {err}", self.name);
            return Err(SessionError::aborted_at(None, err));
        }
        let statements = builder.into_statements();
        self.with_connection(move |conn| commit_batch(conn, &statements, mode))
            .await
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.state() == SessionState::Open {
            Ok(())
        } else {
            Err(SessionError::NotOpen(self.name.clone()))
        }
    }

    /// Runs `work` against the connection on a blocking worker while
    /// holding the session lock.
    async fn with_connection<T, F>(&self, work: F) -> SessionResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> SessionResult<T> + Send + 'static,
    {
        self.ensure_open()?;
        let guard = Arc::clone(&self.handle).lock_owned().await;
        if guard.is_none() {
            return Err(SessionError::NotOpen(self.name.clone()));
        }
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || match &*guard {
            Some(handle) => work(&handle.conn),
            None => Err(SessionError::NotOpen(name)),
        })
        .await?
    }

    /// Waits for in-flight work, then closes the engine handle and releases
    /// the lock file.
    ///
    /// If the engine refuses to close, the handle is put back and the
    /// session returns to [`SessionState::Open`]. If this future is dropped
    /// while still waiting, the session also returns to `Open`; once the
    /// close has started on the blocking worker it runs to completion.
    pub(crate) async fn shutdown(&self) -> SessionResult<()> {
        store_state(&self.state, SessionState::Closing);
        let reopen = ReopenOnDrop {
            state: &self.state,
            armed: true,
        };
        let guard = Arc::clone(&self.handle).lock_owned().await;
        reopen.disarm();

        let state = Arc::clone(&self.state);
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || close_handle(guard, &state, &name)).await?
    }
}

fn load_state(state: &Mutex<SessionState>) -> SessionState {
    *state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn store_state(state: &Mutex<SessionState>, value: SessionState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = value;
}

/// Puts a closing session back to `Open` unless disarmed.
struct ReopenOnDrop<'a> {
    state: &'a Mutex<SessionState>,
    armed: bool,
}

impl ReopenOnDrop<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ReopenOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            store_state(self.state, SessionState::Open);
        }
    }
}

fn close_handle(
    mut guard: OwnedMutexGuard<Option<Handle>>,
    state: &Mutex<SessionState>,
    name: &str,
) -> SessionResult<()> {
    let Some(Handle { conn, _lock: lock }) = guard.take() else {
        store_state(state, SessionState::Closed);
        return Ok(());
    };
    match conn.close() {
        Ok(()) => {
            drop(lock);
            store_state(state, SessionState::Closed);
            Ok(())
        }
        Err((conn, err)) => {
            warn!("engine refused to close {name}: {err}");
            *guard = Some(Handle { conn, _lock: lock });
            store_state(state, SessionState::Open);
            Err(err.into())
        }
    }
}
