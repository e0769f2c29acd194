//! Process-wide map from database name to its one open session.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cipherstore_db::{cipher, Connection, ConnectionOptions, DatabaseKey, DbErrorKind};
use log::{debug, info, warn};
use tokio::sync::Mutex as AsyncMutex;

use super::config::RegistryConfig;
use super::error::{SessionError, SessionResult};
use super::lock::{DatabaseLock, DatabaseLockGuard};
use super::migrator::{AssetMigrator, SeedOutcome};
use super::paths::{validate_name, DatabasePaths};
use super::session::{Session, SessionState};

/// Owns every open [`Session`] and the transitions between open and closed.
///
/// Each name has its own transition lock, held for the whole of an open,
/// close or delete of that name, so check-then-create is atomic per name:
/// concurrent first opens produce exactly one handle, and a delete never
/// races an open of the same name. Transitions on different names do not
/// wait for each other. The map of registered sessions is only locked for
/// lookups and updates, never across I/O.
#[derive(Debug)]
pub struct SessionRegistry {
    config: RegistryConfig,
    paths: DatabasePaths,
    options: ConnectionOptions,
    transitions: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    /// Creates a registry, validating `config` and creating the data
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] for an invalid configuration or
    /// [`SessionError::Io`] if the data directory cannot be created.
    pub fn new(config: RegistryConfig) -> SessionResult<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        Ok(Self {
            paths: config.paths(),
            options: config.connection_options(),
            config,
            transitions: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the configuration the registry was built with.
    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Opens database `name`, or returns the session already open for it.
    ///
    /// If a seed is configured for `name` and the writable file does not
    /// exist yet, it is seeded first.
    ///
    /// # Errors
    ///
    /// * [`SessionError::InvalidName`] if `name` is not a plain file name.
    /// * [`SessionError::AlreadyOpen`] if the name is open with a different
    ///   key here, or held by another process.
    /// * [`SessionError::KeyMismatch`] if `key` does not decrypt the file.
    /// * [`SessionError::AssetNotFound`] if the file must be seeded and the
    ///   configured seed is missing.
    pub async fn open(&self, name: &str, key: DatabaseKey) -> SessionResult<Arc<Session>> {
        let seed = self.config.seeds.get(name).cloned();
        self.open_entry(name, key, seed).await
    }

    /// Opens database `name`, seeding it from `asset_name` on first use.
    ///
    /// # Errors
    ///
    /// As [`open`](Self::open).
    pub async fn migrate(
        &self,
        name: &str,
        asset_name: &str,
        key: DatabaseKey,
    ) -> SessionResult<Arc<Session>> {
        self.open_entry(name, key, Some(asset_name.to_string()))
            .await
    }

    async fn open_entry(
        &self,
        name: &str,
        key: DatabaseKey,
        seed: Option<String>,
    ) -> SessionResult<Arc<Session>> {
        validate_name(name)?;
        let transition = self.transition(name);
        let _transition = transition.lock().await;
        if let Some(existing) = self.registered(name) {
            if existing.key_matches(&key) {
                debug!("reusing open session for {name}");
                return Ok(existing);
            }
            return Err(SessionError::AlreadyOpen(name.to_string()));
        }

        let paths = self.paths.clone();
        let options = self.options.clone();
        let upgrade_legacy = self.config.upgrade_legacy_cipher;
        let owned_name = name.to_string();
        let (conn, lock, key) = tokio::task::spawn_blocking(move || {
            let (conn, lock) = open_blocking(
                &paths,
                &options,
                &owned_name,
                &key,
                seed.as_deref(),
                upgrade_legacy,
            )?;
            Ok::<_, SessionError>((conn, lock, key))
        })
        .await??;

        let path = self.paths.database_path(name);
        let session = Arc::new(Session::new(name.to_string(), path, key, conn, lock));
        self.sessions_map()
            .insert(name.to_string(), Arc::clone(&session));
        info!("opened database {name}");
        Ok(session)
    }

    /// Closes database `name` after in-flight work on it finishes.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotOpen`] if no session is open for `name`.
    /// If the engine refuses to close, the error is returned and the session
    /// stays open and registered. If the returned future is dropped before
    /// in-flight work finishes, the session stays open.
    pub async fn close(&self, name: &str) -> SessionResult<()> {
        let transition = self.transition(name);
        let _transition = transition.lock().await;
        let Some(session) = self.registered(name) else {
            warn!("close requested for {name}, which is not open");
            return Err(SessionError::NotOpen(name.to_string()));
        };
        session.shutdown().await?;
        self.sessions_map().remove(name);
        info!("closed database {name}");
        Ok(())
    }

    /// Deletes database `name` and every side file the registry created for
    /// it.
    ///
    /// # Errors
    ///
    /// * [`SessionError::StillOpen`] if a session for `name` is open here or
    ///   in another process.
    /// * [`SessionError::NotFound`] if the database file does not exist.
    pub async fn delete(&self, name: &str) -> SessionResult<()> {
        validate_name(name)?;
        let transition = self.transition(name);
        let _transition = transition.lock().await;
        if self.registered(name).is_some() {
            return Err(SessionError::StillOpen(name.to_string()));
        }
        let paths = self.paths.clone();
        let owned_name = name.to_string();
        tokio::task::spawn_blocking(move || delete_blocking(&paths, &owned_name)).await??;
        info!("deleted database {name}");
        Ok(())
    }

    /// Returns `true` if a session for `name` is registered.
    #[must_use]
    pub fn is_open(&self, name: &str) -> bool {
        self.registered(name).is_some()
    }

    /// Returns the names of all open sessions, sorted.
    #[must_use]
    pub fn open_names(&self) -> Vec<String> {
        let mut sessions = self.sessions_map();
        sessions.retain(|_, session| session.state() != SessionState::Closed);
        let mut names: Vec<String> = sessions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the transition lock for `name`, creating it on first use.
    fn transition(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut transitions = self
            .transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(transitions.entry(name.to_string()).or_default())
    }

    /// Returns the live session registered for `name`.
    ///
    /// A session whose close finished after its caller went away is
    /// unregistered here.
    fn registered(&self, name: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions_map();
        let session = sessions.get(name).cloned()?;
        if session.state() == SessionState::Closed {
            debug!("dropping closed session for {name}");
            sessions.remove(name);
            return None;
        }
        Some(session)
    }

    fn sessions_map(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn open_blocking(
    paths: &DatabasePaths,
    options: &ConnectionOptions,
    name: &str,
    key: &DatabaseKey,
    seed: Option<&str>,
    upgrade_legacy: bool,
) -> SessionResult<(Connection, DatabaseLockGuard)> {
    let lock = DatabaseLock::open(&paths.lock_path(name))?
        .try_lock()?
        .ok_or_else(|| SessionError::AlreadyOpen(name.to_string()))?;

    if let Some(asset_name) = seed {
        let outcome = AssetMigrator::new(paths).ensure_seeded(name, asset_name)?;
        if outcome == SeedOutcome::AlreadyPresent {
            debug!("opening existing database {name}, seed {asset_name} not needed");
        }
    }

    let path = paths.database_path(name);
    let conn = match cipher::open_encrypted(&path, key, options) {
        Ok(conn) => conn,
        Err(err) if err.kind == DbErrorKind::KeyMismatch && seed.is_some() && upgrade_legacy => {
            debug!("key rejected for seeded database {name}, trying legacy cipher upgrade");
            match cipher::open_legacy_and_migrate(&path, key, options) {
                Ok(conn) => {
                    info!("upgraded legacy cipher format of {name}");
                    conn
                }
                Err(legacy_err) => {
                    debug!("legacy cipher upgrade of {name} failed: {legacy_err}");
                    return Err(err.into());
                }
            }
        }
        Err(err) => return Err(err.into()),
    };
    Ok((conn, lock))
}

fn delete_blocking(paths: &DatabasePaths, name: &str) -> SessionResult<()> {
    let db_path = paths.database_path(name);
    if !db_path.exists() {
        return Err(SessionError::NotFound(name.to_string()));
    }

    let lock_path = paths.lock_path(name);
    let lock = DatabaseLock::open(&lock_path)?;
    let guard = lock
        .try_lock()?
        .ok_or_else(|| SessionError::StillOpen(name.to_string()))?;

    fs::remove_file(&db_path)?;
    for side_file in paths.side_file_paths(name) {
        remove_if_present(&side_file)?;
    }
    remove_if_present(&paths.seed_digest_path(name))?;

    drop(guard);
    drop(lock);
    remove_if_present(&lock_path)
}

fn remove_if_present(path: &Path) -> SessionResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cipherstore_db::params;

    fn registry(dir: &Path) -> SessionRegistry {
        SessionRegistry::new(RegistryConfig::new(dir)).expect("registry")
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_names() {
        let dir = tempfile::tempdir().expect("temp dir");
        let registry = registry(dir.path());
        let err = registry
            .open("../escape", DatabaseKey::passphrase("password"))
            .await
            .expect_err("invalid name");
        assert!(matches!(err, SessionError::InvalidName(_)));
        assert!(registry.open_names().is_empty());
    }

    #[tokio::test]
    async fn test_close_unknown_name() {
        let dir = tempfile::tempdir().expect("temp dir");
        let registry = registry(dir.path());
        let err = registry.close("missing").await.expect_err("not open");
        assert!(matches!(err, SessionError::NotOpen(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_database() {
        let dir = tempfile::tempdir().expect("temp dir");
        let registry = registry(dir.path());
        let err = registry.delete("missing").await.expect_err("not found");
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_side_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let registry = registry(dir.path());
        let session = registry
            .open("scratch", DatabaseKey::passphrase("password"))
            .await
            .expect("open");
        session
            .execute_sql("CREATE TABLE t (id INTEGER PRIMARY KEY)", params![])
            .await
            .expect("create table");
        drop(session);
        registry.close("scratch").await.expect("close");

        registry.delete("scratch").await.expect("delete");
        let paths = registry.config().paths();
        assert!(!paths.database_path("scratch").exists());
        assert!(!paths.lock_path("scratch").exists());
        for side_file in paths.side_file_paths("scratch") {
            assert!(!side_file.exists());
        }
    }
}
