//! First-use seeding of writable databases from packaged assets.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use super::error::{SessionError, SessionResult};
use super::paths::{validate_asset_name, DatabasePaths};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// What [`AssetMigrator::ensure_seeded`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// A writable database already existed and was left untouched.
    AlreadyPresent,
    /// The asset was copied into place.
    Seeded {
        /// Bytes copied.
        bytes: u64,
    },
}

/// Copies seed assets into the data directory.
///
/// The copy goes to a staging file, is fsynced, and is then linked into
/// place, so a crash never leaves a half-written database behind and an
/// existing writable file is never replaced.
#[derive(Debug, Clone, Copy)]
pub struct AssetMigrator<'a> {
    paths: &'a DatabasePaths,
}

impl<'a> AssetMigrator<'a> {
    /// Creates a migrator over `paths`.
    #[must_use]
    pub const fn new(paths: &'a DatabasePaths) -> Self {
        Self { paths }
    }

    /// Makes sure database `name` exists, seeding it from `asset_name` if it
    /// does not.
    ///
    /// When the database already exists and the asset's digest differs from
    /// the one recorded at seeding time, a warning is logged and the
    /// existing database is kept.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AssetNotFound`] if no assets directory is
    /// configured or the asset is missing, and [`SessionError::Io`] if the
    /// copy fails.
    pub fn ensure_seeded(&self, name: &str, asset_name: &str) -> SessionResult<SeedOutcome> {
        validate_asset_name(asset_name)?;
        let target = self.paths.database_path(name);
        if target.exists() {
            self.check_asset_unchanged(name, asset_name)?;
            debug!("database {name} already present, skipping seed");
            return Ok(SeedOutcome::AlreadyPresent);
        }

        let asset_path = self.paths.asset_path(asset_name).ok_or_else(|| {
            SessionError::AssetNotFound(format!(
                "no assets directory configured for `{asset_name}`"
            ))
        })?;
        if !asset_path.is_file() {
            return Err(SessionError::AssetNotFound(asset_path.display().to_string()));
        }

        fs::create_dir_all(self.paths.data_dir())?;
        let staging = self.paths.staging_path(name);
        let copied = copy_and_hash(&asset_path, &staging);
        let (bytes, digest) = match copied {
            Ok(copied) => copied,
            Err(err) => {
                let _ = fs::remove_file(&staging);
                return Err(err.into());
            }
        };

        let placed = place_without_overwrite(&staging, &target);
        let _ = fs::remove_file(&staging);
        if !placed? {
            debug!("database {name} appeared while seeding, keeping it");
            return Ok(SeedOutcome::AlreadyPresent);
        }
        sync_dir(self.paths.data_dir())?;
        fs::write(self.paths.seed_digest_path(name), &digest)?;

        info!("seeded database {name} from asset {asset_name} ({bytes} bytes)");
        Ok(SeedOutcome::Seeded { bytes })
    }

    fn check_asset_unchanged(&self, name: &str, asset_name: &str) -> SessionResult<()> {
        let recorded = match fs::read_to_string(self.paths.seed_digest_path(name)) {
            Ok(recorded) => recorded,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let Some(asset_path) = self
            .paths
            .asset_path(asset_name)
            .filter(|path| path.is_file())
        else {
            debug!("seed asset {asset_name} for database {name} is gone, skipping digest check");
            return Ok(());
        };
        let current = hash_file(&asset_path)?;
        if recorded.trim() != current {
            warn!(
                "seed asset for database {name} changed since it was seeded; \
                 keeping the existing database"
            );
        }
        Ok(())
    }
}

/// Copies `from` into a fresh `to`, fsyncs it, and returns the byte count
/// and hex SHA-256 of the copied data.
fn copy_and_hash(from: &Path, to: &Path) -> io::Result<(u64, String)> {
    let mut source = File::open(from)?;
    let mut dest = File::create(to)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let read = source.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        dest.write_all(&buffer[..read])?;
        total += read as u64;
    }
    dest.sync_all()?;
    Ok((total, hex::encode(hasher.finalize())))
}

fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Moves `staging` to `target` unless `target` already exists.
///
/// A hard link fails atomically when the target exists. File systems
/// without hard links fall back to a rename guarded by an existence check.
fn place_without_overwrite(staging: &Path, target: &Path) -> io::Result<bool> {
    match fs::hard_link(staging, target) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(_) if target.exists() => Ok(false),
        Err(_) => fs::rename(staging, target).map(|()| true),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, DatabasePaths) {
        let root = tempfile::tempdir().expect("temp dir");
        let assets = root.path().join("assets");
        fs::create_dir_all(&assets).expect("assets dir");
        fs::write(assets.join("employees.db"), b"seed-bytes").expect("write asset");
        let paths = DatabasePaths::new(root.path().join("data"), Some(assets));
        (root, paths)
    }

    #[test]
    fn test_seeds_once() {
        let (_root, paths) = setup();
        let migrator = AssetMigrator::new(&paths);

        let first = migrator
            .ensure_seeded("employees", "employees.db")
            .expect("first seed");
        assert_eq!(first, SeedOutcome::Seeded { bytes: 10 });
        assert_eq!(
            fs::read(paths.database_path("employees")).expect("read db"),
            b"seed-bytes"
        );
        assert!(!paths.staging_path("employees").exists());

        let digest = fs::read_to_string(paths.seed_digest_path("employees")).expect("digest");
        assert_eq!(digest.len(), 64);

        let second = migrator
            .ensure_seeded("employees", "employees.db")
            .expect("second seed");
        assert_eq!(second, SeedOutcome::AlreadyPresent);
    }

    #[test]
    fn test_never_overwrites_existing_database() {
        let (_root, paths) = setup();
        fs::create_dir_all(paths.data_dir()).expect("data dir");
        fs::write(paths.database_path("employees"), b"user-data").expect("write db");

        let outcome = AssetMigrator::new(&paths)
            .ensure_seeded("employees", "employees.db")
            .expect("seed");
        assert_eq!(outcome, SeedOutcome::AlreadyPresent);
        assert_eq!(
            fs::read(paths.database_path("employees")).expect("read db"),
            b"user-data"
        );
    }

    #[test]
    fn test_changed_asset_keeps_existing_database() {
        let (_root, paths) = setup();
        let migrator = AssetMigrator::new(&paths);
        migrator
            .ensure_seeded("employees", "employees.db")
            .expect("seed");

        let asset = paths.asset_path("employees.db").expect("asset path");
        fs::write(asset, b"new-seed-bytes").expect("rewrite asset");
        let outcome = migrator
            .ensure_seeded("employees", "employees.db")
            .expect("reseed");
        assert_eq!(outcome, SeedOutcome::AlreadyPresent);
        assert_eq!(
            fs::read(paths.database_path("employees")).expect("read db"),
            b"seed-bytes"
        );
    }

    #[test]
    fn test_existing_database_needs_no_asset() {
        let (_root, paths) = setup();
        let migrator = AssetMigrator::new(&paths);
        migrator
            .ensure_seeded("employees", "employees.db")
            .expect("seed");

        let asset = paths.asset_path("employees.db").expect("asset path");
        fs::remove_file(asset).expect("remove asset");
        let outcome = migrator
            .ensure_seeded("employees", "employees.db")
            .expect("existing database");
        assert_eq!(outcome, SeedOutcome::AlreadyPresent);

        let no_assets = DatabasePaths::new(paths.data_dir(), None);
        let outcome = AssetMigrator::new(&no_assets)
            .ensure_seeded("employees", "employees.db")
            .expect("existing database without assets dir");
        assert_eq!(outcome, SeedOutcome::AlreadyPresent);
    }

    #[test]
    fn test_missing_asset() {
        let (_root, paths) = setup();
        let err = AssetMigrator::new(&paths)
            .ensure_seeded("employees", "missing.db")
            .expect_err("missing asset");
        assert!(matches!(err, SessionError::AssetNotFound(_)));
        assert!(!paths.database_path("employees").exists());
    }

    #[test]
    fn test_no_assets_dir() {
        let root = tempfile::tempdir().expect("temp dir");
        let paths = DatabasePaths::new(root.path(), None);
        let err = AssetMigrator::new(&paths)
            .ensure_seeded("employees", "employees.db")
            .expect_err("no assets dir");
        assert!(matches!(err, SessionError::AssetNotFound(_)));
    }
}
