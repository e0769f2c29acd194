//! Storage path helpers.

use std::path::{Path, PathBuf};

use super::error::{SessionError, SessionResult};

const LOCK_SUFFIX: &str = ".lock";
const SEED_DIGEST_SUFFIX: &str = ".seed-sha256";
const STAGING_SUFFIX: &str = ".seed-tmp";
const SIDE_FILE_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];
const MAX_NAME_LEN: usize = 255;

/// Paths for every file the registry manages under `data_dir`.
///
/// A database called `name` lives at `<data_dir>/<name>`, with its lock at
/// `<data_dir>/<name>.lock` and the digest of the seed it was copied from
/// at `<data_dir>/<name>.seed-sha256`.
#[derive(Debug, Clone)]
pub struct DatabasePaths {
    data_dir: PathBuf,
    assets_dir: Option<PathBuf>,
}

impl DatabasePaths {
    /// Builds paths rooted at `data_dir`, reading seeds from `assets_dir`.
    #[must_use]
    pub fn new(data_dir: impl AsRef<Path>, assets_dir: Option<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            assets_dir,
        }
    }

    /// Returns the directory holding writable databases.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Returns the read-only seed asset directory, if configured.
    #[must_use]
    pub fn assets_dir(&self) -> Option<&Path> {
        self.assets_dir.as_deref()
    }

    /// Returns the path to the encrypted database file.
    #[must_use]
    pub fn database_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    /// Returns the path to the cross-process lock file.
    #[must_use]
    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}{LOCK_SUFFIX}"))
    }

    /// Returns the path recording the seed asset digest.
    #[must_use]
    pub fn seed_digest_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}{SEED_DIGEST_SUFFIX}"))
    }

    /// Returns the temporary path a seed is copied to before the rename.
    #[must_use]
    pub fn staging_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!(".{name}{STAGING_SUFFIX}"))
    }

    /// Returns the engine's journal side files (`-wal`, `-shm`, `-journal`).
    #[must_use]
    pub fn side_file_paths(&self, name: &str) -> Vec<PathBuf> {
        SIDE_FILE_SUFFIXES
            .iter()
            .map(|suffix| self.data_dir.join(format!("{name}{suffix}")))
            .collect()
    }

    /// Returns the path of seed asset `asset_name`, or `None` when no
    /// assets directory is configured.
    #[must_use]
    pub fn asset_path(&self, asset_name: &str) -> Option<PathBuf> {
        self.assets_dir.as_ref().map(|dir| dir.join(asset_name))
    }
}

/// Checks that `name` is usable as a single file name in the data
/// directory.
///
/// Rejects empty names, path separators, `.`/`..`, NUL bytes, names longer
/// than 255 bytes, and names that would collide with the registry's own
/// lock, digest, staging or journal files.
///
/// # Errors
///
/// Returns [`SessionError::InvalidName`] describing the rejected name.
pub fn validate_name(name: &str) -> SessionResult<()> {
    let reserved = SIDE_FILE_SUFFIXES
        .iter()
        .chain([LOCK_SUFFIX, SEED_DIGEST_SUFFIX, STAGING_SUFFIX].iter())
        .any(|suffix| name.ends_with(suffix));
    let invalid = name.is_empty()
        || name.len() > MAX_NAME_LEN
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || reserved;
    if invalid {
        return Err(SessionError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Checks that a seed asset name stays inside the assets directory.
pub(crate) fn validate_asset_name(asset_name: &str) -> SessionResult<()> {
    let invalid = asset_name.is_empty()
        || asset_name == "."
        || asset_name == ".."
        || asset_name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(SessionError::AssetNotFound(format!(
            "`{asset_name}` is not a plain asset file name"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_database_paths() {
        let root = PathBuf::from("/tmp/cipherstore-paths");
        let paths = DatabasePaths::new(&root, Some(root.join("assets")));

        assert_eq!(paths.database_path("employees"), root.join("employees"));
        assert_eq!(paths.lock_path("employees"), root.join("employees.lock"));
        assert_eq!(
            paths.seed_digest_path("employees"),
            root.join("employees.seed-sha256")
        );
        assert_eq!(
            paths.side_file_paths("employees"),
            vec![
                root.join("employees-wal"),
                root.join("employees-shm"),
                root.join("employees-journal"),
            ]
        );
        assert_eq!(
            paths.asset_path("employees.db"),
            Some(root.join("assets").join("employees.db"))
        );
    }

    #[test]
    fn test_asset_path_requires_assets_dir() {
        let paths = DatabasePaths::new("/tmp/cipherstore-paths", None);
        assert!(paths.asset_path("employees.db").is_none());
    }

    #[test_case("employees" ; "plain")]
    #[test_case("employees.db" ; "with extension")]
    #[test_case(".hidden" ; "leading dot")]
    fn test_valid_names(name: &str) {
        assert!(validate_name(name).is_ok());
    }

    #[test_case("" ; "empty")]
    #[test_case("." ; "dot")]
    #[test_case(".." ; "dot dot")]
    #[test_case("a/b" ; "slash")]
    #[test_case("a\\b" ; "backslash")]
    #[test_case("a\0b" ; "nul")]
    #[test_case("employees.lock" ; "lock suffix")]
    #[test_case("employees-wal" ; "wal suffix")]
    fn test_invalid_names(name: &str) {
        assert!(matches!(
            validate_name(name),
            Err(SessionError::InvalidName(_))
        ));
    }

    #[test]
    fn test_name_length_limit() {
        assert!(validate_name(&"a".repeat(255)).is_ok());
        assert!(validate_name(&"a".repeat(256)).is_err());
    }
}
