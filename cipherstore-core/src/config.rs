//! Registry configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use cipherstore_db::{ConnectionOptions, JournalMode, SyncMode};
use serde::Deserialize;

use super::error::{SessionError, SessionResult};
use super::paths::{validate_asset_name, validate_name, DatabasePaths};

/// Settings for a [`SessionRegistry`](crate::SessionRegistry).
///
/// Deserializable so hosts can ship it as JSON or TOML; every field except
/// `data_dir` has a default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Directory holding the writable encrypted databases.
    pub data_dir: PathBuf,

    /// Read-only directory holding packaged seed databases.
    #[serde(default)]
    pub assets_dir: Option<PathBuf>,

    /// Database name to seed asset name. `open` on one of these names seeds
    /// the writable file from the asset first.
    #[serde(default)]
    pub seeds: HashMap<String, String>,

    /// How long the engine retries a locked file before reporting busy.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Engine journal mode.
    #[serde(default)]
    pub journal_mode: JournalMode,

    /// Engine synchronous mode.
    #[serde(default)]
    pub sync_mode: SyncMode,

    /// Pins the `SQLCipher` compatibility level (`1..=4`).
    #[serde(default)]
    pub cipher_compatibility: Option<u8>,

    /// Whether a seeded database that fails key verification is upgraded
    /// from an older `SQLCipher` format.
    #[serde(default = "default_upgrade_legacy_cipher")]
    pub upgrade_legacy_cipher: bool,
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

const fn default_upgrade_legacy_cipher() -> bool {
    true
}

impl RegistryConfig {
    /// Creates a configuration with defaults for everything but `data_dir`.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            assets_dir: None,
            seeds: HashMap::new(),
            busy_timeout_ms: default_busy_timeout_ms(),
            journal_mode: JournalMode::default(),
            sync_mode: SyncMode::default(),
            cipher_compatibility: None,
            upgrade_legacy_cipher: default_upgrade_legacy_cipher(),
        }
    }

    /// Sets the seed asset directory.
    #[must_use]
    pub fn with_assets_dir(mut self, assets_dir: impl Into<PathBuf>) -> Self {
        self.assets_dir = Some(assets_dir.into());
        self
    }

    /// Associates database `name` with seed asset `asset_name`.
    #[must_use]
    pub fn with_seed(mut self, name: impl Into<String>, asset_name: impl Into<String>) -> Self {
        self.seeds.insert(name.into(), asset_name.into());
        self
    }

    /// Checks the configuration for values the registry cannot use.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] for a zero busy timeout, an unknown
    /// compatibility level, seeds without an assets directory, or badly
    /// formed seed names.
    pub fn validate(&self) -> SessionResult<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(SessionError::Config("data_dir must not be empty".into()));
        }
        if self.busy_timeout_ms == 0 {
            return Err(SessionError::Config(
                "busy_timeout_ms must be greater than zero".into(),
            ));
        }
        if let Some(level) = self.cipher_compatibility {
            if !(1..=4).contains(&level) {
                return Err(SessionError::Config(format!(
                    "cipher_compatibility must be between 1 and 4, got {level}"
                )));
            }
        }
        if !self.seeds.is_empty() && self.assets_dir.is_none() {
            return Err(SessionError::Config(
                "seeds are configured but assets_dir is not set".into(),
            ));
        }
        for (name, asset_name) in &self.seeds {
            validate_name(name)
                .and_then(|()| validate_asset_name(asset_name))
                .map_err(|err| SessionError::Config(format!("seed `{name}`: {err}")))?;
        }
        Ok(())
    }

    /// Builds the engine options for every connection the registry opens.
    #[must_use]
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            journal_mode: self.journal_mode,
            sync_mode: self.sync_mode,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            cipher_compatibility: self.cipher_compatibility,
        }
    }

    /// Builds the path helper for this configuration.
    #[must_use]
    pub fn paths(&self) -> DatabasePaths {
        DatabasePaths::new(&self.data_dir, self.assets_dir.clone())
    }
}
