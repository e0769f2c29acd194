//! Named, key-encrypted database sessions with atomic multi-statement
//! transactions.
//!
//! A [`SessionRegistry`] maps each database name to at most one open
//! [`Session`]. Sessions serialize their own work, run every statement
//! batch as one engine transaction, and expose an async API backed by
//! blocking workers. First-use databases can be seeded from packaged
//! read-only assets.
//!
//! ```rust,no_run
//! use cipherstore_core::{params, DatabaseKey, RegistryConfig, SessionRegistry};
//!
//! # async fn run() -> cipherstore_core::SessionResult<()> {
//! let config = RegistryConfig::new("/var/lib/app/db")
//!     .with_assets_dir("/usr/share/app/assets")
//!     .with_seed("employees", "employees.db");
//! let registry = SessionRegistry::new(config)?;
//!
//! let session = registry
//!     .open("employees", DatabaseKey::passphrase("password"))
//!     .await?;
//! let rows = session
//!     .execute_sql(
//!         "SELECT name FROM Employee WHERE deptId = ?",
//!         params![2],
//!     )
//!     .await?;
//! for row in rows.rows() {
//!     println!("{:?}", row.get("name"));
//! }
//! registry.close("employees").await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod coordinator;
mod error;
mod lock;
/// Bridge from the `log` facade to a host-provided logger.
pub mod logger;
mod migrator;
mod paths;
mod registry;
mod session;

pub use config::RegistryConfig;
pub use coordinator::TransactionBuilder;
pub use error::{SessionError, SessionResult};
pub use migrator::{AssetMigrator, SeedOutcome};
pub use paths::{validate_name, DatabasePaths};
pub use registry::SessionRegistry;
pub use session::{SchemaStatus, Session, SessionState};

pub use cipherstore_db::{
    params, DatabaseKey, DbError, JournalMode, ResultSet, Row, Statement, SyncMode, Value,
};
