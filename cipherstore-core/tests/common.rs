//! Common test utilities shared across integration tests.

use std::path::{Path, PathBuf};

use cipherstore_core::{
    params, DatabaseKey, RegistryConfig, SessionRegistry, SessionResult, Statement,
    TransactionBuilder,
};

pub const PASSWORD: &str = "password";
pub const ASSET_NAME: &str = "employees.db";
pub const EMPLOYEE_QUERY: &str = "SELECT a.name, b.name AS deptName \
     FROM Employees a, Departments b WHERE a.department = b.department_id";
/// Keeps the engine busy for well over the timeouts used in tests.
pub const SLOW_QUERY: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL \
     SELECT x + 1 FROM c WHERE x < 5000000) SELECT count(*) AS n FROM c";

pub fn key() -> DatabaseKey {
    DatabaseKey::passphrase(PASSWORD)
}

pub fn wrong_key() -> DatabaseKey {
    DatabaseKey::passphrase("bad")
}

pub struct TestEnv {
    pub root: tempfile::TempDir,
    pub registry: SessionRegistry,
}

impl TestEnv {
    /// Registry over an empty data directory with a seed asset available.
    pub async fn new() -> Self {
        Self::with_seed_format(None).await
    }

    /// Like [`TestEnv::new`], but the seed asset is written in the
    /// SQLCipher 3 on-disk format.
    pub async fn with_legacy_seed() -> Self {
        Self::with_seed_format(Some(3)).await
    }

    async fn with_seed_format(cipher_compatibility: Option<u8>) -> Self {
        let root = tempfile::tempdir().expect("temp dir");
        build_seed_asset(&assets_dir(root.path()), cipher_compatibility).await;
        let registry = SessionRegistry::new(config(root.path())).expect("registry");
        Self { root, registry }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.path().join("data")
    }

    /// A second registry over the same directories, standing in for another
    /// process.
    pub fn other_registry(&self) -> SessionRegistry {
        SessionRegistry::new(config(self.root.path())).expect("registry")
    }
}

fn assets_dir(root: &Path) -> PathBuf {
    root.join("assets")
}

fn config(root: &Path) -> RegistryConfig {
    RegistryConfig::new(root.join("data")).with_assets_dir(assets_dir(root))
}

/// Writes an encrypted, fully populated employee database to
/// `<assets_dir>/employees.db`.
async fn build_seed_asset(assets_dir: &Path, cipher_compatibility: Option<u8>) {
    let mut config = RegistryConfig::new(assets_dir);
    config.cipher_compatibility = cipher_compatibility;
    let registry = SessionRegistry::new(config).expect("asset registry");
    let session = registry.open(ASSET_NAME, key()).await.expect("open asset");
    session
        .transaction(queue_employee_schema)
        .await
        .expect("populate asset");
    drop(session);
    registry.close(ASSET_NAME).await.expect("close asset");
    let lock_file = assets_dir.join(format!("{ASSET_NAME}.lock"));
    std::fs::remove_file(lock_file).expect("remove asset lock file");
}

/// Queues the employee schema: 4 tables, 4 departments, 4 offices and 9
/// employees.
pub fn queue_employee_schema(tx: &mut TransactionBuilder) -> SessionResult<()> {
    for statement in employee_schema() {
        tx.push(statement);
    }
    Ok(())
}

pub fn employee_schema() -> Vec<Statement> {
    let mut statements: Vec<Statement> = [
        "CREATE TABLE IF NOT EXISTS Version (version_id INTEGER PRIMARY KEY NOT NULL)",
        "CREATE TABLE IF NOT EXISTS Departments (\
            department_id INTEGER PRIMARY KEY NOT NULL, \
            name VARCHAR(30))",
        "CREATE TABLE IF NOT EXISTS Offices (\
            office_id INTEGER PRIMARY KEY NOT NULL, \
            name VARCHAR(20), \
            longtitude FLOAT, \
            latitude FLOAT)",
        "CREATE TABLE IF NOT EXISTS Employees (\
            employe_id INTEGER PRIMARY KEY NOT NULL, \
            name VARCHAR(55), \
            office INTEGER, \
            department INTEGER, \
            FOREIGN KEY (office) REFERENCES Offices (office_id), \
            FOREIGN KEY (department) REFERENCES Departments (department_id))",
        "INSERT INTO Departments (name) VALUES ('Client Services')",
        "INSERT INTO Departments (name) VALUES ('Investor Services')",
        "INSERT INTO Departments (name) VALUES ('Shipping')",
        "INSERT INTO Departments (name) VALUES ('Direct Sales')",
        "INSERT INTO Offices (name, longtitude, latitude) VALUES ('Denver', 59.8, 34.1)",
        "INSERT INTO Offices (name, longtitude, latitude) VALUES ('Warsaw', 15.7, 54.1)",
        "INSERT INTO Offices (name, longtitude, latitude) VALUES ('Berlin', 35.3, 12.1)",
        "INSERT INTO Offices (name, longtitude, latitude) VALUES ('Paris', 10.7, 14.1)",
    ]
    .into_iter()
    .map(|text| Statement::literal(text).expect("literal statement"))
    .collect();

    let employees: [(&str, i64, i64); 9] = [
        ("Sylvester Stallone", 2, 4),
        ("Elvis Presley", 2, 4),
        ("Leslie Nelson", 3, 4),
        ("Fidel Castro", 3, 3),
        ("Bill Clinton", 1, 3),
        ("Margaret Thatcher", 1, 3),
        ("Donald Trump", 1, 3),
        ("Dr DRE", 2, 2),
        ("Samantha Fox", 2, 1),
    ];
    for (name, office, department) in employees {
        statements.push(
            Statement::new(
                "INSERT INTO Employees (name, office, department) VALUES (?, ?, ?)",
                params![name, office, department],
            )
            .expect("employee insert"),
        );
    }
    statements
}
