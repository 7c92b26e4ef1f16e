//! SQLite storage. The `checks` table holds each run and doubles as the
//! index, so a record and its index entry are written in one statement.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{
    generate_filename, is_record_name, Index, Maintainer, Storage, StorageError, StorageReader,
};
use crate::types::{duration, timestamp, CheckResult};

pub const SQLITE_TYPE: &str = "sqlite";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS checks (
    name TEXT NOT NULL PRIMARY KEY,
    timestamp INT8 NOT NULL,
    results TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_checks_timestamp ON checks(timestamp);
";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SqliteConfig {
    pub sqlite_db_file: String,

    #[serde(
        default,
        with = "duration::text",
        skip_serializing_if = "Duration::is_zero"
    )]
    pub check_expiry: Duration,
}

/// Thread-safe SQLite result store.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
    check_expiry: Duration,
}

impl SqliteStorage {
    pub fn open(config: &SqliteConfig) -> Result<Self, StorageError> {
        if config.sqlite_db_file.is_empty() {
            return Err(StorageError::Config("sqlite_db_file is required".into()));
        }
        Self::new(&config.sqlite_db_file, config.check_expiry)
    }

    /// Open (creating if needed) the database at `path`.
    pub fn new<P: AsRef<Path>>(path: P, check_expiry: Duration) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            check_expiry,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Task("sqlite connection poisoned".into()))
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    fn kind(&self) -> &'static str {
        SQLITE_TYPE
    }

    async fn store(&self, results: &[CheckResult]) -> Result<(), StorageError> {
        let contents = serde_json::to_string(results)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO checks (name, timestamp, results) VALUES (?1, ?2, ?3)",
            params![generate_filename(), timestamp(), contents],
        )?;
        Ok(())
    }

    fn reader(&self) -> Option<&dyn StorageReader> {
        Some(self)
    }

    fn maintainer(&self) -> Option<&dyn Maintainer> {
        Some(self)
    }
}

#[async_trait]
impl StorageReader for SqliteStorage {
    async fn fetch(&self, name: &str) -> Result<Vec<CheckResult>, StorageError> {
        if !is_record_name(name) {
            return Err(StorageError::NotFound(name.to_string()));
        }
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT results FROM checks WHERE name = ?1 LIMIT 1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        let raw = raw.ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn get_index(&self) -> Result<Index, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT name, timestamp FROM checks")?;
        let index = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Index>>()?;
        Ok(index)
    }
}

#[async_trait]
impl Maintainer for SqliteStorage {
    async fn maintain(&self) -> Result<(), StorageError> {
        if self.check_expiry.is_zero() {
            return Ok(());
        }

        let expiry = i64::try_from(self.check_expiry.as_nanos()).unwrap_or(i64::MAX);
        let cutoff = timestamp().saturating_sub(expiry);
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM checks WHERE timestamp < ?1", params![cutoff])?;
        tracing::debug!(deleted, "sqlite: removed expired checks");
        Ok(())
    }
}
