//! Result storage: an append-only, indexed, expiring log of check runs.
//!
//! Every backend stores one record per run under a name generated from the
//! current time, and keeps an index mapping record names to the time they
//! were written. Writing a record and updating the index are two separate
//! operations; a failure between them leaves an orphan record that the index
//! (and therefore `fetch`/`maintain`) never sees.

mod fs;
mod github;
mod sqlite;

pub use fs::*;
pub use github::*;
pub use sqlite::*;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::types::{timestamp, CheckResult};

/// Record name to the nanosecond timestamp it was indexed at.
pub type Index = BTreeMap<String, i64>;

/// Name of the index document in file-like backends.
pub const INDEX_NAME: &str = "index.json";

/// A new record name. Names sort lexically by creation time.
pub fn generate_filename() -> String {
    format!("{}-check.json", timestamp())
}

/// Storage error types.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}: not found")]
    NotFound(String),
    #[error("{0}: changed concurrently, not overwriting")]
    Conflict(String),
    #[error("{path}: unexpected response {status}: {body}")]
    Api {
        path: String,
        status: u16,
        body: String,
    },
    #[error("invalid storage configuration: {0}")]
    Config(String),
    #[error("storage task failed: {0}")]
    Task(String),
}

/// Something that can persist a run's results.
#[async_trait]
pub trait Storage: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn store(&self, results: &[CheckResult]) -> Result<(), StorageError>;

    /// Read access, for backends that support it.
    fn reader(&self) -> Option<&dyn StorageReader> {
        None
    }

    /// Expiry sweeps, for backends that support them.
    fn maintainer(&self) -> Option<&dyn Maintainer> {
        None
    }
}

#[async_trait]
pub trait StorageReader: Send + Sync {
    /// The results stored under `name`.
    async fn fetch(&self, name: &str) -> Result<Vec<CheckResult>, StorageError>;

    async fn get_index(&self) -> Result<Index, StorageError>;
}

#[async_trait]
pub trait Maintainer: Send + Sync {
    /// Delete indexed records older than the configured expiry. A zero
    /// expiry keeps everything.
    async fn maintain(&self) -> Result<(), StorageError>;
}

/// The primitives a record-plus-index backend provides. [`store_indexed`]
/// and [`maintain_indexed`] build the shared discipline on top.
#[async_trait]
pub(crate) trait IndexedLog: Send + Sync {
    /// Whatever the backend needs to make the index write conditional.
    type Revision: Send;

    fn check_expiry(&self) -> Duration;

    async fn write_record(&self, name: &str, contents: Vec<u8>) -> Result<(), StorageError>;

    /// Remove a record. A record that is already gone is not an error.
    async fn delete_record(&self, name: &str) -> Result<(), StorageError>;

    /// The current index, empty when none has been written yet.
    async fn read_index(&self) -> Result<(Index, Self::Revision), StorageError>;

    async fn write_index(&self, index: &Index, revision: Self::Revision) -> Result<(), StorageError>;
}

/// Write the record, then read-modify-write the index to include it.
pub(crate) async fn store_indexed<L: IndexedLog>(
    log: &L,
    results: &[CheckResult],
) -> Result<(), StorageError> {
    let name = generate_filename();
    let contents = serde_json::to_vec(results)?;
    log.write_record(&name, contents).await?;

    let (mut index, revision) = log.read_index().await?;
    index.insert(name, timestamp());
    log.write_index(&index, revision).await
}

/// Delete every indexed record older than the expiry and persist the index
/// once at the end. Records missing from the index are left alone.
pub(crate) async fn maintain_indexed<L: IndexedLog>(log: &L) -> Result<(), StorageError> {
    let expiry = log.check_expiry();
    if expiry.is_zero() {
        return Ok(());
    }

    let (mut index, revision) = log.read_index().await?;
    let expired = expired_names(&index, expiry, timestamp());
    if expired.is_empty() {
        return Ok(());
    }

    for name in expired {
        if let Err(err) = log.delete_record(&name).await {
            // Keep the index consistent with what was actually deleted.
            log.write_index(&index, revision).await?;
            return Err(err);
        }
        tracing::debug!(record = %name, "deleted expired record");
        index.remove(&name);
    }

    log.write_index(&index, revision).await
}

/// Whether `name` could be a stored record: a bare file name that is not
/// the index itself.
pub(crate) fn is_record_name(name: &str) -> bool {
    !name.is_empty()
        && name != INDEX_NAME
        && !name.contains("..")
        && !name.contains(['/', '\\'])
}

/// `NotFound` unless `name` is a record listed in the index.
pub(crate) async fn ensure_indexed<L: IndexedLog>(log: &L, name: &str) -> Result<(), StorageError> {
    if is_record_name(name) {
        let (index, _) = log.read_index().await?;
        if index.contains_key(name) {
            return Ok(());
        }
    }
    Err(StorageError::NotFound(name.to_string()))
}

/// Names in `index` older than `expiry` as of `now`.
pub(crate) fn expired_names(index: &Index, expiry: Duration, now: i64) -> Vec<String> {
    let expiry = i64::try_from(expiry.as_nanos()).unwrap_or(i64::MAX);
    index
        .iter()
        .filter(|&(_, &stamp)| now.saturating_sub(stamp) > expiry)
        .map(|(name, _)| name.clone())
        .collect()
}

/// A configured storage backend of any supported type.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Fs(FsStorage),
    Sqlite(SqliteConfig),
    Github(GithubStorage),
}

impl StorageConfig {
    /// Decode a storage config, dispatching on `type` (or the older
    /// `provider`).
    pub fn from_value(raw: serde_json::Value) -> Result<Self, serde_json::Error> {
        use serde::de::Error;

        let kind = raw
            .get("type")
            .or_else(|| raw.get("provider"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();

        match kind.as_str() {
            FS_TYPE => serde_json::from_value(raw).map(StorageConfig::Fs),
            SQLITE_TYPE => serde_json::from_value(raw).map(StorageConfig::Sqlite),
            GITHUB_TYPE => serde_json::from_value(raw).map(StorageConfig::Github),
            "" => Err(serde_json::Error::custom("storage is missing a type")),
            other => Err(serde_json::Error::custom(format!(
                "{}: unknown storage type",
                other
            ))),
        }
    }

    /// Open the backend.
    pub fn build(&self) -> Result<Arc<dyn Storage>, StorageError> {
        Ok(match self {
            StorageConfig::Fs(fs) => Arc::new(fs.clone()),
            StorageConfig::Sqlite(cfg) => Arc::new(SqliteStorage::open(cfg)?),
            StorageConfig::Github(gh) => Arc::new(gh.clone()),
        })
    }
}

impl<'de> Deserialize<'de> for StorageConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        StorageConfig::from_value(raw).map_err(serde::de::Error::custom)
    }
}
