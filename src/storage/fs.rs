//! Local filesystem storage: one JSON file per run plus `index.json`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{
    ensure_indexed, maintain_indexed, store_indexed, Index, IndexedLog, Maintainer, Storage,
    StorageError, StorageReader, INDEX_NAME,
};
use crate::types::{duration, CheckResult};

pub const FS_TYPE: &str = "fs";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FsStorage {
    /// Directory the check files are written to.
    pub dir: PathBuf,

    /// Public URL corresponding to `dir`, for status pages.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,

    /// Check files older than this are deleted by `maintain`. Zero keeps
    /// them forever.
    #[serde(
        default,
        with = "duration::text",
        skip_serializing_if = "Duration::is_zero"
    )]
    pub check_expiry: Duration,
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl FsStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

#[async_trait]
impl IndexedLog for FsStorage {
    type Revision = ();

    fn check_expiry(&self) -> Duration {
        self.check_expiry
    }

    async fn write_record(&self, name: &str, contents: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path(name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| io_error(&path, e))
    }

    async fn delete_record(&self, name: &str) -> Result<(), StorageError> {
        let path = self.path(name);
        match tokio::fs::remove_file(&path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(io_error(&path, e)),
            _ => Ok(()),
        }
    }

    async fn read_index(&self) -> Result<(Index, ()), StorageError> {
        let path = self.path(INDEX_NAME);
        match tokio::fs::read(&path).await {
            Ok(raw) => Ok((serde_json::from_slice(&raw)?, ())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok((Index::new(), ())),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn write_index(&self, index: &Index, _: ()) -> Result<(), StorageError> {
        let path = self.path(INDEX_NAME);
        let raw = serde_json::to_vec(index)?;
        tokio::fs::write(&path, raw)
            .await
            .map_err(|e| io_error(&path, e))
    }
}

#[async_trait]
impl Storage for FsStorage {
    fn kind(&self) -> &'static str {
        FS_TYPE
    }

    async fn store(&self, results: &[CheckResult]) -> Result<(), StorageError> {
        store_indexed(self, results).await
    }

    fn reader(&self) -> Option<&dyn StorageReader> {
        Some(self)
    }

    fn maintainer(&self) -> Option<&dyn Maintainer> {
        Some(self)
    }
}

#[async_trait]
impl StorageReader for FsStorage {
    async fn fetch(&self, name: &str) -> Result<Vec<CheckResult>, StorageError> {
        ensure_indexed(self, name).await?;
        let path = self.path(name);
        let raw = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(name.to_string()),
            _ => io_error(&path, e),
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn get_index(&self) -> Result<Index, StorageError> {
        self.read_index().await.map(|(index, _)| index)
    }
}

#[async_trait]
impl Maintainer for FsStorage {
    async fn maintain(&self) -> Result<(), StorageError> {
        maintain_indexed(self).await
    }
}
