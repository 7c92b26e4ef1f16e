//! GitHub repository storage via the contents API.
//!
//! Records and the index are files in a branch. Index updates are
//! conditional on the blob SHA last read, so a concurrent writer surfaces as
//! [`StorageError::Conflict`] instead of being overwritten.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use super::{
    ensure_indexed, maintain_indexed, store_indexed, Index, IndexedLog, Maintainer, Storage,
    StorageError, StorageReader, INDEX_NAME,
};
use crate::types::{duration, CheckResult};

pub const GITHUB_TYPE: &str = "github";

const DEFAULT_API_URL: &str = "https://api.github.com";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GithubStorage {
    pub access_token: String,
    pub repository_owner: String,
    pub repository_name: String,
    pub committer_name: String,
    pub committer_email: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,

    /// Subdirectory of the repository the files live in.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dir: String,

    #[serde(
        default,
        with = "duration::text",
        skip_serializing_if = "Duration::is_zero"
    )]
    pub check_expiry: Duration,

    /// API base URL, for GitHub Enterprise.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_url: String,

    #[serde(skip)]
    client: Client,
}

/// The parts of a contents API response we use.
#[derive(Debug, Deserialize)]
struct Contents {
    sha: String,
    #[serde(default)]
    content: String,
}

impl GithubStorage {
    fn full_path(&self, name: &str) -> String {
        let dir = self.dir.trim_matches('/');
        if dir.is_empty() || name.starts_with(dir) {
            name.to_string()
        } else {
            format!("{}/{}", dir, name)
        }
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, StorageError> {
        if self.access_token.is_empty() {
            return Err(StorageError::Config(
                "access_token is required for github storage".into(),
            ));
        }
        let base = if self.api_url.is_empty() {
            DEFAULT_API_URL
        } else {
            self.api_url.trim_end_matches('/')
        };
        let url = format!(
            "{}/repos/{}/{}/contents/{}",
            base, self.repository_owner, self.repository_name, path
        );
        Ok(self
            .client
            .request(method, url)
            .bearer_auth(&self.access_token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::USER_AGENT, "checkup"))
    }

    fn commit_body(&self, message: String) -> serde_json::Value {
        let mut body = json!({
            "message": message,
            "committer": {"name": self.committer_name, "email": self.committer_email},
        });
        if !self.branch.is_empty() {
            body["branch"] = json!(self.branch);
        }
        body
    }

    /// Contents and blob SHA of a file, or `None` if it doesn't exist.
    async fn read_file(&self, name: &str) -> Result<Option<(Vec<u8>, String)>, StorageError> {
        let path = self.full_path(name);
        let mut req = self.request(Method::GET, &path)?;
        if !self.branch.is_empty() {
            req = req.query(&[("ref", format!("heads/{}", self.branch))]);
        }

        let resp = req.send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let contents: Contents = check_status(&path, resp).await?.json().await?;

        let packed: String = contents
            .content
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let decoded = STANDARD
            .decode(packed)
            .map_err(|e| StorageError::Config(format!("{}: bad base64 content: {}", path, e)))?;
        Ok(Some((decoded, contents.sha)))
    }

    /// Create the file, or update it when `sha` names the revision being
    /// replaced.
    async fn write_file(
        &self,
        name: &str,
        sha: Option<String>,
        contents: &[u8],
    ) -> Result<(), StorageError> {
        let path = self.full_path(name);
        let verb = if sha.is_some() { "updating" } else { "creating" };
        tracing::info!(path = %path, branch = %self.branch, "github: {} file", verb);

        let mut body = self.commit_body(format!("[checkup] store {} [ci skip]", path));
        body["content"] = json!(STANDARD.encode(contents));
        if let Some(sha) = sha {
            body["sha"] = json!(sha);
        }

        let resp = self.request(Method::PUT, &path)?.json(&body).send().await?;
        check_status(&path, resp).await.map(|_| ())
    }

    async fn delete_file(&self, name: &str, sha: String) -> Result<(), StorageError> {
        let path = self.full_path(name);
        tracing::info!(path = %path, branch = %self.branch, "github: deleting file");

        let mut body = self.commit_body(format!("[checkup] delete {} [ci skip]", path));
        body["sha"] = json!(sha);

        let resp = self
            .request(Method::DELETE, &path)?
            .json(&body)
            .send()
            .await?;
        check_status(&path, resp).await.map(|_| ())
    }
}

/// Map non-success responses to errors. Conflicting writes become
/// [`StorageError::Conflict`].
async fn check_status(path: &str, resp: reqwest::Response) -> Result<reqwest::Response, StorageError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY {
        return Err(StorageError::Conflict(path.to_string()));
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StorageError::Api {
        path: path.to_string(),
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl IndexedLog for GithubStorage {
    type Revision = Option<String>;

    fn check_expiry(&self) -> Duration {
        self.check_expiry
    }

    async fn write_record(&self, name: &str, contents: Vec<u8>) -> Result<(), StorageError> {
        self.write_file(name, None, &contents).await
    }

    async fn delete_record(&self, name: &str) -> Result<(), StorageError> {
        match self.read_file(name).await? {
            Some((_, sha)) => self.delete_file(name, sha).await,
            None => Ok(()),
        }
    }

    async fn read_index(&self) -> Result<(Index, Option<String>), StorageError> {
        match self.read_file(INDEX_NAME).await? {
            Some((raw, sha)) => Ok((serde_json::from_slice(&raw)?, Some(sha))),
            None => Ok((Index::new(), None)),
        }
    }

    async fn write_index(&self, index: &Index, revision: Option<String>) -> Result<(), StorageError> {
        let raw = serde_json::to_vec(index)?;
        self.write_file(INDEX_NAME, revision, &raw).await
    }
}

#[async_trait]
impl Storage for GithubStorage {
    fn kind(&self) -> &'static str {
        GITHUB_TYPE
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
impl StorageReader for GithubStorage {
    async fn fetch(&self, name: &str) -> Result<Vec<CheckResult>, StorageError> {
        ensure_indexed(self, name).await?;
        let (raw, _) = self
            .read_file(name)
            .await?
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn get_index(&self) -> Result<Index, StorageError> {
        self.read_index().await.map(|(index, _)| index)
    }
}

#[async_trait]
impl Maintainer for GithubStorage {
    async fn maintain(&self) -> Result<(), StorageError> {
        maintain_indexed(self).await
    }
}
