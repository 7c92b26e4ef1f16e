//! Configuration module for Checkup.
//!
//! The checks themselves come from a JSON file. The web server is tuned
//! from environment variables with sensible defaults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::notify::{ExporterConfig, NotifierConfig};
use crate::probe::{Checker, Probe};
use crate::scheduler::Checkup;
use crate::storage::{StorageConfig, StorageError};
use crate::types::{parse_duration, DurationError};

/// Config file used when neither `--config` nor `CHECKUP_CONFIG` is given.
pub const DEFAULT_CONFIG_FILE: &str = "checkup.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("opening config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid interval {0:?}")]
    Interval(String, #[source] DurationError),
    #[error("setting up storage: {0}")]
    Storage(#[from] StorageError),
}

/// The contents of `checkup.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckupConfig {
    #[serde(default)]
    pub checkers: Vec<Probe>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub concurrent_checks: i64,

    /// Forced timestamp applied to every result of a run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notifiers: Vec<NotifierConfig>,

    /// Single notifier in the older config layout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifier: Option<NotifierConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exporters: Vec<ExporterConfig>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl CheckupConfig {
    /// Read and decode a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Build the orchestrator this config describes.
    pub fn into_checkup(self) -> Result<Checkup, ConfigError> {
        let storage = self.storage.as_ref().map(StorageConfig::build).transpose()?;

        let notifiers = self
            .notifiers
            .iter()
            .chain(self.notifier.iter())
            .map(NotifierConfig::build)
            .collect();

        Ok(Checkup {
            checkers: self
                .checkers
                .into_iter()
                .map(|p| Arc::new(p) as Arc<dyn Checker>)
                .collect(),
            concurrent_checks: self.concurrent_checks,
            timestamp: self.timestamp,
            storage,
            notifiers,
            exporters: self.exporters.iter().map(ExporterConfig::build).collect(),
        })
    }
}

/// Parse a run interval: a duration string like `"10m"` or one of
/// `second`, `minute`, `hour`, `day`, `week`.
pub fn parse_interval(input: &str) -> Result<Duration, ConfigError> {
    let shortcut = match input.trim().to_lowercase().as_str() {
        "second" => Some(1),
        "minute" => Some(60),
        "hour" => Some(60 * 60),
        "day" => Some(24 * 60 * 60),
        "week" => Some(7 * 24 * 60 * 60),
        _ => None,
    };
    match shortcut {
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => parse_duration(input).map_err(|e| ConfigError::Interval(input.to_string(), e)),
    }
}

/// Web server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the status server (default: 3000)
    pub http_port: u16,
    /// Page title of the status page (default: "Checkup")
    pub title: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 3000,
            title: "Checkup".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CHECKUP_HTTP_PORT`: HTTP port (default: 3000)
    /// - `CHECKUP_TITLE`: status page title (default: "Checkup")
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("CHECKUP_HTTP_PORT") {
            match port_str.parse() {
                Ok(port) => cfg.http_port = port,
                Err(_) => tracing::warn!("Ignoring invalid CHECKUP_HTTP_PORT {:?}", port_str),
            }
        }

        if let Ok(title) = env::var("CHECKUP_TITLE") {
            cfg.title = title;
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r##"{
        "checkers": [
            {
                "type": "http",
                "endpoint_name": "Site",
                "endpoint_url": "https://example.com",
                "attempts": 5,
                "threshold_rtt": "400ms"
            },
            {
                "type": "tcp",
                "endpoint_name": "DB",
                "endpoint_url": "localhost:5432"
            }
        ],
        "concurrent_checks": 2,
        "timestamp": "2024-01-02T03:04:05Z",
        "storage": {
            "provider": "fs",
            "dir": "/var/lib/checkup",
            "url": "https://status.example.com"
        },
        "notifier": {
            "name": "slack",
            "username": "checkup",
            "channel": "#ops",
            "webhook": "https://hooks.slack.com/services/x"
        },
        "notifiers": [
            { "type": "discord", "webhook": "https://discord.com/api/webhooks/x" }
        ],
        "exporters": [
            { "type": "appinsights", "instrumentation_key": "abc" }
        ]
    }"##;

    #[test]
    fn test_load_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let cfg = CheckupConfig::load(file.path()).unwrap();
        assert_eq!(cfg.checkers.len(), 2);
        assert_eq!(cfg.concurrent_checks, 2);
        assert!(matches!(cfg.storage, Some(StorageConfig::Fs(_))));
        assert!(matches!(cfg.notifier, Some(NotifierConfig::Slack(_))));

        let checkup = cfg.into_checkup().unwrap();
        assert_eq!(checkup.checkers.len(), 2);
        assert_eq!(checkup.checkers[1].kind(), "tcp");
        assert_eq!(checkup.notifiers.len(), 2);
        assert_eq!(checkup.exporters.len(), 1);
        assert!(checkup.storage.is_some());
        assert_eq!(
            checkup.timestamp.map(|t| t.timestamp()),
            Some(1_704_164_645)
        );
    }

    #[test]
    fn test_config_encoding_keeps_discriminators() {
        let cfg: CheckupConfig = serde_json::from_str(SAMPLE).unwrap();
        let v = serde_json::to_value(&cfg).unwrap();
        assert_eq!(v["checkers"][0]["type"], "http");
        assert_eq!(v["storage"]["type"], "fs");
        assert_eq!(v["exporters"][0]["type"], "appinsights");

        let back: CheckupConfig = serde_json::from_value(v).unwrap();
        assert_eq!(back.checkers.len(), 2);
    }

    #[test]
    fn test_load_errors() {
        let missing = CheckupConfig::load("/nonexistent/checkup.json").unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"checkers": [{"type": "smoke-signal"}]}"#)
            .unwrap();
        let err = CheckupConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("smoke-signal"));
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("minute").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_interval("Week").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_interval("90s").unwrap(), Duration::from_secs(90));
        assert!(parse_interval("fortnight").is_err());
    }

    #[test]
    fn test_default_server_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 3000);
        assert_eq!(cfg.title, "Checkup");
    }
}
