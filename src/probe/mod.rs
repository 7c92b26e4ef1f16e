//! Probe module for endpoint health checks.
//!
//! Supports HTTP, TCP, TLS, DNS, exec and ICMP probes. Each probe makes a
//! configured number of timed attempts and concludes a single verdict.

mod conclude;
mod dns;
mod exec;
mod http;
mod icmp;
mod tcp;
mod tls;

pub use conclude::*;
pub use dns::*;
pub use exec::*;
pub use http::*;
pub use icmp::*;
pub use tcp::*;
pub use tls::*;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::types::{duration, Attempt, CheckResult};

/// Timeout applied to each attempt when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Probe error types.
///
/// Only raised for problems that make the probe impossible to attempt.
/// Network failures, timeouts and content mismatches are recorded on the
/// attempts instead.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("{name}: invalid configuration: {reason}")]
    Config { name: String, reason: String },
    #[error("{name}: error loading file {path}: {source}")]
    File {
        name: String,
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{name}: check task failed: {reason}")]
    Task { name: String, reason: String },
}

impl ProbeError {
    pub fn config(name: &str, reason: impl Into<String>) -> Self {
        ProbeError::Config {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Something that can check an endpoint and produce a result.
#[async_trait]
pub trait Checker: Send + Sync {
    /// The discriminator used for this probe in configuration.
    fn kind(&self) -> &'static str;

    /// Run every attempt and conclude. An error is only returned for
    /// configuration problems.
    async fn check(&self) -> Result<CheckResult, ProbeError>;
}

/// Fields shared by every probe type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeBase {
    /// Display name of the endpoint.
    #[serde(rename = "endpoint_name", alias = "name")]
    pub name: String,

    /// Address, URL or host:port of the endpoint.
    #[serde(rename = "endpoint_url", default, skip_serializing_if = "String::is_empty")]
    pub url: String,

    /// How many attempts make up one check. Zero means one.
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub attempts: u32,

    /// Per-attempt timeout.
    #[serde(
        default,
        with = "duration::text",
        skip_serializing_if = "Duration::is_zero"
    )]
    pub timeout: Duration,

    /// Median RTT above this marks the endpoint degraded. Zero disables it.
    #[serde(
        default,
        with = "duration::text",
        skip_serializing_if = "Duration::is_zero"
    )]
    pub threshold_rtt: Duration,

    /// Pause between consecutive attempts.
    #[serde(
        default,
        with = "duration::text",
        skip_serializing_if = "Duration::is_zero"
    )]
    pub attempt_spacing: Duration,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

impl ProbeBase {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Attempts normalized to at least one.
    pub fn attempts(&self) -> usize {
        self.attempts.max(1) as usize
    }

    /// Timeout, or `default` if unset.
    pub fn timeout_or(&self, default: Duration) -> Duration {
        if self.timeout.is_zero() {
            default
        } else {
            self.timeout
        }
    }

    /// A new unconcluded result for this endpoint.
    pub fn new_result(&self) -> CheckResult {
        CheckResult::new(&self.name, &self.url)
    }
}

/// Run `op` once per configured attempt, timing each call.
///
/// Every attempt runs even after a failure. The value an attempt produced on
/// success is returned alongside, in attempt order.
pub(crate) async fn run_attempts<T, F, Fut>(base: &ProbeBase, mut op: F) -> (Vec<Attempt>, Vec<Option<T>>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let count = base.attempts();
    let mut times = Vec::with_capacity(count);
    let mut values = Vec::with_capacity(count);

    for i in 0..count {
        if i > 0 && !base.attempt_spacing.is_zero() {
            tokio::time::sleep(base.attempt_spacing).await;
        }

        let start = Instant::now();
        let outcome = op().await;
        let rtt = start.elapsed();

        match outcome {
            Ok(value) => {
                times.push(Attempt::new(rtt));
                values.push(Some(value));
            }
            Err(err) => {
                times.push(Attempt::failed_with(rtt, err));
                values.push(None);
            }
        }
    }

    (times, values)
}

/// Bound `fut` by `timeout`, turning expiry into an attempt error.
pub(crate) async fn with_timeout<T, Fut>(timeout: Duration, fut: Fut) -> Result<T, String>
where
    Fut: Future<Output = Result<T, String>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(format!("i/o timeout after {}", duration::format_duration(timeout))),
    }
}

/// A configured probe of any supported type.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Probe {
    Http(HttpChecker),
    Tcp(TcpChecker),
    Tls(TlsChecker),
    Dns(DnsChecker),
    Exec(ExecChecker),
    Icmp(IcmpChecker),
}

impl Probe {
    /// Decode a probe from its JSON configuration, dispatching on `type`.
    pub fn from_value(raw: serde_json::Value) -> Result<Self, serde_json::Error> {
        use serde::de::Error;

        let kind = raw
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();

        match kind.as_str() {
            HTTP_TYPE => serde_json::from_value(raw).map(Probe::Http),
            TCP_TYPE => serde_json::from_value(raw).map(Probe::Tcp),
            TLS_TYPE => serde_json::from_value(raw).map(Probe::Tls),
            DNS_TYPE => serde_json::from_value(raw).map(Probe::Dns),
            EXEC_TYPE => serde_json::from_value(raw).map(Probe::Exec),
            ICMP_TYPE => serde_json::from_value(raw).map(Probe::Icmp),
            "" => Err(serde_json::Error::custom("checker is missing a type")),
            other => Err(serde_json::Error::custom(format!(
                "{}: unknown checker type",
                other
            ))),
        }
    }

    fn checker(&self) -> &dyn Checker {
        match self {
            Probe::Http(c) => c,
            Probe::Tcp(c) => c,
            Probe::Tls(c) => c,
            Probe::Dns(c) => c,
            Probe::Exec(c) => c,
            Probe::Icmp(c) => c,
        }
    }
}

impl<'de> Deserialize<'de> for Probe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Probe::from_value(raw).map_err(serde::de::Error::custom)
    }
}

#[async_trait]
impl Checker for Probe {
    fn kind(&self) -> &'static str {
        self.checker().kind()
    }

    async fn check(&self) -> Result<CheckResult, ProbeError> {
        self.checker().check().await
    }
}
