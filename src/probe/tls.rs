//! TLS probe implementation: handshake timing plus certificate expiry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use x509_parser::pem::Pem;

use super::tcp::host_of;
use super::{
    conclude_latency, run_attempts, with_timeout, Checker, ProbeBase, ProbeError,
    DEFAULT_TIMEOUT,
};
use crate::types::{duration, format_duration, CheckResult};

pub const TLS_TYPE: &str = "tls";

/// Default window before certificate expiry that counts as degraded.
pub const DEFAULT_CERT_EXPIRY_THRESHOLD: Duration = Duration::from_secs(14 * 24 * 3600);

/// Checks a TLS endpoint and the validity window of its certificate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsChecker {
    #[serde(flatten)]
    pub base: ProbeBase,

    /// How close to expiry the leaf certificate may get before the endpoint
    /// is degraded. Default is 14 days.
    #[serde(
        default,
        with = "duration::text",
        skip_serializing_if = "Duration::is_zero"
    )]
    pub cert_expiry_threshold: Duration,

    /// PEM files to trust as root CAs in addition to the system store.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trusted_roots: Vec<String>,
}

/// DER bodies of every certificate in a PEM bundle, in file order.
fn pem_certificates(pem: &[u8]) -> Result<Vec<Vec<u8>>, String> {
    let mut certs = Vec::new();
    for block in Pem::iter_from_buffer(pem) {
        let block = block.map_err(|e| e.to_string())?;
        if block.label == "CERTIFICATE" {
            certs.push(block.contents);
        }
    }
    if certs.is_empty() {
        return Err("no certificates found".to_string());
    }
    Ok(certs)
}

/// What one successful handshake saw: the leaf's `notAfter`, if any
/// certificate was presented.
type LeafExpiry = Option<DateTime<Utc>>;

impl TlsChecker {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            base: ProbeBase::new(name, url),
            ..Default::default()
        }
    }

    fn expiry_threshold(&self) -> Duration {
        if self.cert_expiry_threshold.is_zero() {
            DEFAULT_CERT_EXPIRY_THRESHOLD
        } else {
            self.cert_expiry_threshold
        }
    }

    async fn connector(&self) -> Result<tokio_native_tls::TlsConnector, ProbeError> {
        let name = &self.base.name;
        let mut builder = native_tls::TlsConnector::builder();

        for path in &self.trusted_roots {
            let pem = tokio::fs::read(path).await.map_err(|source| ProbeError::File {
                name: name.clone(),
                path: path.clone(),
                source,
            })?;
            let appending = |e: String| {
                ProbeError::config(name, format!("error appending certs from PEM {}: {}", path, e))
            };
            for der in pem_certificates(&pem).map_err(appending)? {
                let cert = native_tls::Certificate::from_der(&der)
                    .map_err(|e| appending(e.to_string()))?;
                builder.add_root_certificate(cert);
            }
        }

        builder
            .build()
            .map(tokio_native_tls::TlsConnector::from)
            .map_err(|e| ProbeError::config(name, format!("building tls connector: {}", e)))
    }

    async fn handshake(
        &self,
        connector: &tokio_native_tls::TlsConnector,
    ) -> Result<LeafExpiry, String> {
        let stream = TcpStream::connect(&self.base.url)
            .await
            .map_err(|e| format!("dial tcp {}: {}", self.base.url, e))?;
        let tls = connector
            .connect(host_of(&self.base.url), stream)
            .await
            .map_err(|e| format!("tls handshake with {}: {}", self.base.url, e))?;

        let leaf = tls
            .get_ref()
            .peer_certificate()
            .map_err(|e| format!("reading peer certificate: {}", e))?;
        match leaf {
            Some(cert) => {
                let der = cert
                    .to_der()
                    .map_err(|e| format!("encoding peer certificate: {}", e))?;
                not_after(&der).map(Some)
            }
            None => Ok(None),
        }
    }
}

/// Expiry time of a DER-encoded certificate.
fn not_after(der: &[u8]) -> Result<DateTime<Utc>, String> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| format!("parsing certificate: {}", e))?;
    let seconds = cert.validity().not_after.timestamp();
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .ok_or_else(|| format!("certificate expiry out of range: {}", seconds))
}

fn since(later: DateTime<Utc>, earlier: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or_default()
}

/// Conclude a TLS result: failed attempts and expired or missing
/// certificates are down, certificates close to expiry are degraded, and
/// only then is latency considered.
fn conclude_tls(
    mut result: CheckResult,
    leaves: &[Option<LeafExpiry>],
    threshold_rtt: Duration,
    expiry_threshold: Duration,
    now: DateTime<Utc>,
) -> CheckResult {
    result.threshold_rtt = threshold_rtt;

    if result.times.iter().any(|a| a.failed()) {
        result.down = true;
        return result;
    }

    let mut expiries = Vec::with_capacity(leaves.len());
    for (i, leaf) in leaves.iter().enumerate() {
        let Some(leaf) = leaf else { continue };
        match leaf {
            None => {
                result.times[i].error = Some("no certificates presented".to_string());
                result.down = true;
                return result;
            }
            Some(expiry) if *expiry < now => {
                result.times[i].error = Some(format!(
                    "certificate expired {} ago",
                    format_duration(since(now, *expiry))
                ));
                result.down = true;
                return result;
            }
            Some(expiry) => expiries.push(*expiry),
        }
    }

    for expiry in expiries {
        let remaining = since(expiry, now);
        if remaining < expiry_threshold {
            result.notice = format!(
                "certificate expiring soon ({})",
                format_duration(remaining)
            );
            result.degraded = true;
            return result;
        }
    }

    conclude_latency(result)
}

#[async_trait]
impl Checker for TlsChecker {
    fn kind(&self) -> &'static str {
        TLS_TYPE
    }

    async fn check(&self) -> Result<CheckResult, ProbeError> {
        let connector = self.connector().await?;
        let timeout = self.base.timeout_or(DEFAULT_TIMEOUT);

        let mut result = self.base.new_result();
        let connector = &connector;
        let (times, leaves) = run_attempts(&self.base, move || {
            with_timeout(timeout, self.handshake(connector))
        })
        .await;
        result.times = times;

        Ok(conclude_tls(
            result,
            &leaves,
            self.base.threshold_rtt,
            self.expiry_threshold(),
            Utc::now(),
        ))
    }
}
