//! TCP probe implementation, optionally wrapped in TLS.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

use super::{
    conclude, run_attempts, with_timeout, Checker, ProbeBase, ProbeError, Severity,
    DEFAULT_TIMEOUT,
};
use crate::types::CheckResult;

pub const TCP_TYPE: &str = "tcp";

/// Checks that a TCP connection (and optionally a TLS handshake) succeeds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TcpChecker {
    #[serde(flatten)]
    pub base: ProbeBase,

    /// Perform a TLS handshake after connecting.
    #[serde(rename = "tls", default, skip_serializing_if = "is_false")]
    pub tls_enabled: bool,

    /// Skip server certificate validation.
    #[serde(default, skip_serializing_if = "is_false")]
    pub tls_skip_verify: bool,

    /// PEM file with the CA used to validate the server certificate.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tls_ca_file: String,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl TcpChecker {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            base: ProbeBase::new(name, url),
            ..Default::default()
        }
    }

    async fn dial(&self) -> Result<(), String> {
        let stream = TcpStream::connect(&self.base.url)
            .await
            .map_err(|e| format!("dial tcp {}: {}", self.base.url, e))?;

        if !self.tls_enabled {
            return Ok(());
        }

        let connector = self.tls_connector().await?;
        let domain = host_of(&self.base.url);
        connector
            .connect(domain, stream)
            .await
            .map(|_| ())
            .map_err(|e| format!("tls handshake with {}: {}", self.base.url, e))
    }

    async fn tls_connector(&self) -> Result<tokio_native_tls::TlsConnector, String> {
        let mut builder = native_tls::TlsConnector::builder();
        builder.danger_accept_invalid_certs(self.tls_skip_verify);

        if !self.tls_ca_file.is_empty() {
            let pem = tokio::fs::read(&self.tls_ca_file)
                .await
                .map_err(|_| "error reading root certificate".to_string())?;
            let cert = native_tls::Certificate::from_pem(&pem)
                .map_err(|_| "error parsing root certificate".to_string())?;
            builder.add_root_certificate(cert);
        }

        builder
            .build()
            .map(tokio_native_tls::TlsConnector::from)
            .map_err(|e| format!("building tls connector: {}", e))
    }
}

/// The host part of a `host:port` address, without IPv6 brackets.
pub(crate) fn host_of(addr: &str) -> &str {
    let host = match addr.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

#[async_trait]
impl Checker for TcpChecker {
    fn kind(&self) -> &'static str {
        TCP_TYPE
    }

    async fn check(&self) -> Result<CheckResult, ProbeError> {
        let timeout = self.base.timeout_or(DEFAULT_TIMEOUT);

        let mut result = self.base.new_result();
        let (times, _) = run_attempts(&self.base, move || with_timeout(timeout, self.dial())).await;
        result.times = times;

        Ok(conclude(result, self.base.threshold_rtt, Severity::Down))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("example.com:443"), "example.com");
        assert_eq!(host_of("[::1]:443"), "::1");
        assert_eq!(host_of("example.com"), "example.com");
    }

    #[tokio::test]
    async fn test_tcp_checker_up() {
        let (listener, addr) = listener().await;
        let accept = tokio::spawn(async move {
            for _ in 0..2 {
                let _ = listener.accept().await;
            }
        });

        let mut tc = TcpChecker::new("Test", addr.clone());
        tc.base.attempts = 2;
        let result = tc.check().await.unwrap();

        assert_eq!(result.title, "Test");
        assert_eq!(result.endpoint, addr);
        assert!(result.healthy, "{}", result);
        assert_eq!(result.times.len(), 2);
        accept.abort();
    }

    #[tokio::test]
    async fn test_tcp_checker_degraded() {
        let (listener, addr) = listener().await;
        let accept = tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let mut tc = TcpChecker::new("Test", addr);
        tc.base.threshold_rtt = std::time::Duration::from_nanos(1);
        let result = tc.check().await.unwrap();
        assert!(result.degraded);
        assert!(result.notice.contains("exceeded threshold"));
        accept.abort();
    }

    #[tokio::test]
    async fn test_tcp_checker_down() {
        let (listener, addr) = listener().await;
        drop(listener);

        let mut tc = TcpChecker::new("Test", addr);
        tc.base.attempts = 3;
        let result = tc.check().await.unwrap();
        assert!(result.down);
        assert!(!result.healthy);
        assert_eq!(result.times.len(), 3);
        assert!(result.times.iter().all(|a| a.failed()));
    }

    #[tokio::test]
    async fn test_tcp_tls_bad_ca_file_is_attempt_error() {
        let (listener, addr) = listener().await;
        let accept = tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let mut pem = tempfile::NamedTempFile::new().unwrap();
        writeln!(pem, "not a certificate").unwrap();

        let mut tc = TcpChecker::new("Test", addr);
        tc.tls_enabled = true;
        tc.tls_ca_file = pem.path().to_string_lossy().into_owned();
        let result = tc.check().await.unwrap();
        assert!(result.down);
        assert_eq!(
            result.times[0].error.as_deref(),
            Some("error parsing root certificate")
        );

        tc.tls_ca_file = "/nonexistent/ca.pem".into();
        let result = tc.check().await.unwrap();
        assert_eq!(
            result.times[0].error.as_deref(),
            Some("error reading root certificate")
        );
        accept.abort();
    }
}
