//! DNS probe implementation using raw UDP packets.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpStream, UdpSocket};

use super::{
    conclude, run_attempts, with_timeout, Checker, ProbeBase, ProbeError, Severity,
    DEFAULT_TIMEOUT,
};
use crate::types::CheckResult;

pub const DNS_TYPE: &str = "dns";

const MAX_LABEL_LEN: usize = 63;

/// Checks a DNS server: optionally resolves `hostname_fqdn` over UDP, then
/// dials the server over TCP.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsChecker {
    #[serde(flatten)]
    pub base: ProbeBase,

    /// Name to query the server for (A record).
    #[serde(rename = "hostname_fqdn", default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
}

impl DnsChecker {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            base: ProbeBase::new(name, url),
            ..Default::default()
        }
    }

    /// Server address with the default DNS port added when missing.
    fn server(&self) -> String {
        if self.base.url.contains(':') {
            self.base.url.clone()
        } else {
            format!("{}:53", self.base.url)
        }
    }

    async fn attempt(&self, server: &str, question: Option<&[u8]>) -> Result<(), String> {
        if let Some(packet) = question {
            query(server, packet).await?;
        }
        TcpStream::connect(server)
            .await
            .map(|_| ())
            .map_err(|e| format!("dial tcp {}: {}", server, e))
    }
}

/// Send one query and validate the response header.
async fn query(server: &str, packet: &[u8]) -> Result<(), String> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| format!("failed to bind socket: {}", e))?;
    socket
        .connect(server)
        .await
        .map_err(|e| format!("failed to connect: {}", e))?;
    socket
        .send(packet)
        .await
        .map_err(|e| format!("failed to send: {}", e))?;

    let mut response = [0u8; 512];
    let n = socket
        .recv(&mut response)
        .await
        .map_err(|e| format!("failed to recv: {}", e))?;

    if n < 12 {
        return Err(format!("response too short: {} bytes", n));
    }

    let tx_id = u16::from_be_bytes([packet[0], packet[1]]);
    let resp_tx_id = u16::from_be_bytes([response[0], response[1]]);
    if resp_tx_id != tx_id {
        return Err(format!(
            "transaction ID mismatch: got {}, expected {}",
            resp_tx_id, tx_id
        ));
    }

    // RCODE is the low nibble of the fourth header byte.
    let rcode = response[3] & 0x0F;
    if rcode != 0 {
        return Err(format!("DNS error RCODE: {}", rcode));
    }

    Ok(())
}

/// Build a recursive A/IN query for `hostname`.
fn build_dns_query(hostname: &str) -> Result<Vec<u8>, String> {
    let tx_id: u16 = rand::random();
    let flags: u16 = 0x0100; // standard query, recursion desired

    let mut packet = Vec::with_capacity(32 + hostname.len());
    packet.extend_from_slice(&tx_id.to_be_bytes());
    packet.extend_from_slice(&flags.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT

    for label in hostname.trim_end_matches('.').split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(format!("invalid hostname_fqdn {:?}", hostname));
        }
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);

    packet.extend_from_slice(&1u16.to_be_bytes()); // QTYPE A
    packet.extend_from_slice(&1u16.to_be_bytes()); // QCLASS IN

    Ok(packet)
}

#[async_trait]
impl Checker for DnsChecker {
    fn kind(&self) -> &'static str {
        DNS_TYPE
    }

    async fn check(&self) -> Result<CheckResult, ProbeError> {
        // Validated once up front so a bad name is a config error.
        if !self.hostname.is_empty() {
            build_dns_query(&self.hostname)
                .map_err(|reason| ProbeError::config(&self.base.name, reason))?;
        }

        let timeout = self.base.timeout_or(DEFAULT_TIMEOUT);
        let server = self.server();
        let server = server.as_str();

        let mut result = self.base.new_result();
        let (times, _) = run_attempts(&self.base, move || async move {
            // Fresh transaction id per attempt.
            let packet = match self.hostname.as_str() {
                "" => None,
                name => Some(build_dns_query(name)?),
            };
            with_timeout(timeout, self.attempt(server, packet.as_deref())).await
        })
        .await;
        result.times = times;

        Ok(conclude(result, self.base.threshold_rtt, Severity::Down))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[test]
    fn test_build_dns_query() {
        let packet = build_dns_query("example.com.").unwrap();
        // 12 header + 13 name + 4 type/class
        assert_eq!(packet.len(), 29);
        assert_eq!(&packet[12..20], &[7, b'e', b'x', b'a', b'm', b'p', b'l', b'e']);
        assert_eq!(packet[24], 0);
    }

    #[test]
    fn test_build_dns_query_rejects_bad_labels() {
        assert!(build_dns_query("a..b").is_err());
        assert!(build_dns_query(&format!("{}.com", "x".repeat(64))).is_err());
    }

    #[test]
    fn test_default_port() {
        assert_eq!(DnsChecker::new("d", "8.8.8.8").server(), "8.8.8.8:53");
        assert_eq!(DnsChecker::new("d", "127.0.0.1:5353").server(), "127.0.0.1:5353");
    }

    #[tokio::test]
    async fn test_dns_checker_tcp_only() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accept = tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let mut dc = DnsChecker::new("TestDNS", addr.clone());
        dc.base.attempts = 2;
        let result = dc.check().await.unwrap();
        assert_eq!(result.endpoint, addr);
        assert!(result.healthy, "{}", result);
        assert_eq!(result.times.len(), 2);

        dc.base.threshold_rtt = Duration::from_nanos(1);
        assert!(dc.check().await.unwrap().degraded);
        accept.abort();
    }

    #[tokio::test]
    async fn test_dns_checker_query() {
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = udp.local_addr().unwrap();
        let tcp = TcpListener::bind(addr).await.unwrap();

        let server = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let (n, peer) = udp.recv_from(&mut buf).await.unwrap();
                // Echo the question back as a NOERROR response.
                buf[2] |= 0x80;
                let _ = udp.send_to(&buf[..n], peer).await;
                let _ = tcp.accept().await;
            }
        });

        let mut dc = DnsChecker::new("TestDNS", addr.to_string());
        dc.hostname = "example.com".into();
        let result = dc.check().await.unwrap();
        assert!(result.healthy, "{}", result);
        server.abort();
    }

    #[tokio::test]
    async fn test_dns_checker_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut dc = DnsChecker::new("TestDNS", addr);
        dc.base.timeout = Duration::from_millis(200);
        dc.hostname = "example.com".into();
        let result = dc.check().await.unwrap();
        assert!(result.down);
    }

    #[tokio::test]
    async fn test_dns_checker_bad_hostname() {
        let mut dc = DnsChecker::new("TestDNS", "127.0.0.1:53");
        dc.hostname = "bad..name".into();
        assert!(matches!(dc.check().await, Err(ProbeError::Config { .. })));
    }
}
