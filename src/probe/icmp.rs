//! ICMP echo probe with native sockets and a `ping` command fallback.
//!
//! Native echoes run on blocking sockets inside `spawn_blocking`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{ErrorKind, Read};
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::process::Command;

use super::{
    conclude, run_attempts, with_timeout, Checker, ProbeBase, ProbeError, Severity,
    DEFAULT_TIMEOUT,
};
use crate::types::CheckResult;

pub const ICMP_TYPE: &str = "icmp";

const ECHO_REQUEST_V4: u8 = 8;
const ECHO_REPLY_V4: u8 = 0;
const ECHO_REQUEST_V6: u8 = 128;
const ECHO_REPLY_V6: u8 = 129;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Capability {
    Native,
    CommandOnly,
}

static CAPABILITY: OnceLock<Capability> = OnceLock::new();
static SEQUENCE: AtomicU16 = AtomicU16::new(0);

fn detect_capability() -> Capability {
    if open_socket(Domain::IPV4, Protocol::ICMPV4).is_ok() {
        tracing::debug!("icmp probe: using native sockets");
        Capability::Native
    } else {
        tracing::info!("icmp probe: native sockets unavailable, using ping command");
        Capability::CommandOnly
    }
}

/// RAW first (privileged), then DGRAM (unprivileged ping sockets).
fn open_socket(domain: Domain, protocol: Protocol) -> std::io::Result<Socket> {
    Socket::new(domain, Type::RAW, Some(protocol))
        .or_else(|_| Socket::new(domain, Type::DGRAM, Some(protocol)))
}

/// Sends one ICMP echo request per attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IcmpChecker {
    #[serde(flatten)]
    pub base: ProbeBase,
}

impl IcmpChecker {
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            base: ProbeBase::new(name, host),
        }
    }

    async fn ping(&self, timeout: Duration) -> Result<(), String> {
        let host = self.base.url.as_str();
        if *CAPABILITY.get_or_init(detect_capability) == Capability::CommandOnly {
            return ping_command(host, timeout).await;
        }

        let ip = resolve(host).await?;
        let echo = tokio::task::spawn_blocking(move || echo(ip, timeout))
            .await
            .map_err(|e| format!("icmp task failed: {}", e))?;

        match echo {
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                tracing::warn!(host, error = %e, "native ping not permitted, using ping command");
                ping_command(host, timeout).await
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Err(format!("echo reply from {} timed out", ip))
            }
            Err(e) => Err(format!("ping {}: {}", ip, e)),
            Ok(()) => Ok(()),
        }
    }
}

async fn resolve(host: &str) -> Result<IpAddr, String> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| format!("lookup {}: {}", host, e))?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| format!("lookup {}: no addresses", host))
}

/// Send one echo request and wait for the matching reply.
fn echo(ip: IpAddr, timeout: Duration) -> std::io::Result<()> {
    let (domain, protocol, request, reply) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4, ECHO_REQUEST_V4, ECHO_REPLY_V4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6, ECHO_REQUEST_V6, ECHO_REPLY_V6),
    };

    let socket = open_socket(domain, protocol)?;
    socket.set_read_timeout(Some(timeout))?;
    socket.set_write_timeout(Some(timeout))?;
    socket.connect(&SocketAddr::new(ip, 0).into())?;

    let identifier: u16 = rand::random();
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let packet = echo_request(request, identifier, sequence, ip.is_ipv4());

    let start = Instant::now();
    socket.send(&packet)?;

    let mut buf = [0u8; 1500];
    loop {
        let len = (&socket).read(&mut buf)?;
        if start.elapsed() >= timeout {
            return Err(ErrorKind::TimedOut.into());
        }
        if is_reply(&buf[..len], reply, identifier, sequence) {
            return Ok(());
        }
    }
}

/// Whether `packet` is the echo reply for our request. RAW IPv4 sockets
/// deliver the IP header too.
fn is_reply(packet: &[u8], reply: u8, identifier: u16, sequence: u16) -> bool {
    let offset = match packet.first() {
        Some(b) if reply == ECHO_REPLY_V4 && b >> 4 == 4 => usize::from(b & 0x0F) * 4,
        _ => 0,
    };
    let Some(icmp) = packet.get(offset..offset + 8) else {
        return false;
    };
    // DGRAM sockets rewrite the identifier, so only the sequence is reliable.
    icmp[0] == reply
        && u16::from_be_bytes([icmp[6], icmp[7]]) == sequence
        && (u16::from_be_bytes([icmp[4], icmp[5]]) == identifier || offset == 0)
}

fn echo_request(kind: u8, identifier: u16, sequence: u16, with_checksum: bool) -> Vec<u8> {
    let mut packet = vec![0u8; 64];
    packet[0] = kind;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    let stamp = crate::types::timestamp() as u64;
    packet[8..16].copy_from_slice(&stamp.to_be_bytes());

    // The kernel fills in ICMPv6 checksums.
    if with_checksum {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }
    packet
}

/// RFC 1071 internet checksum.
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

async fn ping_command(host: &str, timeout: Duration) -> Result<(), String> {
    let wait = timeout.as_secs().max(1).to_string();
    let output = Command::new("ping")
        .args(["-c", "1", "-W", wait.as_str(), host])
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| format!("failed to execute ping: {}", e))?;

    if output.status.success() {
        return Ok(());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stdout.contains("100% packet loss") || stdout.contains("100.0% packet loss") {
        Err(format!("no echo reply from {}", host))
    } else {
        Err(format!("ping failed: {}{}", stdout.trim(), stderr.trim()))
    }
}

#[async_trait]
impl Checker for IcmpChecker {
    fn kind(&self) -> &'static str {
        ICMP_TYPE
    }

    async fn check(&self) -> Result<CheckResult, ProbeError> {
        if self.base.url.is_empty() {
            return Err(ProbeError::config(&self.base.name, "endpoint_url is required"));
        }

        let timeout = self.base.timeout_or(DEFAULT_TIMEOUT);
        let mut result = self.base.new_result();
        let (times, _) = run_attempts(&self.base, move || {
            // Leave the command fallback room to report its own timeout.
            with_timeout(timeout + Duration::from_secs(1), self.ping(timeout))
        })
        .await;
        result.times = times;

        Ok(conclude(result, self.base.threshold_rtt, Severity::Down))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icmp_checksum_verifies() {
        let packet = echo_request(ECHO_REQUEST_V4, 0x1234, 1, true);
        // A packet carrying its own checksum sums to zero.
        assert_eq!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn test_echo_request_layout() {
        let packet = echo_request(ECHO_REQUEST_V4, 0x1234, 0x0001, true);
        assert_eq!(packet.len(), 64);
        assert_eq!(packet[0], 8);
        assert_eq!(packet[1], 0);
        assert_eq!(packet[4..6], [0x12, 0x34]);
        assert_eq!(packet[6..8], [0x00, 0x01]);

        let v6 = echo_request(ECHO_REQUEST_V6, 1, 2, false);
        assert_eq!(v6[0], 128);
        assert_eq!(v6[2..4], [0, 0]);
    }

    #[test]
    fn test_is_reply() {
        let mut dgram = vec![0u8; 16];
        dgram[0] = ECHO_REPLY_V4;
        dgram[4..6].copy_from_slice(&7u16.to_be_bytes());
        dgram[6..8].copy_from_slice(&3u16.to_be_bytes());
        assert!(is_reply(&dgram, ECHO_REPLY_V4, 99, 3));
        assert!(!is_reply(&dgram, ECHO_REPLY_V4, 99, 4));

        // RAW: 20-byte IPv4 header in front, identifier must match.
        let mut raw = vec![0u8; 20];
        raw[0] = 0x45;
        raw.extend_from_slice(&dgram);
        assert!(is_reply(&raw, ECHO_REPLY_V4, 7, 3));
        assert!(!is_reply(&raw, ECHO_REPLY_V4, 99, 3));

        assert!(!is_reply(&[0u8; 4], ECHO_REPLY_V4, 7, 3));
    }

    #[tokio::test]
    async fn test_icmp_checker_requires_host() {
        let ic = IcmpChecker::new("Ping", "");
        assert!(matches!(ic.check().await, Err(ProbeError::Config { .. })));
    }

    #[tokio::test]
    async fn test_icmp_checker_unresolvable_host_is_down() {
        let mut ic = IcmpChecker::new("Ping", "no-such-host.invalid");
        ic.base.attempts = 2;
        let result = ic.check().await.unwrap();
        assert!(result.down);
        assert_eq!(result.times.len(), 2);
    }
}
