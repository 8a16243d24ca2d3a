//! Transport socket (C8): a thin UDP contract the pipeline sends/receives
//! RTP and RTCP through. No TLS/DTLS, no retransmission — just a bind/
//! connect/send/recv/poll surface with the QoS knobs RTP deployments need
//! (DSCP marking, socket buffer sizing).
//!
//! Grounded on the teacher's `rtp/socket.rs` (`RtpSocket`), generalized from a
//! single hardcoded remote address to the full contract in §6: optional
//! `connect`, IPv4 *and* IPv6, `poll` with the `0`/`-1` sentinel timeouts, and
//! IP_TOS/DSCP marking the teacher's version didn't expose.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{EngineError, Result};

/// Rolling counters for one transport socket, read via `stats()`.
#[derive(Debug, Default)]
pub struct TransportStats {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    send_errors: AtomicU64,
    recv_errors: AtomicU64,
}

/// Snapshot of `TransportStats`, independent of the atomics backing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportStatsSnapshot {
    /// Datagrams sent successfully.
    pub packets_sent: u64,
    /// Bytes sent successfully (payload, including the RTP/RTCP header).
    pub bytes_sent: u64,
    /// Datagrams received successfully.
    pub packets_received: u64,
    /// Bytes received successfully.
    pub bytes_received: u64,
    /// `send`/`sendto` calls that returned an OS error.
    pub send_errors: u64,
    /// `recv`/`recvfrom` calls that returned an OS error other than timeout/would-block.
    pub recv_errors: u64,
}

impl TransportStats {
    fn snapshot(&self) -> TransportStatsSnapshot {
        TransportStatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            recv_errors: self.recv_errors.load(Ordering::Relaxed),
        }
    }
}

/// Construction-time socket options (§6 "Transport socket contract").
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    /// Local address to bind. Use port 0 to let the OS assign one.
    pub bind_addr: SocketAddr,
    /// Fixed remote peer to `connect()` to, or `None` to use `sendto`/`recvfrom`.
    pub connect_addr: Option<SocketAddr>,
    /// `SO_RCVBUF` size in bytes, best-effort (the OS may clamp it).
    pub recv_buffer_bytes: usize,
    /// `SO_SNDBUF` size in bytes, best-effort.
    pub send_buffer_bytes: usize,
    /// DSCP/IP_TOS value for expedited-forwarding marking of voice traffic.
    /// `None` leaves the OS default.
    pub dscp: Option<u8>,
    /// Receive timeout. `None` blocks indefinitely; voice pipelines normally
    /// pair this transport with `poll()` instead and use a short timeout here.
    pub recv_timeout: Option<Duration>,
    /// Send timeout. `None` blocks indefinitely.
    pub send_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:0".parse().unwrap(),
            connect_addr: None,
            recv_buffer_bytes: 1024 * 1024,
            send_buffer_bytes: 1024 * 1024,
            dscp: Some(0x2E << 2), // EF (expedited forwarding), shifted into the 8-bit TOS field
            recv_timeout: Some(Duration::from_millis(20)),
            send_timeout: None,
        }
    }
}

/// A bound UDP socket speaking the contract in §6: bind, optional connect,
/// non-blocking/poll-driven send/recv, DSCP marking, IPv4 and IPv6.
pub struct TransportSocket {
    socket: UdpSocket,
    local_addr: SocketAddr,
    connect_addr: Option<SocketAddr>,
    stats: TransportStats,
}

impl TransportSocket {
    /// Binds a new socket per `config`. IPv4 or IPv6 is chosen from
    /// `config.bind_addr`'s address family.
    pub fn bind(config: &TransportConfig) -> Result<Self> {
        let domain = match config.bind_addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&config.bind_addr.into())?;

        let _ = socket.set_recv_buffer_size(config.recv_buffer_bytes);
        let _ = socket.set_send_buffer_size(config.send_buffer_bytes);

        if let Some(dscp) = config.dscp {
            match domain {
                Domain::IPV6 => {
                    let _ = socket.set_tclass_v6(dscp as u32);
                }
                _ => {
                    let _ = socket.set_tos(dscp as u32);
                }
            }
        }

        socket.set_read_timeout(config.recv_timeout)?;
        socket.set_write_timeout(config.send_timeout)?;

        if let Some(remote) = config.connect_addr {
            socket.connect(&remote.into())?;
        }

        let std_socket: UdpSocket = socket.into();
        let local_addr = std_socket.local_addr()?;

        Ok(Self {
            socket: std_socket,
            local_addr,
            connect_addr: config.connect_addr,
            stats: TransportStats::default(),
        })
    }

    /// Address this socket is bound to (post OS port assignment if `bind_addr` used port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The fixed peer address, if `connect()` was used.
    pub fn connect_addr(&self) -> Option<SocketAddr> {
        self.connect_addr
    }

    /// Sends to the connected peer. Requires `config.connect_addr` to have been set.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        if self.connect_addr.is_none() {
            return Err(EngineError::InvalidParam("send() requires a connected socket".into()));
        }
        match self.socket.send(data) {
            Ok(n) => {
                self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                Ok(n)
            }
            Err(e) => {
                self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(classify_io_error(e))
            }
        }
    }

    /// Sends to an explicit address, independent of any connected peer.
    pub fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<usize> {
        match self.socket.send_to(data, addr) {
            Ok(n) => {
                self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                Ok(n)
            }
            Err(e) => {
                self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(classify_io_error(e))
            }
        }
    }

    /// Receives into `buf` from any source. Prefer `poll()` first in a tick
    /// loop so this never blocks past the configured `recv_timeout`.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        match self.socket.recv(buf) {
            Ok(n) => {
                self.stats.packets_received.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                Ok(n)
            }
            Err(e) if is_timeout(&e) => Err(EngineError::Timeout),
            Err(e) => {
                self.stats.recv_errors.fetch_add(1, Ordering::Relaxed);
                Err(classify_io_error(e))
            }
        }
    }

    /// Receives into `buf`, returning the sender's address alongside the count.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        match self.socket.recv_from(buf) {
            Ok((n, addr)) => {
                self.stats.packets_received.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                Ok((n, addr))
            }
            Err(e) if is_timeout(&e) => Err(EngineError::Timeout),
            Err(e) => {
                self.stats.recv_errors.fetch_add(1, Ordering::Relaxed);
                Err(classify_io_error(e))
            }
        }
    }

    /// Waits up to `timeout_ms` for the socket to become readable.
    /// `0` returns immediately; `-1` waits indefinitely (§5 "Cancellation and
    /// timeout"). Implemented by temporarily overriding the read timeout and
    /// issuing a zero-length peek, since `socket2`'s poll surface isn't
    /// exposed on the converted `std::net::UdpSocket`.
    pub fn poll(&self, timeout_ms: i64) -> Result<bool> {
        let timeout = match timeout_ms {
            -1 => None,
            0 => Some(Duration::from_millis(0)),
            ms if ms > 0 => Some(Duration::from_millis(ms as u64)),
            _ => return Err(EngineError::InvalidParam(format!("invalid poll timeout {timeout_ms}"))),
        };
        self.socket.set_read_timeout(timeout)?;
        let mut probe = [0u8; 0];
        let readable = match self.socket.peek(&mut probe) {
            Ok(_) => true,
            Err(e) if is_timeout(&e) => false,
            Err(e) => return Err(classify_io_error(e)),
        };
        Ok(readable)
    }

    /// Snapshot of this socket's traffic counters.
    pub fn stats(&self) -> TransportStatsSnapshot {
        self.stats.snapshot()
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn classify_io_error(e: io::Error) -> EngineError {
    if is_timeout(&e) {
        EngineError::Timeout
    } else {
        EngineError::NetworkError(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_pair() -> (TransportSocket, TransportSocket) {
        let a_cfg = TransportConfig { bind_addr: "127.0.0.1:0".parse().unwrap(), ..Default::default() };
        let a = TransportSocket::bind(&a_cfg).unwrap();
        let b_cfg = TransportConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            connect_addr: Some(a.local_addr()),
            ..Default::default()
        };
        let b = TransportSocket::bind(&b_cfg).unwrap();
        (a, b)
    }

    #[test]
    fn send_to_and_recv_from_roundtrip() {
        let (a, b) = loopback_pair();
        b.send(b"hello").unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = a.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(from, b.local_addr());
    }

    #[test]
    fn recv_times_out_when_nothing_arrives() {
        let a_cfg = TransportConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            recv_timeout: Some(Duration::from_millis(10)),
            ..Default::default()
        };
        let a = TransportSocket::bind(&a_cfg).unwrap();
        let mut buf = [0u8; 16];
        assert!(matches!(a.recv(&mut buf), Err(EngineError::Timeout)));
    }

    #[test]
    fn send_without_connect_is_invalid_param() {
        let a_cfg = TransportConfig { bind_addr: "127.0.0.1:0".parse().unwrap(), ..Default::default() };
        let a = TransportSocket::bind(&a_cfg).unwrap();
        assert!(matches!(a.send(b"x"), Err(EngineError::InvalidParam(_))));
    }

    #[test]
    fn stats_count_successful_traffic() {
        let (a, b) = loopback_pair();
        b.send(b"abc").unwrap();
        let mut buf = [0u8; 16];
        let _ = a.recv_from(&mut buf).unwrap();
        assert_eq!(b.stats().packets_sent, 1);
        assert_eq!(a.stats().packets_received, 1);
    }
}
