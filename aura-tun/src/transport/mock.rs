//! Mock packet interface for testing
//!
//! [`MockInterface`] simulates the tunnel interface without touching the
//! host: tests inject the packets the interface would deliver and capture
//! everything written back to it. An empty injection queue yields zero-length
//! reads, matching a quiet real interface, and reads can be switched into a
//! failure mode to exercise fatal-error handling.

use std::collections::VecDeque;
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{IfaceInfo, PacketIo};
use crate::error::{Error, Result};

/// In-memory packet interface double
pub struct MockInterface {
    info: IfaceInfo,
    recv_queue: Mutex<VecDeque<Vec<u8>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    fail_reads: AtomicBool,
    recv_calls: AtomicU64,
}

impl MockInterface {
    /// Create a new mock interface
    pub fn new(name: impl Into<String>, mtu: u16) -> Self {
        Self {
            info: IfaceInfo {
                name: name.into(),
                mtu,
            },
            recv_queue: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
            recv_calls: AtomicU64::new(0),
        }
    }

    /// Queue a packet for the next `recv` call
    pub fn inject_recv_packet(&self, packet: Vec<u8>) {
        self.recv_queue.lock().unwrap().push_back(packet);
    }

    /// Everything written back to the interface so far
    pub fn sent_packets(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    /// Make every subsequent `recv` fail, simulating a handle that became
    /// unusable underneath the reader
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of `recv` calls observed, including empty polls
    pub fn recv_calls(&self) -> u64 {
        self.recv_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PacketIo for MockInterface {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.recv_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "interface handle closed",
            )));
        }

        match self.recv_queue.lock().unwrap().pop_front() {
            Some(packet) => {
                let n = packet.len().min(buf.len());
                buf[..n].copy_from_slice(&packet[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        self.sent.lock().unwrap().push(buf.to_vec());
        Ok(buf.len())
    }

    fn info(&self) -> &IfaceInfo {
        &self.info
    }
}

/// Build an IPv4/UDP packet for tests (checksums left zero)
pub fn ipv4_udp_packet(
    src: Ipv4Addr,
    src_port: u16,
    dst: Ipv4Addr,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let total_len = 20 + 8 + payload.len();
    let mut pkt = vec![0u8; total_len];
    pkt[0] = 0x45;
    pkt[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    pkt[8] = 64;
    pkt[9] = 17;
    pkt[12..16].copy_from_slice(&src.octets());
    pkt[16..20].copy_from_slice(&dst.octets());
    pkt[20..22].copy_from_slice(&src_port.to_be_bytes());
    pkt[22..24].copy_from_slice(&dst_port.to_be_bytes());
    pkt[24..26].copy_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    pkt[28..].copy_from_slice(payload);
    pkt
}

/// Build an IPv4/TCP packet with a payload for tests (PSH|ACK, checksums
/// left zero)
pub fn ipv4_tcp_packet(
    src: Ipv4Addr,
    src_port: u16,
    dst: Ipv4Addr,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let total_len = 20 + 20 + payload.len();
    let mut pkt = vec![0u8; total_len];
    pkt[0] = 0x45;
    pkt[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    pkt[8] = 64;
    pkt[9] = 6;
    pkt[12..16].copy_from_slice(&src.octets());
    pkt[16..20].copy_from_slice(&dst.octets());
    pkt[20..22].copy_from_slice(&src_port.to_be_bytes());
    pkt[22..24].copy_from_slice(&dst_port.to_be_bytes());
    pkt[32] = 5 << 4; // data offset: 5 words, no options
    pkt[33] = 0x18; // PSH|ACK
    pkt[40..].copy_from_slice(payload);
    pkt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_queue_reads_zero() {
        let iface = MockInterface::new("mock0", 1400);
        let mut buf = [0u8; 64];
        assert_eq!(iface.recv(&mut buf).await.unwrap(), 0);
        assert_eq!(iface.recv_calls(), 1);
    }

    #[tokio::test]
    async fn injected_packets_come_back_in_order() {
        let iface = MockInterface::new("mock0", 1400);
        iface.inject_recv_packet(vec![1, 2, 3]);
        iface.inject_recv_packet(vec![4]);

        let mut buf = [0u8; 64];
        let n = iface.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
        let n = iface.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[4]);
    }

    #[tokio::test]
    async fn failed_reads_surface_as_errors() {
        let iface = MockInterface::new("mock0", 1400);
        iface.set_fail_reads(true);
        let mut buf = [0u8; 64];
        assert!(iface.recv(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn sends_are_captured() {
        let iface = MockInterface::new("mock0", 1400);
        iface.send(&[9, 9]).await.unwrap();
        assert_eq!(iface.sent_packets(), vec![vec![9, 9]]);
    }
}
