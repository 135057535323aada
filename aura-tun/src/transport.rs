//! Packet I/O abstraction over the tunnel interface
//!
//! The forwarding engine reads and writes raw IP packets through this trait
//! rather than a concrete device, so the same loop runs against a real TUN
//! interface, a host-provided descriptor or the [`mock`] implementation used
//! in tests.

pub mod mock;

use async_trait::async_trait;

use crate::error::Result;

/// Information about an established interface
#[derive(Debug, Clone)]
pub struct IfaceInfo {
    /// Interface name (e.g. "tun0", "utun3")
    pub name: String,
    /// Maximum transmission unit
    pub mtu: u16,
}

/// Async packet I/O over the tunnel interface
///
/// The interface operates at layer 3: packets are raw IP datagrams without
/// link framing. A return value of `Ok(0)` from [`recv`](PacketIo::recv)
/// means no packet is currently available; callers back off briefly rather
/// than treating it as end-of-stream.
///
/// Implementations never close the underlying handle; its lifecycle belongs
/// to the owner of the [`InterfaceHandle`](crate::InterfaceHandle).
#[async_trait]
pub trait PacketIo: Send + Sync {
    /// Receive one IP packet from the interface
    ///
    /// This is traffic the host wants to send through the tunnel. The method
    /// must be cancel-safe: if the returned future is dropped before
    /// completion, no packet is lost.
    async fn recv(&self, buf: &mut [u8]) -> Result<usize>;

    /// Write one IP packet back to the interface
    ///
    /// This is return traffic destined for the host's network stack.
    async fn send(&self, buf: &[u8]) -> Result<usize>;

    /// Get information about the interface
    fn info(&self) -> &IfaceInfo;

    /// Get the MTU of the interface
    fn mtu(&self) -> u16 {
        self.info().mtu
    }

    /// Get the interface name
    fn name(&self) -> &str {
        &self.info().name
    }
}
