//! The packet-forwarding loop
//!
//! One worker drains packets from the interface and relays them through the
//! local proxy until told to stop. Per-packet problems (unroutable packets,
//! refused relay connections) never terminate the loop; only an unusable
//! interface handle does, and that is reported upward as fatal so the owner
//! can tear the tunnel down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use aura_tun::PacketIo;

use crate::control::SharedStatsRef;
use crate::error::{Error, Result};
use crate::packet::parse_flow;
use crate::relay::{RelayConnector, RelayTable};

/// Read buffer size; generous headroom over any expected interface MTU
pub const IFACE_BUFSIZE: usize = 32 * 1024;

/// Backoff after a zero-length read before polling again
pub const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(10);

/// Single-worker forwarding loop between the interface and the relay
pub struct ForwardingLoop {
    iface: Arc<dyn PacketIo>,
    relays: RelayTable,
    shutdown: broadcast::Receiver<()>,
    stats: SharedStatsRef,
}

impl ForwardingLoop {
    /// Create a loop over the given interface and relay connector
    pub fn new(
        iface: Arc<dyn PacketIo>,
        connector: Arc<dyn RelayConnector>,
        shutdown: broadcast::Receiver<()>,
        stats: SharedStatsRef,
    ) -> Self {
        let relays = RelayTable::new(connector, iface.clone(), stats.clone());
        Self {
            iface,
            relays,
            shutdown,
            stats,
        }
    }

    /// Run until cancelled or the interface becomes unusable
    ///
    /// The interface handle itself is closed by the owning controller, never
    /// here; on exit the loop releases its buffer and relay connections and
    /// nothing else.
    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; IFACE_BUFSIZE];
        log::debug!("forwarding loop started on {}", self.iface.name());

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    log::debug!("forwarding loop cancelled");
                    break;
                }
                read = self.iface.recv(&mut buf) => match read {
                    // No packet available right now; back off instead of
                    // spinning
                    Ok(0) => tokio::time::sleep(EMPTY_READ_BACKOFF).await,
                    Ok(n) => {
                        self.stats.record_outbound(n);
                        self.handle_packet(&buf[..n]).await;
                    }
                    Err(e) => {
                        log::error!("interface read failed: {}", e);
                        return Err(Error::ForwardingFatal(e.to_string()));
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_packet(&mut self, packet: &[u8]) {
        let Some(parsed) = parse_flow(packet) else {
            log::trace!("skipping unroutable packet ({} bytes)", packet.len());
            return;
        };

        if let Err(e) = self.relays.forward(parsed.flow, parsed.payload).await {
            log::warn!("relay error for {}: {}", parsed.flow, e);
        }
    }
}
