//! Relay connections through the local SOCKS5 proxy
//!
//! Forwarded traffic leaves through a fixed, pre-existing proxy on
//! localhost; the tunnel engine behind it carries the bytes onward. Each
//! flow gets one relay connection, reused for as long as it stays open, with
//! a pair of pump tasks moving payload toward the proxy and framing the
//! proxy's responses back onto the interface.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use aura_tun::PacketIo;

use crate::control::SharedStatsRef;
use crate::error::{Error, Result};
use crate::packet::{frame_reply, Flow};

/// Port the local relay listens on
pub const DEFAULT_PROXY_PORT: u16 = 1080;

/// Buffer size for reads from a relay connection
const RELAY_READ_BUFSIZE: usize = 8 * 1024;

/// Queued-payload capacity per flow before packets are dropped
const FLOW_BACKLOG: usize = 64;

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Byte stream toward the relay
pub trait RelayIo: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> RelayIo for T {}

/// Boxed relay byte stream
pub type RelayStream = Box<dyn RelayIo>;

/// Opens relay connections for flows
#[async_trait]
pub trait RelayConnector: Send + Sync {
    /// Open a relay connection carrying the given flow
    async fn connect(&self, flow: &Flow) -> Result<RelayStream>;
}

/// Connector speaking minimal no-auth SOCKS5 CONNECT to the local proxy
///
/// The relay is fixed and local, so no method negotiation beyond the no-auth
/// greeting is performed.
#[derive(Debug, Clone)]
pub struct Socks5Connector {
    proxy_addr: SocketAddr,
}

impl Socks5Connector {
    /// Connector against a specific proxy address
    pub fn new(proxy_addr: SocketAddr) -> Self {
        Self { proxy_addr }
    }

    /// The proxy address this connector targets
    pub fn proxy_addr(&self) -> SocketAddr {
        self.proxy_addr
    }
}

impl Default for Socks5Connector {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], DEFAULT_PROXY_PORT)))
    }
}

fn proto_err(message: String) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidData, message))
}

#[async_trait]
impl RelayConnector for Socks5Connector {
    async fn connect(&self, flow: &Flow) -> Result<RelayStream> {
        let mut stream = TcpStream::connect(self.proxy_addr).await.map_err(|e| {
            Error::Io(io::Error::new(
                e.kind(),
                format!("relay {} unreachable: {}", self.proxy_addr, e),
            ))
        })?;

        stream
            .write_all(&[SOCKS_VERSION, 1, METHOD_NO_AUTH])
            .await?;

        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).await?;
        if reply[0] != SOCKS_VERSION || reply[1] != METHOD_NO_AUTH {
            return Err(proto_err(format!(
                "relay rejected no-auth greeting (version {}, method {})",
                reply[0], reply[1]
            )));
        }

        let mut request = vec![SOCKS_VERSION, CMD_CONNECT, 0x00, ATYP_IPV4];
        request.extend_from_slice(&flow.dst_ip.octets());
        request.extend_from_slice(&flow.dst_port.to_be_bytes());
        stream.write_all(&request).await?;

        let mut head = [0u8; 4];
        stream.read_exact(&mut head).await?;
        if head[1] != 0x00 {
            return Err(proto_err(format!(
                "relay refused connection to {} (reply code {})",
                flow.dst(),
                head[1]
            )));
        }

        // Drain the bound address the proxy reports
        let addr_len = match head[3] {
            ATYP_IPV4 => 4,
            ATYP_IPV6 => 16,
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                stream.read_exact(&mut len).await?;
                len[0] as usize
            }
            other => {
                return Err(proto_err(format!("relay sent unknown address type {}", other)));
            }
        };
        let mut bound = vec![0u8; addr_len + 2];
        stream.read_exact(&mut bound).await?;

        log::debug!("relay connection established for {}", flow);
        Ok(Box::new(stream))
    }
}

/// Per-flow relay connections with their pump tasks
///
/// Owned by the forwarding worker; dropping the table closes every queued
/// sender, which winds the pump tasks and their connections down.
pub struct RelayTable {
    connector: Arc<dyn RelayConnector>,
    iface: Arc<dyn PacketIo>,
    stats: SharedStatsRef,
    flows: HashMap<Flow, mpsc::Sender<Vec<u8>>>,
}

impl RelayTable {
    /// Create an empty table
    pub fn new(
        connector: Arc<dyn RelayConnector>,
        iface: Arc<dyn PacketIo>,
        stats: SharedStatsRef,
    ) -> Self {
        Self {
            connector,
            iface,
            stats,
            flows: HashMap::new(),
        }
    }

    /// Relay one packet's payload, establishing or reusing the flow's
    /// connection
    ///
    /// Empty payloads (transport control segments) are dropped silently; a
    /// full per-flow backlog drops the packet rather than blocking the
    /// forwarding worker.
    pub async fn forward(&mut self, flow: Flow, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }

        let stale = match self.flows.get(&flow) {
            Some(tx) if !tx.is_closed() => {
                if let Err(e) = tx.try_send(payload.to_vec()) {
                    log::debug!("dropping packet for {}: {}", flow, e);
                }
                return Ok(());
            }
            Some(_) => true,
            None => false,
        };
        if stale {
            self.flows.remove(&flow);
            log::debug!("relay connection for {} is gone; reconnecting", flow);
        }

        let stream = self.connector.connect(&flow).await?;
        let (tx, rx) = mpsc::channel(FLOW_BACKLOG);
        if tx.try_send(payload.to_vec()).is_err() {
            // Freshly created channel; cannot be full or closed
            log::debug!("dropping first packet for {}", flow);
        }
        self.spawn_pumps(flow, stream, rx);
        self.flows.insert(flow, tx);
        Ok(())
    }

    /// Number of flows with a live relay connection
    pub fn active_flows(&self) -> usize {
        self.flows.len()
    }

    fn spawn_pumps(&self, flow: Flow, stream: RelayStream, mut rx: mpsc::Receiver<Vec<u8>>) {
        let (mut read_half, mut write_half) = tokio::io::split(stream);

        // Outbound: queued payloads into the relay
        tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if let Err(e) = write_half.write_all(&chunk).await {
                    log::warn!("relay write failed for {}: {}", flow, e);
                    break;
                }
            }
        });

        // Inbound: relay responses framed back onto the interface
        let iface = self.iface.clone();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; RELAY_READ_BUFSIZE];
            loop {
                match read_half.read(&mut buf).await {
                    Ok(0) => {
                        log::debug!("relay closed {}", flow);
                        break;
                    }
                    Ok(n) => {
                        let reply = frame_reply(&flow, &buf[..n]);
                        match iface.send(&reply).await {
                            Ok(sent) => stats.record_inbound(sent),
                            Err(e) => {
                                log::warn!("interface write failed for {}: {}", flow, e);
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        log::debug!("relay read ended for {}: {}", flow, e);
                        break;
                    }
                }
            }
        });
    }
}

/// Mock relay for tests: every connection is an in-memory duplex whose far
/// end the test drives directly.
pub mod mock {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use tokio::io::DuplexStream;

    use super::*;

    /// In-memory relay connector
    pub struct MockConnector {
        endpoints: Mutex<Vec<(Flow, DuplexStream)>>,
        connects: AtomicUsize,
        refuse: AtomicBool,
    }

    impl MockConnector {
        /// Create a new mock connector
        pub fn new() -> Self {
            Self {
                endpoints: Mutex::new(Vec::new()),
                connects: AtomicUsize::new(0),
                refuse: AtomicBool::new(false),
            }
        }

        /// Take the relay-side endpoint of the oldest un-taken connection
        pub fn take_endpoint(&self) -> Option<(Flow, DuplexStream)> {
            let mut endpoints = self.endpoints.lock().unwrap();
            if endpoints.is_empty() {
                None
            } else {
                Some(endpoints.remove(0))
            }
        }

        /// Total connections opened so far
        pub fn connect_count(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        /// Refuse every subsequent connection attempt
        pub fn set_refuse(&self, refuse: bool) {
            self.refuse.store(refuse, Ordering::SeqCst);
        }
    }

    impl Default for MockConnector {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl RelayConnector for MockConnector {
        async fn connect(&self, flow: &Flow) -> Result<RelayStream> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "relay refused",
                )));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            let (client, server) = tokio::io::duplex(64 * 1024);
            self.endpoints.lock().unwrap().push((*flow, server));
            Ok(Box::new(client))
        }
    }
}
