//! Virtual network interface management for the Aura tunnel client
//!
//! This crate owns the host-facing side of the tunnel: creating and
//! configuring the TUN interface that captures outbound IP traffic, and the
//! provider boundary through which the engine requests (and releases) it.
//!
//! # Architecture
//!
//! - [`InterfaceConfig`]: address, routes, DNS resolvers and the optional
//!   application allow-list for the interface.
//! - [`TunDevice`]: thin wrapper around `tun-rs` exposing async packet I/O.
//! - [`PacketIo`]: the async read/write seam the forwarding engine uses;
//!   [`transport::mock`] provides a test double.
//! - [`InterfaceProvider`]: the host permission and establishment boundary;
//!   [`NativeProvider`] implements it with a real TUN device plus routes.
//! - [`InterfaceHandle`]: exclusive ownership of one open interface,
//!   released exactly once when dropped.
//!
//! # Platform Requirements
//!
//! Creating a TUN device requires root privileges or `CAP_NET_ADMIN` on
//! Linux, and root on macOS. Hosts that establish the interface themselves
//! can hand over the descriptor via [`TunDevice::from_fd`] instead.

pub mod config;
pub mod device;
pub mod error;
pub mod provider;
pub mod route;
pub mod transport;

pub use config::{InterfaceConfig, InterfaceConfigBuilder, DEFAULT_DNS, VPN_ADDRESS, VPN_PREFIX_LEN};
pub use device::TunDevice;
pub use error::{Error, Result};
pub use provider::{InterfaceHandle, InterfaceProvider, NativeProvider};
pub use route::{Route, RouteManager};
pub use transport::{IfaceInfo, PacketIo};

/// Default MTU for the tunnel interface
pub const DEFAULT_MTU: u16 = 1400;
