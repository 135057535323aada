//! Aura tunnel engine
//!
//! Lifecycle controller and packet-forwarding engine for a DNS-tunnel VPN
//! client: owns the virtual interface, coordinates the external tunnel
//! engine and relays captured traffic through the local SOCKS5 proxy.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Application Layer                        │
//! │  ┌─────────────────┐              ┌─────────────────────┐   │
//! │  │    aura-cli     │              │   GUI / host app    │   │
//! │  └────────┬────────┘              └──────────┬──────────┘   │
//! │           │        control socket / API      │              │
//! │           └───────────────┬──────────────────┘              │
//! │                           ▼                                 │
//! │  ┌────────────────────────────────────────────────────────┐ │
//! │  │                    aura-engine                         │ │
//! │  │  - TunnelController (lifecycle, single instance)       │ │
//! │  │  - ForwardingLoop   (interface <-> relay)              │ │
//! │  │  - EngineClient     (black-box tunnel engine facade)   │ │
//! │  └────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      aura-tun                               │
//! │  - InterfaceProvider (host grant + establishment)           │
//! │  - TunDevice / PacketIo (raw packet I/O)                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The controller guarantees single-instance semantics (at most one tunnel
//! per process), deterministic teardown (every established interface is
//! released exactly once, including on error paths) and that `start`/`stop`
//! report only after they have fully completed.

pub mod config;
pub mod control;
pub mod controller;
pub mod engine;
pub mod error;
pub mod event;
pub mod forward;
pub mod packet;
pub mod relay;

pub use config::TunnelConfig;
pub use control::{
    ControlClient, ControlRequest, ControlResponse, ControlServer, SharedStats, SharedStatsRef,
    StatusInfo, DEFAULT_SOCKET_PATH,
};
pub use controller::TunnelController;
pub use engine::{EngineClient, TunnelEngine};
pub use error::{Error, Result};
pub use event::{EventHandler, LifecycleState, LoggingEventHandler, TunnelEvent};
pub use forward::ForwardingLoop;
pub use relay::{RelayConnector, Socks5Connector};
