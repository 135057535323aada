//! Integration tests for aura-tun
//!
//! # Permission Requirements
//!
//! Tests that create real TUN devices require elevated privileges and are
//! marked `#[ignore]`. Run them with:
//!
//! ```bash
//! sudo cargo test -p aura-tun --test integration -- --ignored
//! ```
//!
//! Everything else runs unprivileged against the mock interface.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use aura_tun::config::default_route;
use aura_tun::transport::mock::{ipv4_udp_packet, MockInterface};
use aura_tun::{InterfaceConfig, InterfaceHandle, PacketIo, DEFAULT_DNS};

#[test]
fn config_defaults_match_tunnel_constants() {
    let config = InterfaceConfig::default();
    assert_eq!(config.address, Ipv4Addr::new(10, 0, 0, 2));
    assert_eq!(config.prefix_len, 32);
    assert_eq!(config.routes, vec![default_route()]);
    assert_eq!(config.dns_servers, vec![IpAddr::V4(DEFAULT_DNS)]);
    assert!(config.allowed_apps.is_empty());
}

#[test]
fn builder_rejects_invalid_prefix() {
    let result = InterfaceConfig::builder()
        .address(Ipv4Addr::new(10, 0, 0, 2), 40)
        .build();
    assert!(result.is_err());
}

#[test]
fn builder_accepts_explicit_resolver_and_allow_list() {
    let config = InterfaceConfig::builder()
        .dns_server("1.2.3.4".parse().unwrap())
        .allow_app("com.example.messenger")
        .build()
        .unwrap();

    assert_eq!(config.dns_servers, vec!["1.2.3.4".parse::<IpAddr>().unwrap()]);
    assert_eq!(config.allowed_apps, vec!["com.example.messenger".to_string()]);
}

#[tokio::test]
async fn mock_interface_round_trip() {
    let iface = MockInterface::new("mock0", 1400);
    let packet = ipv4_udp_packet(
        Ipv4Addr::new(10, 0, 0, 2),
        40000,
        Ipv4Addr::new(93, 184, 216, 34),
        53,
        b"query",
    );
    iface.inject_recv_packet(packet.clone());

    let mut buf = vec![0u8; 2000];
    let n = iface.recv(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], &packet[..]);

    iface.send(&buf[..n]).await.unwrap();
    assert_eq!(iface.sent_packets(), vec![packet]);
}

#[tokio::test]
async fn quiet_interface_reads_zero_not_eof() {
    let iface = MockInterface::new("mock0", 1400);
    let mut buf = vec![0u8; 64];
    for _ in 0..5 {
        assert_eq!(iface.recv(&mut buf).await.unwrap(), 0);
    }
    assert_eq!(iface.recv_calls(), 5);
}

#[test]
fn handle_releases_on_last_drop() {
    let iface = Arc::new(MockInterface::new("mock0", 1400));
    let weak = Arc::downgrade(&iface);

    let handle = InterfaceHandle::new(iface);
    let io = handle.io();
    drop(io);
    assert!(weak.upgrade().is_some());

    drop(handle);
    assert!(weak.upgrade().is_none());
}

/// Requires root: creates a real TUN device
#[tokio::test]
#[ignore]
async fn privileged_create_real_device() {
    use aura_tun::TunDevice;

    let config = InterfaceConfig::builder().name("auratest0").build().unwrap();
    let device = TunDevice::create(&config).await.unwrap();
    assert!(!device.name().is_empty());
    assert_eq!(device.mtu(), config.mtu);
}
