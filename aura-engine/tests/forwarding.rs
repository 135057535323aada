//! Bidirectional forwarding tests
//!
//! The forwarding loop runs against a mock interface and a mock relay:
//! injected packets must come out of the relay side as raw payload, and
//! bytes written on the relay side must come back to the interface as
//! properly framed reply packets. Per-packet failures must never terminate
//! the loop.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use aura_engine::forward::{ForwardingLoop, EMPTY_READ_BACKOFF};
use aura_engine::packet::{parse_flow, Protocol};
use aura_engine::relay::mock::MockConnector;
use aura_engine::SharedStats;
use aura_tun::transport::mock::{ipv4_tcp_packet, ipv4_udp_packet, MockInterface};

struct LoopHarness {
    iface: Arc<MockInterface>,
    relay: Arc<MockConnector>,
    shutdown: broadcast::Sender<()>,
    worker: JoinHandle<aura_engine::Result<()>>,
}

fn spawn_loop() -> LoopHarness {
    let iface = Arc::new(MockInterface::new("mock0", 1400));
    let relay = Arc::new(MockConnector::new());
    let (shutdown, shutdown_rx) = broadcast::channel(1);

    let forwarder = ForwardingLoop::new(
        iface.clone(),
        relay.clone(),
        shutdown_rx,
        Arc::new(SharedStats::new()),
    );
    let worker = tokio::spawn(forwarder.run());

    LoopHarness {
        iface,
        relay,
        shutdown,
        worker,
    }
}

async fn await_endpoint(
    relay: &MockConnector,
) -> (aura_engine::packet::Flow, tokio::io::DuplexStream) {
    for _ in 0..200 {
        if let Some(endpoint) = relay.take_endpoint() {
            return endpoint;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no relay connection was established");
}

fn udp_query() -> Vec<u8> {
    ipv4_udp_packet(
        Ipv4Addr::new(10, 0, 0, 2),
        40000,
        Ipv4Addr::new(1, 1, 1, 1),
        53,
        b"query",
    )
}

#[tokio::test]
async fn outbound_payload_reaches_the_relay() {
    let h = spawn_loop();
    h.iface.inject_recv_packet(udp_query());

    let (flow, mut endpoint) = await_endpoint(&h.relay).await;
    assert_eq!(flow.protocol, Protocol::Udp);
    assert_eq!(flow.dst(), "1.1.1.1:53".parse().unwrap());

    let mut payload = [0u8; 5];
    endpoint.read_exact(&mut payload).await.unwrap();
    assert_eq!(&payload, b"query");

    let _ = h.shutdown.send(());
    h.worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn relay_response_is_framed_back_to_the_interface() {
    let h = spawn_loop();
    h.iface.inject_recv_packet(udp_query());

    let (flow, mut endpoint) = await_endpoint(&h.relay).await;
    endpoint.write_all(b"answer").await.unwrap();

    let reply = {
        let mut reply = None;
        for _ in 0..200 {
            if let Some(pkt) = h.iface.sent_packets().into_iter().next() {
                reply = Some(pkt);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        reply.expect("no reply was written back to the interface")
    };

    let parsed = parse_flow(&reply).expect("reply must parse as a routable packet");
    assert_eq!(parsed.flow, flow.reversed());
    assert_eq!(parsed.payload, b"answer");

    let _ = h.shutdown.send(());
    h.worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn tcp_flows_round_trip_too() {
    let h = spawn_loop();
    h.iface.inject_recv_packet(ipv4_tcp_packet(
        Ipv4Addr::new(10, 0, 0, 2),
        50123,
        Ipv4Addr::new(93, 184, 216, 34),
        443,
        b"request",
    ));

    let (flow, mut endpoint) = await_endpoint(&h.relay).await;
    assert_eq!(flow.protocol, Protocol::Tcp);

    let mut payload = [0u8; 7];
    endpoint.read_exact(&mut payload).await.unwrap();
    assert_eq!(&payload, b"request");

    endpoint.write_all(b"response").await.unwrap();
    for _ in 0..200 {
        if !h.iface.sent_packets().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let reply = h.iface.sent_packets().remove(0);
    let parsed = parse_flow(&reply).unwrap();
    assert_eq!(parsed.flow, flow.reversed());
    assert_eq!(parsed.payload, b"response");

    let _ = h.shutdown.send(());
    h.worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn one_connection_per_flow_is_reused() {
    let h = spawn_loop();

    h.iface.inject_recv_packet(udp_query());
    h.iface.inject_recv_packet(udp_query());

    let (_, mut endpoint) = await_endpoint(&h.relay).await;
    let mut both = [0u8; 10];
    endpoint.read_exact(&mut both).await.unwrap();
    assert_eq!(&both, b"queryquery");
    assert_eq!(h.relay.connect_count(), 1);

    // A different destination opens its own connection
    h.iface.inject_recv_packet(ipv4_udp_packet(
        Ipv4Addr::new(10, 0, 0, 2),
        40000,
        Ipv4Addr::new(9, 9, 9, 9),
        53,
        b"other",
    ));
    await_endpoint(&h.relay).await;
    assert_eq!(h.relay.connect_count(), 2);

    let _ = h.shutdown.send(());
    h.worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn refused_relay_connections_do_not_terminate_the_loop() {
    let h = spawn_loop();
    h.relay.set_refuse(true);

    for _ in 0..5 {
        h.iface.inject_recv_packet(udp_query());
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!h.worker.is_finished(), "loop died on refused connections");
    assert_eq!(h.relay.connect_count(), 0);

    // Once the relay recovers, forwarding resumes
    h.relay.set_refuse(false);
    h.iface.inject_recv_packet(udp_query());
    await_endpoint(&h.relay).await;
    assert_eq!(h.relay.connect_count(), 1);

    let _ = h.shutdown.send(());
    h.worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_packets_are_skipped() {
    let h = spawn_loop();

    h.iface.inject_recv_packet(vec![0xff; 12]);
    h.iface.inject_recv_packet(vec![]);
    h.iface.inject_recv_packet(vec![0x60, 0x00, 0x00]);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!h.worker.is_finished(), "loop died on malformed input");
    assert_eq!(h.relay.connect_count(), 0);

    let _ = h.shutdown.send(());
    h.worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn survives_a_quiet_interface_and_cancels_within_the_polling_interval() {
    let h = spawn_loop();

    // Nothing injected: every read is empty
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!h.worker.is_finished());
    assert!(h.iface.recv_calls() >= 3);

    let started = Instant::now();
    let _ = h.shutdown.send(());
    h.worker.await.unwrap().unwrap();
    assert!(
        started.elapsed() < EMPTY_READ_BACKOFF + Duration::from_millis(100),
        "cancellation took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn fatal_interface_error_ends_the_loop_with_an_error() {
    let h = spawn_loop();
    h.iface.set_fail_reads(true);

    let result = tokio::time::timeout(Duration::from_secs(1), h.worker)
        .await
        .expect("loop did not terminate")
        .unwrap();
    assert!(matches!(result, Err(aura_engine::Error::ForwardingFatal(_))));
}
