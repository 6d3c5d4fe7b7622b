//! End-to-end tests for the UDP listener.

use decoy::client::connect_udp;
use decoy::{PortAllocator, StreamConfig, UdpServer};
use std::time::Duration;

const POLL: Duration = Duration::from_millis(10);
const MAX_WAIT: Duration = Duration::from_secs(2);
const DEADLINE: Duration = Duration::from_secs(2);

fn config() -> StreamConfig {
    StreamConfig::new("127.0.0.1").with_autostart(true)
}

#[tokio::test]
async fn test_datagrams_are_separate_messages() {
    let allocator = PortAllocator::seeded(201);
    let server = UdpServer::bind(config(), &allocator).await.unwrap();

    let client = connect_udp("127.0.0.1", server.port(), DEADLINE).await.unwrap();
    let mut sent_at = Vec::new();
    for payload in ["gauge:1", "gauge:2", "gauge:3"] {
        sent_at.push(client.write(payload.as_bytes()).await.unwrap());
    }
    assert!(sent_at.windows(2).all(|pair| pair[0] <= pair[1]));

    let mut messages = Vec::new();
    for _ in 0..3 {
        let record = server.wait_for(POLL, MAX_WAIT).await.expect("missing datagram");
        assert_eq!(record.local, server.local_addr());
        messages.push(record.message().into_owned());
    }
    messages.sort();
    assert_eq!(messages, vec!["gauge:1", "gauge:2", "gauge:3"]);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_canned_response_reaches_client() {
    let allocator = PortAllocator::seeded(202);
    let server = UdpServer::bind(config().with_response("pong"), &allocator)
        .await
        .unwrap();

    let client = connect_udp("127.0.0.1", server.port(), DEADLINE).await.unwrap();
    client.write(b"ping").await.unwrap();
    assert_eq!(client.read(32).await.unwrap(), "pong");

    let record = server.wait_for(POLL, MAX_WAIT).await.unwrap();
    assert_eq!(record.message(), "ping");
    assert_eq!(record.peer, client.local_addr().unwrap());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_oversized_datagram_is_truncated_to_buffer() {
    let allocator = PortAllocator::seeded(203);
    let server = UdpServer::bind(config().with_read_buffer_size(4), &allocator)
        .await
        .unwrap();

    let client = connect_udp("127.0.0.1", server.port(), DEADLINE).await.unwrap();
    client.write(b"abcdefgh").await.unwrap();

    let record = server.wait_for(POLL, MAX_WAIT).await.unwrap();
    assert_eq!(record.message(), "abcd");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_not_started_listener_captures_nothing() {
    let allocator = PortAllocator::seeded(204);
    let server = UdpServer::bind(config().with_autostart(false), &allocator)
        .await
        .unwrap();

    let client = connect_udp("127.0.0.1", server.port(), DEADLINE).await.unwrap();
    client.write(b"early").await.unwrap();
    assert!(server
        .wait_for(POLL, Duration::from_millis(100))
        .await
        .is_none());

    // The datagram waited in the socket buffer and is read once started.
    server.start().unwrap();
    let record = server.wait_for(POLL, MAX_WAIT).await.unwrap();
    assert_eq!(record.message(), "early");

    server.stop().await.unwrap();
}
