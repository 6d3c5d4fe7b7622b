//! UDP listener. Every datagram is one complete message.

use super::{Listener, MessageSource, Transport};
use crate::allocator::PortAllocator;
use crate::capture::{CaptureQueue, CapturedRecord, ErrorLog, MessageRecord};
use crate::config::StreamConfig;
use crate::error::{HandlerError, SimError};
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub struct UdpContext {
    config: StreamConfig,
    queue: CaptureQueue<MessageRecord>,
    errors: ErrorLog,
    local: SocketAddr,
}

impl MessageSource for UdpContext {
    fn messages(&self) -> &CaptureQueue<MessageRecord> {
        &self.queue
    }
}

/// A received datagram plus the socket to answer on.
pub struct Datagram {
    payload: Vec<u8>,
    peer: SocketAddr,
    socket: Arc<UdpSocket>,
}

/// Bound socket plus the size of the buffer each datagram is read into.
pub struct UdpReceiver {
    socket: Arc<UdpSocket>,
    buffer_size: usize,
}

pub struct Udp;

#[async_trait]
impl Transport for Udp {
    const NAME: &'static str = "UDP";

    type Socket = UdpReceiver;
    type Context = UdpContext;
    type Unit = Datagram;

    async fn accept(receiver: &UdpReceiver) -> io::Result<Datagram> {
        let mut buf = vec![0u8; receiver.buffer_size];
        // Datagrams longer than the buffer are truncated.
        let (len, peer) = receiver.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok(Datagram {
            payload: buf,
            peer,
            socket: Arc::clone(&receiver.socket),
        })
    }

    async fn handle(datagram: Datagram, ctx: Arc<UdpContext>) {
        let Datagram {
            payload,
            peer,
            socket,
        } = datagram;
        debug!("UDP datagram of {} bytes from {}", payload.len(), peer);

        if let Some(response) = ctx.config.canned_response() {
            match timeout(ctx.config.write_timeout, socket.send_to(response, peer)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!("UDP send to {} failed: {}", peer, e);
                    ctx.errors.push(HandlerError::write(peer, &e));
                    return;
                }
                Err(_) => {
                    warn!("UDP send to {} timed out", peer);
                    ctx.errors.push(HandlerError::WriteTimeout { peer });
                    return;
                }
            }
        }
        // Release the socket before a push that may wait on a full queue.
        drop(socket);

        ctx.queue
            .push(CapturedRecord::new(peer, ctx.local, payload))
            .await;
    }

    fn error_log(ctx: &UdpContext) -> &ErrorLog {
        &ctx.errors
    }
}

/// Bind a UDP socket with its receive buffer sized to `recv_buffer`.
fn bind_udp(addr: SocketAddr, recv_buffer: usize) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_recv_buffer_size(recv_buffer)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

impl Listener<Udp> {
    /// Bind a UDP listener on a free port of `config.host`.
    pub async fn bind(config: StreamConfig, allocator: &PortAllocator) -> Result<Self, SimError> {
        config.validate()?;
        let queue = CaptureQueue::new(config.capacity)?;
        let buffer_size = config.read_buffer_size;
        let (socket, port) = allocator
            .allocate(&config.host, |addr| {
                std::future::ready(bind_udp(addr, buffer_size))
            })
            .await?;
        let local = socket.local_addr()?;
        info!("UDP listener bound to {}:{}", config.host, port);

        let autostart = config.autostart;
        let ctx = UdpContext {
            config,
            queue,
            errors: ErrorLog::new(),
            local,
        };
        let receiver = UdpReceiver {
            socket: Arc::new(socket),
            buffer_size,
        };
        let listener = Listener::new(receiver, local, ctx);
        if autostart {
            listener.start()?;
        }
        Ok(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_each_datagram_is_one_message() {
        let allocator = PortAllocator::seeded(11);
        let config = StreamConfig::new("127.0.0.1").with_autostart(true);
        let server = Listener::<Udp>::bind(config, &allocator).await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"one", server.local_addr()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.send_to(b"two", server.local_addr()).await.unwrap();

        let poll = Duration::from_millis(10);
        let first = server.wait_for(poll, Duration::from_secs(2)).await.unwrap();
        let second = server.wait_for(poll, Duration::from_secs(2)).await.unwrap();
        let mut messages = vec![first.message().into_owned(), second.message().into_owned()];
        messages.sort();
        assert_eq!(messages, vec!["one", "two"]);
        assert_eq!(first.peer, client.local_addr().unwrap());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_canned_response_sent_to_peer() {
        let allocator = PortAllocator::seeded(12);
        let config = StreamConfig::new("127.0.0.1")
            .with_response("ack")
            .with_autostart(true);
        let server = Listener::<Udp>::bind(config, &allocator).await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"hello", server.local_addr()).await.unwrap();

        let mut buf = [0u8; 16];
        let (len, from) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"ack");
        assert_eq!(from, server.local_addr());
        server.stop().await.unwrap();
    }
}
