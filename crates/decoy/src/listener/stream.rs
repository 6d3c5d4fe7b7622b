//! TCP and telnet listeners.
//!
//! Both transports accept connections and frame each one into a single
//! message with `MessageFramer`. They differ only in name.

use super::{Listener, MessageSource, Transport};
use crate::allocator::PortAllocator;
use crate::capture::{CaptureQueue, CapturedRecord, ErrorLog, MessageRecord};
use crate::config::StreamConfig;
use crate::error::{HandlerError, SimError};
use crate::framer::MessageFramer;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// State shared by the handling tasks of a TCP or telnet listener.
pub struct StreamContext {
    config: StreamConfig,
    framer: MessageFramer,
    queue: CaptureQueue<MessageRecord>,
    errors: ErrorLog,
    local: SocketAddr,
}

impl MessageSource for StreamContext {
    fn messages(&self) -> &CaptureQueue<MessageRecord> {
        &self.queue
    }
}

pub struct Tcp;

pub struct Telnet;

#[async_trait]
impl Transport for Tcp {
    const NAME: &'static str = "TCP";

    type Socket = TcpListener;
    type Context = StreamContext;
    type Unit = (TcpStream, SocketAddr);

    async fn accept(socket: &TcpListener) -> io::Result<(TcpStream, SocketAddr)> {
        socket.accept().await
    }

    async fn handle(unit: (TcpStream, SocketAddr), ctx: Arc<StreamContext>) {
        handle_connection(Self::NAME, unit, ctx).await
    }

    fn error_log(ctx: &StreamContext) -> &ErrorLog {
        &ctx.errors
    }
}

#[async_trait]
impl Transport for Telnet {
    const NAME: &'static str = "Telnet";

    type Socket = TcpListener;
    type Context = StreamContext;
    type Unit = (TcpStream, SocketAddr);

    async fn accept(socket: &TcpListener) -> io::Result<(TcpStream, SocketAddr)> {
        socket.accept().await
    }

    async fn handle(unit: (TcpStream, SocketAddr), ctx: Arc<StreamContext>) {
        handle_connection(Self::NAME, unit, ctx).await
    }

    fn error_log(ctx: &StreamContext) -> &ErrorLog {
        &ctx.errors
    }
}

/// Frame one connection, answer with the canned response and capture the message.
///
/// A failed read or write is logged and ends the task without a record.
async fn handle_connection(
    transport: &'static str,
    (mut stream, peer): (TcpStream, SocketAddr),
    ctx: Arc<StreamContext>,
) {
    debug!("{} connection from {}", transport, peer);

    let frame = match ctx.framer.read_message(&mut stream).await {
        Ok(frame) => frame,
        Err(e) => {
            error!("{} read from {} failed: {}", transport, peer, e);
            ctx.errors.push(HandlerError::read(peer, &e));
            return;
        }
    };
    debug!(
        "{} framed {} bytes from {} ({:?})",
        transport,
        frame.message.len(),
        peer,
        frame.end
    );

    if let Some(response) = ctx.config.canned_response() {
        match timeout(ctx.config.write_timeout, stream.write_all(response)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("{} write to {} failed: {}", transport, peer, e);
                ctx.errors.push(HandlerError::write(peer, &e));
                return;
            }
            Err(_) => {
                warn!("{} write to {} timed out", transport, peer);
                ctx.errors.push(HandlerError::WriteTimeout { peer });
                return;
            }
        }
    }

    ctx.queue
        .push(CapturedRecord::new(peer, ctx.local, frame.message))
        .await;
}

async fn bind_stream<T>(
    config: StreamConfig,
    allocator: &PortAllocator,
) -> Result<Listener<T>, SimError>
where
    T: Transport<Socket = TcpListener, Context = StreamContext>,
{
    config.validate()?;
    let queue = CaptureQueue::new(config.capacity)?;
    let (socket, port) = allocator
        .allocate(&config.host, |addr| TcpListener::bind(addr))
        .await?;
    let local = socket.local_addr()?;
    info!("{} listener bound to {}:{}", T::NAME, config.host, port);

    let ctx = StreamContext {
        framer: MessageFramer::new(config.read_timeout, config.read_buffer_size),
        queue,
        errors: ErrorLog::new(),
        local,
        config,
    };
    let autostart = ctx.config.autostart;
    let listener = Listener::new(socket, local, ctx);
    if autostart {
        listener.start()?;
    }
    Ok(listener)
}

impl Listener<Tcp> {
    /// Bind a TCP listener on a free port of `config.host`.
    pub async fn bind(config: StreamConfig, allocator: &PortAllocator) -> Result<Self, SimError> {
        bind_stream(config, allocator).await
    }
}

impl Listener<Telnet> {
    /// Bind a telnet listener on a free port of `config.host`.
    pub async fn bind(config: StreamConfig, allocator: &PortAllocator) -> Result<Self, SimError> {
        bind_stream(config, allocator).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerState;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn config() -> StreamConfig {
        StreamConfig::new("127.0.0.1")
            .with_read_timeout(Duration::from_millis(150))
            .with_autostart(true)
    }

    #[tokio::test]
    async fn test_tcp_captures_one_shot_message() {
        let allocator = PortAllocator::seeded(7);
        let server = Listener::<Tcp>::bind(config(), &allocator).await.unwrap();
        assert_eq!(server.state(), ListenerState::Running);

        let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        client.shutdown().await.unwrap();

        let record = server
            .wait_for(Duration::from_millis(20), Duration::from_secs(2))
            .await
            .expect("message not captured");
        assert_eq!(record.message(), "ping");
        assert_eq!(record.local, server.local_addr());
        assert!(server.errors().is_empty());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_telnet_writes_canned_response() {
        let allocator = PortAllocator::seeded(8);
        let server = Listener::<Telnet>::bind(config().with_response("OK\r\n"), &allocator)
            .await
            .unwrap();

        let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
        client.write_all(b"status\r\n").await.unwrap();
        client.shutdown().await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"OK\r\n");

        let record = server
            .wait_for(Duration::from_millis(20), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(record.message(), "status\r\n");
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_not_started_listener_accepts_nothing_into_queue() {
        let allocator = PortAllocator::seeded(9);
        let server = Listener::<Tcp>::bind(config().with_autostart(false), &allocator)
            .await
            .unwrap();
        assert_eq!(server.state(), ListenerState::NotStarted);
        assert!(server.pop().is_none());

        server.stop().await.unwrap();
        assert_eq!(server.state(), ListenerState::Stopped);
        assert!(matches!(server.start(), Err(SimError::Stopped)));
    }
}
