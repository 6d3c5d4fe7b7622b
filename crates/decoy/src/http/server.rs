//! The HTTP listener: one hyper HTTP/1 connection per accepted socket.

use super::handler::{handle_request, HttpContext};
use super::matcher::RuleMatcher;
use super::types::HttpRecord;
use crate::allocator::resolve;
use crate::capture::{CaptureQueue, ErrorLog};
use crate::config::HttpConfig;
use crate::error::{HandlerError, SimError};
use crate::listener::{Listener, Transport};
use async_trait::async_trait;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

pub struct Http;

pub type HttpServer = Listener<Http>;

#[async_trait]
impl Transport for Http {
    const NAME: &'static str = "HTTP";

    type Socket = TcpListener;
    type Context = HttpContext;
    type Unit = (TcpStream, SocketAddr);

    async fn accept(socket: &TcpListener) -> io::Result<(TcpStream, SocketAddr)> {
        socket.accept().await
    }

    async fn handle(unit: (TcpStream, SocketAddr), ctx: Arc<HttpContext>) {
        let (stream, peer) = unit;
        let io = TokioIo::new(stream);
        let mut builder = http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .header_read_timeout(ctx.read_timeout);

        let service_ctx = Arc::clone(&ctx);
        let service = service_fn(move |req| {
            let ctx = Arc::clone(&service_ctx);
            async move { handle_request(req, ctx, peer).await }
        });
        match builder.serve_connection(io, service).await {
            Ok(()) => debug!("HTTP connection from {} closed", peer),
            Err(e) if e.is_canceled() || e.is_closed() => {
                debug!("HTTP connection from {} dropped: {}", peer, e);
            }
            Err(e) => {
                warn!("HTTP connection error from {}: {}", peer, e);
                ctx.errors.push(HandlerError::http(peer, &e));
            }
        }
    }

    fn error_log(ctx: &HttpContext) -> &ErrorLog {
        &ctx.errors
    }
}

impl Listener<Http> {
    /// Compile the configured modes, bind `config.host:config.port` and start serving.
    ///
    /// Port 0 lets the OS pick a free port; read it back with `port()`.
    pub async fn bind(config: HttpConfig) -> Result<Self, SimError> {
        config.validate()?;
        let matcher = RuleMatcher::new(&config.modes, config.initial_mode.as_deref())?;
        let queue = CaptureQueue::new(config.capacity)?;

        let addr = resolve(&config.host, config.port).await?;
        let socket = TcpListener::bind(addr).await.map_err(|source| SimError::Bind {
            addr: format!("{}:{}", config.host, config.port),
            source,
        })?;
        let local = socket.local_addr()?;
        info!(
            "HTTP listener bound to {} with modes {:?}, active '{}'",
            local,
            matcher.mode_names(),
            matcher.active_mode()
        );

        let ctx = HttpContext {
            matcher,
            queue,
            errors: ErrorLog::new(),
            miss_policy: config.miss_policy,
            header_policy: config.header_policy,
            read_timeout: config.read_timeout,
            local,
        };
        let listener = Listener::new(socket, local, ctx);
        listener.start()?;
        Ok(listener)
    }

    /// Make `name` the active mode for requests looked up from now on.
    pub fn set_mode(&self, name: &str) -> Result<(), SimError> {
        self.context().matcher.set_mode(name)?;
        Ok(())
    }

    pub fn active_mode(&self) -> String {
        self.context().matcher.active_mode()
    }

    /// `http://host:port` followed by `path`.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://{}/{}", self.local_addr(), path)
    }

    /// Oldest captured request, without waiting.
    pub fn pop_request(&self) -> Option<HttpRecord> {
        self.context().queue.pop()
    }

    /// Poll for a captured request every `poll_interval`, giving up after `max_wait`.
    pub async fn wait_for_request(
        &self,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Option<HttpRecord> {
        let record = self
            .context()
            .queue
            .wait_for(poll_interval, max_wait)
            .await;
        if record.is_none() {
            warn!(
                "HTTP listener on {}: no request within {:?}",
                self.local_addr(),
                max_wait
            );
        }
        record
    }

    /// Every captured request not yet consumed, oldest first.
    pub fn requests(&self) -> Vec<HttpRecord> {
        self.context().queue.drain()
    }

    /// Tear the listener down. In-flight requests are not drained.
    pub async fn close(&self) -> Result<(), SimError> {
        self.stop().await
    }
}
