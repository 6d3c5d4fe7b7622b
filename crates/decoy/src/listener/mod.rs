//! Listener lifecycle shared by every transport.
//!
//! A `Listener` owns a bound socket from construction. `start` moves the
//! socket into an accept loop task which spawns one handling task per unit of
//! traffic (connection, datagram or HTTP connection). `stop` signals the loop,
//! waits for it to exit and thereby closes the socket. Already spawned
//! handling tasks run to completion on their own.

mod stream;
mod udp;

pub use stream::{StreamContext, Tcp, Telnet};
pub use udp::{Datagram, Udp, UdpContext, UdpReceiver};

use crate::capture::{CaptureQueue, ErrorLog, MessageRecord};
use crate::error::{HandlerError, SimError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Transport-specific half of a listener.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Name used in log lines
    const NAME: &'static str;

    type Socket: Send + Sync + 'static;
    type Context: Send + Sync + 'static;
    /// One unit of traffic handed to a handling task
    type Unit: Send + 'static;

    /// Wait for the next unit of traffic.
    async fn accept(socket: &Self::Socket) -> io::Result<Self::Unit>;

    /// Process one unit. Runs in its own task.
    async fn handle(unit: Self::Unit, ctx: Arc<Self::Context>);

    fn error_log(ctx: &Self::Context) -> &ErrorLog;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    NotStarted,
    Running,
    Stopped,
}

pub struct Listener<T: Transport> {
    ctx: Arc<T::Context>,
    socket: Mutex<Option<T::Socket>>,
    local_addr: SocketAddr,
    state: Mutex<ListenerState>,
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

pub type TcpServer = Listener<Tcp>;
pub type TelnetServer = Listener<Telnet>;
pub type UdpServer = Listener<Udp>;

impl<T: Transport> Listener<T> {
    pub(crate) fn new(socket: T::Socket, local_addr: SocketAddr, ctx: T::Context) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            ctx: Arc::new(ctx),
            socket: Mutex::new(Some(socket)),
            local_addr,
            state: Mutex::new(ListenerState::NotStarted),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Begin accepting traffic. Must be called from within a tokio runtime.
    ///
    /// Starting a running listener is a no-op; a stopped listener cannot be
    /// restarted.
    pub fn start(&self) -> Result<(), SimError> {
        let mut state = self.state.lock();
        match *state {
            ListenerState::Running => return Ok(()),
            ListenerState::Stopped => return Err(SimError::Stopped),
            ListenerState::NotStarted => {}
        }

        let socket = self.socket.lock().take().ok_or(SimError::Stopped)?;
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(accept_loop::<T>(
            socket,
            Arc::clone(&self.ctx),
            self.local_addr,
            shutdown_rx,
        ));
        *self.task.lock() = Some(handle);
        *state = ListenerState::Running;

        info!("{} listener started on {}", T::NAME, self.local_addr);
        Ok(())
    }

    /// Stop accepting traffic and close the socket.
    ///
    /// Connections already accepted are not interrupted. Stopping twice, or
    /// stopping a listener that never started, succeeds.
    pub async fn stop(&self) -> Result<(), SimError> {
        let previous = std::mem::replace(&mut *self.state.lock(), ListenerState::Stopped);
        if previous == ListenerState::Stopped {
            return Ok(());
        }

        // Never started: the socket is still ours.
        drop(self.socket.lock().take());

        let _ = self.shutdown_tx.send(());
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("{} accept loop on {} panicked", T::NAME, self.local_addr);
                }
            }
        }

        info!("{} listener on {} stopped", T::NAME, self.local_addr);
        Ok(())
    }

    pub fn state(&self) -> ListenerState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ListenerState::Running
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Errors recorded by handling tasks so far.
    pub fn errors(&self) -> Vec<HandlerError> {
        T::error_log(&self.ctx).snapshot()
    }

    pub(crate) fn context(&self) -> &Arc<T::Context> {
        &self.ctx
    }
}

impl<T: Transport> Drop for Listener<T> {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

async fn accept_loop<T: Transport>(
    socket: T::Socket,
    ctx: Arc<T::Context>,
    local_addr: SocketAddr,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = T::accept(&socket) => {
                match result {
                    Ok(unit) => {
                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(async move {
                            T::handle(unit, ctx).await;
                        });
                    }
                    Err(e) => {
                        error!("{} accept error on {}: {}", T::NAME, local_addr, e);
                        T::error_log(&ctx).push(HandlerError::accept(&e));
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("{} listener on {} shutting down", T::NAME, local_addr);
                break;
            }
        }
    }
}

/// Driver-side access to captured messages of TCP, telnet and UDP listeners.
pub trait MessageSource {
    fn messages(&self) -> &CaptureQueue<MessageRecord>;
}

impl<T> Listener<T>
where
    T: Transport,
    T::Context: MessageSource,
{
    /// Oldest captured message, without waiting.
    pub fn pop(&self) -> Option<MessageRecord> {
        self.ctx.messages().pop()
    }

    /// Poll for a message every `poll_interval`, giving up after `max_wait`.
    pub async fn wait_for(
        &self,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Option<MessageRecord> {
        let record = self.ctx.messages().wait_for(poll_interval, max_wait).await;
        if record.is_none() {
            warn!(
                "{} listener on {}: no message within {:?}",
                T::NAME,
                self.local_addr,
                max_wait
            );
        }
        record
    }

    /// Every captured message not yet consumed, oldest first.
    pub fn drain(&self) -> Vec<MessageRecord> {
        self.ctx.messages().drain()
    }

    pub fn pending(&self) -> usize {
        self.ctx.messages().len()
    }
}
