//! Capture channel between handling tasks and the test driver.
//!
//! Handling tasks push one `CapturedRecord` per completed message or matched
//! request. The driver pops them without blocking, or polls with a bounded
//! wait. The queue is bounded: a full queue blocks the producer until the
//! driver drains a record.

use crate::error::{ConfigError, HandlerError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// Immutable snapshot of one received unit of traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRecord<P> {
    /// Address of the peer that sent the traffic
    pub peer: SocketAddr,
    /// Address of the listener that received it
    pub local: SocketAddr,
    pub payload: P,
    pub received_at: DateTime<Utc>,
}

impl<P> CapturedRecord<P> {
    pub fn new(peer: SocketAddr, local: SocketAddr, payload: P) -> Self {
        Self {
            peer,
            local,
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Record produced by the TCP, telnet and UDP listeners.
pub type MessageRecord = CapturedRecord<Vec<u8>>;

impl MessageRecord {
    /// The raw message as text (lossy for non UTF-8 payloads).
    pub fn message(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Bounded FIFO of captured records.
pub struct CaptureQueue<T> {
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
    capacity: usize,
}

impl<T: Send> CaptureQueue<T> {
    /// Create a queue holding at most `capacity` undrained records.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        let (tx, rx) = mpsc::channel(capacity);
        Ok(Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, waiting for room while the queue is full.
    pub async fn push(&self, record: T) {
        // The receiver lives as long as the queue, so send only fails during teardown.
        if self.tx.send(record).await.is_err() {
            debug!("Capture queue closed, dropping record");
        }
    }

    /// Remove the oldest record without waiting.
    pub fn pop(&self) -> Option<T> {
        self.rx.lock().try_recv().ok()
    }

    /// Poll `pop` every `poll_interval` until a record arrives or `max_wait`
    /// has elapsed since the call began.
    pub async fn wait_for(&self, poll_interval: Duration, max_wait: Duration) -> Option<T> {
        let start = Instant::now();
        loop {
            if let Some(record) = self.pop() {
                return Some(record);
            }
            let elapsed = start.elapsed();
            if elapsed >= max_wait {
                return None;
            }
            tokio::time::sleep(poll_interval.min(max_wait - elapsed)).await;
        }
    }

    /// Remove and return every pending record, oldest first.
    pub fn drain(&self) -> Vec<T> {
        let mut rx = self.rx.lock();
        let mut records = Vec::new();
        while let Ok(record) = rx.try_recv() {
            records.push(record);
        }
        records
    }

    pub fn len(&self) -> usize {
        self.rx.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.lock().is_empty()
    }
}

/// Append-only log of errors seen by handling tasks.
#[derive(Default)]
pub struct ErrorLog {
    errors: Mutex<Vec<HandlerError>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, error: HandlerError) {
        self.errors.lock().push(error);
    }

    /// Copy of every error recorded so far.
    pub fn snapshot(&self) -> Vec<HandlerError> {
        self.errors.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }
}
