//! Idle-timeout message framing for stream transports.
//!
//! A message has no length prefix or delimiter. Reads on one connection are
//! accumulated until the peer closes its write half or no data arrives for
//! `read_timeout`; whatever was accumulated by then is one message.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

/// Why accumulation of a message ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEnd {
    /// A read returned zero bytes
    PeerClosed,
    /// No data arrived within the read timeout
    IdleTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message: Vec<u8>,
    pub end: FrameEnd,
}

#[derive(Debug, Clone, Copy)]
pub struct MessageFramer {
    read_timeout: Duration,
    buffer_size: usize,
}

impl MessageFramer {
    pub fn new(read_timeout: Duration, buffer_size: usize) -> Self {
        Self {
            read_timeout,
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Read one logical message from `reader`.
    ///
    /// The deadline restarts before every read. A connection that never sends
    /// anything yields an empty message once the first deadline passes.
    pub async fn read_message<R>(&self, reader: &mut R) -> io::Result<Frame>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; self.buffer_size];
        let mut message = Vec::new();

        loop {
            match timeout(self.read_timeout, reader.read(&mut buf)).await {
                Ok(Ok(0)) => {
                    return Ok(Frame {
                        message,
                        end: FrameEnd::PeerClosed,
                    })
                }
                Ok(Ok(n)) => message.extend_from_slice(strip_null_padding(&buf[..n])),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Ok(Frame {
                        message,
                        end: FrameEnd::IdleTimeout,
                    })
                }
            }
        }
    }
}

/// Drop trailing NUL bytes.
pub fn strip_null_padding(chunk: &[u8]) -> &[u8] {
    let end = chunk
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);
    &chunk[..end]
}
