//! Port allocation for auto-bound listeners.
//!
//! Candidates are drawn from the dynamic/private range (49152-65535) by a
//! seedable generator owned by the allocator instance. Binding is retried on
//! "address in use" only; any other bind error aborts immediately.

use crate::error::SimError;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::time::Duration;
use tracing::{debug, warn};

/// Bind attempts before giving up.
pub const BIND_RETRIES: usize = 10;

/// Dynamic/private port range.
pub const PRIVATE_PORT_RANGE: RangeInclusive<u16> = 49152..=65535;

const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

/// Picks listening ports, retrying on bind conflicts.
///
/// Create one per test run (or per test) and pass it to listener
/// constructors; the generator is seeded once, at construction.
pub struct PortAllocator {
    rng: Mutex<StdRng>,
    range: RangeInclusive<u16>,
    retries: usize,
    backoff: Duration,
}

impl PortAllocator {
    /// Allocator seeded from OS entropy.
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Allocator with a reproducible candidate sequence.
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            range: PRIVATE_PORT_RANGE,
            retries: BIND_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_range(mut self, range: RangeInclusive<u16>) -> Self {
        self.range = range;
        self
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Next candidate port (not yet bound).
    pub fn next_candidate(&self) -> u16 {
        self.rng.lock().gen_range(self.range.clone())
    }

    /// Bind `host` on a candidate port using `bind`, retrying on conflicts.
    ///
    /// Returns the bound socket and the chosen port.
    pub async fn allocate<S, F, Fut>(&self, host: &str, mut bind: F) -> Result<(S, u16), SimError>
    where
        F: FnMut(SocketAddr) -> Fut,
        Fut: Future<Output = io::Result<S>>,
    {
        let mut addr = resolve(host, 0).await?;

        for attempt in 1..=self.retries {
            let port = self.next_candidate();
            addr.set_port(port);

            match bind(addr).await {
                Ok(socket) => {
                    debug!("Bound {} on attempt {}", addr, attempt);
                    return Ok((socket, port));
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    warn!("Port {} already in use, trying another...", port);
                    if attempt < self.retries {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
                Err(e) => {
                    return Err(SimError::Bind {
                        addr: addr.to_string(),
                        source: e,
                    })
                }
            }
        }

        Err(SimError::PortsExhausted {
            host: host.to_string(),
            attempts: self.retries,
        })
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve `host:port`, preferring an IPv4 address.
pub(crate) async fn resolve(host: &str, port: u16) -> Result<SocketAddr, SimError> {
    let bind_err = |source: io::Error| SimError::Bind {
        addr: format!("{host}:{port}"),
        source,
    };

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(bind_err)?
        .collect();

    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| {
            bind_err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "host resolved to no addresses",
            ))
        })
}
