//! In-process network simulators for tests.
//!
//! Each simulator binds a real socket, answers with canned responses and
//! captures what it received so a test can assert on client behaviour:
//!
//! - `HttpServer`: rule-based HTTP responses with switchable modes
//! - `TcpServer`, `TelnetServer`: idle-timeout framed stream messages
//! - `UdpServer`: one message per datagram
//!
//! The `client` module drives traffic into any of them.

pub mod allocator;
pub mod capture;
pub mod client;
pub mod config;
pub mod error;
pub mod framer;
pub mod http;
pub mod listener;
pub mod telemetry;

pub use allocator::PortAllocator;
pub use capture::{CaptureQueue, CapturedRecord, ErrorLog, MessageRecord};
pub use config::{HttpConfig, ModeConfig, StreamConfig};
pub use error::{ConfigError, HandlerError, SimError};
pub use http::{HttpRecord, HttpRequest, HttpServer, ResponseBody, ResponseSpec, Rule};
pub use listener::{Listener, ListenerState, TcpServer, TelnetServer, UdpServer};
