//! Listener configuration.
//!
//! Both configs deserialize from YAML or JSON fixtures (camelCase keys,
//! durations in milliseconds) and can also be built in code.

use crate::error::ConfigError;
use crate::http::{HeaderPolicy, MissPolicy, Rule};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_CAPACITY: usize = 100;
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_HTTP_READ_TIMEOUT: Duration = Duration::from_secs(10);

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

fn default_read_timeout() -> Duration {
    DEFAULT_READ_TIMEOUT
}

fn default_write_timeout() -> Duration {
    DEFAULT_WRITE_TIMEOUT
}

fn default_http_read_timeout() -> Duration {
    DEFAULT_HTTP_READ_TIMEOUT
}

/// Configuration shared by the TCP, telnet and UDP listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Capture queue capacity
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Idle gap that ends a framed message
    #[serde(
        default = "default_read_timeout",
        rename = "readTimeoutMs",
        with = "duration_ms"
    )]
    pub read_timeout: Duration,
    #[serde(
        default = "default_write_timeout",
        rename = "writeTimeoutMs",
        with = "duration_ms"
    )]
    pub write_timeout: Duration,
    /// Canned response written back to every connection or datagram
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default)]
    pub autostart: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            capacity: DEFAULT_CAPACITY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            response: None,
            autostart: false,
        }
    }
}

impl StreamConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    /// The canned response, if one is configured and non-empty.
    pub fn canned_response(&self) -> Option<&[u8]> {
        self.response
            .as_deref()
            .filter(|r| !r.is_empty())
            .map(str::as_bytes)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        Ok(())
    }
}

/// A named, swappable set of HTTP rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeConfig {
    pub name: String,
    pub rules: Vec<Rule>,
}

impl ModeConfig {
    pub fn new(name: impl Into<String>, rules: Vec<Rule>) -> Self {
        Self {
            name: name.into(),
            rules,
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Fixed port; 0 lets the OS choose
    #[serde(default)]
    pub port: u16,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    pub modes: Vec<ModeConfig>,
    /// Mode active at startup; the first declared mode when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_mode: Option<String>,
    #[serde(default)]
    pub miss_policy: MissPolicy,
    #[serde(default)]
    pub header_policy: HeaderPolicy,
    /// Deadline for a connection to deliver a complete request head
    #[serde(
        default = "default_http_read_timeout",
        rename = "readTimeoutMs",
        with = "duration_ms"
    )]
    pub read_timeout: Duration,
}

impl HttpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            capacity: DEFAULT_CAPACITY,
            modes: Vec::new(),
            initial_mode: None,
            miss_policy: MissPolicy::default(),
            header_policy: HeaderPolicy::default(),
            read_timeout: DEFAULT_HTTP_READ_TIMEOUT,
        }
    }

    pub fn with_mode(mut self, name: impl Into<String>, rules: Vec<Rule>) -> Self {
        self.modes.push(ModeConfig::new(name, rules));
        self
    }

    pub fn with_initial_mode(mut self, name: impl Into<String>) -> Self {
        self.initial_mode = Some(name.into());
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_miss_policy(mut self, policy: MissPolicy) -> Self {
        self.miss_policy = policy;
        self
    }

    pub fn with_header_policy(mut self, policy: HeaderPolicy) -> Self {
        self.header_policy = policy;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_json_str(source: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Checks that do not need the rules compiled. Rule-level checks happen
    /// when the matcher is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.modes.is_empty() {
            return Err(ConfigError::NoModes);
        }
        for (i, mode) in self.modes.iter().enumerate() {
            if mode.rules.is_empty() {
                return Err(ConfigError::EmptyMode(mode.name.clone()));
            }
            if self.modes[..i].iter().any(|m| m.name == mode.name) {
                return Err(ConfigError::DuplicateMode(mode.name.clone()));
            }
        }
        if let Some(initial) = &self.initial_mode {
            if !self.modes.iter().any(|m| &m.name == initial) {
                return Err(ConfigError::UnknownMode(initial.clone()));
            }
        }
        Ok(())
    }
}

/// (De)serialize a `Duration` as whole milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
