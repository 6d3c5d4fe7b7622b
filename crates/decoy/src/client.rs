//! Driver-side helpers that push traffic into the listeners.
//!
//! Failures here are test failures, so everything returns `anyhow::Result`
//! with context attached.

use crate::http::{HeaderMultimap, HttpServer};
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderName, HeaderValue};
use std::borrow::Cow;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

/// Pause after every write so consecutive writes reach the listener as separate reads.
pub const PAUSE_BETWEEN_WRITES: Duration = Duration::from_millis(10);

pub const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

fn trim_nulls(data: &[u8]) -> Cow<'_, str> {
    let start = data.iter().position(|&b| b != 0).unwrap_or(data.len());
    let end = data.iter().rposition(|&b| b != 0).map_or(start, |last| last + 1);
    String::from_utf8_lossy(&data[start..end])
}

/// A TCP or telnet connection with a deadline applied to every operation.
pub struct StreamClient {
    stream: TcpStream,
    deadline: Duration,
}

impl StreamClient {
    async fn connect(host: &str, port: u16, deadline: Duration) -> Result<Self> {
        let stream = timeout(deadline, TcpStream::connect((host, port)))
            .await
            .map_err(|_| anyhow!("connect to {host}:{port} timed out after {deadline:?}"))?
            .with_context(|| format!("Failed to connect to {host}:{port}"))?;
        Ok(Self { stream, deadline })
    }

    /// Write `payload`, then optionally close the write half.
    ///
    /// Returns the time the write completed so tests can re-order records
    /// produced by concurrent clients.
    pub async fn write(&mut self, payload: &[u8], close_after: bool) -> Result<DateTime<Utc>> {
        timeout(self.deadline, self.stream.write_all(payload))
            .await
            .map_err(|_| anyhow!("write timed out after {:?}", self.deadline))?
            .context("Failed to write payload")?;
        let written_at = Utc::now();

        tokio::time::sleep(PAUSE_BETWEEN_WRITES).await;

        if close_after {
            self.stream
                .shutdown()
                .await
                .context("Failed to close connection")?;
        }
        Ok(written_at)
    }

    /// One read of at most `buffer_size` bytes, NUL padding trimmed.
    pub async fn read(&mut self, buffer_size: usize) -> Result<String> {
        let mut buf = vec![0u8; buffer_size];
        let n = timeout(self.deadline, self.stream.read(&mut buf))
            .await
            .map_err(|_| anyhow!("read timed out after {:?}", self.deadline))?
            .context("Failed to read response")?;
        Ok(trim_nulls(&buf[..n]).into_owned())
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.stream.local_addr()?)
    }
}

pub async fn connect_tcp(host: &str, port: u16, deadline: Duration) -> Result<StreamClient> {
    StreamClient::connect(host, port, deadline).await
}

/// Telnet shares the TCP wire behaviour.
pub async fn connect_telnet(host: &str, port: u16, deadline: Duration) -> Result<StreamClient> {
    StreamClient::connect(host, port, deadline).await
}

/// A connected UDP socket with a deadline applied to every operation.
pub struct UdpClient {
    socket: UdpSocket,
    deadline: Duration,
}

impl UdpClient {
    pub async fn write(&self, payload: &[u8]) -> Result<DateTime<Utc>> {
        timeout(self.deadline, self.socket.send(payload))
            .await
            .map_err(|_| anyhow!("send timed out after {:?}", self.deadline))?
            .context("Failed to send datagram")?;
        let sent_at = Utc::now();
        tokio::time::sleep(PAUSE_BETWEEN_WRITES).await;
        Ok(sent_at)
    }

    pub async fn read(&self, buffer_size: usize) -> Result<String> {
        let mut buf = vec![0u8; buffer_size];
        let n = timeout(self.deadline, self.socket.recv(&mut buf))
            .await
            .map_err(|_| anyhow!("receive timed out after {:?}", self.deadline))?
            .context("Failed to receive datagram")?;
        Ok(trim_nulls(&buf[..n]).into_owned())
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

pub async fn connect_udp(host: &str, port: u16, deadline: Duration) -> Result<UdpClient> {
    let target = tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("Failed to resolve {host}:{port}"))?
        .next()
        .ok_or_else(|| anyhow!("{host}:{port} resolved to no address"))?;
    let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr)
        .await
        .context("Failed to bind UDP client socket")?;
    socket
        .connect(target)
        .await
        .with_context(|| format!("Failed to connect UDP socket to {target}"))?;
    Ok(UdpClient { socket, deadline })
}

/// An HTTP request issued by the driver.
#[derive(Debug, Clone, Default)]
pub struct ClientRequest {
    pub uri: String,
    pub method: String,
    pub body: Vec<u8>,
    pub headers: HeaderMultimap,
}

impl ClientRequest {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new("GET", uri)
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }
}

/// Parsed response returned to the driver.
#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub status: u16,
    pub headers: HeaderMultimap,
    pub body: Bytes,
}

impl ClientResponse {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Every value of a header, in received order.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|values| values.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// Issue `request` against `http://host:port`, skipping certificate verification.
pub async fn do_request(host: &str, port: u16, request: &ClientRequest) -> Result<ClientResponse> {
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(HTTP_CLIENT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")?;

    let url = format!("http://{}:{}/{}", host, port, request.uri.trim_start_matches('/'));
    let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method {}", request.method))?;

    let mut builder = client.request(method, &url).body(request.body.clone());
    for (name, values) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("Invalid header name {name}"))?;
        for value in values {
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for header {name}"))?;
            builder = builder.header(name.clone(), value);
        }
    }

    debug!("Sending {} {}", request.method, url);
    let response = builder
        .send()
        .await
        .with_context(|| format!("Request to {url} failed"))?;

    let status = response.status().as_u16();
    let mut headers = HeaderMultimap::new();
    for (name, value) in response.headers() {
        headers
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    let body = response
        .bytes()
        .await
        .with_context(|| format!("Failed to read body from {url}"))?;

    Ok(ClientResponse {
        status,
        headers,
        body,
    })
}

impl HttpServer {
    /// `do_request` against this listener's bound address.
    pub async fn do_request(&self, request: &ClientRequest) -> Result<ClientResponse> {
        let addr = self.local_addr();
        do_request(&addr.ip().to_string(), addr.port(), request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_nulls_both_ends() {
        assert_eq!(trim_nulls(b"\0\0ok\0"), "ok");
        assert_eq!(trim_nulls(b"\0\0"), "");
        assert_eq!(trim_nulls(b"a\0b"), "a\0b");
    }

    #[test]
    fn test_client_request_builder() {
        let request = ClientRequest::new("post", "/items")
            .with_body("payload")
            .with_header("x-id", "1")
            .with_header("x-id", "2");
        assert_eq!(request.method, "post");
        assert_eq!(request.body, b"payload");
        assert_eq!(request.headers["x-id"], vec!["1", "2"]);
    }

    #[test]
    fn test_client_response_header_lookup() {
        let mut headers = HeaderMultimap::new();
        headers.insert(
            "x-env".to_string(),
            vec!["a".to_string(), "b".to_string()],
        );
        let response = ClientResponse {
            status: 200,
            headers,
            body: Bytes::from_static(b"done"),
        };
        assert_eq!(response.header_values("X-Env"), vec!["a", "b"]);
        assert!(response.header_values("missing").is_empty());
        assert_eq!(response.text(), "done");
    }
}
