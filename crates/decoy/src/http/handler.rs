//! Request handling for the HTTP listener.

use super::headers::{echoable, merge_headers, to_multimap};
use super::matcher::{normalize_uri, MatchOutcome, RuleMatcher};
use super::types::{HeaderPolicy, HttpRecord, HttpRequest, MissPolicy};
use crate::capture::{CaptureQueue, CapturedRecord, ErrorLog};
use crate::error::HandlerError;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Shared state of one HTTP listener.
pub struct HttpContext {
    pub(crate) matcher: RuleMatcher,
    pub(crate) queue: CaptureQueue<HttpRecord>,
    pub(crate) errors: ErrorLog,
    pub(crate) miss_policy: MissPolicy,
    pub(crate) header_policy: HeaderPolicy,
    /// Deadline for a complete request head on each connection
    pub(crate) read_timeout: Duration,
    pub(crate) local: SocketAddr,
}

fn not_found() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(b"Not Found")));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

fn bad_request() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(b"Bad Request")));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}

/// Answer one request from the active mode and capture it when a rule matched.
///
/// The record is pushed before the response is returned, so while the
/// capture queue is full the client does not get its response until the
/// driver pops a record.
///
/// A body that cannot be read in full is logged to the `ErrorLog` and the
/// request is not captured.
pub async fn handle_request(
    req: Request<Incoming>,
    ctx: Arc<HttpContext>,
    peer: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri = normalize_uri(target);
    let method = req.method().as_str().to_string();

    let response = match ctx.matcher.lookup(&uri, &method) {
        MatchOutcome::Matched(response) => response,
        outcome => {
            debug!("No rule for {} {} ({:?})", method, uri, outcome);
            if ctx.miss_policy == MissPolicy::Strict {
                warn!("Unmatched request {} {}", method, uri);
                ctx.errors.push(HandlerError::Unmatched { method, uri });
            }
            return Ok(not_found());
        }
    };

    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Failed to read body of {} {} from {}: {}", method, uri, peer, e);
            ctx.errors.push(HandlerError::http(peer, &e));
            return Ok(bad_request());
        }
    };

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    let mut headers = if response.echo_request_headers {
        echoable(&parts.headers)
    } else {
        hyper::HeaderMap::new()
    };
    merge_headers(&mut headers, &response.headers, ctx.header_policy);

    let mut reply = Response::new(Full::new(response.body.clone()));
    *reply.status_mut() = response.status;
    *reply.headers_mut() = headers;

    let request = HttpRequest {
        uri,
        method,
        headers: to_multimap(&parts.headers),
        body: body.to_vec(),
    };
    debug!(
        "Matched {} {} -> {}",
        request.method,
        request.uri,
        response.status.as_u16()
    );
    ctx.queue
        .push(CapturedRecord::new(peer, ctx.local, request))
        .await;

    Ok(reply)
}
