//! Ranged GET requests and the read-ahead task.

use crate::error::{GgufError, Result};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode, header};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// A contiguous piece of the remote file.
#[derive(Debug, Clone)]
pub(crate) struct Chunk {
    pub offset: u64,
    pub data: Bytes,
}

impl Chunk {
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }

    pub fn contains(&self, pos: u64) -> bool {
        pos >= self.offset && pos < self.end()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

/// Everything a ranged read needs, shared between the decoder side and the
/// prefetch task.
#[derive(Debug)]
pub(crate) struct FetchJob {
    pub client: Client,
    pub url: String,
    pub size: u64,
    pub chunk_size: u64,
    pub policy: RetryPolicy,
}

pub(crate) struct RangeResponse {
    pub data: Bytes,
    /// Full size of the remote file, when the server reported it.
    pub total: Option<u64>,
}

pub(crate) fn network_error(e: reqwest::Error) -> GgufError {
    let retryable = e.is_timeout() || e.is_connect() || e.is_request() || e.is_body();
    GgufError::Network { retryable, message: e.to_string() }
}

fn status_error(status: StatusCode, url: &str) -> GgufError {
    let retryable = status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT;
    GgufError::Network { retryable, message: format!("GET {url}: HTTP {status}") }
}

/// Total length from a `Content-Range` value such as `bytes 0-99/1234`.
pub(crate) fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

fn response_total(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(content_range_total)
}

/// Read at most `want` body bytes after dropping the first `skip`.
async fn collect_body(response: Response, mut skip: u64, want: u64) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(want.min(16 << 20) as usize);
    let mut stream = response.bytes_stream();
    while let Some(piece) = stream.next().await {
        let mut piece = piece.map_err(network_error)?;
        if skip > 0 {
            let n = skip.min(piece.len() as u64);
            piece = piece.slice(n as usize..);
            skip -= n;
        }
        let room = (want - buf.len() as u64) as usize;
        buf.extend_from_slice(&piece[..piece.len().min(room)]);
        if buf.len() as u64 >= want {
            break;
        }
    }
    Ok(buf.freeze())
}

/// One GET for the inclusive byte range `[start, end]`.
async fn fetch_range_once(client: &Client, url: &str, start: u64, end: u64) -> Result<RangeResponse> {
    let response = client
        .get(url)
        .header(header::RANGE, format!("bytes={start}-{end}"))
        .send()
        .await
        .map_err(network_error)?;
    let want = end - start + 1;
    match response.status() {
        StatusCode::PARTIAL_CONTENT => {
            let total = response_total(&response);
            Ok(RangeResponse { data: collect_body(response, 0, want).await?, total })
        }
        StatusCode::OK => {
            // Range ignored: the body is the whole file.
            let total = response.content_length();
            Ok(RangeResponse { data: collect_body(response, start, want).await?, total })
        }
        StatusCode::RANGE_NOT_SATISFIABLE => {
            Ok(RangeResponse { data: Bytes::new(), total: response_total(&response) })
        }
        status => Err(status_error(status, url)),
    }
}

/// Ranged GET with bounded exponential backoff on retryable failures.
pub(crate) async fn fetch_range(
    client: &Client,
    url: &str,
    start: u64,
    end: u64,
    policy: RetryPolicy,
) -> Result<RangeResponse> {
    let mut attempt = 0u32;
    loop {
        match fetch_range_once(client, url, start, end).await {
            Err(e) if e.is_retryable() && attempt < policy.retries => {
                let delay = policy.backoff.saturating_mul(1 << attempt.min(16));
                warn!(error = %e, attempt = attempt + 1, ?delay, start, "retrying ranged read");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Fetch consecutive chunks from `offset` to the end of the file.
///
/// `send` blocks once the channel is full, which bounds the read-ahead.
/// Stops at end of file, on the first error (after forwarding it), when the
/// receiver is dropped, or when `cancel` fires.
pub(crate) async fn prefetch(
    job: std::sync::Arc<FetchJob>,
    mut offset: u64,
    tx: mpsc::Sender<Result<Chunk>>,
    cancel: CancellationToken,
) {
    while offset < job.size {
        let end = (offset + job.chunk_size).min(job.size) - 1;
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return,
            r = fetch_range(&job.client, &job.url, offset, end, job.policy) => r,
        };
        let chunk = match fetched {
            Ok(r) if r.data.is_empty() => {
                Err(GgufError::Truncated { offset, needed: end - offset + 1, size: job.size })
            }
            Ok(r) => Ok(Chunk { offset, data: r.data }),
            Err(e) => Err(e),
        };
        let next = chunk.as_ref().ok().map(Chunk::end);
        trace!(offset, ?next, "prefetched chunk");
        let sent = tokio::select! {
            _ = cancel.cancelled() => return,
            r = tx.send(chunk) => r,
        };
        match (sent, next) {
            (Ok(()), Some(n)) => offset = n,
            _ => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_range_total() {
        assert_eq!(content_range_total("bytes 0-99/1234"), Some(1234));
        assert_eq!(content_range_total("bytes */42"), Some(42));
        assert_eq!(content_range_total("bytes 0-99/*"), None);
        assert_eq!(content_range_total("garbage"), None);
    }

    #[test]
    fn chunk_bounds() {
        let c = Chunk { offset: 10, data: Bytes::from_static(b"abcd") };
        assert_eq!(c.end(), 14);
        assert!(c.contains(10) && c.contains(13));
        assert!(!c.contains(9) && !c.contains(14));
    }

    #[test]
    fn status_classification() {
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "u").is_retryable());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "u").is_retryable());
        assert!(!status_error(StatusCode::NOT_FOUND, "u").is_retryable());
        assert!(!status_error(StatusCode::FORBIDDEN, "u").is_retryable());
    }
}
