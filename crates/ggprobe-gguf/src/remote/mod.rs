//! Ranged-HTTP byte source with bounded read-ahead.
//!
//! A tokio task fetches consecutive chunks into a bounded channel while the
//! decoder, running on a blocking thread, pulls them in order. Reads outside
//! the read-ahead window go straight to the server.

mod dns;
mod fetch;

use crate::error::{GgufError, Result};
use crate::file::{GgufFile, parse_source};
use crate::options::ParseOptions;
use crate::source::{ByteSource, check_range};
use dns::CachingResolver;
use fetch::{Chunk, FetchJob, RetryPolicy, fetch_range, network_error, prefetch};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(concat!("ggprobe/", env!("CARGO_PKG_VERSION")))
        .dns_resolver(Arc::new(CachingResolver))
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(network_error)
}

struct PrefetchStream {
    rx: mpsc::Receiver<Result<Chunk>>,
    /// Offset of the next chunk the task will deliver.
    next: u64,
    _stop: DropGuard,
}

/// A remote GGUF file read through HTTP range requests.
///
/// Reads block the calling thread; use it from `spawn_blocking` or a plain
/// thread, never directly inside an async task.
pub struct RemoteSource {
    job: Arc<FetchJob>,
    handle: Handle,
    cancel: CancellationToken,
    depth: usize,
    window: u64,
    current: Option<Chunk>,
    stream: Option<PrefetchStream>,
}

impl RemoteSource {
    /// Probe the file size with a first ranged request and start prefetching
    /// right after it.
    pub async fn connect(url: &str, options: &ParseOptions) -> Result<Self> {
        options.validate()?;
        let cancel = options.cancel.clone().unwrap_or_default();
        let client = http_client()?;
        let policy = RetryPolicy { retries: options.remote_retries, backoff: options.remote_backoff };
        let chunk_size = options.remote_chunk_size as u64;

        let probe = tokio::select! {
            _ = cancel.cancelled() => return Err(GgufError::Cancelled),
            r = fetch_range(&client, url, 0, chunk_size - 1, policy) => r?,
        };
        let size = match probe.total {
            Some(total) => total,
            None if (probe.data.len() as u64) < chunk_size => probe.data.len() as u64,
            None => {
                return Err(GgufError::Network {
                    retryable: false,
                    message: format!("GET {url}: server did not report the file size"),
                });
            }
        };
        info!(url, size, chunk_size, "opened remote GGUF");

        let first = Chunk { offset: 0, data: probe.data };
        let first_end = first.end();
        let job = Arc::new(FetchJob { client, url: url.to_owned(), size, chunk_size, policy });
        let mut source = Self {
            job,
            handle: Handle::current(),
            cancel,
            depth: options.prefetch_depth(),
            window: options.remote_buffer_size as u64,
            current: Some(first),
            stream: None,
        };
        source.start_stream(first_end);
        Ok(source)
    }

    fn start_stream(&mut self, offset: u64) {
        if offset >= self.job.size {
            self.stream = None;
            return;
        }
        let (tx, rx) = mpsc::channel(self.depth);
        let stop = self.cancel.child_token();
        self.handle.spawn(prefetch(self.job.clone(), offset, tx, stop.clone()));
        // Replacing the previous stream drops its guard and stops its task.
        self.stream = Some(PrefetchStream { rx, next: offset, _stop: stop.drop_guard() });
        debug!(offset, "started read-ahead");
    }

    fn in_window(&self, pos: u64) -> bool {
        self.stream.as_ref().is_some_and(|s| pos >= s.next && pos - s.next < self.window)
    }

    fn next_chunk(&mut self) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(GgufError::Cancelled);
        };
        match stream.rx.blocking_recv() {
            Some(Ok(chunk)) => {
                stream.next = chunk.end();
                self.current = Some(chunk);
                Ok(())
            }
            Some(Err(e)) => {
                self.stream = None;
                Err(e)
            }
            None => {
                self.stream = None;
                Err(if self.cancel.is_cancelled() {
                    GgufError::Cancelled
                } else {
                    GgufError::Network { retryable: false, message: "read-ahead stopped".into() }
                })
            }
        }
    }

    fn read_direct(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset + buf.len() as u64 - 1;
        let job = self.job.clone();
        let cancel = self.cancel.clone();
        let response = self.handle.block_on(async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(GgufError::Cancelled),
                r = fetch_range(&job.client, &job.url, offset, end, job.policy) => r,
            }
        })?;
        if response.data.len() != buf.len() {
            return Err(GgufError::Truncated {
                offset,
                needed: buf.len() as u64,
                size: offset + response.data.len() as u64,
            });
        }
        buf.copy_from_slice(&response.data);
        Ok(())
    }
}

impl ByteSource for RemoteSource {
    fn size(&self) -> u64 {
        self.job.size
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len() as u64, self.job.size)?;
        let mut filled = 0usize;
        while filled < buf.len() {
            if self.cancel.is_cancelled() {
                return Err(GgufError::Cancelled);
            }
            let pos = offset + filled as u64;
            if let Some(chunk) = self.current.as_ref().filter(|c| c.contains(pos)) {
                let from = (pos - chunk.offset) as usize;
                let n = (chunk.data.len() - from).min(buf.len() - filled);
                buf[filled..filled + n].copy_from_slice(&chunk.data[from..from + n]);
                filled += n;
            } else if self.in_window(pos) {
                self.next_chunk()?;
            } else {
                let end = offset + buf.len() as u64;
                debug!(pos, end, "read outside read-ahead window");
                self.read_direct(pos, &mut buf[filled..])?;
                if self.stream.as_ref().is_some_and(|s| pos > s.next) {
                    self.start_stream(end);
                }
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Decode a GGUF file served over HTTP(S) without downloading the tensor
/// payloads.
///
/// Cancelling `options.cancel`, or exceeding `options.deadline`, stops the
/// outstanding requests and yields [`GgufError::Cancelled`].
pub async fn parse_remote(url: &str, options: &ParseOptions) -> Result<GgufFile> {
    options.validate()?;
    let session = options.cancel.as_ref().map(CancellationToken::child_token).unwrap_or_default();
    let _session_guard = session.clone().drop_guard();
    if let Some(deadline) = options.deadline {
        let token = session.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => token.cancel(),
                _ = token.cancelled() => {}
            }
        });
    }

    let mut session_options = options.clone();
    session_options.cancel = Some(session.clone());
    let mut source = RemoteSource::connect(url, &session_options).await?;
    let joined =
        tokio::task::spawn_blocking(move || parse_source(&mut source, &session_options)).await;
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(GgufError::Cancelled),
    }
}
