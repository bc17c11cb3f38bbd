//! HTTP byte-range source with a bounded prefetch window.
//!
//! The transport (probe + range fetch) is a trait so the window logic is
//! testable without a network; [`HttpTransport`] is the reqwest-backed
//! implementation used in production. At most one fetch is in flight per
//! source and nothing is prefetched beyond the window tail. Dropping the
//! future of an in-flight read aborts the underlying HTTP request;
//! a partially filled window is discarded on the next read.

use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use bytes::Bytes;
use reqwest::{header, Client, StatusCode, Url};
use tracing::{debug, warn};

use super::{ByteSource, ReaderError};

/// Default window capacity: large enough to cover the header, metadata
/// and tensor directory of most files in one or two fetches.
pub const DEFAULT_WINDOW_CAPACITY: usize = 4 * 1024 * 1024;

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(5);

/// What the startup probe learned about the endpoint.
#[derive(Debug, Clone, Copy)]
pub struct RemoteInfo {
    pub len: u64,
    pub accepts_ranges: bool,
}

/// Minimal contract a remote endpoint must satisfy.
#[async_trait]
pub trait RangeTransport: Send + Sync {
    /// Discover total length and whether byte ranges are honored.
    async fn probe(&self) -> Result<RemoteInfo, ReaderError>;

    /// Fetch `[start, start + len)`. May return fewer bytes at end of
    /// data; never more than requested.
    async fn fetch(&self, start: u64, len: u64) -> Result<Bytes, ReaderError>;
}

/// Byte-range transport over HTTP, shared-client reqwest.
pub struct HttpTransport {
    client: Client,
    url: Url,
    token: Option<String>,
    skip_range_probe: bool,
}

impl HttpTransport {
    pub fn new(client: Client, url: Url) -> Self {
        Self {
            client,
            url,
            token: None,
            skip_range_probe: false,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Trust that the endpoint honors ranges instead of probing with HEAD.
    pub fn skip_range_probe(mut self, skip: bool) -> Self {
        self.skip_range_probe = skip;
        self
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let rb = self.client.request(method, self.url.clone());
        match &self.token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    /// Probe with a one-byte ranged GET: proves range support and yields
    /// the total length from `Content-Range: bytes 0-0/<total>`.
    async fn probe_ranged_get(&self) -> Result<RemoteInfo, ReaderError> {
        let resp = send_with_retry(|| {
            self.request(reqwest::Method::GET)
                .header(header::RANGE, "bytes=0-0")
        })
        .await?;

        match resp.status() {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK => return Err(ReaderError::RangeNotSupported),
            status => return Err(ReaderError::HttpStatus(status.as_u16())),
        }

        let total = resp
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit('/').next())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or(ReaderError::RangeNotSupported)?;

        Ok(RemoteInfo {
            len: total,
            accepts_ranges: true,
        })
    }
}

#[async_trait]
impl RangeTransport for HttpTransport {
    async fn probe(&self) -> Result<RemoteInfo, ReaderError> {
        if self.skip_range_probe {
            return self.probe_ranged_get().await;
        }

        let head = send_with_retry(|| self.request(reqwest::Method::HEAD)).await;
        match head {
            Ok(resp) if resp.status().is_success() => {
                let accepts = resp
                    .headers()
                    .get(header::ACCEPT_RANGES)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
                let len = resp
                    .headers()
                    .get(header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                if let (true, Some(len)) = (accepts, len) {
                    debug!(len, "HEAD probe: byte ranges advertised");
                    return Ok(RemoteInfo {
                        len,
                        accepts_ranges: true,
                    });
                }
                // HEAD answered but did not advertise ranges; some CDNs
                // only reveal support on an actual ranged request.
                self.probe_ranged_get().await
            }
            // HEAD unsupported or rejected: fall through to a ranged GET.
            _ => self.probe_ranged_get().await,
        }
    }

    async fn fetch(&self, start: u64, len: u64) -> Result<Bytes, ReaderError> {
        let end = start + len - 1;
        let resp = send_with_retry(|| {
            self.request(reqwest::Method::GET)
                .header(header::RANGE, format!("bytes={start}-{end}"))
        })
        .await?;

        match resp.status() {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK => return Err(ReaderError::RangeNotSupported),
            StatusCode::RANGE_NOT_SATISFIABLE => {
                return Err(ReaderError::UnexpectedEof(start));
            }
            status => return Err(ReaderError::HttpStatus(status.as_u16())),
        }

        let body = resp.bytes().await?;
        debug!(start, len, got = body.len(), "Range fetch");
        Ok(body)
    }
}

/// Issue a request, retrying transport failures, 5xx and 429 with capped
/// exponential backoff (jittered), honoring `Retry-After` when present.
async fn send_with_retry<F>(make: F) -> Result<reqwest::Response, ReaderError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(BACKOFF_BASE)
        .with_max_interval(BACKOFF_CAP)
        .with_max_elapsed_time(None)
        .build();

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match make().send().await {
            Ok(resp) => {
                let status = resp.status();
                let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                if !retryable {
                    return Ok(resp);
                }
                if attempt >= MAX_ATTEMPTS {
                    return Err(ReaderError::HttpStatus(status.as_u16()));
                }
                let delay = retry_after(&resp)
                    .or_else(|| policy.next_backoff())
                    .unwrap_or(BACKOFF_CAP);
                warn!(status = status.as_u16(), attempt, ?delay, "Retrying request");
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if attempt >= MAX_ATTEMPTS || err.is_builder() || err.is_redirect() {
                    return Err(err.into());
                }
                let delay = policy.next_backoff().unwrap_or(BACKOFF_CAP);
                warn!(error = %err, attempt, ?delay, "Retrying after transport error");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Remote source: serves reads out of a single bounded window, refilling
/// it with one range fetch on a miss.
pub struct RemoteSource<T: RangeTransport> {
    transport: T,
    len: u64,
    capacity: usize,
    window_start: u64,
    window: Bytes,
}

impl<T: RangeTransport> RemoteSource<T> {
    pub async fn new(transport: T) -> Result<Self, ReaderError> {
        Self::with_capacity(transport, DEFAULT_WINDOW_CAPACITY).await
    }

    pub async fn with_capacity(transport: T, capacity: usize) -> Result<Self, ReaderError> {
        let info = transport.probe().await?;
        if !info.accepts_ranges {
            return Err(ReaderError::RangeNotSupported);
        }
        Ok(Self {
            transport,
            len: info.len,
            capacity: capacity.max(1),
            window_start: 0,
            window: Bytes::new(),
        })
    }

    fn window_end(&self) -> u64 {
        self.window_start + self.window.len() as u64
    }
}

#[async_trait]
impl<T: RangeTransport> ByteSource for RemoteSource<T> {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, ReaderError> {
        if offset >= self.len {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.len - offset) as usize;
        if want == 0 {
            return Ok(0);
        }

        let hit = offset >= self.window_start && offset + want as u64 <= self.window_end();
        if !hit {
            let in_reach = offset >= self.window_start
                && offset <= self.window_start + self.capacity as u64;
            let fill = if in_reach {
                // Forward miss within reach: refill a full window so the
                // sequential parse keeps hitting.
                (want as u64).max(self.capacity as u64).min(self.len - offset)
            } else {
                // Backward seek or far jump: targeted fetch, request-sized.
                want as u64
            };
            self.window = self.transport.fetch(offset, fill).await?;
            self.window_start = offset;
            if (self.window.len() as u64) < want as u64 {
                return Err(ReaderError::UnexpectedEof(offset + self.window.len() as u64));
            }
        }

        let skip = (offset - self.window_start) as usize;
        buf[..want].copy_from_slice(&self.window[skip..skip + want]);
        Ok(want)
    }
}
