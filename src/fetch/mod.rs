//! Bounded remote fetcher.
//!
//! Retrieves at most `byte_ceiling` bytes of a remote resource. A ranged GET
//! is tried first; when the server refuses it with a non-2xx status the
//! fetcher retries once without `Range`. Either way the body is read through
//! a byte budget and truncated at the ceiling, so memory use is bounded even
//! when a server ignores the range and streams the whole file.
//!
//! Each attempt gets its own wall-clock timeout. On expiry the in-flight
//! request is dropped and the fetch fails; no partial buffer is returned.

mod error;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use url::Url;

pub use error::{DownloadError, DownloadErrorKind};
pub use transport::{
    BodyReader, ByteRange, HttpTransport, RemoteResponse, ReqwestTransport, ResponseMeta, TransportError,
};

/// Initial read buffer; grows as chunks arrive up to the ceiling.
const INITIAL_BUFFER_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub byte_ceiling: usize,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn new(url: Url, byte_ceiling: usize, timeout: Duration) -> Result<Self, DownloadError> {
        if byte_ceiling == 0 {
            return Err(DownloadError::InvalidRequest(
                "byte ceiling must be greater than zero".to_string(),
            ));
        }
        if timeout.is_zero() {
            return Err(DownloadError::InvalidRequest(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            url,
            byte_ceiling,
            timeout,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub buffer: Vec<u8>,
    pub filename: String,
    pub total_size_known: Option<u64>,
    pub is_partial: bool,
}

impl FetchResult {
    /// Declared size of the whole resource, or the downloaded length when the
    /// server never said.
    pub fn reported_size(&self) -> u64 {
        self.total_size_known.unwrap_or(self.buffer.len() as u64)
    }
}

enum Attempt {
    Delivered(Delivery),
    Refused(ResponseMeta),
}

struct Delivery {
    meta: ResponseMeta,
    buffer: Vec<u8>,
    reached_ceiling: bool,
}

#[derive(Clone)]
pub struct BoundedFetcher {
    transport: Arc<dyn HttpTransport>,
}

impl BoundedFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, DownloadError> {
        info!(
            "Starting download from: {} (max {} bytes)",
            request.url, request.byte_ceiling
        );

        let range = ByteRange::prefix(request.byte_ceiling as u64);
        let delivery = match self.attempt(request, Some(range)).await? {
            Attempt::Delivered(delivery) => delivery,
            Attempt::Refused(meta) => {
                info!(
                    "Range request failed with HTTP {}, trying full request",
                    meta.status
                );
                match self.attempt(request, None).await? {
                    Attempt::Delivered(delivery) => delivery,
                    Attempt::Refused(meta) => {
                        return Err(DownloadError::Status {
                            status: meta.status,
                            reason: meta.reason,
                        });
                    }
                }
            }
        };

        if delivery.buffer.is_empty() {
            return Err(DownloadError::Empty);
        }

        let total_size_known = declared_total(&delivery.meta);
        let is_partial = match total_size_known {
            Some(total) => (delivery.buffer.len() as u64) < total,
            None => delivery.reached_ceiling,
        };
        let filename = delivery
            .meta
            .content_disposition
            .as_deref()
            .and_then(filename_from_disposition)
            .unwrap_or_else(|| filename_from_url(&request.url));

        info!(
            "Downloaded {} bytes of {} (total: {:?}, partial: {})",
            delivery.buffer.len(),
            filename,
            total_size_known,
            is_partial
        );

        Ok(FetchResult {
            buffer: delivery.buffer,
            filename,
            total_size_known,
            is_partial,
        })
    }

    async fn attempt(
        &self,
        request: &FetchRequest,
        range: Option<ByteRange>,
    ) -> Result<Attempt, DownloadError> {
        match tokio::time::timeout(request.timeout, self.run_attempt(request, range)).await {
            Ok(result) => result.map_err(|err| DownloadError::from_transport(err, request.timeout)),
            Err(_) => {
                info!(
                    "Download from {} timed out after {:?}",
                    request.url, request.timeout
                );
                Err(DownloadError::Timeout(request.timeout))
            }
        }
    }

    async fn run_attempt(
        &self,
        request: &FetchRequest,
        range: Option<ByteRange>,
    ) -> Result<Attempt, TransportError> {
        let RemoteResponse { meta, mut body } = self.transport.get(&request.url, range).await?;
        debug!(
            "Response status: {} (ranged: {}, content-length: {:?}, content-range: {:?})",
            meta.status,
            range.is_some(),
            meta.content_length,
            meta.content_range
        );

        if !meta.is_success() {
            return Ok(Attempt::Refused(meta));
        }

        let (buffer, reached_ceiling) = read_bounded(body.as_mut(), request.byte_ceiling).await?;
        Ok(Attempt::Delivered(Delivery {
            meta,
            buffer,
            reached_ceiling,
        }))
    }
}

/// Convenience wrapper around [`BoundedFetcher::fetch`].
pub async fn fetch_bounded(
    transport: Arc<dyn HttpTransport>,
    url: Url,
    byte_ceiling: usize,
    timeout: Duration,
) -> Result<FetchResult, DownloadError> {
    let request = FetchRequest::new(url, byte_ceiling, timeout)?;
    BoundedFetcher::new(transport).fetch(&request).await
}

/// Where `url` ends up after redirects. Every hop goes through the
/// transport's redirect policy; only a one-byte range is requested and the
/// body is never read.
pub async fn resolve_location(
    transport: &dyn HttpTransport,
    url: &Url,
    timeout: Duration,
) -> Result<Url, DownloadError> {
    let response = tokio::time::timeout(timeout, transport.get(url, Some(ByteRange::prefix(1))))
        .await
        .map_err(|_| DownloadError::Timeout(timeout))?
        .map_err(|err| DownloadError::from_transport(err, timeout))?;

    let location = response.meta.final_url.unwrap_or_else(|| url.clone());
    if location != *url {
        debug!("{} redirects to {}", url, location);
    }
    Ok(location)
}

/// Reads until the stream ends or `budget` bytes are buffered. The flag is
/// true when reading stopped at the budget, in which case bytes may remain
/// unread upstream.
async fn read_bounded(
    body: &mut dyn BodyReader,
    budget: usize,
) -> Result<(Vec<u8>, bool), TransportError> {
    let mut buffer = Vec::with_capacity(budget.min(INITIAL_BUFFER_BYTES));
    let mut remaining = budget;

    while remaining > 0 {
        let Some(chunk) = body.next_chunk().await? else {
            return Ok((buffer, false));
        };
        let take = chunk.len().min(remaining);
        buffer.extend_from_slice(&chunk[..take]);
        remaining -= take;
    }

    debug!("Download limit of {} bytes reached, stopping stream", budget);
    Ok((buffer, true))
}

/// Total resource size from `Content-Range` (`bytes a-b/total`). Only a full
/// response's `Content-Length` describes the whole resource; on a `206` it is
/// just the length of the part.
fn declared_total(meta: &ResponseMeta) -> Option<u64> {
    let from_range = meta.content_range.as_deref().and_then(total_from_content_range);
    let from_length = || {
        (meta.status != 206)
            .then_some(meta.content_length.as_deref())
            .flatten()
            .and_then(|value| value.trim().parse::<u64>().ok())
    };
    from_range.or_else(from_length).filter(|total| *total > 0)
}

fn total_from_content_range(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse::<u64>().ok()
}

/// Filename from a `Content-Disposition` header. `filename*` wins over
/// `filename`; both are URL-decoded and stripped of quotes.
fn filename_from_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for param in value.split(';') {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let raw = raw.trim().trim_matches(|c| c == '"' || c == '\'');
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                // RFC 5987: charset'language'percent-encoded
                let encoded = raw.rsplit_once('\'').map_or(raw, |(_, name)| name);
                extended = Some(encoded.to_string());
            }
            "filename" => plain = Some(raw.to_string()),
            _ => {}
        }
    }

    extended
        .or(plain)
        .map(|name| percent_decode(&name))
        .filter(|name| !name.is_empty())
}

fn filename_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(percent_decode)
        .unwrap_or_else(|| "unknown".to_string())
}

fn percent_decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const CEILING: usize = 1024;

    struct ScriptedBody {
        chunks: VecDeque<Vec<u8>>,
        stall: Option<Duration>,
    }

    #[async_trait]
    impl BodyReader for ScriptedBody {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            Ok(self.chunks.pop_front())
        }
    }

    #[derive(Clone)]
    struct Reply {
        meta: ResponseMeta,
        body: Vec<u8>,
        chunk_size: usize,
        stall: Option<Duration>,
        delay: Option<Duration>,
    }

    impl Reply {
        fn new(status: u16, body: Vec<u8>) -> Self {
            Self {
                meta: ResponseMeta {
                    status,
                    reason: "Scripted".to_string(),
                    ..Default::default()
                },
                body,
                chunk_size: 100,
                stall: None,
                delay: None,
            }
        }

        fn content_length(mut self, value: u64) -> Self {
            self.meta.content_length = Some(value.to_string());
            self
        }

        fn content_range(mut self, value: &str) -> Self {
            self.meta.content_range = Some(value.to_string());
            self
        }

        fn disposition(mut self, value: &str) -> Self {
            self.meta.content_disposition = Some(value.to_string());
            self
        }

        fn stall(mut self, delay: Duration) -> Self {
            self.stall = Some(delay);
            self
        }

        /// Delay before the status line arrives.
        fn delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn final_url(mut self, url: &str) -> Self {
            self.meta.final_url = Some(Url::parse(url).unwrap());
            self
        }
    }

    /// Serves scripted replies in order and records the ranges it saw.
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<Reply, String>>>,
        ranges: Mutex<Vec<Option<ByteRange>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<Reply, String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                ranges: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn get(&self, _url: &Url, range: Option<ByteRange>) -> Result<RemoteResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.ranges.lock().unwrap().push(range);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected request");
            let reply = reply.map_err(TransportError::Connect)?;
            if let Some(delay) = reply.delay {
                tokio::time::sleep(delay).await;
            }
            let chunks = reply
                .body
                .chunks(reply.chunk_size)
                .map(|chunk| chunk.to_vec())
                .collect();
            Ok(RemoteResponse {
                meta: reply.meta,
                body: Box::new(ScriptedBody {
                    chunks,
                    stall: reply.stall,
                }),
            })
        }
    }

    fn request(path: &str) -> FetchRequest {
        let url = Url::parse(&format!("http://example.com{path}")).unwrap();
        FetchRequest::new(url, CEILING, Duration::from_secs(5)).unwrap()
    }

    async fn run(transport: &Arc<ScriptedTransport>, path: &str) -> Result<FetchResult, DownloadError> {
        let transport: Arc<dyn HttpTransport> = transport.clone();
        BoundedFetcher::new(transport).fetch(&request(path)).await
    }

    #[tokio::test]
    async fn test_partial_content_within_ceiling() {
        let transport = ScriptedTransport::new(vec![Ok(Reply::new(206, vec![7; CEILING])
            .content_range("bytes 0-1023/50000"))]);

        let result = run(&transport, "/movie.mp4").await.unwrap();

        assert_eq!(result.buffer.len(), CEILING);
        assert_eq!(result.total_size_known, Some(50_000));
        assert!(result.is_partial);
        assert_eq!(result.filename, "movie.mp4");
        assert_eq!(
            transport.ranges.lock().unwrap().as_slice(),
            &[Some(ByteRange::prefix(CEILING as u64))]
        );
    }

    #[tokio::test]
    async fn test_range_ignored_full_body_is_truncated() {
        let transport = ScriptedTransport::new(vec![Ok(
            Reply::new(200, vec![1; CEILING * 10]).content_length((CEILING * 10) as u64)
        )]);

        let result = run(&transport, "/big.mkv").await.unwrap();

        assert_eq!(result.buffer.len(), CEILING);
        assert_eq!(result.total_size_known, Some((CEILING * 10) as u64));
        assert!(result.is_partial);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refused_range_falls_back_to_plain_get() {
        let transport = ScriptedTransport::new(vec![
            Ok(Reply::new(416, b"nope".to_vec())),
            Ok(Reply::new(200, vec![3; CEILING * 3]).content_length((CEILING * 3) as u64)),
        ]);

        let result = run(&transport, "/clip.mov").await.unwrap();

        assert_eq!(result.buffer.len(), CEILING);
        assert!(result.is_partial);
        assert_eq!(
            transport.ranges.lock().unwrap().as_slice(),
            &[Some(ByteRange::prefix(CEILING as u64)), None]
        );
    }

    #[tokio::test]
    async fn test_fallback_failure_reports_upstream_status() {
        let transport = ScriptedTransport::new(vec![
            Ok(Reply::new(500, Vec::new())),
            Ok(Reply::new(503, Vec::new())),
        ]);

        let err = run(&transport, "/clip.mov").await.unwrap_err();

        assert!(matches!(err, DownloadError::Status { status: 503, .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_small_file_is_not_partial() {
        let transport =
            ScriptedTransport::new(vec![Ok(Reply::new(200, vec![9; 300]).content_length(300))]);

        let result = run(&transport, "/small.mp3").await.unwrap();

        assert_eq!(result.buffer.len(), 300);
        assert_eq!(result.total_size_known, Some(300));
        assert!(!result.is_partial);
    }

    #[tokio::test]
    async fn test_unknown_total_is_partial_only_when_ceiling_reached() {
        let transport = ScriptedTransport::new(vec![Ok(Reply::new(200, vec![9; 300]))]);
        let result = run(&transport, "/a.mp4").await.unwrap();
        assert_eq!(result.total_size_known, None);
        assert!(!result.is_partial);

        let transport = ScriptedTransport::new(vec![Ok(Reply::new(200, vec![9; CEILING * 2]))]);
        let result = run(&transport, "/a.mp4").await.unwrap();
        assert_eq!(result.total_size_known, None);
        assert!(result.is_partial);
        assert_eq!(result.reported_size(), CEILING as u64);
    }

    #[tokio::test]
    async fn test_zero_bytes_is_an_error() {
        let transport = ScriptedTransport::new(vec![Ok(Reply::new(200, Vec::new()).content_length(0))]);

        let err = run(&transport, "/empty.mp4").await.unwrap_err();

        assert_eq!(err.kind(), DownloadErrorKind::Empty);
    }

    #[tokio::test]
    async fn test_connect_failure_is_unreachable() {
        let transport = ScriptedTransport::new(vec![Err("dns error".to_string())]);

        let err = run(&transport, "/a.mp4").await.unwrap_err();

        assert_eq!(err.kind(), DownloadErrorKind::Unreachable);
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        let transport = ScriptedTransport::new(vec![Ok(
            Reply::new(206, vec![1; CEILING]).stall(Duration::from_secs(30))
        )]);
        let url = Url::parse("http://example.com/slow.mp4").unwrap();
        let request = FetchRequest::new(url, CEILING, Duration::from_millis(50)).unwrap();

        let transport: Arc<dyn HttpTransport> = transport;
        let err = BoundedFetcher::new(transport).fetch(&request).await.unwrap_err();

        assert!(matches!(err, DownloadError::Timeout(t) if t == Duration::from_millis(50)));
    }

    fn timed_request(path: &str, timeout: Duration) -> FetchRequest {
        let url = Url::parse(&format!("http://example.com{path}")).unwrap();
        FetchRequest::new(url, CEILING, timeout).unwrap()
    }

    #[tokio::test]
    async fn test_fallback_gets_its_own_timeout() {
        let budget = Duration::from_millis(500);
        let transport = ScriptedTransport::new(vec![
            Ok(Reply::new(416, Vec::new()).delay(Duration::from_millis(300))),
            Ok(Reply::new(200, vec![5; 200])
                .content_length(200)
                .delay(Duration::from_millis(300))),
        ]);
        let started = std::time::Instant::now();

        let fetcher = BoundedFetcher::new(transport.clone());
        let result = fetcher.fetch(&timed_request("/slow.mp4", budget)).await.unwrap();

        // Together the attempts outlast one budget; each stays inside its own.
        assert!(started.elapsed() > budget);
        assert_eq!(result.buffer.len(), 200);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stalled_fallback_times_out() {
        let budget = Duration::from_millis(100);
        let transport = ScriptedTransport::new(vec![
            Ok(Reply::new(416, Vec::new())),
            Ok(Reply::new(200, vec![5; 200]).stall(Duration::from_secs(30))),
        ]);

        let fetcher = BoundedFetcher::new(transport.clone());
        let err = fetcher.fetch(&timed_request("/slow.mp4", budget)).await.unwrap_err();

        assert!(matches!(err, DownloadError::Timeout(t) if t == budget));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_range_total_uses_ceiling_rule() {
        let transport = ScriptedTransport::new(vec![Ok(Reply::new(206, vec![4; CEILING])
            .content_length(CEILING as u64)
            .content_range("bytes 0-1023/*"))]);

        let result = run(&transport, "/stream.ts").await.unwrap();

        assert_eq!(result.total_size_known, None);
        assert!(result.is_partial);
        assert_eq!(result.reported_size(), CEILING as u64);
    }

    #[tokio::test]
    async fn test_resolve_location_follows_redirects() {
        let transport = ScriptedTransport::new(vec![Ok(
            Reply::new(206, vec![0]).final_url("https://cdn.example.net/real/movie.mp4")
        )]);
        let url = Url::parse("https://example.com/movie.mp4").unwrap();

        let location = resolve_location(transport.as_ref(), &url, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(location.as_str(), "https://cdn.example.net/real/movie.mp4");
        assert_eq!(
            transport.ranges.lock().unwrap().as_slice(),
            &[Some(ByteRange::prefix(1))]
        );
    }

    #[tokio::test]
    async fn test_resolve_location_without_redirect_info_keeps_url() {
        let transport = ScriptedTransport::new(vec![Ok(Reply::new(200, vec![0]))]);
        let url = Url::parse("https://example.com/movie.mp4").unwrap();

        let location = resolve_location(transport.as_ref(), &url, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(location, url);
    }

    #[tokio::test]
    async fn test_filename_from_content_disposition() {
        let transport = ScriptedTransport::new(vec![Ok(Reply::new(200, vec![1; 10])
            .disposition("attachment; filename=\"My%20Movie.mp4\""))]);

        let result = run(&transport, "/download?id=42").await.unwrap();

        assert_eq!(result.filename, "My Movie.mp4");
    }

    #[test]
    fn test_fetch_request_rejects_zero_limits() {
        let url = Url::parse("http://example.com/a.mp4").unwrap();
        assert!(FetchRequest::new(url.clone(), 0, Duration::from_secs(1)).is_err());
        assert!(FetchRequest::new(url, 10, Duration::ZERO).is_err());
    }

    #[test]
    fn test_declared_total_prefers_content_range() {
        let meta = ResponseMeta {
            status: 206,
            content_length: Some("1024".into()),
            content_range: Some("bytes 0-1023/50000000".into()),
            ..Default::default()
        };
        assert_eq!(declared_total(&meta), Some(50_000_000));

        let meta = ResponseMeta {
            status: 206,
            content_length: Some("1024".into()),
            content_range: Some("bytes 0-1023/*".into()),
            ..Default::default()
        };
        assert_eq!(declared_total(&meta), None);

        let meta = ResponseMeta {
            status: 206,
            content_length: Some("1024".into()),
            ..Default::default()
        };
        assert_eq!(declared_total(&meta), None);

        let meta = ResponseMeta {
            status: 200,
            content_length: Some("4096".into()),
            ..Default::default()
        };
        assert_eq!(declared_total(&meta), Some(4096));
    }

    #[test]
    fn test_filename_parsing() {
        assert_eq!(
            filename_from_disposition("attachment; filename*=UTF-8''caf%C3%A9.mkv"),
            Some("café.mkv".to_string())
        );
        assert_eq!(
            filename_from_disposition("inline; filename=clip.webm; size=10"),
            Some("clip.webm".to_string())
        );
        assert_eq!(filename_from_disposition("inline"), None);

        let url = Url::parse("https://example.com/videos/summer%20trip.mp4").unwrap();
        assert_eq!(filename_from_url(&url), "summer trip.mp4");
        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(filename_from_url(&url), "unknown");
    }
}
