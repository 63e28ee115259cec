//! HTTP transport seam for the bounded fetcher.
//!
//! The fetcher only needs a status line, a few headers and a pull-based body,
//! so the trait exposes exactly that. `ReqwestTransport` is the production
//! implementation; tests substitute scripted transports.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::redirect::Policy;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::admission;

/// Inclusive byte range sent as a `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end_inclusive: u64,
}

impl ByteRange {
    /// The first `len` bytes of a resource. `len` must be positive.
    pub fn prefix(len: u64) -> Self {
        Self {
            start: 0,
            end_inclusive: len.saturating_sub(1),
        }
    }

    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end_inclusive)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("redirect refused: {0}")]
    RedirectBlocked(String),
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        // Connect timeouts report both flags; they belong to the host, not the download.
        if err.is_redirect() {
            Self::RedirectBlocked(err.to_string())
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Other(err.to_string())
        }
    }
}

/// Response headers the fetcher cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: u16,
    pub reason: String,
    pub content_length: Option<String>,
    pub content_range: Option<String>,
    pub content_disposition: Option<String>,
    pub accept_ranges: Option<String>,
    /// Where the response came from after redirects, when the transport knows.
    pub final_url: Option<Url>,
}

impl ResponseMeta {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Pull-based response body.
#[async_trait]
pub trait BodyReader: Send {
    /// Next chunk of the body, `None` once the stream has ended.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

pub struct RemoteResponse {
    pub meta: ResponseMeta,
    pub body: Box<dyn BodyReader>,
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &Url, range: Option<ByteRange>) -> Result<RemoteResponse, TransportError>;
}

/// `reqwest`-backed transport.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Builds a client whose redirect hops are re-checked by the admission
    /// guard. `max_redirects == 0` disables redirects entirely.
    pub fn new(user_agent: &str, max_redirects: usize) -> Result<Self, TransportError> {
        let policy = Policy::custom(move |attempt| {
            if attempt.previous().len() > max_redirects {
                return attempt.error(format!("more than {max_redirects} redirects"));
            }
            let verdict = admission::admit_parsed(attempt.url());
            if verdict.allowed {
                attempt.follow()
            } else {
                attempt.error("redirect target is not allowed")
            }
        });

        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(policy)
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|err| TransportError::Other(format!("Failed to create HTTP client: {err}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &Url, range: Option<ByteRange>) -> Result<RemoteResponse, TransportError> {
        let mut request = self.client.get(url.clone());
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }

        let response = request.send().await?;
        let status = response.status();
        let meta = ResponseMeta {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            content_length: header_string(response.headers(), CONTENT_LENGTH.as_str()),
            content_range: header_string(response.headers(), CONTENT_RANGE.as_str()),
            content_disposition: header_string(response.headers(), CONTENT_DISPOSITION.as_str()),
            accept_ranges: header_string(response.headers(), ACCEPT_RANGES.as_str()),
            final_url: Some(response.url().clone()),
        };
        debug!(
            "GET {} -> {} (content-length: {:?}, accept-ranges: {:?})",
            url, meta.status, meta.content_length, meta.accept_ranges
        );

        Ok(RemoteResponse {
            meta,
            body: Box::new(ReqwestBody { response }),
        })
    }
}

struct ReqwestBody {
    response: reqwest::Response,
}

#[async_trait]
impl BodyReader for ReqwestBody {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let chunk = self.response.chunk().await?;
        Ok(chunk.map(|bytes| bytes.to_vec()))
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
}
