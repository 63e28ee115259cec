use std::time::Duration;

use thiserror::Error;

use super::transport::TransportError;

/// Coarse classification of a [`DownloadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadErrorKind {
    InvalidRequest,
    Timeout,
    Unreachable,
    Status,
    Empty,
    RedirectBlocked,
    Network,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Invalid fetch request: {0}")]
    InvalidRequest(String),
    #[error(
        "Download timed out after {} - file may be too large or connection too slow",
        describe_timeout(.0)
    )]
    Timeout(Duration),
    #[error("Unable to connect to the URL: {0}")]
    Unreachable(String),
    #[error("Download failed: HTTP {status}: {reason}")]
    Status { status: u16, reason: String },
    #[error("Download failed: No data received from the URL")]
    Empty,
    #[error("Download failed: redirect target is not allowed")]
    RedirectBlocked,
    #[error("Download failed: {0}")]
    Network(String),
}

impl DownloadError {
    pub fn kind(&self) -> DownloadErrorKind {
        match self {
            Self::InvalidRequest(_) => DownloadErrorKind::InvalidRequest,
            Self::Timeout(_) => DownloadErrorKind::Timeout,
            Self::Unreachable(_) => DownloadErrorKind::Unreachable,
            Self::Status { .. } => DownloadErrorKind::Status,
            Self::Empty => DownloadErrorKind::Empty,
            Self::RedirectBlocked => DownloadErrorKind::RedirectBlocked,
            Self::Network(_) => DownloadErrorKind::Network,
        }
    }

    /// Maps a transport failure, attributing transport-level timeouts to the
    /// configured attempt budget.
    pub(crate) fn from_transport(err: TransportError, timeout: Duration) -> Self {
        match err {
            TransportError::Connect(message) => Self::Unreachable(message),
            TransportError::Timeout => Self::Timeout(timeout),
            TransportError::RedirectBlocked(_) => Self::RedirectBlocked,
            TransportError::Other(message) => Self::Network(message),
        }
    }
}

fn describe_timeout(timeout: &Duration) -> String {
    let millis = timeout.as_millis();
    if millis % 1000 == 0 {
        format!("{} seconds", millis / 1000)
    } else {
        format!("{millis} ms")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_names_budget() {
        let err = DownloadError::Timeout(Duration::from_secs(45));
        assert_eq!(
            err.to_string(),
            "Download timed out after 45 seconds - file may be too large or connection too slow"
        );
        let err = DownloadError::Timeout(Duration::from_millis(250));
        assert!(err.to_string().contains("250 ms"));
    }

    #[test]
    fn test_status_message_includes_upstream_status() {
        let err = DownloadError::Status {
            status: 503,
            reason: "Service Unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "Download failed: HTTP 503: Service Unavailable");
        assert_eq!(err.kind(), DownloadErrorKind::Status);
    }

    #[test]
    fn test_transport_mapping() {
        let timeout = Duration::from_secs(3);
        assert_eq!(
            DownloadError::from_transport(TransportError::Connect("refused".into()), timeout).kind(),
            DownloadErrorKind::Unreachable
        );
        assert!(matches!(
            DownloadError::from_transport(TransportError::Timeout, timeout),
            DownloadError::Timeout(t) if t == timeout
        ));
        assert_eq!(
            DownloadError::from_transport(TransportError::RedirectBlocked("x".into()), timeout).kind(),
            DownloadErrorKind::RedirectBlocked
        );
        assert_eq!(
            DownloadError::from_transport(TransportError::Other("reset".into()), timeout).kind(),
            DownloadErrorKind::Network
        );
    }
}
