//! URL admission guard.
//!
//! Decides whether a caller-supplied URL may be fetched by the service. The
//! check runs before any socket is opened and only looks at the URL itself:
//! the scheme must be `http`/`https`, and the host must not be a loopback,
//! private, link-local or unspecified address literal, nor `localhost`.
//!
//! Hostnames are never resolved. A public name whose DNS record points at a
//! private address passes this guard.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use url::{Host, Url};

/// Why a URL was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenyReason {
    InvalidUrl,
    Localhost,
    Loopback,
    Private,
    LinkLocal,
    Unspecified,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid-url",
            Self::Localhost => "localhost",
            Self::Loopback => "loopback",
            Self::Private => "private",
            Self::LinkLocal => "link-local",
            Self::Unspecified => "unspecified",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionVerdict {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
}

impl AdmissionVerdict {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Rejection returned by [`admit_url`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Invalid URL")]
    InvalidUrl,
    /// The matched rule is kept for logs only; callers must not echo it.
    #[error("URL is not allowed")]
    Forbidden(DenyReason),
}

/// Classifies a raw URL string.
pub fn admit(raw_url: &str) -> AdmissionVerdict {
    match Url::parse(raw_url.trim()) {
        Ok(url) => admit_parsed(&url),
        Err(_) => AdmissionVerdict::deny(DenyReason::InvalidUrl),
    }
}

/// Classifies an already parsed URL. Used for redirect hops as well.
pub fn admit_parsed(url: &Url) -> AdmissionVerdict {
    if !matches!(url.scheme(), "http" | "https") {
        return AdmissionVerdict::deny(DenyReason::InvalidUrl);
    }

    let verdict = match url.host() {
        None => AdmissionVerdict::deny(DenyReason::InvalidUrl),
        Some(Host::Ipv4(addr)) => classify_ip(IpAddr::V4(addr)),
        Some(Host::Ipv6(addr)) => classify_ip(IpAddr::V6(addr)),
        Some(Host::Domain(domain)) => classify_domain(domain),
    };

    if let Some(reason) = verdict.reason {
        debug!("Refusing URL host {:?}: {}", url.host_str(), reason);
    }
    verdict
}

/// Parses and admits in one step, handing back the parsed URL on success.
pub fn admit_url(raw_url: &str) -> Result<Url, AdmissionError> {
    let url = Url::parse(raw_url.trim()).map_err(|_| AdmissionError::InvalidUrl)?;
    match admit_parsed(&url).reason {
        None => Ok(url),
        Some(DenyReason::InvalidUrl) => Err(AdmissionError::InvalidUrl),
        Some(reason) => Err(AdmissionError::Forbidden(reason)),
    }
}

fn classify_domain(domain: &str) -> AdmissionVerdict {
    let name = domain.trim_end_matches('.').to_ascii_lowercase();

    if name == "localhost" || name.ends_with(".localhost") {
        return AdmissionVerdict::deny(DenyReason::Localhost);
    }

    // Non-special schemes never reach here, but bracket-less IPv6 or odd
    // literals that slipped through as domains still get the numeric test.
    let literal = name.trim_start_matches('[').trim_end_matches(']');
    match literal.parse::<IpAddr>() {
        Ok(addr) => classify_ip(addr),
        Err(_) => AdmissionVerdict::allow(),
    }
}

fn classify_ip(addr: IpAddr) -> AdmissionVerdict {
    match addr {
        IpAddr::V4(v4) => classify_v4(v4),
        IpAddr::V6(v6) => classify_v6(v6),
    }
}

fn classify_v4(addr: Ipv4Addr) -> AdmissionVerdict {
    let [first, second, _, _] = addr.octets();
    let reason = match (first, second) {
        (127, _) => Some(DenyReason::Loopback),
        (10, _) => Some(DenyReason::Private),
        (172, 16..=31) => Some(DenyReason::Private),
        (192, 168) => Some(DenyReason::Private),
        (0, _) => Some(DenyReason::Unspecified),
        (169, 254) => Some(DenyReason::LinkLocal),
        _ => None,
    };

    reason.map_or_else(AdmissionVerdict::allow, AdmissionVerdict::deny)
}

fn classify_v6(addr: Ipv6Addr) -> AdmissionVerdict {
    if addr == Ipv6Addr::LOCALHOST {
        return AdmissionVerdict::deny(DenyReason::Loopback);
    }
    // ::ffff:a.b.c.d reaches the same host as a.b.c.d.
    match addr.to_ipv4_mapped() {
        Some(v4) => classify_v4(v4),
        None => AdmissionVerdict::allow(),
    }
}
