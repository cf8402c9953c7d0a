//! Backend error type and its transient/terminal classification.

use std::error::Error as StdError;
use std::io;

use reqwest::StatusCode;
use thiserror::Error;

/// Why a single backend call failed.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("connection reset")]
    ConnectionReset,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("timed out")]
    Timeout,

    #[error("DNS lookup failed for {0}")]
    Dns(String),

    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// Anything reqwest reports that is not one of the transport failures
    /// above (bad body, redirect loop, builder errors).
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("malformed response: {0}")]
    Parse(String),

    #[error("not configured: {0}")]
    Config(String),
}

impl BackendError {
    /// Whether a retry has a chance of succeeding: connection reset, timeout,
    /// refused, DNS failure, 5xx, and 429.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionReset | Self::ConnectionRefused | Self::Timeout | Self::Dns(_) => true,
            Self::Status { status, .. } => is_transient_status(*status),
            Self::Http(e) => is_transient_reqwest(e),
            Self::Parse(_) | Self::Config(_) => false,
        }
    }

    /// The backend told us to slow down.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == StatusCode::TOO_MANY_REQUESTS,
            Self::Http(e) => e.status() == Some(StatusCode::TOO_MANY_REQUESTS),
            _ => false,
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn is_transient_reqwest(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.status().is_some_and(is_transient_status)
}

impl From<reqwest::Error> for BackendError {
    /// Name the transport failure when reqwest carries one, so retries and
    /// logs see `ConnectionRefused` rather than an opaque HTTP error.
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        match io_kind(&e) {
            Some(io::ErrorKind::ConnectionReset)
            | Some(io::ErrorKind::ConnectionAborted)
            | Some(io::ErrorKind::BrokenPipe) => return Self::ConnectionReset,
            Some(io::ErrorKind::ConnectionRefused) => return Self::ConnectionRefused,
            Some(io::ErrorKind::TimedOut) => return Self::Timeout,
            _ => {}
        }
        if e.is_connect() {
            if mentions_dns(&e) {
                let host = e
                    .url()
                    .and_then(|u| u.host_str())
                    .unwrap_or("unknown host")
                    .to_string();
                return Self::Dns(host);
            }
            return Self::ConnectionRefused;
        }
        Self::Http(e)
    }
}

/// Kind of the first `io::Error` in the source chain.
fn io_kind(e: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source = e.source();
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = err.source();
    }
    None
}

fn mentions_dns(e: &reqwest::Error) -> bool {
    let mut source = e.source();
    while let Some(err) = source {
        if err.to_string().to_ascii_lowercase().contains("dns") {
            return true;
        }
        source = err.source();
    }
    false
}
