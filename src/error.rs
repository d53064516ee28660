//! Error taxonomy for the digest pipeline.
//!
//! Errors fall into four families, and callers treat them differently:
//!
//! - **Transient** ([`DigestError::Fetch`], [`DigestError::Status`]): a single
//!   network unit failed. Recovered at the smallest granularity (one page,
//!   one image, one item) by leaving that unit out.
//! - **Structural** ([`DigestError::Feed`], [`DigestError::Json`],
//!   [`DigestError::Selector`], [`DigestError::Url`], [`DigestError::Rewrite`]):
//!   a source returned something we cannot interpret. Fatal to that source
//!   (or, for a rewrite, that item) for this run only.
//! - **Persistence** ([`DigestError::Io`], [`DigestError::LedgerFormat`]):
//!   fatal to the run.
//! - **Delivery** ([`DigestError::Archive`], [`DigestError::Mail`],
//!   [`DigestError::Convert`]): logged; artifacts are kept for inspection.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DigestError>;

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("request to {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("malformed feed from {url}: {reason}")]
    Feed { url: String, reason: String },

    #[error("malformed JSON from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },

    #[error("invalid URL `{url}`: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger at {} is not a valid ledger: {source}", path.display())]
    LedgerFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("mail delivery failed: {0}")]
    Mail(String),

    #[error("conversion failed: {0}")]
    Convert(String),

    #[error("cannot rewrite image sources: {0}")]
    Rewrite(#[from] regex::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DigestError {
    /// Shorthand for wrapping an `io::Error` with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DigestError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for network-level failures that only affect one unit of work.
    pub fn is_transient(&self) -> bool {
        matches!(self, DigestError::Fetch { .. } | DigestError::Status { .. })
    }

    /// True when local state could not be read or written; ends the run.
    pub fn is_persistence(&self) -> bool {
        matches!(self, DigestError::Io { .. } | DigestError::LedgerFormat { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_transient() {
        let err = DigestError::Status {
            url: "http://example.com".to_string(),
            status: 503,
        };
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "HTTP 503 from http://example.com");
    }

    #[test]
    fn test_structural_errors_are_not_transient() {
        let err = DigestError::Feed {
            url: "http://example.com/rss".to_string(),
            reason: "path `rss.channel.item` not found".to_string(),
        };
        assert!(!err.is_transient());

        let err = DigestError::Selector {
            selector: "h1[".to_string(),
            reason: "unexpected end".to_string(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn test_io_error_mentions_path() {
        let err = DigestError::io(
            "/tmp/ledger.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/tmp/ledger.json"));
        assert!(err.is_persistence());
        assert!(!err.is_transient());
    }
}
