//! Error handling for the netaudit engine
//!
//! Every probe reports failures through [`ScanError`]. Only the orchestrator
//! decides what a failure means for the run; drivers never abort sibling work.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Main error type for scanning operations
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Timeout error")]
    TimeoutError,

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("No {0} credentials supplied")]
    NoCredentials(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Scan cancelled")]
    Cancelled,
}

/// Result type alias for scan operations
pub type ScanResult<T> = Result<T, ScanError>;

impl ScanError {
    /// Short machine-friendly name of the error class
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::TimeoutError => "timeout",
            ScanError::ProtocolError(_) => "protocol",
            ScanError::AuthenticationFailure(_) => "authentication",
            ScanError::UnsupportedConfiguration(_) => "unsupported_configuration",
            ScanError::NoCredentials(_) => "no_credentials",
            ScanError::NetworkError(_) => "network",
            ScanError::InvalidTarget(_) => "invalid_target",
            ScanError::ConfigError(_) => "config",
            ScanError::IoError(_) => "io",
            ScanError::ParseError(_) => "parse",
            ScanError::Cancelled => "cancelled",
        }
    }

    /// Check if an error is recoverable at the caller's discretion
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ScanError::TimeoutError
                | ScanError::ProtocolError(_)
                | ScanError::NetworkError(_)
                | ScanError::IoError(_)
                | ScanError::AuthenticationFailure(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ScanError::TimeoutError)
    }
}

/// Retry an operation on timeouts only, with a linear delay between attempts.
///
/// Probes never retry internally; this is the caller-level retry used by the
/// discovery loops. `retries` counts additional attempts after the first one.
pub async fn retry_on_timeout<F, Fut, T>(retries: usize, delay: Duration, operation: F) -> ScanResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = ScanResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Err(ScanError::TimeoutError) if attempt < retries => {
                attempt += 1;
                log::debug!("Timed out, retrying (attempt {}/{})", attempt, retries);
                if !delay.is_zero() {
                    tokio::time::sleep(delay * attempt as u32).await;
                }
            }
            other => return other,
        }
    }
}

/// Convert common errors to ScanError
impl From<std::net::AddrParseError> for ScanError {
    fn from(e: std::net::AddrParseError) -> Self {
        ScanError::InvalidTarget(e.to_string())
    }
}

impl From<std::num::ParseIntError> for ScanError {
    fn from(e: std::num::ParseIntError) -> Self {
        ScanError::ParseError(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ScanError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ScanError::TimeoutError
    }
}

impl From<reqwest::Error> for ScanError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ScanError::TimeoutError
        } else if e.is_connect() {
            ScanError::NetworkError(e.to_string())
        } else if e.is_builder() {
            ScanError::ConfigError(e.to_string())
        } else {
            ScanError::ProtocolError(e.to_string())
        }
    }
}

impl From<russh::Error> for ScanError {
    fn from(e: russh::Error) -> Self {
        match e {
            russh::Error::IO(io) => ScanError::NetworkError(io.to_string()),
            russh::Error::ConnectionTimeout | russh::Error::InactivityTimeout => ScanError::TimeoutError,
            russh::Error::NotAuthenticated => ScanError::AuthenticationFailure("not authenticated".to_string()),
            other => ScanError::ProtocolError(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for ScanError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(io) => ScanError::NetworkError(io.to_string()),
            sqlx::Error::PoolTimedOut => ScanError::TimeoutError,
            sqlx::Error::Database(db) => {
                // SQLSTATE 28000: invalid authorization specification
                let denied = db.code().as_deref() == Some("28000")
                    || db.message().contains("Access denied");
                if denied {
                    ScanError::AuthenticationFailure(db.message().to_string())
                } else {
                    ScanError::ProtocolError(db.message().to_string())
                }
            }
            other => ScanError::ProtocolError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_retry_on_timeout_stops_after_limit() {
        let calls = AtomicUsize::new(0);
        let result: ScanResult<()> = retry_on_timeout(2, Duration::ZERO, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ScanError::TimeoutError)
        })
        .await;

        assert!(matches!(result, Err(ScanError::TimeoutError)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_on_timeout_does_not_retry_other_errors() {
        let calls = AtomicUsize::new(0);
        let result: ScanResult<()> = retry_on_timeout(5, Duration::ZERO, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ScanError::ProtocolError("bad tag".to_string()))
        })
        .await;

        assert!(matches!(result, Err(ScanError::ProtocolError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(ScanError::TimeoutError.kind(), "timeout");
        assert!(ScanError::TimeoutError.is_recoverable());
        assert!(!ScanError::UnsupportedConfiguration("oracle".into()).is_recoverable());
        assert_eq!(
            ScanError::NoCredentials("ssh".into()).to_string(),
            "No ssh credentials supplied"
        );
    }
}
