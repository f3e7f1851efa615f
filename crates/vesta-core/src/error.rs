use std::path::PathBuf;

use thiserror::Error;

/// Application-wide error types.
///
/// This enum represents all possible errors that can occur while maintaining
/// the archive. It uses the `thiserror` crate for ergonomic error handling and
/// automatic conversion from underlying library errors.
///
/// # Error Conversion
///
/// Most errors automatically convert from their source types using the `#[from]` attribute:
/// - `std::io::Error` → `AppError::Io`
/// - `serde_json::Error` → `AppError::SerializationError`
///
/// # Examples
///
/// ```no_run
/// use vesta_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     // Errors automatically convert
///     Err(AppError::Generic("Something went wrong".to_string()))
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Filesystem operation failed.
    ///
    /// Covers the archive log, dataset files, and catalog snapshot files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client request failed.
    ///
    /// This error occurs when HTTP requests fail due to network issues
    /// or a broken response stream.
    #[error("HTTP client error: {0}")]
    ClientError(String),

    /// The remote answered with a non-success status code.
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Catalog permalink does not contain the `/d/` segment needed to
    /// derive the row export endpoint.
    #[error("Malformed dataset link: {0}")]
    MalformedLink(String),

    /// A domain, dataset identifier, or date cannot be used as a single
    /// file name inside the archive directory.
    #[error("Unsafe archive path component: {0:?}")]
    UnsafeName(String),

    /// Catalog last-modified timestamp could not be truncated to a day.
    #[error("Invalid catalog timestamp: {0:?}")]
    InvalidTimestamp(String),

    /// Date key is not an eight digit `YYYYMMDD` calendar date.
    #[error("Invalid date key: {0:?} (expected YYYYMMDD)")]
    InvalidDate(String),

    /// A line of the archive log does not hold four tab-separated fields
    /// with a known status token.
    #[error("Corrupt log line: {0:?}")]
    CorruptLogLine(String),

    /// No catalog snapshot exists at the expected location.
    #[error("Catalog snapshot not found: {}", .0.display())]
    CatalogNotFound(PathBuf),

    /// Configuration file could not be read or parsed.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Network or connection error.
    ///
    /// This error occurs when a network request fails due to connectivity issues,
    /// DNS resolution failures, or the remote server being unreachable.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Generic application error for cases not covered by specific variants.
    ///
    /// Use this sparingly - prefer creating specific error variants
    /// for better error handling and debugging.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                format!(
                    "Permission denied: {}\n   Check that the archive directory is writable.",
                    e
                )
            }
            AppError::ClientError(msg) => {
                if msg.contains("timeout") || msg.contains("timed out") {
                    "Request timed out. The portal may be slow or unreachable.".to_string()
                } else if msg.contains("connect") {
                    format!(
                        "Cannot connect to portal: {}\n   Check your internet connection.",
                        msg
                    )
                } else {
                    format!("API error: {}", msg)
                }
            }
            AppError::CatalogNotFound(path) => {
                format!(
                    "No catalog snapshot at {}\n   Fetch the catalog for this date first or pass --catalog <PATH>.",
                    path.display()
                )
            }
            AppError::InvalidDate(value) => {
                format!("Invalid date {:?}\n   Example: 20240131", value)
            }
            AppError::NetworkError(msg) => {
                format!("Network error: {}\n   Check your internet connection.", msg)
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if this error is transient.
    ///
    /// Transient failures are recorded as failed downloads and picked up
    /// again by the next crawl. They are never retried inside a run.
    ///
    /// # Examples
    ///
    /// ```
    /// use vesta_core::error::AppError;
    ///
    /// let err = AppError::NetworkError("connection reset".to_string());
    /// assert!(err.is_retryable());
    ///
    /// let err = AppError::HttpStatus { status: 503, url: "https://x".to_string() };
    /// assert!(err.is_retryable());
    ///
    /// let err = AppError::MalformedLink("https://x/y".to_string());
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            AppError::NetworkError(_) | AppError::ClientError(_) => true,
            _ => false,
        }
    }
}
