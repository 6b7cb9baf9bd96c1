use thiserror::Error;

/// Application-wide error types.
///
/// This enum represents every failure the harvester can observe, from the
/// transport layer up to store constraint violations. It uses the `thiserror`
/// crate for ergonomic error handling and automatic conversion from underlying
/// library errors.
///
/// # Error Conversion
///
/// Some errors convert from their source types using the `#[from]` attribute:
/// - `sqlx::Error` → `AppError::DatabaseError`
/// - `serde_json::Error` → `AppError::SerializationError`
/// - `std::io::Error` → `AppError::Io`
///
/// # Classification
///
/// [`AppError::category`] maps each variant onto the harvest error taxonomy:
/// transient network errors are retried by the fetcher, fatal fetch errors are
/// not, parse and validation errors fail a single item.
///
/// # Examples
///
/// ```no_run
/// use pomona_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     Err(AppError::Generic("Something went wrong".to_string()))
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Database operation failed.
    ///
    /// This error wraps all errors from SQLx database operations, including
    /// connection failures and query errors.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// HTTP client could not be built or the request could not be sent.
    ///
    /// This covers failures that are neither connection problems nor
    /// timeouts, such as invalid TLS configuration.
    #[error("API Client error: {0}")]
    ClientError(String),

    /// Network or connection error.
    ///
    /// This error occurs when a network request fails due to connectivity issues,
    /// DNS resolution failures, or the remote server being unreachable.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timeout.
    ///
    /// This error occurs when the connection or a body read takes longer than
    /// the configured timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The response body ended before all announced bytes arrived.
    ///
    /// Raised when the received byte count disagrees with `Content-Length`,
    /// or when the body stream fails mid-transfer.
    #[error("Truncated transfer: received {received} bytes{}", .expected.map(|e| format!(" of {e}")).unwrap_or_default())]
    TruncatedTransfer {
        expected: Option<u64>,
        received: u64,
    },

    /// The server answered with a non-success status.
    ///
    /// Any 4xx or 5xx status is treated as fatal and is never retried.
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Transient failures persisted past the configured attempt budget.
    ///
    /// Carries the last transient error observed.
    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<AppError>,
    },

    /// XML or document structure could not be parsed.
    ///
    /// Per-item parse errors fail only that item. A parse error before the
    /// first catalog item aborts the run.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A record failed validation.
    ///
    /// Produced by [`crate::StoredRecord::validate`] and by store constraint
    /// violations (empty title, malformed resource URL).
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// JSON serialization or deserialization failed.
    ///
    /// This error occurs when harvest-job state is converted to or from JSON
    /// for persistence.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Catalog returned no items.
    ///
    /// This error occurs when the catalog downloads and parses successfully
    /// but contains zero indicator elements.
    #[error("Empty response from catalog")]
    EmptyResponse,

    /// Scratch storage or other filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file error.
    ///
    /// This error occurs when reading or parsing the configuration file fails,
    /// such as when the sources.toml file is malformed or contains invalid values.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic application error for cases not covered by specific variants.
    ///
    /// Use this sparingly - prefer creating specific error variants
    /// for better error handling and debugging.
    #[error("Error: {0}")]
    Generic(String),
}

/// Coarse error classes used for logging, metrics and job error details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection failures, timeouts, truncated transfers.
    TransientNetwork,
    /// Non-success HTTP status or exhausted retries.
    FatalFetch,
    Parse,
    Validation,
    Storage,
    Configuration,
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::TransientNetwork => "transient_network",
            ErrorCategory::FatalFetch => "fatal_fetch",
            ErrorCategory::Parse => "parse",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::DatabaseError(e) => {
                if e.to_string().contains("connection") {
                    "Cannot connect to database. Is PostgreSQL running?\n   Try: docker compose up -d".to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            AppError::NetworkError(msg) => {
                format!("Network error: {}\n   Check your internet connection.", msg)
            }
            AppError::Timeout(secs) => {
                format!(
                    "Request timed out after {} seconds.\n   The catalog server may be overloaded. Try again later.",
                    secs
                )
            }
            AppError::HttpStatus { status, url } => {
                format!(
                    "The catalog server answered HTTP {} for {}.\n   Check the source URL in your configuration.",
                    status, url
                )
            }
            AppError::RetriesExhausted { attempts, last } => {
                format!(
                    "Download failed after {} attempts.\n   Last error: {}",
                    attempts,
                    last.user_message()
                )
            }
            AppError::EmptyResponse => {
                "The catalog contained no indicators. The source may be temporarily unavailable."
                    .to_string()
            }
            AppError::ConfigError(msg) => {
                format!(
                    "Configuration error: {}\n   Check your configuration file.",
                    msg
                )
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if this error is transient and the operation may be retried.
    ///
    /// # Examples
    ///
    /// ```
    /// use pomona_core::error::AppError;
    ///
    /// let err = AppError::NetworkError("connection reset".to_string());
    /// assert!(err.is_retryable());
    ///
    /// let err = AppError::HttpStatus { status: 503, url: "https://example.org".to_string() };
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::TruncatedTransfer { .. }
        )
    }

    /// Maps this error onto the harvest error taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::TruncatedTransfer { .. } => {
                ErrorCategory::TransientNetwork
            }
            AppError::HttpStatus { .. } | AppError::RetriesExhausted { .. } => {
                ErrorCategory::FatalFetch
            }
            AppError::ParseError(_) | AppError::EmptyResponse => ErrorCategory::Parse,
            AppError::ValidationError(_) => ErrorCategory::Validation,
            AppError::DatabaseError(_) | AppError::SerializationError(_) | AppError::Io(_) => {
                ErrorCategory::Storage
            }
            AppError::ConfigError(_) | AppError::InvalidUrl(_) => ErrorCategory::Configuration,
            AppError::ClientError(_) | AppError::Generic(_) => ErrorCategory::Other,
        }
    }
}
