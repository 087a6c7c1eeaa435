/// Errors returned by [`TardisClient`](crate::TardisClient) methods and by
/// the lower-level pipeline pieces (fetcher, orchestrator, replay iterator,
/// reconstructors).
///
/// # Variants
///
/// - [`Http`](TardisError::Http) — network or connection failure (wraps
///   [`reqwest::Error`])
/// - [`Json`](TardisError::Json) — a slice record's payload could not be
///   deserialized (wraps [`serde_json::Error`])
/// - [`Api`](TardisError::Api) — the data-feeds endpoint returned a
///   non-success HTTP status code
/// - [`Validation`](TardisError::Validation) — caller-supplied arguments
///   (venue, date range, filters) failed validation
/// - [`Cache`](TardisError::Cache) — a filesystem operation on the local
///   slice cache failed (wraps [`std::io::Error`])
/// - [`Logic`](TardisError::Logic) — an invariant the pipeline relies on was
///   violated; never retried
#[derive(Debug, thiserror::Error)]
pub enum TardisError {
    /// Network or connection error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Failed to deserialize a JSON payload.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The data-feeds API returned a non-success HTTP status code.
    ///
    /// `status` is the HTTP status code and `message` is the response body
    /// text, which the fetcher's retry wrapper inspects for the
    /// `ISO 8601 format` substring on a 400 (see [`crate::fetcher`]).
    #[error("API error (status {status}) for {url}: {message}")]
    Api {
        status: u16,
        url: String,
        message: String,
    },

    /// Caller-supplied arguments failed validation.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// A filesystem operation on the local slice cache failed.
    #[error("cache error: {0}")]
    Cache(#[from] std::io::Error),

    /// An invariant the pipeline relies on was violated.
    #[error("logic error: {0}")]
    Logic(String),
}

impl TardisError {
    /// Status code, if this is an [`TardisError::Api`] error.
    pub fn status(&self) -> Option<u16> {
        match self {
            TardisError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the fetcher's retry wrapper should retry this error.
    ///
    /// Mirrors the fatal-vs-retry discrimination in spec.md §4.3/§7: 401 is
    /// always fatal; 400 is fatal unless the body carries the documented
    /// `ISO 8601 format` whitelist substring; [`TardisError::Logic`] is never
    /// retried; everything else (other statuses, connection errors,
    /// timeouts, JSON/cache errors surfaced mid-fetch) is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            TardisError::Logic(_) | TardisError::Validation(_) => false,
            TardisError::Api {
                status, message, ..
            } => match *status {
                401 => false,
                400 => message.contains("ISO 8601 format"),
                _ => true,
            },
            _ => true,
        }
    }

    /// Whether this error should trigger the orchestrator's adaptive
    /// concurrency throttle (HTTP 429).
    pub fn is_throttle(&self) -> bool {
        matches!(self, TardisError::Api { status: 429, .. })
    }
}

/// A [`Result`](std::result::Result) alias with [`TardisError`] as the error
/// type.
pub type Result<T> = std::result::Result<T, TardisError>;
