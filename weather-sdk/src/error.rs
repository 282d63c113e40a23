use thiserror::Error;

/// Errors surfaced by the weather read path.
///
/// Every variant is recoverable by the caller: a failed read leaves the client
/// and its cache usable for the next request.
#[derive(Debug, Error)]
pub enum WeatherError {
    /// Transport-level failure reaching the upstream provider.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Upstream answered with a non-success status.
    #[error("Upstream request failed with status {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Response body was malformed or incomplete.
    #[error("Failed to parse weather response: {0}")]
    Parse(String),

    /// Polling mode needs a Tokio runtime to host the refresher.
    #[error("Polling mode requires a running Tokio runtime")]
    NoRuntime,
}

impl WeatherError {
    /// Upstream status code, if the error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            Self::Network(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Upstream { status, .. } => *status == 429 || *status >= 500,
            Self::Parse(_) | Self::NoRuntime => false,
        }
    }
}
