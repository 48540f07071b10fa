use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    /// Network failures, timeouts, rate limits, 5xx. Retried with backoff
    /// inside the adapter.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Non-retryable provider rejection (auth, 4xx).
    #[error("permanent provider error: {0}")]
    Permanent(String),

    /// The input itself is unusable (oversized or malformed audio/text).
    /// The turn is dropped silently.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The provider answered but the body could not be decoded.
    #[error("response decode error: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether the error is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classifies an HTTP error status.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("HTTP {status}: {body}");
        if status.as_u16() == 429 || status.is_server_error() {
            Self::Transient(message)
        } else {
            Self::Permanent(message)
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::Transient(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }
}
