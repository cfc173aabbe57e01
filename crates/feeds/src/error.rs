//! Error types for external source fetches.

use thiserror::Error;

/// Errors that can occur while fetching from an external source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Missing API key for {0}")]
    MissingApiKey(&'static str),

    #[error("No source configured for {0}")]
    NoSource(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else if err.is_decode() {
            FetchError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Request(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Parse(err.to_string())
    }
}

impl FetchError {
    /// Returns true if this error is transient and likely to succeed next tick.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Request(_) | FetchError::Timeout(_) | FetchError::RateLimited => true,
            FetchError::Status(code) => *code >= 500,
            _ => false,
        }
    }

    /// Returns true if this error requires configuration changes to go away.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            FetchError::MissingApiKey(_) | FetchError::NoSource(_) | FetchError::Status(401 | 403)
        )
    }
}

/// Map a non-success HTTP response to an error.
pub(crate) fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status.as_u16() == 429 {
        return Err(FetchError::RateLimited);
    }
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::RateLimited.is_transient());
        assert!(FetchError::Timeout("slow".into()).is_transient());
        assert!(FetchError::Status(502).is_transient());
        assert!(!FetchError::Status(404).is_transient());
        assert!(!FetchError::Parse("bad json".into()).is_transient());
    }

    #[test]
    fn test_permanent_classification() {
        assert!(FetchError::MissingApiKey("birdeye").is_permanent());
        assert!(FetchError::Status(401).is_permanent());
        assert!(!FetchError::RateLimited.is_permanent());
    }
}
