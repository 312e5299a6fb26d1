use thiserror::Error;

/// Errors surfaced by the Front API client.
///
/// Rate limiting with a usable `retry-after` never shows up here; it is
/// waited out inside the client.
#[derive(Debug, Error)]
pub enum FrontError {
    #[error("HTTP error {status} requesting {url}")]
    HttpStatus { status: u16, url: String },

    #[error("HTTP error requesting {url}: {source}")]
    Http {
        source: reqwest::Error,
        url: String,
    },

    #[error("Unexpected response shape from {url}: {source}")]
    InvalidResponse {
        url: String,
        source: serde_json::Error,
    },

    #[error("Rate limited {attempts} times without a retry-after header requesting {url}")]
    RateLimitedWithoutRetryAfter { url: String, attempts: u32 },

    #[error("Invalid API token: {0}")]
    InvalidToken(String),
}

impl FrontError {
    /// HTTP status of the failed request, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            FrontError::HttpStatus { status, .. } => Some(*status),
            FrontError::Http { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
