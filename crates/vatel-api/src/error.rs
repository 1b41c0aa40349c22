use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The API key was missing, wrong or not allowed to use the resource.
    #[error("authentication failed ({status}): {body}")]
    Auth { status: StatusCode, body: String },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid API base URL {0:?}")]
    InvalidBaseUrl(String),
}
