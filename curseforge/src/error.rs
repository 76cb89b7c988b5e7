use reqwest::StatusCode;

#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    #[error("upstream returned not found")]
    NotFound,
    #[error("upstream returned forbidden")]
    Forbidden,
    #[error("upstream returned status {0}")]
    Status(StatusCode),
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl UpstreamError {
    /// Not found and forbidden are final answers about an entity. Everything
    /// else may succeed on a later attempt.
    pub fn is_definitive(&self) -> bool {
        matches!(self, UpstreamError::NotFound | UpstreamError::Forbidden)
    }
}
