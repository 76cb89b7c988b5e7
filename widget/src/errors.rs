use curseforge::UpstreamError;

/// Why a path could not be mapped to an external id.
#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("unknown game: {0}")]
    UnknownGame(String),
    #[error("unknown category {category} for game {game}")]
    UnknownCategory { game: String, category: String },
    #[error("no project with slug {0}")]
    SlugNotFound(String),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl ResolveError {
    /// True when the path will not resolve no matter how often it is retried.
    pub fn is_definitive(&self) -> bool {
        match self {
            ResolveError::Upstream(err) => err.is_definitive(),
            _ => true,
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum StoreError {
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error("record does not exist: {0}")]
    Missing(String),
    #[error("store failure: {0}")]
    Backend(String),
}

/// Failures surfaced to callers of the widget service.
#[derive(thiserror::Error, Debug)]
pub enum WidgetError {
    #[error("not found")]
    UpstreamNotFound,
    #[error("project is not accessible")]
    UpstreamForbidden,
    #[error("upstream failure: {0}")]
    UpstreamTransient(String),
    #[error("resolution failed: {0}")]
    Resolution(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0} queue is full")]
    QueueFull(&'static str),
    #[error("{0} worker is unavailable")]
    Unavailable(&'static str),
}

impl From<UpstreamError> for WidgetError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::NotFound => WidgetError::UpstreamNotFound,
            UpstreamError::Forbidden => WidgetError::UpstreamForbidden,
            other => WidgetError::UpstreamTransient(other.to_string()),
        }
    }
}
