use thiserror::Error;

/// Error taxonomy for lifecycle operations.
///
/// Validation and not-found are detected before any store mutation and map
/// to client errors. Notification failures are isolated after the mutation
/// has committed and are only ever logged, never returned from the
/// operation that triggered the send.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(&'static str),
    #[error("{0}_not_found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(&'static str),
    #[error("invalid_credentials")]
    Unauthorized,
    #[error("rate_limited")]
    RateLimited,
    #[error("notification failed: {0}")]
    Notification(String),
    #[error("internal: {0}")]
    Internal(String),
    #[error(transparent)]
    Store(#[from] rusqlite::Error),
    #[error("store pool: {0}")]
    Pool(#[from] r2d2::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
