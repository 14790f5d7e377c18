use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("busy")]
    Busy,
    #[error("forbidden")]
    Forbidden,
    #[error("storage error: {0}")]
    Storage(String),
}
