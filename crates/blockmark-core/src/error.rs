use thiserror::Error;

/// Hard failures shared across the workspace.
///
/// Soft outcomes (low contrast, unverified decode) are not errors; they are
/// carried in marker validity states. These variants mean the caller handed
/// us something malformed or a computation could not be completed.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid size: {0}")]
    InvalidSize(String),

    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("allocation failed: {0}")]
    OutOfMemory(String),
}

pub type Result<T> = std::result::Result<T, Error>;
