//! Exhaustive template matching for block markers.
//!
//! A band-interleaved database of canonical marker images plus a brute-force
//! matcher that scores every image at all four rotations.

pub mod database;
pub mod matcher;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database has no images or zero-sized geometry")]
    EmptyDatabase,

    #[error("image {label} holds {actual} pixels, expected {expected}")]
    GeometryMismatch {
        label: String,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;

pub use database::MarkerImageDatabase;
pub use matcher::{match_exhaustive, MatchParams, MatchResult};
