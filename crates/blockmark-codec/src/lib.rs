//! Self-describing binary segment codec.
//!
//! Marker results and model data travel as streams of tagged segments; each
//! segment names its object, its element type and its payload geometry, so a
//! reader can skip what it does not understand and reject what is malformed.

pub mod segment;
pub mod wire;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unexpected end of buffer: needed {needed} bytes, {available} available")]
    UnexpectedEof { needed: usize, available: usize },

    #[error("corrupted segment: {0}")]
    Corrupted(String),

    #[error("type mismatch: expected {expected}, found type code {found:#x}")]
    TypeMismatch { expected: &'static str, found: u32 },

    #[error("slice out of range: {0}")]
    SliceOutOfRange(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub use segment::{
    round_up, DataArray, Scalar, Segment, SegmentIter, SegmentWriter, SliceSpec, FLAG_BASIC,
    FLAG_FLOAT, FLAG_INTEGER, FLAG_SIGNED, FLAG_STRING, MEMORY_ALIGNMENT, NAME_LEN,
};
pub use wire::{WireReader, WireWriter};
