//! Block-marker lifecycle.
//!
//! Candidate quads come from an upstream extractor; this crate gates them on
//! border contrast, refines their corners to subpixel accuracy, and decodes
//! or classifies the interior: the legacy bit-probe pattern, a recognition
//! backend, or an exhaustive template database.

pub mod gate;
pub mod marker;
pub mod parser;
pub mod pipeline;
pub mod refine;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] blockmark_core::Error),

    #[error(transparent)]
    Recognition(#[from] blockmark_recog::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub use gate::{measure_contrast, GateParams, GateStats};
pub use marker::{Marker, Validity, MARKER_SEGMENT_TYPE};
pub use parser::{
    compute_checksum, decode_ids, encode_payload, BitPatternParser, BitType, BlockMarker,
    DecodeParams, Orientation, ParserBit,
};
pub use pipeline::{
    decode_block_markers, decode_markers, decode_markers_exhaustive, BlockDecode, PipelineParams,
};
pub use refine::{refine_quadrilateral, RefineError, RefineParams, Refined};
