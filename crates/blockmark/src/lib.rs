//! High-level facade crate for the `blockmark-*` workspace.
//!
//! This crate provides:
//! - stable, convenient re-exports of the underlying pipeline crates
//! - (feature-gated) end-to-end helpers that take an `image::GrayImage` and
//!   run the marker lifecycle on caller-supplied candidate quads.
//!
//! ## Quickstart
//!
//! ```no_run
//! use blockmark::decode;
//! use blockmark::marker::PipelineParams;
//! use blockmark::core::Quad;
//! use image::ImageReader;
//! use nalgebra::Point2;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let img = ImageReader::open("frame.png")?.decode()?.to_luma8();
//! // Corner order: top-left, bottom-left, top-right, bottom-right.
//! let candidate = Quad::new([
//!     Point2::new(20.0, 20.0),
//!     Point2::new(20.0, 100.0),
//!     Point2::new(100.0, 20.0),
//!     Point2::new(100.0, 100.0),
//! ]);
//!
//! let results = decode::decode_blocks(&img, &[candidate], &PipelineParams::default());
//! for d in &results {
//!     println!("{:?}", d.marker.validity);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `blockmark::core`: gray images, quads, homographies, probe sampling,
//!   the marker vocabulary.
//! - `blockmark::marker`: gate, subpixel refinement, legacy bit decoder,
//!   pipeline drivers.
//! - `blockmark::recog`: nearest-neighbor, decision-tree and CNN backends.
//! - `blockmark::matching`: exhaustive template database matching.
//! - `blockmark::codec`: tagged binary segment streams for results and
//!   model data.
//! - `blockmark::decode` (feature `image`): end-to-end helpers from
//!   `image::GrayImage`.

pub use blockmark_codec as codec;
pub use blockmark_core as core;
pub use blockmark_marker as marker;
pub use blockmark_match as matching;
pub use blockmark_recog as recog;

pub use blockmark_core::{
    GrayImage, GrayImageView, Homography, MarkerLabel, MarkerSymbol, Quad, Rotation,
};
pub use blockmark_marker::{BlockMarker, Marker, PipelineParams, Validity};

#[cfg(feature = "image")]
pub mod decode;
