//! Core types for block-marker decoding.
//!
//! Gray image views, quad geometry, homographies, probe sampling, histogram
//! statistics and the marker vocabulary shared by the decoder, recognition
//! and matcher crates.

pub mod error;
pub mod geometry;
pub mod hist;
pub mod homography;
pub mod image;
pub mod logger;
pub mod probe;
pub mod vocab;

pub use error::{Error, Result};
pub use geometry::{Quad, QuadCheck, QuadCheckParams};
pub use hist::{otsu_threshold_from_samples, GrayHistogram};
pub use homography::{homography_from_quads, homography_from_unit_square, Homography};
pub use image::{
    get_gray, in_bounds, sample_bilinear, sample_bilinear_u8, GrayImage, GrayImageView,
};
pub use probe::{
    normalize_illumination, probe, probe_mean, probe_weighted, sample_probe_grid, FRACTIONAL_BITS,
    PROBE_GRID_SIZE,
};
pub use vocab::{MarkerLabel, MarkerSymbol, MarkerVocabulary, Rotation};
