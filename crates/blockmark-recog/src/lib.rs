//! Recognition backends for block markers.
//!
//! Three interchangeable classifiers behind one contract: a nearest-neighbor
//! template library, a decision-tree ensemble and a CNN forward-pass engine.

pub mod backend;
pub mod cnn;
pub mod nn;
pub mod trees;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("model error: {0}")]
    Model(String),

    #[error("shape error: {0}")]
    Shape(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;

pub use backend::{Backend, Classification, RecogParams, RecognitionContext};
pub use cnn::{ConvolutionalNet, Tensor};
pub use nn::NearestNeighborLibrary;
pub use trees::{TreeEnsemble, TreeNode};
