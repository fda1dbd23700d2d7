//! Backend strategy and the recognition context.
//!
//! One `classify` contract covers all three backends; the caller picks a
//! backend at startup and threads the context mutably through extraction.

use crate::cnn::{ConvolutionalNet, Tensor};
use crate::nn::NearestNeighborLibrary;
use crate::trees::TreeEnsemble;
use crate::Result;
use blockmark_core::{
    normalize_illumination, sample_probe_grid, GrayImageView, Homography, MarkerLabel,
    MarkerVocabulary, PROBE_GRID_SIZE,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug)]
pub struct Classification {
    pub label: MarkerLabel,
    pub confidence: f32,
    pub verified: bool,
}

impl Classification {
    pub fn unverified() -> Self {
        Self {
            label: MarkerLabel::unknown(),
            confidence: 0.0,
            verified: false,
        }
    }
}

pub enum Backend {
    NearestNeighbor(NearestNeighborLibrary),
    DecisionTrees(TreeEnsemble),
    Cnn(ConvolutionalNet),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RecogParams {
    /// Mean absolute gray distance below which a nearest-neighbor hit
    /// verifies.
    pub nn_max_distance: f32,
    /// Run center-surround illumination normalization on the probe grid
    /// before classification.
    pub normalize_illumination: bool,
}

impl Default for RecogParams {
    fn default() -> Self {
        Self {
            nn_max_distance: 40.0,
            normalize_illumination: true,
        }
    }
}

/// Long-lived classification state: the chosen backend plus reusable probe
/// scratch. Not shareable across threads; callers pass it `&mut`.
pub struct RecognitionContext {
    backend: Backend,
    params: RecogParams,
    grid: Vec<u8>,
}

impl RecognitionContext {
    pub fn new(backend: Backend) -> Self {
        Self::with_params(backend, RecogParams::default())
    }

    pub fn with_params(backend: Backend, params: RecogParams) -> Self {
        Self {
            backend,
            params,
            grid: Vec::with_capacity(PROBE_GRID_SIZE * PROBE_GRID_SIZE),
        }
    }

    pub fn params(&self) -> &RecogParams {
        &self.params
    }

    /// Classify the marker interior seen through `homography`.
    ///
    /// `threshold` is the bright/dark midpoint from the contrast gate; only
    /// the tree backend consumes it.
    pub fn classify(
        &mut self,
        image: &GrayImageView<'_>,
        homography: &Homography,
        threshold: u8,
    ) -> Result<Classification> {
        sample_probe_grid(image, homography, PROBE_GRID_SIZE, &mut self.grid);
        if self.params.normalize_illumination {
            normalize_illumination(&mut self.grid, PROBE_GRID_SIZE);
        }

        match &mut self.backend {
            Backend::NearestNeighbor(lib) => {
                let Some((label, distance)) = lib.classify(&self.grid) else {
                    return Ok(Classification::unverified());
                };
                let verified = label.is_recognizable() && distance < self.params.nn_max_distance;
                Ok(Classification {
                    label,
                    confidence: 1.0 - (distance / 255.0).min(1.0),
                    verified,
                })
            }
            Backend::DecisionTrees(ensemble) => {
                let (label, votes) =
                    ensemble.classify(&self.grid, PROBE_GRID_SIZE, threshold);
                let total = ensemble.num_trees();
                let verified = label.is_recognizable() && votes * 2 > total;
                Ok(Classification {
                    label,
                    confidence: if total > 0 {
                        votes as f32 / total as f32
                    } else {
                        0.0
                    },
                    verified,
                })
            }
            Backend::Cnn(net) => {
                let tensor = Tensor::from_gray_grid(&self.grid, PROBE_GRID_SIZE)?;
                let (idx, confidence) = net.run(&tensor)?;
                let label = match net.class_name(idx) {
                    Some(name) => MarkerVocabulary::label_from_name(name),
                    None => MarkerLabel::unknown(),
                };
                Ok(Classification {
                    label,
                    confidence,
                    verified: label.is_recognizable(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockmark_core::{homography_from_unit_square, GrayImage, MarkerSymbol, Quad, Rotation};

    fn flat_image(w: usize, h: usize, v: u8) -> GrayImage {
        let mut img = GrayImage::new(w, h);
        img.data.fill(v);
        img
    }

    #[test]
    fn empty_nn_library_reports_unverified() {
        let img = flat_image(64, 64, 128);
        let h = homography_from_unit_square(&Quad::square(63.0)).unwrap();
        let mut ctx = RecognitionContext::new(Backend::NearestNeighbor(
            NearestNeighborLibrary::new(PROBE_GRID_SIZE),
        ));
        let c = ctx.classify(&img.view(), &h, 128).unwrap();
        assert!(!c.verified);
        assert_eq!(c.label, MarkerLabel::unknown());
    }

    #[test]
    fn nn_match_on_flat_image_verifies() {
        let img = flat_image(64, 64, 200);
        let h = homography_from_unit_square(&Quad::square(63.0)).unwrap();

        // A flat grid normalizes to mid-gray; register the template to match.
        let mut lib = NearestNeighborLibrary::new(PROBE_GRID_SIZE);
        lib.add_template(
            MarkerLabel::new(MarkerSymbol::Circle, Rotation::Deg0),
            vec![128u8; PROBE_GRID_SIZE * PROBE_GRID_SIZE],
        )
        .unwrap();

        let mut ctx = RecognitionContext::new(Backend::NearestNeighbor(lib));
        let c = ctx.classify(&img.view(), &h, 128).unwrap();
        assert!(c.verified);
        assert_eq!(c.label.symbol, MarkerSymbol::Circle);
        assert!(c.confidence > 0.8);
    }

    #[test]
    fn tree_majority_verifies() {
        use crate::trees::TreeNode;

        let img = flat_image(64, 64, 10);
        let h = homography_from_unit_square(&Quad::square(63.0)).unwrap();
        let trees = vec![
            TreeNode::Leaf {
                label: "MARKER_TRIANGLE_000".into(),
            },
            TreeNode::Leaf {
                label: "MARKER_TRIANGLE_000".into(),
            },
            TreeNode::Leaf {
                label: "MARKER_ARROW_000".into(),
            },
        ];
        let mut ctx =
            RecognitionContext::new(Backend::DecisionTrees(TreeEnsemble { trees }));
        let c = ctx.classify(&img.view(), &h, 128).unwrap();
        assert!(c.verified);
        assert_eq!(c.label.symbol, MarkerSymbol::Triangle);
    }

    #[test]
    fn tree_split_vote_does_not_verify() {
        use crate::trees::TreeNode;

        let img = flat_image(64, 64, 10);
        let h = homography_from_unit_square(&Quad::square(63.0)).unwrap();
        let trees = vec![
            TreeNode::Leaf {
                label: "MARKER_TRIANGLE_000".into(),
            },
            TreeNode::Leaf {
                label: "MARKER_ARROW_000".into(),
            },
        ];
        let mut ctx =
            RecognitionContext::new(Backend::DecisionTrees(TreeEnsemble { trees }));
        let c = ctx.classify(&img.view(), &h, 128).unwrap();
        assert!(!c.verified);
    }
}
