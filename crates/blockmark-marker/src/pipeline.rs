//! Drivers over candidate quad lists.
//!
//! The caller's quad extractor supplies candidates; each driver runs the
//! gate-refine-classify lifecycle over up to `max_markers` of them and
//! returns per-candidate results. Soft non-detections stay in the output
//! with their validity; defects are logged and dropped.

use crate::gate::GateParams;
use crate::marker::Marker;
use crate::parser::{BitPatternParser, BlockMarker, DecodeParams};
use crate::refine::RefineParams;
use blockmark_core::{GrayImageView, Quad, QuadCheckParams};
use blockmark_match::{MarkerImageDatabase, MatchParams};
use blockmark_recog::RecognitionContext;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    pub gate: GateParams,
    pub refine: RefineParams,
    pub quad_check: QuadCheckParams,
    pub decode: DecodeParams,
    pub matching: MatchParams,
    /// Candidates beyond this many are ignored with a warning.
    pub max_markers: usize,
    pub use_refinement: bool,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            gate: GateParams::default(),
            refine: RefineParams::default(),
            quad_check: QuadCheckParams::default(),
            decode: DecodeParams::default(),
            matching: MatchParams::default(),
            max_markers: 16,
            use_refinement: true,
        }
    }
}

impl PipelineParams {
    /// Load from a JSON file; absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> crate::Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
}

/// One candidate through gate and refinement. `None` when the candidate quad
/// has no homography at all.
fn prepare(
    image: &GrayImageView<'_>,
    quad: &Quad,
    params: &PipelineParams,
) -> Option<(Marker, Option<u8>)> {
    let Some(mut marker) = Marker::from_quad(quad) else {
        warn!("skipping candidate with a degenerate quad");
        return None;
    };

    let refine = params.use_refinement.then_some(&params.refine);
    let threshold = marker.refine_corners(image, &params.quad_check, &params.gate, refine);
    if threshold.is_none() {
        if marker.validity.is_defect() {
            warn!("candidate dropped: {:?}", marker.validity);
        } else {
            debug!("candidate not gated: {:?}", marker.validity);
        }
    }
    Some((marker, threshold))
}

fn capped<'q>(candidates: &'q [Quad], params: &PipelineParams) -> &'q [Quad] {
    if candidates.len() > params.max_markers {
        warn!(
            "{} candidates supplied, processing the first {}",
            candidates.len(),
            params.max_markers
        );
        &candidates[..params.max_markers]
    } else {
        candidates
    }
}

/// Gate, refine and classify each candidate with the active backend.
///
/// Defective candidates are dropped; gated-out and unverified ones are kept
/// with their validity.
pub fn decode_markers(
    image: &GrayImageView<'_>,
    candidates: &[Quad],
    params: &PipelineParams,
    ctx: &mut RecognitionContext,
) -> crate::Result<Vec<Marker>> {
    let mut out = Vec::new();
    for quad in capped(candidates, params) {
        let Some((mut marker, threshold)) = prepare(image, quad, params) else {
            continue;
        };
        if marker.validity.is_defect() {
            continue;
        }
        if let Some(threshold) = threshold {
            marker.extract(image, threshold, ctx)?;
        }
        out.push(marker);
    }
    Ok(out)
}

/// Like `decode_markers` but against an exhaustive template database.
pub fn decode_markers_exhaustive(
    image: &GrayImageView<'_>,
    candidates: &[Quad],
    params: &PipelineParams,
    db: &MarkerImageDatabase,
) -> Vec<Marker> {
    let mut out = Vec::new();
    for quad in capped(candidates, params) {
        let Some((mut marker, threshold)) = prepare(image, quad, params) else {
            continue;
        };
        if marker.validity.is_defect() {
            continue;
        }
        if let Some(threshold) = threshold {
            marker.extract_exhaustive(image, threshold, db, &params.matching);
        }
        out.push(marker);
    }
    out
}

/// Per-candidate result of the legacy bit-pattern pass.
#[derive(Clone, Copy, Debug)]
pub struct BlockDecode {
    pub marker: Marker,
    /// `None` when the candidate never reached the decoder.
    pub result: Option<BlockMarker>,
}

/// Gate, refine and run the legacy bit-probe decoder on each candidate.
pub fn decode_block_markers(
    image: &GrayImageView<'_>,
    candidates: &[Quad],
    params: &PipelineParams,
) -> Vec<BlockDecode> {
    let parser = BitPatternParser::default_grid();
    let mut out = Vec::new();
    for quad in capped(candidates, params) {
        let Some((mut marker, threshold)) = prepare(image, quad, params) else {
            continue;
        };
        if marker.validity.is_defect() {
            continue;
        }

        let result = if threshold.is_some() {
            match marker.decode_block(image, parser, &params.decode) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    warn!("bit decode failed: {e}");
                    continue;
                }
            }
        } else {
            None
        };
        out.push(BlockDecode { marker, result });
    }
    out
}
