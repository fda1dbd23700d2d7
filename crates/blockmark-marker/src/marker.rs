//! Marker lifecycle: validity state machine, extraction, wire form.
//!
//! A `Marker` starts `Unknown`, goes through `refine_corners` (gate plus
//! optional subpixel refinement) and ends in exactly one terminal state:
//! a soft non-detection (`LowContrast`, `Unverified`), a defect
//! (`NumericalFailure`, `RefinementFailure`, `WeirdShape`) or a recognition
//! (`Valid`, `ValidButNotDecoded`).

use crate::gate::{measure_contrast, GateParams, GateStats};
use crate::parser::{BitPatternParser, BlockMarker, DecodeParams};
use crate::refine::{refine_quadrilateral, RefineError, RefineParams};
use blockmark_codec::{Segment, SegmentWriter, WireReader, WireWriter};
use blockmark_core::{
    homography_from_unit_square, GrayImageView, Homography, MarkerLabel, MarkerSymbol, Quad,
    QuadCheckParams, Rotation,
};
use blockmark_match::{match_exhaustive, MarkerImageDatabase, MatchParams};
use blockmark_recog::RecognitionContext;
use log::{debug, warn};
use nalgebra::Point2;

/// Segment type name carrying a serialized marker.
pub const MARKER_SEGMENT_TYPE: &str = "VisionMarker";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Validity {
    Unknown,
    LowContrast,
    NumericalFailure,
    RefinementFailure,
    WeirdShape,
    ValidButNotDecoded,
    Unverified,
    Valid,
}

impl Validity {
    /// Defects drop the candidate with a warning; soft outcomes do not.
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            Validity::NumericalFailure | Validity::RefinementFailure | Validity::WeirdShape
        )
    }

    pub fn is_recognized(&self) -> bool {
        matches!(self, Validity::Valid | Validity::ValidButNotDecoded)
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            Validity::Unknown => 0,
            Validity::LowContrast => 1,
            Validity::NumericalFailure => 2,
            Validity::RefinementFailure => 3,
            Validity::WeirdShape => 4,
            Validity::ValidButNotDecoded => 5,
            Validity::Unverified => 6,
            Validity::Valid => 7,
        }
    }

    pub fn from_i32(v: i32) -> Option<Validity> {
        Some(match v {
            0 => Validity::Unknown,
            1 => Validity::LowContrast,
            2 => Validity::NumericalFailure,
            3 => Validity::RefinementFailure,
            4 => Validity::WeirdShape,
            5 => Validity::ValidButNotDecoded,
            6 => Validity::Unverified,
            7 => Validity::Valid,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Marker {
    /// Canonical corner order once recognized; observed order before.
    pub corners: Quad,
    pub homography: Homography,
    /// Base symbol after recognition, `Unknown` otherwise.
    pub marker_type: MarkerLabel,
    /// Degrees, one of 0/90/180/270.
    pub observed_orientation: f32,
    pub validity: Validity,
}

impl Marker {
    pub fn new(corners: Quad, homography: Homography) -> Self {
        Self {
            corners,
            homography,
            marker_type: MarkerLabel::unknown(),
            observed_orientation: 0.0,
            validity: Validity::Unknown,
        }
    }

    /// Build from an observed quad; `None` when no homography exists for it.
    pub fn from_quad(corners: &Quad) -> Option<Self> {
        homography_from_unit_square(corners).map(|h| Self::new(*corners, h))
    }

    /// Gate the candidate and optionally refine its corners.
    ///
    /// Returns the binarization threshold on success. On failure the
    /// validity records why and the initial corners are kept.
    pub fn refine_corners(
        &mut self,
        image: &GrayImageView<'_>,
        quad_check: &QuadCheckParams,
        gate: &GateParams,
        refine: Option<&RefineParams>,
    ) -> Option<u8> {
        self.validity = Validity::Unknown;

        if !self
            .corners
            .is_reasonable(quad_check, image.width, image.height)
            .reasonable
        {
            self.validity = Validity::WeirdShape;
            return None;
        }

        let Some(stats) = measure_contrast(image, &self.homography, gate) else {
            self.validity = Validity::LowContrast;
            return None;
        };
        let threshold = stats.threshold();

        if let Some(params) = refine.filter(|p| p.max_iterations > 0) {
            let (fg, bg) = foreground_background(&stats, gate);
            match refine_quadrilateral(image, &self.corners, &self.homography, fg, bg, params) {
                Ok(refined) => {
                    // An unreasonable refined quad restores the original and
                    // continues; only the solve itself is fatal.
                    if refined
                        .quad
                        .is_reasonable(quad_check, image.width, image.height)
                        .reasonable
                    {
                        self.corners = refined.quad;
                        self.homography = refined.homography;
                        debug!(
                            "corners converged after {} refinement iterations",
                            refined.iterations
                        );
                    } else {
                        debug!("refined quad unreasonable, keeping initial corners");
                    }
                }
                Err(RefineError::Numerical) => {
                    warn!("corner refinement failed numerically");
                    self.validity = Validity::NumericalFailure;
                    return None;
                }
                Err(RefineError::ExceededMaxChange { moved, allowed }) => {
                    warn!("refined corners drifted {moved:.2}px (allowed {allowed:.2})");
                    self.validity = Validity::RefinementFailure;
                    return None;
                }
            }
        }

        Some(threshold)
    }

    /// Classify the marker interior with the active recognition backend.
    pub fn extract(
        &mut self,
        image: &GrayImageView<'_>,
        threshold: u8,
        ctx: &mut RecognitionContext,
    ) -> blockmark_recog::Result<()> {
        if self.validity == Validity::LowContrast {
            self.marker_type = MarkerLabel::unknown();
            return Ok(());
        }

        let c = ctx.classify(image, &self.homography, threshold)?;
        if c.verified {
            self.recognize(c.label.symbol, c.label.rotation);
        } else {
            self.validity = Validity::Unverified;
            self.marker_type = MarkerLabel::unknown();
        }
        Ok(())
    }

    /// Classify against an exhaustive template database instead of a
    /// backend.
    pub fn extract_exhaustive(
        &mut self,
        image: &GrayImageView<'_>,
        threshold: u8,
        db: &MarkerImageDatabase,
        params: &MatchParams,
    ) {
        if self.validity == Validity::LowContrast {
            self.marker_type = MarkerLabel::unknown();
            return;
        }

        match match_exhaustive(image, &self.homography, threshold, db) {
            Some(m) if m.quality <= params.max_quality && m.label.is_recognizable() => {
                debug!(
                    "exhaustive match: {} at {:?}, quality {:.3} over {} samples",
                    m.label, m.rotation, m.quality, m.num_in_bounds
                );
                self.recognize(m.label.symbol, m.rotation);
            }
            _ => {
                self.validity = Validity::Unverified;
                self.marker_type = MarkerLabel::unknown();
            }
        }
    }

    /// Decode the legacy bit pattern inside the quad.
    ///
    /// A soft decode failure (unknown orientation, checksum mismatch) leaves
    /// the marker `ValidButNotDecoded`.
    pub fn decode_block(
        &mut self,
        image: &GrayImageView<'_>,
        parser: &BitPatternParser,
        params: &DecodeParams,
    ) -> blockmark_core::Result<BlockMarker> {
        let decoded = parser.parse(image, &self.corners, params)?;
        if decoded.is_decoded() {
            self.validity = Validity::Valid;
            self.observed_orientation = decoded.orientation.degrees();
            self.set_corners(decoded.corners);
        } else {
            self.validity = Validity::ValidButNotDecoded;
        }
        Ok(decoded)
    }

    /// Record a verified recognition: canonical corners, base type, observed
    /// orientation.
    fn recognize(&mut self, symbol: MarkerSymbol, rotation: Rotation) {
        self.validity = Validity::Valid;
        self.observed_orientation = rotation.degrees();
        self.marker_type = MarkerLabel::new(symbol, Rotation::Deg0);

        let perm = rotation.corner_permutation();
        let observed = self.corners;
        let mut canonical = observed;
        for i in 0..4 {
            canonical.corners[perm[i]] = observed.corners[i];
        }
        self.set_corners(canonical);
    }

    fn set_corners(&mut self, corners: Quad) {
        self.corners = corners;
        if let Some(h) = homography_from_unit_square(&corners) {
            self.homography = h;
        }
    }

    /// Append this marker to a segment stream.
    pub fn serialize(&self, object_name: &str, writer: &mut SegmentWriter) {
        let mut w = WireWriter::new();
        for c in &self.corners.corners {
            w.write_f32(c.x);
            w.write_f32(c.y);
        }
        w.write_i32(self.marker_type.symbol.code());
        w.write_i32(self.validity.as_i32());
        w.write_f32(self.observed_orientation);
        writer.push_raw(MARKER_SEGMENT_TYPE, object_name, w.as_bytes());
    }

    /// Rebuild a marker from its segment form.
    pub fn deserialize(segment: &Segment<'_>) -> blockmark_codec::Result<Marker> {
        if segment.type_name != MARKER_SEGMENT_TYPE {
            return Err(blockmark_codec::Error::Corrupted(format!(
                "expected a {MARKER_SEGMENT_TYPE} segment, found {}",
                segment.type_name
            )));
        }

        let mut r = WireReader::new(segment.payload);
        let mut corners = [Point2::new(0.0_f32, 0.0); 4];
        for c in &mut corners {
            c.x = r.read_f32()?;
            c.y = r.read_f32()?;
        }
        let symbol = MarkerSymbol::from_code(r.read_i32()?).ok_or_else(|| {
            blockmark_codec::Error::Corrupted("unknown marker symbol code".into())
        })?;
        let validity = Validity::from_i32(r.read_i32()?).ok_or_else(|| {
            blockmark_codec::Error::Corrupted("unknown validity code".into())
        })?;
        let observed_orientation = r.read_f32()?;

        let corners = Quad::new(corners);
        let homography = homography_from_unit_square(&corners).unwrap_or_else(Homography::identity);
        Ok(Marker {
            corners,
            homography,
            marker_type: MarkerLabel::new(symbol, Rotation::Deg0),
            observed_orientation,
            validity,
        })
    }
}

/// Gate means in template terms: foreground is the marker ink.
fn foreground_background(stats: &GateStats, gate: &GateParams) -> (f32, f32) {
    if gate.dark_on_light {
        (stats.dark_mean as f32, stats.bright_mean as f32)
    } else {
        (stats.bright_mean as f32, stats.dark_mean as f32)
    }
}
