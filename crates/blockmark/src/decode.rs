//! End-to-end helpers from `image::GrayImage`.

use crate::{core, marker, matching, recog};
use blockmark_marker::{BlockDecode, Marker, PipelineParams};

/// Convert an `image::GrayImage` into the lightweight `blockmark-core` view
/// type.
pub fn gray_view(img: &::image::GrayImage) -> core::GrayImageView<'_> {
    core::GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Run the legacy bit-pattern pipeline on caller-supplied candidate quads.
pub fn decode_blocks(
    img: &::image::GrayImage,
    candidates: &[core::Quad],
    params: &PipelineParams,
) -> Vec<BlockDecode> {
    marker::decode_block_markers(&gray_view(img), candidates, params)
}

/// Run the recognition pipeline with the given backend context.
pub fn decode_with_backend(
    img: &::image::GrayImage,
    candidates: &[core::Quad],
    params: &PipelineParams,
    ctx: &mut recog::RecognitionContext,
) -> marker::Result<Vec<Marker>> {
    marker::decode_markers(&gray_view(img), candidates, params, ctx)
}

/// Run the exhaustive template matcher against a marker image database.
pub fn decode_exhaustive(
    img: &::image::GrayImage,
    candidates: &[core::Quad],
    params: &PipelineParams,
    db: &matching::MarkerImageDatabase,
) -> Vec<Marker> {
    marker::decode_markers_exhaustive(&gray_view(img), candidates, params, db)
}
