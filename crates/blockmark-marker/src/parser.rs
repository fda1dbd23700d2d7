//! Legacy bit-probe decoder.
//!
//! A block marker carries a 5x5 grid of bit cells inside its dark border:
//! four orientation cells at the grid corners (the single bright one points
//! "up") and 21 payload cells read in row-major order as 8 block bits, 5
//! face bits and 8 checksum bits. Dark cells read as 1. Block and face IDs
//! are `1 + big-endian(bits)`; a checksum mismatch yields -1 for both.
//!
//! All probe arithmetic is integer fixed point: per-bit probe weights sum to
//! `1 << FRACTIONAL_BITS`.

use blockmark_core::{
    homography_from_unit_square, probe_weighted, Error, GrayImageView, Quad, Result,
    FRACTIONAL_BITS,
};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const MAX_MARKER_BITS: usize = 64;
pub const DEFAULT_GRID: usize = 5;
pub const NUM_BLOCK_BITS: usize = 8;
pub const NUM_FACE_BITS: usize = 5;
pub const NUM_CHECK_BITS: usize = 8;

/// Extent of one bit cell in marker space; the bit region spans [0.2, 0.8].
pub const BIT_CELL_PITCH: f32 = 0.12;
pub const BIT_REGION_ORIGIN: f32 = 0.2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitType {
    None,
    Block,
    Face,
    Checksum,
    OrientationUp,
    OrientationDown,
    OrientationLeft,
    OrientationRight,
}

/// One probe group: weighted marker-space sample points for a single bit.
#[derive(Clone, Debug)]
pub struct ParserBit {
    probes: Vec<((f32, f32), u16)>,
    bit_type: BitType,
}

impl ParserBit {
    pub fn new(probes: Vec<((f32, f32), u16)>, bit_type: BitType) -> Self {
        Self { probes, bit_type }
    }

    pub fn bit_type(&self) -> BitType {
        self.bit_type
    }

    fn measure(&self, image: &GrayImageView<'_>, h: &blockmark_core::Homography) -> u8 {
        probe_weighted(image, h, &self.probes)
    }
}

/// Which way the marker's bright orientation corner points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    Unknown,
    Up,
    Down,
    Left,
    Right,
}

impl Orientation {
    /// Scatter permutation restoring canonical corner order:
    /// `canonical[perm[i]] = observed[i]`.
    pub fn corner_permutation(&self) -> [usize; 4] {
        match self {
            Orientation::Unknown | Orientation::Up => [0, 1, 2, 3],
            Orientation::Down => [3, 2, 1, 0],
            Orientation::Left => [1, 3, 0, 2],
            Orientation::Right => [2, 0, 3, 1],
        }
    }

    pub fn degrees(&self) -> f32 {
        match self {
            Orientation::Unknown | Orientation::Up => 0.0,
            Orientation::Left => 90.0,
            Orientation::Down => 180.0,
            Orientation::Right => 270.0,
        }
    }

    /// Reading-order table for an `n x n` grid: entry `k` is the observed
    /// grid index holding the bit at canonical reading position `k`.
    fn reading_order(&self, n: usize) -> Vec<usize> {
        let mut out = Vec::with_capacity(n * n);
        for r in 0..n {
            for c in 0..n {
                let idx = match self {
                    Orientation::Unknown | Orientation::Up => r * n + c,
                    Orientation::Down => (n - 1 - r) * n + (n - 1 - c),
                    Orientation::Left => c * n + (n - 1 - r),
                    Orientation::Right => (n - 1 - c) * n + r,
                };
                out.push(idx);
            }
        }
        out
    }
}

/// Restore canonical corner order from an observed quad.
pub fn correct_corners(observed: &Quad, orientation: Orientation) -> Quad {
    let perm = orientation.corner_permutation();
    let mut out = *observed;
    for i in 0..4 {
        out.corners[perm[i]] = observed.corners[i];
    }
    out
}

/// Legacy decode result.
#[derive(Clone, Copy, Debug)]
pub struct BlockMarker {
    /// Orientation-corrected corners, canonical order.
    pub corners: Quad,
    /// 1-based block ID, -1 when undetermined.
    pub block_type: i16,
    /// 1-based face ID, -1 when undetermined.
    pub face_type: i16,
    pub orientation: Orientation,
}

impl BlockMarker {
    pub fn is_decoded(&self) -> bool {
        self.block_type >= 0 && self.face_type >= 0
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeParams {
    /// The bright orientation bit must exceed this ratio over the mean of
    /// the other three, or the decode reports orientation `Unknown`.
    pub min_contrast_ratio: f32,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            min_contrast_ratio: 1.25,
        }
    }
}

/// Ordered probe groups for one marker layout plus the cached positions of
/// the four orientation bits.
pub struct BitPatternParser {
    bits: Vec<ParserBit>,
    grid_n: usize,
    /// Indices of the Up, Down, Left, Right orientation bits.
    orientation_indices: [usize; 4],
}

impl BitPatternParser {
    pub fn new(bits: Vec<ParserBit>) -> Result<Self> {
        if bits.is_empty() || bits.len() > MAX_MARKER_BITS {
            return Err(Error::InvalidSize(format!(
                "{} bits outside 1..={MAX_MARKER_BITS}",
                bits.len()
            )));
        }
        let grid_n = (bits.len() as f64).sqrt() as usize;
        if grid_n * grid_n != bits.len() {
            return Err(Error::InvalidSize(format!(
                "{} bits do not form a square grid",
                bits.len()
            )));
        }

        let mut indices = [usize::MAX; 4];
        for (i, bit) in bits.iter().enumerate() {
            let slot = match bit.bit_type {
                BitType::OrientationUp => 0,
                BitType::OrientationDown => 1,
                BitType::OrientationLeft => 2,
                BitType::OrientationRight => 3,
                _ => continue,
            };
            if indices[slot] != usize::MAX {
                return Err(Error::InvalidObject(
                    "duplicate orientation bit in layout".into(),
                ));
            }
            indices[slot] = i;
        }
        if indices.contains(&usize::MAX) {
            return Err(Error::InvalidObject(
                "layout is missing an orientation bit".into(),
            ));
        }

        Ok(Self {
            bits,
            grid_n,
            orientation_indices: indices,
        })
    }

    /// Process-default 25-bit layout on the 5x5 grid.
    pub fn default_grid() -> &'static BitPatternParser {
        static DEFAULT: OnceLock<BitPatternParser> = OnceLock::new();
        DEFAULT.get_or_init(|| {
            let n = DEFAULT_GRID;
            let center_weight: u16 = 52;
            let arm_weight: u16 = 51; // 52 + 4*51 = 1 << FRACTIONAL_BITS
            debug_assert_eq!(
                center_weight as u32 + 4 * arm_weight as u32,
                1 << FRACTIONAL_BITS
            );

            let mut bits = Vec::with_capacity(n * n);
            let mut payload = 0usize;
            for row in 0..n {
                for col in 0..n {
                    let idx = row * n + col;
                    let bit_type = match idx {
                        0 => BitType::OrientationUp,
                        4 => BitType::OrientationLeft,
                        20 => BitType::OrientationRight,
                        24 => BitType::OrientationDown,
                        _ => {
                            let t = if payload < NUM_BLOCK_BITS {
                                BitType::Block
                            } else if payload < NUM_BLOCK_BITS + NUM_FACE_BITS {
                                BitType::Face
                            } else {
                                BitType::Checksum
                            };
                            payload += 1;
                            t
                        }
                    };

                    let cx = BIT_REGION_ORIGIN + (col as f32 + 0.5) * BIT_CELL_PITCH;
                    let cy = BIT_REGION_ORIGIN + (row as f32 + 0.5) * BIT_CELL_PITCH;
                    let r = 0.02;
                    let probes = vec![
                        ((cx, cy), center_weight),
                        ((cx - r, cy), arm_weight),
                        ((cx + r, cy), arm_weight),
                        ((cx, cy - r), arm_weight),
                        ((cx, cy + r), arm_weight),
                    ];
                    bits.push(ParserBit::new(probes, bit_type));
                }
            }
            BitPatternParser::new(bits).expect("compiled-in probe table forms a valid layout")
        })
    }

    pub fn num_bits(&self) -> usize {
        self.bits.len()
    }

    /// Decode the marker inside `quad`.
    ///
    /// Insufficient orientation contrast is not an error: the result carries
    /// `Orientation::Unknown` and undetermined IDs. A degenerate quad is.
    pub fn parse(
        &self,
        image: &GrayImageView<'_>,
        quad: &Quad,
        params: &DecodeParams,
    ) -> Result<BlockMarker> {
        let h = homography_from_unit_square(quad)
            .ok_or_else(|| Error::InvalidObject("degenerate candidate quad".into()))?;

        let means: Vec<u8> = self.bits.iter().map(|b| b.measure(image, &h)).collect();

        let orientation_means =
            self.orientation_indices.map(|i| means[i] as u32);
        let (orientation, bright) = pick_orientation(&orientation_means);
        let dark =
            (orientation_means.iter().sum::<u32>() - bright) / 3;

        if bright == 0 || (bright as f32) < params.min_contrast_ratio * dark as f32 {
            return Ok(BlockMarker {
                corners: *quad,
                block_type: -1,
                face_type: -1,
                orientation: Orientation::Unknown,
            });
        }
        let threshold = ((bright + dark) / 2) as u8;

        let order = orientation.reading_order(self.grid_n);
        let mut block_bits = Vec::with_capacity(NUM_BLOCK_BITS);
        let mut face_bits = Vec::with_capacity(NUM_FACE_BITS);
        let mut check_bits = Vec::with_capacity(NUM_CHECK_BITS);
        for (k, bit) in self.bits.iter().enumerate() {
            let value = means[order[k]];
            let b = u8::from(value < threshold);
            match bit.bit_type {
                BitType::Block => block_bits.push(b),
                BitType::Face => face_bits.push(b),
                BitType::Checksum => check_bits.push(b),
                _ => {}
            }
        }

        let (block_type, face_type) = decode_ids(&block_bits, &face_bits, &check_bits);
        Ok(BlockMarker {
            corners: correct_corners(quad, orientation),
            block_type,
            face_type,
            orientation,
        })
    }
}

/// Brightest orientation bit wins; exact ties silently favor
/// Up > Down > Left > Right.
fn pick_orientation(means: &[u32; 4]) -> (Orientation, u32) {
    let order = [
        (Orientation::Up, means[0]),
        (Orientation::Down, means[1]),
        (Orientation::Left, means[2]),
        (Orientation::Right, means[3]),
    ];
    let mut best = order[0];
    for &cand in &order[1..] {
        if cand.1 > best.1 {
            best = cand;
        }
    }
    best
}

/// Checksum bits over the block and face payloads.
///
/// The cyclic schedule pairs each check bit with one face bit and two block
/// bits: `i_block2 = (i_block1 mod nBlock) + 1`, `i_face = ((i-1) mod nFace)
/// + 1`, expected value `face ^ block1 ^ block2`, then `i_block1` advances.
/// Indices are 1-based, `i_block1` starting at 1.
pub fn compute_checksum(block_bits: &[u8], face_bits: &[u8]) -> Vec<u8> {
    let n_block = block_bits.len();
    let n_face = face_bits.len();
    let mut out = Vec::with_capacity(NUM_CHECK_BITS);
    let mut i_block1 = 1usize;
    for i in 1..=NUM_CHECK_BITS {
        let i_block2 = (i_block1 % n_block) + 1;
        let i_face = ((i - 1) % n_face) + 1;
        out.push(face_bits[i_face - 1] ^ block_bits[i_block1 - 1] ^ block_bits[i_block2 - 1]);
        i_block1 = (i_block1 % n_block) + 1;
    }
    out
}

/// Verify the checksum and derive 1-based IDs from big-endian bit strings.
/// A mismatch yields (-1, -1).
pub fn decode_ids(block_bits: &[u8], face_bits: &[u8], check_bits: &[u8]) -> (i16, i16) {
    if compute_checksum(block_bits, face_bits) != check_bits {
        return (-1, -1);
    }
    let block = block_bits
        .iter()
        .fold(0i16, |acc, &b| (acc << 1) | b as i16);
    let face = face_bits.iter().fold(0i16, |acc, &b| (acc << 1) | b as i16);
    (block + 1, face + 1)
}

/// Payload bits (block, face, checksum concatenated) for a given ID pair.
/// Used to generate markers; `None` when either ID is out of range.
pub fn encode_payload(block_type: i16, face_type: i16) -> Option<[u8; 21]> {
    if !(1..=1 << NUM_BLOCK_BITS).contains(&block_type)
        || !(1..=1 << NUM_FACE_BITS).contains(&face_type)
    {
        return None;
    }
    let b = (block_type - 1) as u16;
    let f = (face_type - 1) as u16;

    let mut out = [0u8; 21];
    for i in 0..NUM_BLOCK_BITS {
        out[i] = ((b >> (NUM_BLOCK_BITS - 1 - i)) & 1) as u8;
    }
    for i in 0..NUM_FACE_BITS {
        out[NUM_BLOCK_BITS + i] = ((f >> (NUM_FACE_BITS - 1 - i)) & 1) as u8;
    }
    let check = compute_checksum(&out[..NUM_BLOCK_BITS], &out[NUM_BLOCK_BITS..13]);
    out[13..].copy_from_slice(&check);
    Some(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use blockmark_core::GrayImage;
    use nalgebra::Point2;

    pub(crate) const DARK: u8 = 25;
    pub(crate) const BRIGHT: u8 = 235;

    /// Render a canonical marker: dark border band, bright margin, 5x5 bit
    /// cells with the bright orientation corner at the top-left.
    pub(crate) fn render_marker(
        payload: &[u8; 21],
        img_side: usize,
        origin: f32,
        side: f32,
    ) -> GrayImage {
        // Grid cell values in row-major order, true = dark.
        let mut cells = [false; 25];
        let mut p = 0;
        for (idx, cell) in cells.iter_mut().enumerate() {
            *cell = match idx {
                0 => false,            // bright orientation corner (Up)
                4 | 20 | 24 => true,   // dark orientation corners
                _ => {
                    let v = payload[p] == 1;
                    p += 1;
                    v
                }
            };
        }

        let mut img = GrayImage::new(img_side, img_side);
        img.data.fill(BRIGHT);
        for y in 0..img_side {
            for x in 0..img_side {
                let u = (x as f32 - origin) / side;
                let v = (y as f32 - origin) / side;
                if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
                    continue;
                }
                let edge = u.min(v).min(1.0 - u).min(1.0 - v);
                let dark = if edge <= 0.1 {
                    true
                } else if (BIT_REGION_ORIGIN..0.8).contains(&u)
                    && (BIT_REGION_ORIGIN..0.8).contains(&v)
                {
                    let col = (((u - BIT_REGION_ORIGIN) / BIT_CELL_PITCH) as usize).min(4);
                    let row = (((v - BIT_REGION_ORIGIN) / BIT_CELL_PITCH) as usize).min(4);
                    cells[row * 5 + col]
                } else {
                    false
                };
                if dark {
                    img.data[y * img_side + x] = DARK;
                }
            }
        }
        img
    }

    pub(crate) fn marker_quad(origin: f32, side: f32) -> Quad {
        Quad::new([
            Point2::new(origin, origin),
            Point2::new(origin, origin + side),
            Point2::new(origin + side, origin),
            Point2::new(origin + side, origin + side),
        ])
    }

    #[test]
    fn checksum_round_trips() {
        for (block, face) in [(1, 1), (37, 5), (256, 32), (128, 17), (2, 31)] {
            let bits = encode_payload(block, face).expect("in range");
            let (b, f) = decode_ids(&bits[..8], &bits[8..13], &bits[13..]);
            assert_eq!((b, f), (block, face));
        }
    }

    #[test]
    fn out_of_range_ids_do_not_encode() {
        assert!(encode_payload(0, 1).is_none());
        assert!(encode_payload(257, 1).is_none());
        assert!(encode_payload(1, 33).is_none());
    }

    #[test]
    fn single_bit_flip_is_rejected() {
        let bits = encode_payload(91, 12).unwrap();
        for i in 0..21 {
            let mut flipped = bits;
            flipped[i] ^= 1;
            let (b, f) = decode_ids(&flipped[..8], &flipped[8..13], &flipped[13..]);
            assert_eq!((b, f), (-1, -1), "flip of bit {i} was not rejected");
        }
    }

    #[test]
    fn tie_prefers_up_over_all() {
        // The argmax keeps the first maximum in Up > Down > Left > Right
        // order; exact ties therefore resolve toward Up.
        assert_eq!(pick_orientation(&[200, 200, 200, 200]).0, Orientation::Up);
        assert_eq!(pick_orientation(&[200, 200, 10, 10]).0, Orientation::Up);
        assert_eq!(pick_orientation(&[10, 200, 200, 10]).0, Orientation::Down);
        assert_eq!(pick_orientation(&[10, 10, 200, 200]).0, Orientation::Left);
        assert_eq!(pick_orientation(&[10, 10, 10, 200]).0, Orientation::Right);
    }

    #[test]
    fn decodes_rendered_marker_upright() {
        let payload = encode_payload(37, 5).unwrap();
        let img = render_marker(&payload, 200, 25.0, 150.0);
        let quad = marker_quad(25.0, 150.0);

        let parser = BitPatternParser::default_grid();
        let m = parser
            .parse(&img.view(), &quad, &DecodeParams::default())
            .unwrap();
        assert_eq!(m.orientation, Orientation::Up);
        assert_eq!(m.block_type, 37);
        assert_eq!(m.face_type, 5);
        assert!(m.is_decoded());
    }

    #[test]
    fn decode_is_orientation_invariant() {
        let payload = encode_payload(200, 21).unwrap();
        let img = render_marker(&payload, 200, 25.0, 150.0);
        let canonical = marker_quad(25.0, 150.0);
        let parser = BitPatternParser::default_grid();

        let cases = [
            (Orientation::Up, [0usize, 1, 2, 3]),
            (Orientation::Down, [3, 2, 1, 0]),
            (Orientation::Left, [1, 3, 0, 2]),
            (Orientation::Right, [2, 0, 3, 1]),
        ];
        for (expected, perm) in cases {
            let observed = canonical.permuted(perm);
            let m = parser
                .parse(&img.view(), &observed, &DecodeParams::default())
                .unwrap();
            assert_eq!(m.orientation, expected);
            assert_eq!(m.block_type, 200, "{expected:?}");
            assert_eq!(m.face_type, 21, "{expected:?}");
            // Corrected corners come back in canonical order.
            for i in 0..4 {
                assert_eq!(m.corners[i], canonical[i], "{expected:?} corner {i}");
            }
        }
    }

    #[test]
    fn flat_image_reports_unknown_orientation() {
        let mut img = GrayImage::new(200, 200);
        img.data.fill(128);
        let quad = marker_quad(25.0, 150.0);
        let parser = BitPatternParser::default_grid();
        let m = parser
            .parse(&img.view(), &quad, &DecodeParams::default())
            .unwrap();
        assert_eq!(m.orientation, Orientation::Unknown);
        assert_eq!(m.block_type, -1);
        assert!(!m.is_decoded());
    }

    #[test]
    fn layouts_without_orientation_bits_are_rejected() {
        let bit = ParserBit::new(vec![((0.5, 0.5), 256)], BitType::Block);
        assert!(BitPatternParser::new(vec![bit; 25]).is_err());
    }
}
