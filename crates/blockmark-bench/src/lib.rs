//! Synthetic scenes shared by the benches.

use blockmark::core::{GrayImage, Quad};
use blockmark::marker::encode_payload;
use nalgebra::Point2;

pub const DARK: u8 = 25;
pub const BRIGHT: u8 = 235;

/// Canonical marker render: dark border band, bright margin, 5x5 bit cells
/// with the bright orientation corner at the top-left.
pub fn render_marker(block: i16, face: i16, img_side: usize, origin: f32, side: f32) -> GrayImage {
    let payload = encode_payload(block, face).expect("ids in range");

    let mut cells = [false; 25];
    let mut p = 0;
    for (idx, cell) in cells.iter_mut().enumerate() {
        *cell = match idx {
            0 => false,
            4 | 20 | 24 => true,
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
            } else if (0.2..0.8).contains(&u) && (0.2..0.8).contains(&v) {
                let col = (((u - 0.2) / 0.12) as usize).min(4);
                let row = (((v - 0.2) / 0.12) as usize).min(4);
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

pub fn marker_quad(origin: f32, side: f32) -> Quad {
    Quad::new([
        Point2::new(origin, origin),
        Point2::new(origin, origin + side),
        Point2::new(origin + side, origin),
        Point2::new(origin + side, origin + side),
    ])
}
