//! Band-interleaved marker image database.
//!
//! All database images share one square geometry. Bytes are stored by pixel
//! position first, image index last (`stripe = (y * width + x) * n + i`), so
//! the matcher touches one warped image sample and then walks a contiguous
//! stripe across every database image. Read-only after build.

use crate::{Error, Result};
use blockmark_core::{MarkerLabel, MarkerVocabulary};
use std::path::Path;

#[derive(Clone, Debug)]
pub struct MarkerImageDatabase {
    num_images: usize,
    image_height: usize,
    image_width: usize,
    data: Vec<u8>,
    labels: Vec<MarkerLabel>,
}

impl MarkerImageDatabase {
    /// Build from row-major gray images, all `height x width`.
    pub fn from_images(
        height: usize,
        width: usize,
        images: &[(MarkerLabel, Vec<u8>)],
    ) -> Result<Self> {
        if height == 0 || width == 0 {
            return Err(Error::EmptyDatabase);
        }
        for (label, pixels) in images {
            if pixels.len() != height * width {
                return Err(Error::GeometryMismatch {
                    label: label.name(),
                    expected: height * width,
                    actual: pixels.len(),
                });
            }
        }

        let n = images.len();
        let mut data = vec![0u8; height * width * n];
        for (i, (_, pixels)) in images.iter().enumerate() {
            for (pos, &v) in pixels.iter().enumerate() {
                data[pos * n + i] = v;
            }
        }

        Ok(Self {
            num_images: n,
            image_height: height,
            image_width: width,
            data,
            labels: images.iter().map(|(l, _)| *l).collect(),
        })
    }

    /// Load every PNG in a directory, nearest-resampled to `height x width`;
    /// labels come from the file names. Non-vocabulary names are skipped
    /// with a warning.
    pub fn from_dir(dir: &Path, height: usize, width: usize) -> Result<Self> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .map(|e| e.eq_ignore_ascii_case("png"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            let name = path.to_string_lossy();
            let label = MarkerVocabulary::label_from_name(&name);
            if !label.is_recognizable() {
                log::warn!("skipping {name}: not a vocabulary marker name");
                continue;
            }
            let gray = image::open(&path)?.to_luma8();
            images.push((label, resample_nearest(&gray, height, width)));
        }
        Self::from_images(height, width, &images)
    }

    pub fn num_images(&self) -> usize {
        self.num_images
    }

    pub fn image_height(&self) -> usize {
        self.image_height
    }

    pub fn image_width(&self) -> usize {
        self.image_width
    }

    pub fn label(&self, i: usize) -> MarkerLabel {
        self.labels[i]
    }

    /// One byte of image `i` at database pixel `(y, x)`.
    #[inline]
    pub fn value(&self, y: usize, x: usize, i: usize) -> u8 {
        self.data[(y * self.image_width + x) * self.num_images + i]
    }

    /// The stripe of all database images at pixel `(y, x)`.
    #[inline]
    pub fn stripe(&self, y: usize, x: usize) -> &[u8] {
        let base = (y * self.image_width + x) * self.num_images;
        &self.data[base..base + self.num_images]
    }
}

fn resample_nearest(img: &image::GrayImage, height: usize, width: usize) -> Vec<u8> {
    let (w, h) = img.dimensions();
    let mut out = Vec::with_capacity(height * width);
    for y in 0..height {
        let sy = ((y as f32 + 0.5) / height as f32 * h as f32) as u32;
        for x in 0..width {
            let sx = ((x as f32 + 0.5) / width as f32 * w as f32) as u32;
            out.push(img.get_pixel(sx.min(w - 1), sy.min(h - 1))[0]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockmark_core::{MarkerSymbol, Rotation};

    fn label(sym: MarkerSymbol) -> MarkerLabel {
        MarkerLabel::new(sym, Rotation::Deg0)
    }

    #[test]
    fn stripes_interleave_by_pixel_position() {
        let a = vec![1u8, 2, 3, 4];
        let b = vec![10u8, 20, 30, 40];
        let db = MarkerImageDatabase::from_images(
            2,
            2,
            &[(label(MarkerSymbol::Arrow), a), (label(MarkerSymbol::Gears), b)],
        )
        .unwrap();

        assert_eq!(db.num_images(), 2);
        assert_eq!(db.stripe(0, 0), &[1, 10]);
        assert_eq!(db.stripe(1, 1), &[4, 40]);
        assert_eq!(db.value(0, 1, 1), 20);
    }

    #[test]
    fn mismatched_image_size_is_rejected() {
        let err = MarkerImageDatabase::from_images(
            2,
            2,
            &[(label(MarkerSymbol::Arrow), vec![0u8; 3])],
        )
        .unwrap_err();
        assert!(matches!(err, Error::GeometryMismatch { .. }));
    }

    #[test]
    fn loads_directory_and_parses_labels() {
        let dir = tempfile::tempdir().unwrap();
        let img = image::GrayImage::from_pixel(8, 8, image::Luma([255u8]));
        img.save(dir.path().join("MARKER_CLOVER_180.png")).unwrap();
        img.save(dir.path().join("notes.png")).unwrap();

        let db = MarkerImageDatabase::from_dir(dir.path(), 4, 4).unwrap();
        assert_eq!(db.num_images(), 1);
        assert_eq!(db.label(0).symbol, MarkerSymbol::Clover);
        assert_eq!(db.label(0).rotation, Rotation::Deg180);
        assert_eq!(db.value(2, 2, 0), 255);
    }
}
