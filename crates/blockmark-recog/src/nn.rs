//! Nearest-neighbor template library.
//!
//! Canonical marker renders are stored as probe-grid-sized gray patches; a
//! query is classified by the template with the smallest mean absolute
//! gray difference.

use crate::{Error, Result};
use blockmark_core::{MarkerLabel, MarkerVocabulary};
use std::path::Path;

pub struct Template {
    pub label: MarkerLabel,
    pub pixels: Vec<u8>,
}

pub struct NearestNeighborLibrary {
    grid_size: usize,
    templates: Vec<Template>,
}

impl NearestNeighborLibrary {
    pub fn new(grid_size: usize) -> Self {
        Self {
            grid_size,
            templates: Vec::new(),
        }
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn add_template(&mut self, label: MarkerLabel, pixels: Vec<u8>) -> Result<()> {
        if pixels.len() != self.grid_size * self.grid_size {
            return Err(Error::Shape(format!(
                "template length {} does not match grid size {}",
                pixels.len(),
                self.grid_size
            )));
        }
        self.templates.push(Template { label, pixels });
        Ok(())
    }

    /// Load every PNG in a directory; labels are parsed from file names.
    /// Images are resampled (nearest) to the library grid size.
    pub fn from_dir(dir: &Path, grid_size: usize) -> Result<Self> {
        let mut lib = Self::new(grid_size);
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .map(|e| e.eq_ignore_ascii_case("png"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        for path in paths {
            let name = path.to_string_lossy();
            let label = MarkerVocabulary::label_from_name(&name);
            if !label.is_recognizable() {
                log::warn!("skipping {name}: not a vocabulary marker name");
                continue;
            }
            let gray = image::open(&path)?.to_luma8();
            lib.templates.push(Template {
                label,
                pixels: resample_nearest(&gray, grid_size),
            });
        }
        Ok(lib)
    }

    /// Best-matching template and its mean absolute gray distance (0..255).
    pub fn classify(&self, grid: &[u8]) -> Option<(MarkerLabel, f32)> {
        debug_assert_eq!(grid.len(), self.grid_size * self.grid_size);
        let mut best: Option<(MarkerLabel, u64)> = None;
        for t in &self.templates {
            let mut acc = 0u64;
            for (&a, &b) in t.pixels.iter().zip(grid.iter()) {
                acc += a.abs_diff(b) as u64;
            }
            match best {
                Some((_, d)) if acc >= d => {}
                _ => best = Some((t.label, acc)),
            }
        }
        best.map(|(label, acc)| (label, acc as f32 / grid.len() as f32))
    }
}

fn resample_nearest(img: &image::GrayImage, n: usize) -> Vec<u8> {
    let (w, h) = img.dimensions();
    let mut out = Vec::with_capacity(n * n);
    for y in 0..n {
        let sy = ((y as f32 + 0.5) / n as f32 * h as f32) as u32;
        for x in 0..n {
            let sx = ((x as f32 + 0.5) / n as f32 * w as f32) as u32;
            out.push(img.get_pixel(sx.min(w - 1), sy.min(h - 1))[0]);
        }
    }
    out
}
