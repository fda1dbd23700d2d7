//! Dense f32 activation tensors.
//!
//! Layout is row-major with depth minor: `index = (y * width + x) * depth + d`.
//! All layers consume and produce this layout.

use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    pub height: usize,
    pub width: usize,
    pub depth: usize,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn zeros(height: usize, width: usize, depth: usize) -> Self {
        Self {
            height,
            width,
            depth,
            data: vec![0.0; height * width * depth],
        }
    }

    pub fn from_vec(height: usize, width: usize, depth: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != height * width * depth {
            return Err(Error::Shape(format!(
                "tensor data length {} does not match {}x{}x{}",
                data.len(),
                height,
                width,
                depth
            )));
        }
        Ok(Self {
            height,
            width,
            depth,
            data,
        })
    }

    /// Single-channel tensor from a square gray probe grid, scaled to 0..1.
    pub fn from_gray_grid(grid: &[u8], n: usize) -> Result<Self> {
        if grid.len() != n * n {
            return Err(Error::Shape(format!(
                "grid length {} is not {n}x{n}",
                grid.len()
            )));
        }
        Ok(Self {
            height: n,
            width: n,
            depth: 1,
            data: grid.iter().map(|&v| v as f32 / 255.0).collect(),
        })
    }

    #[inline]
    pub fn at(&self, y: usize, x: usize, d: usize) -> f32 {
        self.data[(y * self.width + x) * self.depth + d]
    }

    #[inline]
    pub fn set(&mut self, y: usize, x: usize, d: usize, v: f32) {
        self.data[(y * self.width + x) * self.depth + d] = v;
    }

    /// Read with padding semantics: coordinates outside the spatial extent
    /// read as 0.
    #[inline]
    pub fn at_padded(&self, y: i64, x: i64, d: usize) -> f32 {
        if y < 0 || x < 0 || y >= self.height as i64 || x >= self.width as i64 {
            return 0.0;
        }
        self.at(y as usize, x as usize, d)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Index and value of the largest element.
    pub fn argmax(&self) -> Option<(usize, f32)> {
        let mut best: Option<(usize, f32)> = None;
        for (i, &v) in self.data.iter().enumerate() {
            match best {
                Some((_, b)) if v <= b => {}
                _ => best = Some((i, v)),
            }
        }
        best
    }
}
