//! Forward-pass layers: convolution, pooling, local response normalization
//! and ReLU.
//!
//! Each layer is loaded from a `definition.json` entry (`LayerSpec` mirrors
//! the file's field names) plus an optional raw little-endian f32 weight
//! file laid out filters-then-biases.

use crate::cnn::tensor::Tensor;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;

fn default_stride() -> usize {
    1
}

fn default_method() -> String {
    "max".to_string()
}

fn default_kappa() -> f32 {
    1.0
}

fn default_beta() -> f32 {
    0.75
}

/// One entry of the `"Layers"` array in `definition.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct LayerSpec {
    #[serde(rename = "Type")]
    pub layer_type: String,

    #[serde(rename = "strideX", default = "default_stride")]
    pub stride_x: usize,
    #[serde(rename = "strideY", default = "default_stride")]
    pub stride_y: usize,

    #[serde(rename = "padLeft", default)]
    pub pad_left: usize,
    #[serde(rename = "padRight", default)]
    pub pad_right: usize,
    #[serde(rename = "padTop", default)]
    pub pad_top: usize,
    #[serde(rename = "padBottom", default)]
    pub pad_bottom: usize,

    #[serde(rename = "weightHeight", default)]
    pub weight_height: usize,
    #[serde(rename = "weightWidth", default)]
    pub weight_width: usize,
    #[serde(rename = "weightDepth", default)]
    pub weight_depth: usize,
    #[serde(rename = "weightSize", default)]
    pub weight_size: usize,

    #[serde(rename = "DataFilename", default)]
    pub data_filename: Option<String>,

    #[serde(rename = "biasHeight", default)]
    pub bias_height: usize,
    #[serde(rename = "biasWidth", default)]
    pub bias_width: usize,

    #[serde(rename = "poolWidth", default)]
    pub pool_width: usize,
    #[serde(rename = "poolHeight", default)]
    pub pool_height: usize,
    #[serde(rename = "method", default = "default_method")]
    pub method: String,

    #[serde(rename = "normDepth", default)]
    pub norm_depth: usize,
    #[serde(rename = "normAlpha", default)]
    pub norm_alpha: f32,
    #[serde(rename = "normKappa", default = "default_kappa")]
    pub norm_kappa: f32,
    #[serde(rename = "normBeta", default = "default_beta")]
    pub norm_beta: f32,
}

/// `(in + pad_a + pad_b - window) / stride + 1`, checked.
fn out_extent(input: usize, pad_a: usize, pad_b: usize, window: usize, stride: usize) -> Result<usize> {
    let padded = input + pad_a + pad_b;
    if window == 0 {
        return Err(Error::Shape("zero window extent".into()));
    }
    if stride == 0 {
        return Err(Error::Shape("zero stride".into()));
    }
    if window > padded {
        return Err(Error::Shape(format!(
            "window {window} exceeds padded input {padded}"
        )));
    }
    Ok((padded - window) / stride + 1)
}

fn read_f32_file(path: &Path) -> Result<Vec<f32>> {
    let bytes = std::fs::read(path)?;
    if bytes.len() % 4 != 0 {
        return Err(Error::Model(format!(
            "weight file {} is not a whole number of f32s",
            path.display()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub struct ConvLayer {
    stride_x: usize,
    stride_y: usize,
    pad_left: usize,
    pad_right: usize,
    pad_top: usize,
    pad_bottom: usize,
    filter_h: usize,
    filter_w: usize,
    filter_depth: usize,
    num_filters: usize,
    /// Layout `[filter][fy][fx][fd]`, matching the tensor layout so the
    /// fully-connected case reduces to a flat dot product.
    weights: Vec<f32>,
    biases: Vec<f32>,
}

impl ConvLayer {
    pub fn load(dir: &Path, spec: &LayerSpec) -> Result<Self> {
        let num_filters = spec.weight_size;
        let mut weights = Vec::new();
        let mut biases = Vec::new();

        if num_filters > 0 {
            if spec.weight_height == 0 || spec.weight_width == 0 || spec.weight_depth == 0 {
                return Err(Error::Model("convolution filter with a zero extent".into()));
            }
            let bias_count = spec.bias_height * spec.bias_width;
            if bias_count != num_filters {
                return Err(Error::Model(format!(
                    "bias count {bias_count} does not match filter count {num_filters}"
                )));
            }
            let file = spec
                .data_filename
                .as_deref()
                .ok_or_else(|| Error::Model("convolution layer without DataFilename".into()))?;
            let raw = read_f32_file(&dir.join(file))?;
            let weight_count =
                num_filters * spec.weight_height * spec.weight_width * spec.weight_depth;
            if raw.len() != weight_count + num_filters {
                return Err(Error::Model(format!(
                    "weight file holds {} values, expected {} filters + {} biases",
                    raw.len(),
                    weight_count,
                    num_filters
                )));
            }
            weights = raw[..weight_count].to_vec();
            biases = raw[weight_count..].to_vec();
        } else if let Some(file) = spec.data_filename.as_deref() {
            // Identity filter bank still carries per-channel biases.
            biases = read_f32_file(&dir.join(file))?;
        }

        Ok(Self {
            stride_x: spec.stride_x,
            stride_y: spec.stride_y,
            pad_left: spec.pad_left,
            pad_right: spec.pad_right,
            pad_top: spec.pad_top,
            pad_bottom: spec.pad_bottom,
            filter_h: spec.weight_height,
            filter_w: spec.weight_width,
            filter_depth: spec.weight_depth,
            num_filters,
            weights,
            biases,
        })
    }

    #[cfg(test)]
    pub fn from_parts(
        stride: (usize, usize),
        pad: (usize, usize, usize, usize),
        filter: (usize, usize, usize, usize),
        weights: Vec<f32>,
        biases: Vec<f32>,
    ) -> Self {
        Self {
            stride_x: stride.0,
            stride_y: stride.1,
            pad_left: pad.0,
            pad_right: pad.1,
            pad_top: pad.2,
            pad_bottom: pad.3,
            filter_h: filter.0,
            filter_w: filter.1,
            filter_depth: filter.2,
            num_filters: filter.3,
            weights,
            biases,
        }
    }

    pub fn run(&self, input: &Tensor) -> Result<Tensor> {
        if self.num_filters == 0 {
            return self.run_identity(input);
        }

        let out_h = out_extent(
            input.height,
            self.pad_top,
            self.pad_bottom,
            self.filter_h,
            self.stride_y,
        )?;
        let out_w = out_extent(
            input.width,
            self.pad_left,
            self.pad_right,
            self.filter_w,
            self.stride_x,
        )?;

        if self.filter_depth == 0 || input.depth % self.filter_depth != 0 {
            return Err(Error::Shape(format!(
                "filter depth {} does not divide input depth {}",
                self.filter_depth, input.depth
            )));
        }
        let groups = input.depth / self.filter_depth;
        if self.num_filters % groups != 0 {
            return Err(Error::Shape(format!(
                "{} filters not divisible into {groups} groups",
                self.num_filters
            )));
        }
        let filters_per_group = self.num_filters / groups;

        // Fully-connected fast path: the filter covers the whole input and
        // both layouts agree, so each output is a flat dot product.
        if out_h == 1
            && out_w == 1
            && groups == 1
            && self.stride_x == 1
            && self.stride_y == 1
            && self.pad_left + self.pad_right + self.pad_top + self.pad_bottom == 0
        {
            let len = input.len();
            let mut out = Tensor::zeros(1, 1, self.num_filters);
            for f in 0..self.num_filters {
                let w = &self.weights[f * len..(f + 1) * len];
                let mut acc = self.biases[f];
                for (wi, xi) in w.iter().zip(input.data.iter()) {
                    acc += wi * xi;
                }
                out.data[f] = acc;
            }
            return Ok(out);
        }

        let mut out = Tensor::zeros(out_h, out_w, self.num_filters);
        let filter_len = self.filter_h * self.filter_w * self.filter_depth;
        for f in 0..self.num_filters {
            let d0 = (f / filters_per_group) * self.filter_depth;
            let fw = &self.weights[f * filter_len..(f + 1) * filter_len];
            for oy in 0..out_h {
                let iy0 = (oy * self.stride_y) as i64 - self.pad_top as i64;
                for ox in 0..out_w {
                    let ix0 = (ox * self.stride_x) as i64 - self.pad_left as i64;
                    let mut acc = self.biases[f];
                    let mut wi = 0;
                    for fy in 0..self.filter_h {
                        for fx in 0..self.filter_w {
                            for fd in 0..self.filter_depth {
                                acc += fw[wi]
                                    * input.at_padded(iy0 + fy as i64, ix0 + fx as i64, d0 + fd);
                                wi += 1;
                            }
                        }
                    }
                    out.set(oy, ox, f, acc);
                }
            }
        }
        Ok(out)
    }

    /// No filters: subsample the (padded) input by the strides and add the
    /// per-channel biases. Output depth equals input depth.
    fn run_identity(&self, input: &Tensor) -> Result<Tensor> {
        let out_h = out_extent(input.height, self.pad_top, self.pad_bottom, 1, self.stride_y)?;
        let out_w = out_extent(input.width, self.pad_left, self.pad_right, 1, self.stride_x)?;
        if !self.biases.is_empty() && self.biases.len() != input.depth {
            return Err(Error::Shape(format!(
                "{} biases for input depth {}",
                self.biases.len(),
                input.depth
            )));
        }

        let mut out = Tensor::zeros(out_h, out_w, input.depth);
        for oy in 0..out_h {
            let iy = (oy * self.stride_y) as i64 - self.pad_top as i64;
            for ox in 0..out_w {
                let ix = (ox * self.stride_x) as i64 - self.pad_left as i64;
                for d in 0..input.depth {
                    let bias = self.biases.get(d).copied().unwrap_or(0.0);
                    out.set(oy, ox, d, input.at_padded(iy, ix, d) + bias);
                }
            }
        }
        Ok(out)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolMethod {
    Max,
    Avg,
}

pub struct PoolLayer {
    window_h: usize,
    window_w: usize,
    stride_x: usize,
    stride_y: usize,
    pad_left: usize,
    pad_right: usize,
    pad_top: usize,
    pad_bottom: usize,
    method: PoolMethod,
}

impl PoolLayer {
    pub fn load(spec: &LayerSpec) -> Result<Self> {
        let method = match spec.method.as_str() {
            "max" => PoolMethod::Max,
            "avg" | "mean" => PoolMethod::Avg,
            other => return Err(Error::Model(format!("unknown pooling method {other:?}"))),
        };
        if spec.pool_height == 0 || spec.pool_width == 0 {
            return Err(Error::Model("pooling window with a zero extent".into()));
        }
        if spec.pad_top.max(spec.pad_bottom) >= spec.pool_height
            || spec.pad_left.max(spec.pad_right) >= spec.pool_width
        {
            return Err(Error::Model(
                "pooling padding must be smaller than the window".into(),
            ));
        }
        Ok(Self {
            window_h: spec.pool_height,
            window_w: spec.pool_width,
            stride_x: spec.stride_x,
            stride_y: spec.stride_y,
            pad_left: spec.pad_left,
            pad_right: spec.pad_right,
            pad_top: spec.pad_top,
            pad_bottom: spec.pad_bottom,
            method,
        })
    }

    #[cfg(test)]
    pub fn from_parts(window: (usize, usize), stride: (usize, usize), method: PoolMethod) -> Self {
        Self {
            window_h: window.0,
            window_w: window.1,
            stride_x: stride.0,
            stride_y: stride.1,
            pad_left: 0,
            pad_right: 0,
            pad_top: 0,
            pad_bottom: 0,
            method,
        }
    }

    pub fn run(&self, input: &Tensor) -> Result<Tensor> {
        let out_h = out_extent(
            input.height,
            self.pad_top,
            self.pad_bottom,
            self.window_h,
            self.stride_y,
        )?;
        let out_w = out_extent(
            input.width,
            self.pad_left,
            self.pad_right,
            self.window_w,
            self.stride_x,
        )?;

        let mut out = Tensor::zeros(out_h, out_w, input.depth);
        for oy in 0..out_h {
            let iy0 = (oy * self.stride_y) as i64 - self.pad_top as i64;
            for ox in 0..out_w {
                let ix0 = (ox * self.stride_x) as i64 - self.pad_left as i64;
                for d in 0..input.depth {
                    let mut max = f32::NEG_INFINITY;
                    let mut sum = 0.0_f32;
                    let mut valid = 0u32;
                    for wy in 0..self.window_h {
                        for wx in 0..self.window_w {
                            let y = iy0 + wy as i64;
                            let x = ix0 + wx as i64;
                            if y < 0
                                || x < 0
                                || y >= input.height as i64
                                || x >= input.width as i64
                            {
                                continue;
                            }
                            let v = input.at(y as usize, x as usize, d);
                            max = max.max(v);
                            sum += v;
                            valid += 1;
                        }
                    }
                    let v = match self.method {
                        PoolMethod::Max => {
                            if valid == 0 {
                                0.0
                            } else {
                                max
                            }
                        }
                        PoolMethod::Avg => {
                            if valid == 0 {
                                0.0
                            } else {
                                sum / valid as f32
                            }
                        }
                    };
                    out.set(oy, ox, d, v);
                }
            }
        }
        Ok(out)
    }
}

/// Local response normalization across the depth axis. Shape preserving.
pub struct NormLayer {
    depth: usize,
    alpha: f32,
    beta: f32,
    kappa: f32,
}

impl NormLayer {
    pub fn load(spec: &LayerSpec) -> Result<Self> {
        if spec.norm_depth == 0 {
            return Err(Error::Model("normalization window of zero depth".into()));
        }
        Ok(Self {
            depth: spec.norm_depth,
            alpha: spec.norm_alpha,
            beta: spec.norm_beta,
            kappa: spec.norm_kappa,
        })
    }

    pub fn run(&self, input: &Tensor) -> Result<Tensor> {
        let half = (self.depth / 2) as i64;
        let mut out = Tensor::zeros(input.height, input.width, input.depth);
        for y in 0..input.height {
            for x in 0..input.width {
                for d in 0..input.depth {
                    let lo = (d as i64 - half).max(0) as usize;
                    let hi = ((d as i64 + half) as usize).min(input.depth - 1);
                    let mut sq = 0.0_f32;
                    for j in lo..=hi {
                        let v = input.at(y, x, j);
                        sq += v * v;
                    }
                    let denom =
                        (self.kappa + self.alpha / self.depth as f32 * sq).powf(self.beta);
                    out.set(y, x, d, input.at(y, x, d) / denom);
                }
            }
        }
        Ok(out)
    }
}

pub enum Layer {
    Conv(ConvLayer),
    Pool(PoolLayer),
    Norm(NormLayer),
    Relu,
}

impl Layer {
    pub fn load(dir: &Path, spec: &LayerSpec) -> Result<Layer> {
        match spec.layer_type.as_str() {
            "conv" => Ok(Layer::Conv(ConvLayer::load(dir, spec)?)),
            "pool" => Ok(Layer::Pool(PoolLayer::load(spec)?)),
            "norm" => Ok(Layer::Norm(NormLayer::load(spec)?)),
            "relu" => Ok(Layer::Relu),
            other => Err(Error::Model(format!("unknown layer type {other:?}"))),
        }
    }

    pub fn run(&self, input: &Tensor) -> Result<Tensor> {
        match self {
            Layer::Conv(l) => l.run(input),
            Layer::Pool(l) => l.run(input),
            Layer::Norm(l) => l.run(input),
            Layer::Relu => {
                let mut out = input.clone();
                for v in &mut out.data {
                    *v = v.max(0.0);
                }
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn conv(
        stride: usize,
        pad: usize,
        filter: (usize, usize, usize, usize),
        weights: Vec<f32>,
        biases: Vec<f32>,
    ) -> ConvLayer {
        ConvLayer::from_parts(
            (stride, stride),
            (pad, pad, pad, pad),
            filter,
            weights,
            biases,
        )
    }

    #[test]
    fn conv_output_shape_stride_two() {
        // 32x32x3, 3x3 filter, stride 2, no padding -> 15x15.
        let input = Tensor::zeros(32, 32, 3);
        let layer = conv(2, 0, (3, 3, 3, 4), vec![0.0; 4 * 27], vec![0.0; 4]);
        let out = layer.run(&input).unwrap();
        assert_eq!((out.height, out.width, out.depth), (15, 15, 4));
    }

    #[test]
    fn conv_same_padding_preserves_shape() {
        // 3x3 filter, stride 1, pad 1 -> same spatial size.
        let input = Tensor::zeros(32, 32, 3);
        let layer = conv(1, 1, (3, 3, 3, 2), vec![0.0; 2 * 27], vec![0.0; 2]);
        let out = layer.run(&input).unwrap();
        assert_eq!((out.height, out.width, out.depth), (32, 32, 2));
    }

    #[test]
    fn conv_bias_only_filter_gives_constant_output() {
        let input = Tensor::from_vec(2, 2, 1, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let layer = conv(1, 0, (1, 1, 1, 1), vec![0.0], vec![7.5]);
        let out = layer.run(&input).unwrap();
        assert!(out.data.iter().all(|&v| v == 7.5));
    }

    #[test]
    fn fully_connected_path_matches_dot_product() {
        let input = Tensor::from_vec(2, 2, 1, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        // Filter covers the whole input -> 1x1 output.
        let layer = conv(
            1,
            0,
            (2, 2, 1, 2),
            vec![1.0, 1.0, 1.0, 1.0, 0.5, 0.0, 0.0, 0.5],
            vec![0.0, 1.0],
        );
        let out = layer.run(&input).unwrap();
        assert_eq!((out.height, out.width, out.depth), (1, 1, 2));
        assert_relative_eq!(out.data[0], 10.0);
        assert_relative_eq!(out.data[1], 3.5); // 0.5*1 + 0.5*4 + 1
    }

    #[test]
    fn grouped_conv_keeps_channels_separate() {
        // Input depth 2, filter depth 1, 2 filters -> 2 groups. Each filter
        // passes its own channel through a 1x1 identity weight.
        let input = Tensor::from_vec(1, 1, 2, vec![3.0, 5.0]).unwrap();
        let layer = conv(1, 0, (1, 1, 1, 2), vec![1.0, 1.0], vec![0.0, 0.0]);
        let out = layer.run(&input).unwrap();
        assert_eq!(out.data, vec![3.0, 5.0]);
    }

    #[test]
    fn identity_bank_subsamples_and_biases() {
        let input = Tensor::from_vec(2, 2, 1, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let layer = conv(2, 0, (0, 0, 0, 0), vec![], vec![10.0]);
        let out = layer.run(&input).unwrap();
        assert_eq!((out.height, out.width, out.depth), (1, 1, 1));
        assert_eq!(out.data[0], 11.0);
    }

    #[test]
    fn oversized_filter_is_a_shape_error() {
        let input = Tensor::zeros(4, 4, 1);
        let layer = conv(1, 0, (5, 5, 1, 1), vec![0.0; 25], vec![0.0]);
        assert!(layer.run(&input).is_err());
    }

    #[test]
    fn max_pool_picks_window_maximum() {
        let input = Tensor::from_vec(2, 2, 1, vec![1.0, 9.0, 3.0, 4.0]).unwrap();
        let layer = PoolLayer::from_parts((2, 2), (2, 2), PoolMethod::Max);
        let out = layer.run(&input).unwrap();
        assert_eq!(out.data, vec![9.0]);
    }

    #[test]
    fn avg_pool_averages_window() {
        let input = Tensor::from_vec(2, 2, 1, vec![1.0, 9.0, 3.0, 4.0]).unwrap();
        let layer = PoolLayer::from_parts((2, 2), (2, 2), PoolMethod::Avg);
        let out = layer.run(&input).unwrap();
        assert_relative_eq!(out.data[0], 4.25);
    }

    #[test]
    fn norm_preserves_shape_and_scales_down() {
        let input = Tensor::from_vec(1, 1, 3, vec![1.0, 2.0, 3.0]).unwrap();
        let layer = NormLayer {
            depth: 3,
            alpha: 1.0,
            beta: 0.5,
            kappa: 1.0,
        };
        let out = layer.run(&input).unwrap();
        assert_eq!((out.height, out.width, out.depth), (1, 1, 3));
        assert!(out.data.iter().zip(input.data.iter()).all(|(o, i)| o.abs() <= i.abs()));
    }

    #[test]
    fn relu_clamps_negatives() {
        let input = Tensor::from_vec(1, 1, 3, vec![-1.0, 0.0, 2.0]).unwrap();
        let out = Layer::Relu.run(&input).unwrap();
        assert_eq!(out.data, vec![0.0, 0.0, 2.0]);
    }
}
