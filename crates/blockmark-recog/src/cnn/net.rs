//! Network loading and the forward pass.
//!
//! A model directory holds `definition.json` plus the raw f32 weight files
//! the layer entries reference:
//!
//! ```json
//! { "CNN": { "Layers": [ { "Type": "conv", ... }, ... ],
//!            "Classes": ["MARKER_BULLSEYE_000", ...] } }
//! ```

use crate::cnn::layers::{Layer, LayerSpec};
use crate::cnn::tensor::Tensor;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize)]
struct NetFile {
    #[serde(rename = "CNN")]
    cnn: NetSpec,
}

#[derive(Deserialize)]
struct NetSpec {
    #[serde(rename = "Layers")]
    layers: Vec<LayerSpec>,
    #[serde(rename = "Classes", default)]
    classes: Option<Vec<String>>,
}

pub struct ConvolutionalNet {
    layers: Vec<Layer>,
    classes: Option<Vec<String>>,
}

impl ConvolutionalNet {
    /// Load a model directory containing `definition.json`.
    pub fn load(dir: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(dir.join("definition.json"))?;
        let file: NetFile = serde_json::from_str(&text)?;
        if file.cnn.layers.is_empty() {
            return Err(Error::Model("network with no layers".into()));
        }

        let mut layers = Vec::with_capacity(file.cnn.layers.len());
        for spec in &file.cnn.layers {
            layers.push(Layer::load(dir, spec)?);
        }
        log::debug!(
            "loaded network: {} layers, {} classes",
            layers.len(),
            file.cnn.classes.as_ref().map_or(0, |c| c.len())
        );
        Ok(Self {
            layers,
            classes: file.cnn.classes,
        })
    }

    #[cfg(test)]
    pub fn from_layers(layers: Vec<Layer>, classes: Option<Vec<String>>) -> Self {
        Self { layers, classes }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn class_name(&self, idx: usize) -> Option<&str> {
        self.classes.as_ref()?.get(idx).map(String::as_str)
    }

    pub fn num_classes(&self) -> Option<usize> {
        self.classes.as_ref().map(Vec::len)
    }

    /// Full forward pass; any layer failure aborts the run. Returns the
    /// argmax index of the final activation and its softmax weight.
    pub fn run(&mut self, input: &Tensor) -> Result<(usize, f32)> {
        let mut current = input.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            current = layer.run(&current).map_err(|e| {
                Error::Model(format!("layer {i} failed: {e}"))
            })?;
        }

        let (best, best_v) = current
            .argmax()
            .ok_or_else(|| Error::Model("empty final activation".into()))?;

        let mut denom = 0.0_f64;
        for &v in &current.data {
            denom += ((v - best_v) as f64).exp();
        }
        Ok((best, (1.0 / denom) as f32))
    }
}
