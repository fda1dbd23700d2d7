//! Minimal CNN forward-pass engine for marker recognition.

pub mod layers;
pub mod net;
pub mod tensor;

pub use layers::{ConvLayer, Layer, LayerSpec, NormLayer, PoolLayer, PoolMethod};
pub use net::ConvolutionalNet;
pub use tensor::Tensor;
