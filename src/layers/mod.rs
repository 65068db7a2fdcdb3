//! Layer abstractions for the network
//!
//! This module provides the Layer trait, its optional capabilities and the four
//! layer kinds: convolutional, fully connected, flatten and softmax.

mod r#trait;
mod state;
pub mod conv2d;
pub mod dense;
pub mod flatten;
pub mod softmax;

// Re-export the Layer trait for convenience
pub use r#trait::{Adaptive, Layer, Parameterized};
pub use state::LayerState;
pub use conv2d::ConvolutionalLayer;
pub use dense::FullyConnectedLayer;
pub use flatten::FlattenLayer;
pub use softmax::SoftmaxLayer;
