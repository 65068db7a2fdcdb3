//! Serializable snapshots of layers, used by network persistence.

use crate::error::Result;
use crate::layers::{ConvolutionalLayer, FlattenLayer, FullyConnectedLayer, Layer, SoftmaxLayer};
use crate::tensor::Shape;
use crate::utils::Activation;
use serde::{Deserialize, Serialize};

/// Type tag plus every value needed to rebuild a layer exactly.
///
/// Parameter vectors are flat and row-major:
/// - convolutional filters in `[filter][channel][row][col]` order
/// - fully connected weights in `[input][output]` order
///
/// `input_shape` / `input_size` are `None` for a layer that was never initialized,
/// in which case the parameter vectors are empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerState {
    Convolutional {
        filter_size: usize,
        num_filters: usize,
        stride: usize,
        activation: Activation,
        input_shape: Option<Shape>,
        filters: Vec<f64>,
        biases: Vec<f64>,
    },
    FullyConnected {
        output_size: usize,
        activation: Activation,
        input_size: Option<usize>,
        weights: Vec<f64>,
        biases: Vec<f64>,
    },
    Flatten {
        input_shape: Option<Shape>,
    },
    Softmax,
}

impl LayerState {
    /// Type tag as written to disk.
    pub fn type_tag(&self) -> &'static str {
        match self {
            LayerState::Convolutional { .. } => "convolutional",
            LayerState::FullyConnected { .. } => "fully_connected",
            LayerState::Flatten { .. } => "flatten",
            LayerState::Softmax => "softmax",
        }
    }

    /// Rebuilds the layer. Parameter counts are checked against the recorded
    /// dimensions; a mismatch is a format error.
    pub fn into_layer(self) -> Result<Box<dyn Layer>> {
        let layer: Box<dyn Layer> = match self {
            state @ LayerState::Convolutional { .. } => {
                Box::new(ConvolutionalLayer::from_state(state)?)
            }
            state @ LayerState::FullyConnected { .. } => {
                Box::new(FullyConnectedLayer::from_state(state)?)
            }
            LayerState::Flatten { input_shape } => {
                Box::new(FlattenLayer::with_input_shape(input_shape))
            }
            LayerState::Softmax => Box::new(SoftmaxLayer::new()),
        };
        Ok(layer)
    }
}
