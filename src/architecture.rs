//! Architecture configuration structures
//!
//! This module describes network architectures in JSON files, so topologies can be
//! changed without touching code. [`build_network`] turns a description into a
//! [`Network`], running shape inference layer by layer as it goes.

use crate::error::{NetworkError, Result};
use crate::layers::{ConvolutionalLayer, FlattenLayer, FullyConnectedLayer, Layer, SoftmaxLayer};
use crate::network::Network;
use crate::tensor::Shape;
use crate::utils::{Activation, SimpleRng};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_stride() -> usize {
    1
}

fn default_activation() -> String {
    "relu".to_string()
}

fn default_elu_alpha() -> f64 {
    1.0
}

/// Configuration for a single layer of the network.
///
/// The `type` field selects the layer kind:
///
/// - **convolutional**: requires `filter_size` and `num_filters`; optional `stride`
///   (default 1), `activation` (default `"relu"`) and `elu_alpha` (default 1.0)
/// - **fully_connected**: requires `output_size`; optional `activation` and `elu_alpha`
/// - **flatten** and **softmax**: no fields
///
/// # Examples
///
/// ```json
/// { "type": "convolutional", "filter_size": 5, "num_filters": 8, "stride": 1 }
/// ```
///
/// ```json
/// { "type": "fully_connected", "output_size": 60, "activation": "elu", "elu_alpha": 1.0 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerConfig {
    Convolutional {
        filter_size: usize,
        num_filters: usize,
        #[serde(default = "default_stride")]
        stride: usize,
        #[serde(default = "default_activation")]
        activation: String,
        #[serde(default = "default_elu_alpha")]
        elu_alpha: f64,
    },
    FullyConnected {
        output_size: usize,
        #[serde(default = "default_activation")]
        activation: String,
        #[serde(default = "default_elu_alpha")]
        elu_alpha: f64,
    },
    Flatten,
    Softmax,
}

impl LayerConfig {
    fn kind(&self) -> &'static str {
        match self {
            LayerConfig::Convolutional { .. } => "convolutional",
            LayerConfig::FullyConnected { .. } => "fully_connected",
            LayerConfig::Flatten => "flatten",
            LayerConfig::Softmax => "softmax",
        }
    }

    /// Activation named by this layer, if the layer kind has one.
    pub fn activation(&self) -> Result<Option<Activation>> {
        match self {
            LayerConfig::Convolutional {
                activation,
                elu_alpha,
                ..
            }
            | LayerConfig::FullyConnected {
                activation,
                elu_alpha,
                ..
            } => Activation::from_name(activation, Some(*elu_alpha)).map(Some),
            LayerConfig::Flatten | LayerConfig::Softmax => Ok(None),
        }
    }

    /// Creates the (uninitialized) layer this entry describes.
    pub fn build(&self) -> Result<Box<dyn Layer>> {
        let activation = self.activation()?.unwrap_or_default();
        let layer: Box<dyn Layer> = match *self {
            LayerConfig::Convolutional {
                filter_size,
                num_filters,
                stride,
                ..
            } => Box::new(
                ConvolutionalLayer::new(filter_size, num_filters)
                    .with_stride(stride)
                    .with_activation(activation),
            ),
            LayerConfig::FullyConnected { output_size, .. } => {
                Box::new(FullyConnectedLayer::new(output_size, activation))
            }
            LayerConfig::Flatten => Box::new(FlattenLayer::new()),
            LayerConfig::Softmax => Box::new(SoftmaxLayer::new()),
        };
        Ok(layer)
    }
}

/// Configuration for the entire network: input shape plus the layer sequence,
/// applied in the order they appear.
///
/// # Example
///
/// ```json
/// {
///   "input_shape": [1, 28, 28],
///   "layers": [
///     { "type": "flatten" },
///     { "type": "fully_connected", "output_size": 60, "activation": "elu" },
///     { "type": "fully_connected", "output_size": 10, "activation": "elu" },
///     { "type": "softmax" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureConfig {
    /// `[depth, height, width]` of one input sample
    pub input_shape: [usize; 3],
    pub layers: Vec<LayerConfig>,
}

impl ArchitectureConfig {
    pub fn input_shape(&self) -> Shape {
        Shape::from(self.input_shape)
    }
}

/// The MNIST multilayer perceptron: Flatten → FullyConnected(60, ELU) →
/// FullyConnected(10, ELU) → Softmax on `[1, 28, 28]` inputs.
pub fn default_mlp() -> ArchitectureConfig {
    let elu = |output_size| LayerConfig::FullyConnected {
        output_size,
        activation: "elu".to_string(),
        elu_alpha: 1.0,
    };
    ArchitectureConfig {
        input_shape: [1, 28, 28],
        layers: vec![LayerConfig::Flatten, elu(60), elu(10), LayerConfig::Softmax],
    }
}

/// Loads an architecture configuration from a JSON file and validates it.
///
/// # Examples
///
/// ```no_run
/// use rust_cnn::architecture::load_architecture;
///
/// let arch = load_architecture("config/architectures/mlp_elu.json").unwrap();
/// assert!(!arch.layers.is_empty());
/// ```
pub fn load_architecture(path: impl AsRef<Path>) -> Result<ArchitectureConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| NetworkError::io(path, e))?;
    let config: ArchitectureConfig = serde_json::from_str(&contents)?;
    validate_architecture(&config)?;
    Ok(config)
}

/// Checks every layer entry on its own. Whether consecutive layers fit together
/// is only known once shapes are propagated, which [`build_network`] does.
pub fn validate_architecture(config: &ArchitectureConfig) -> Result<()> {
    if config.layers.is_empty() {
        return Err(NetworkError::Config(
            "architecture must contain at least one layer".to_string(),
        ));
    }

    if config.input_shape.iter().any(|&d| d == 0) {
        return Err(NetworkError::Config(format!(
            "input_shape dimensions must be positive, got {:?}",
            config.input_shape
        )));
    }

    for (index, layer) in config.layers.iter().enumerate() {
        validate_layer(layer, index)?;
    }
    Ok(())
}

fn validate_layer(layer: &LayerConfig, index: usize) -> Result<()> {
    let invalid = |message: &str| {
        NetworkError::Config(format!("layer {} ({}): {}", index, layer.kind(), message))
    };

    match *layer {
        LayerConfig::Convolutional {
            filter_size,
            num_filters,
            stride,
            ..
        } => {
            if filter_size == 0 {
                return Err(invalid("filter_size must be positive"));
            }
            if num_filters == 0 {
                return Err(invalid("num_filters must be positive"));
            }
            if stride == 0 {
                return Err(invalid("stride must be positive"));
            }
        }
        LayerConfig::FullyConnected { output_size, .. } => {
            if output_size == 0 {
                return Err(invalid("output_size must be positive"));
            }
        }
        LayerConfig::Flatten | LayerConfig::Softmax => {}
    }

    layer
        .activation()
        .map_err(|e| invalid(&e.to_string()))?;
    Ok(())
}

/// Builds a network from an architecture description.
///
/// Layers are added in order, so every adaptive layer is initialized (drawing its
/// weights from `rng`) with the shape the previous layers produce. An architecture
/// whose layers do not fit together fails here with a shape mismatch.
pub fn build_network(
    config: &ArchitectureConfig,
    learning_rate: f64,
    rng: &mut SimpleRng,
) -> Result<Network> {
    validate_architecture(config)?;

    let mut network = Network::new(learning_rate, config.input_shape());
    for layer_config in &config.layers {
        network.add_boxed_layer(layer_config.build()?, rng)?;
    }

    debug!(
        "built network with {} layers and {} parameters",
        network.len(),
        network.parameter_count()
    );
    Ok(network)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_layer_defaults() {
        let layer: LayerConfig =
            serde_json::from_str(r#"{"type": "convolutional", "filter_size": 3, "num_filters": 4}"#)
                .unwrap();
        assert_eq!(
            layer,
            LayerConfig::Convolutional {
                filter_size: 3,
                num_filters: 4,
                stride: 1,
                activation: "relu".to_string(),
                elu_alpha: 1.0,
            }
        );
    }

    #[test]
    fn test_validate_empty_architecture() {
        let config = ArchitectureConfig {
            input_shape: [1, 4, 4],
            layers: vec![],
        };
        assert!(validate_architecture(&config).is_err());
    }

    #[test]
    fn test_validate_unknown_activation() {
        let config = ArchitectureConfig {
            input_shape: [1, 4, 4],
            layers: vec![
                LayerConfig::Flatten,
                LayerConfig::FullyConnected {
                    output_size: 2,
                    activation: "tanh".to_string(),
                    elu_alpha: 1.0,
                },
            ],
        };
        let err = validate_architecture(&config).unwrap_err();
        assert!(err.to_string().contains("layer 1"));
    }

    #[test]
    fn test_validate_zero_stride() {
        let config = ArchitectureConfig {
            input_shape: [1, 4, 4],
            layers: vec![LayerConfig::Convolutional {
                filter_size: 2,
                num_filters: 1,
                stride: 0,
                activation: "relu".to_string(),
                elu_alpha: 1.0,
            }],
        };
        assert!(matches!(
            validate_architecture(&config),
            Err(NetworkError::Config(_))
        ));
    }

    #[test]
    fn test_build_default_mlp() {
        let mut rng = SimpleRng::new(42);
        let network = build_network(&default_mlp(), 0.02, &mut rng).unwrap();

        assert_eq!(network.len(), 4);
        assert_eq!(network.output_shape(), Shape::flat(10));
        assert_eq!(network.parameter_count(), 784 * 60 + 60 + 60 * 10 + 10);
    }
}
