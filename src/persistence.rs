//! Saving and loading trained networks
//!
//! A network is written as one JSON document holding the learning rate, the input
//! shape and every layer's [`LayerState`] in pipeline order. `serde_json` is built
//! with `float_roundtrip`, so a loaded network reproduces the saved one's forward
//! output bit for bit.

use crate::error::{NetworkError, Result};
use crate::layers::LayerState;
use crate::network::Network;
use crate::tensor::Shape;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Value of the `format` field in every saved network.
pub const FORMAT_TAG: &str = "rust_cnn.network";
pub const FORMAT_VERSION: u32 = 1;

/// On-disk form of a [`Network`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedNetwork {
    pub format: String,
    pub version: u32,
    pub learning_rate: f64,
    pub input_shape: Shape,
    pub layers: Vec<LayerState>,
}

impl Network {
    /// Snapshot of the configuration and parameters of every layer.
    pub fn to_state(&self) -> SavedNetwork {
        SavedNetwork {
            format: FORMAT_TAG.to_string(),
            version: FORMAT_VERSION,
            learning_rate: self.learning_rate(),
            input_shape: self.input_shape(),
            layers: self.layers().iter().map(|layer| layer.state()).collect(),
        }
    }

    /// Rebuilds a network from a snapshot without re-initializing any weights.
    /// Gradient accumulators start at zero.
    pub fn from_state(state: SavedNetwork) -> Result<Self> {
        if state.format != FORMAT_TAG {
            return Err(NetworkError::format(
                "saved network",
                format!("unknown format tag {:?}", state.format),
            ));
        }
        if state.version != FORMAT_VERSION {
            return Err(NetworkError::format(
                "saved network",
                format!("unsupported version {}", state.version),
            ));
        }

        let mut network = Network::new(state.learning_rate, state.input_shape);
        for layer_state in state.layers {
            network.append_restored(layer_state.into_layer()?)?;
        }
        Ok(network)
    }

    /// Writes the network as JSON to `path`, replacing any existing file. Missing
    /// parent directories are created.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| NetworkError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| NetworkError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &self.to_state())?;
        writer.flush().map_err(|e| NetworkError::io(path, e))?;

        info!("saved network with {} layers to {}", self.len(), path.display());
        Ok(())
    }

    /// Reads a network written by [`Network::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| NetworkError::io(path, e))?;
        let state: SavedNetwork = serde_json::from_reader(BufReader::new(file))?;
        let network = Network::from_state(state)?;

        info!("loaded network with {} layers from {}", network.len(), path.display());
        Ok(network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{FlattenLayer, FullyConnectedLayer, SoftmaxLayer};
    use crate::utils::{Activation, SimpleRng};

    fn tiny_network() -> Network {
        let mut rng = SimpleRng::new(11);
        let mut network = Network::new(0.05, Shape::new(1, 2, 2));
        network.add_layer(FlattenLayer::new(), &mut rng).unwrap();
        network
            .add_layer(FullyConnectedLayer::new(3, Activation::Relu), &mut rng)
            .unwrap();
        network.add_layer(SoftmaxLayer::new(), &mut rng).unwrap();
        network
    }

    #[test]
    fn test_state_round_trip() {
        let network = tiny_network();
        let state = network.to_state();

        assert_eq!(state.format, FORMAT_TAG);
        assert_eq!(state.layers.len(), 3);
        assert_eq!(state.layers[1].type_tag(), "fully_connected");

        let restored = Network::from_state(state.clone()).unwrap();
        assert_eq!(restored.to_state(), state);
        assert_eq!(restored.layer_shapes(), network.layer_shapes());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut state = tiny_network().to_state();
        state.version = 99;
        let err = Network::from_state(state).unwrap_err();
        assert!(matches!(err, NetworkError::Format { .. }));
    }

    #[test]
    fn test_rejects_uninitialized_adaptive_layer() {
        let mut state = tiny_network().to_state();
        state.layers[0] = LayerState::Flatten { input_shape: None };
        let err = Network::from_state(state).unwrap_err();
        assert!(matches!(err, NetworkError::Uninitialized { .. }));
    }
}
