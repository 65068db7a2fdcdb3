//! Configuration structures for training
//!
//! This module provides the training configuration read by the `mnist_cnn` binary:
//! hyperparameters, dataset paths and the optional architecture file.

use crate::error::{NetworkError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for a training run.
///
/// Every field is optional in the JSON file; missing fields take the values of
/// [`TrainingConfig::default`].
///
/// # Example
///
/// ```json
/// {
///   "learning_rate": 0.02,
///   "epochs": 30,
///   "batch_size": 32,
///   "seed": 42,
///   "train_images": "data/train-images.idx3-ubyte",
///   "train_labels": "data/train-labels.idx1-ubyte",
///   "test_images": "data/t10k-images.idx3-ubyte",
///   "test_labels": "data/t10k-labels.idx1-ubyte",
///   "best_model_path": "models/best.json",
///   "architecture": "config/architectures/mlp_elu.json"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    /// Step size of the SGD update
    pub learning_rate: f64,

    /// Number of passes over the training set
    pub epochs: usize,

    /// Samples per mini-batch
    pub batch_size: usize,

    /// Seed for weight initialization and shuffling; the clock is used when absent
    pub seed: Option<u64>,

    pub train_images: PathBuf,
    pub train_labels: PathBuf,
    pub test_images: PathBuf,
    pub test_labels: PathBuf,

    /// Where to save the network whenever test accuracy improves
    pub best_model_path: Option<PathBuf>,

    /// Cap on the number of samples loaded from each file
    pub limit: Option<usize>,

    /// Architecture file; the built-in MLP is used when absent
    pub architecture: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.02,
            epochs: 30,
            batch_size: 32,
            seed: None,
            train_images: PathBuf::from("data/train-images.idx3-ubyte"),
            train_labels: PathBuf::from("data/train-labels.idx1-ubyte"),
            test_images: PathBuf::from("data/t10k-images.idx3-ubyte"),
            test_labels: PathBuf::from("data/t10k-labels.idx1-ubyte"),
            best_model_path: None,
            limit: None,
            architecture: None,
        }
    }
}

impl TrainingConfig {
    /// Points the four dataset paths at the standard MNIST file names in `dir`.
    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.train_images = dir.join("train-images.idx3-ubyte");
        self.train_labels = dir.join("train-labels.idx1-ubyte");
        self.test_images = dir.join("t10k-images.idx3-ubyte");
        self.test_labels = dir.join("t10k-labels.idx1-ubyte");
        self
    }
}

/// Loads a training configuration from a JSON file.
///
/// Reads the file at `path`, deserializes it into a `TrainingConfig` and validates it.
///
/// # Examples
///
/// ```no_run
/// use rust_cnn::config::load_config;
///
/// let cfg = load_config("config/mnist_training.json").unwrap();
/// assert!(cfg.learning_rate > 0.0);
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<TrainingConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| NetworkError::io(path, e))?;
    let config: TrainingConfig = serde_json::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Checks the hyperparameters of a configuration, wherever it came from.
pub fn validate_config(config: &TrainingConfig) -> Result<()> {
    if !config.learning_rate.is_finite() || config.learning_rate <= 0.0 {
        return Err(NetworkError::Config(format!(
            "learning_rate must be positive, got {}",
            config.learning_rate
        )));
    }

    if config.epochs == 0 {
        return Err(NetworkError::Config("epochs must be positive".to_string()));
    }

    if config.batch_size == 0 {
        return Err(NetworkError::Config("batch_size must be positive".to_string()));
    }

    if config.limit == Some(0) {
        return Err(NetworkError::Config("limit must be positive when set".to_string()));
    }

    Ok(())
}
