//! Rust CNN Library
//!
//! A minimal convolutional neural-network training engine: composable layers, a
//! forward/backward pipeline over small 3-D tensors and a mini-batch SGD trainer.
//!
//! # Modules
//!
//! - `tensor`: `Shape`, `Matrix`, `Tensor3D` and `Sample`
//! - `ops`: convolution, pooling and dense kernels
//! - `layers`: Layer trait, capabilities and implementations (Convolutional, FullyConnected, etc.)
//! - `network`: Network orchestrator, SGD and evaluation
//! - `persistence`: saving and loading trained networks
//! - `dataset`: IDX (MNIST) reader
//! - `utils`: Shared utilities (RNG, activation functions, softmax)
//! - `config`: Training configuration structures
//! - `architecture`: Architecture configuration and network building
//! - `error`: Error type shared by every module

pub mod architecture;
pub mod config;
pub mod dataset;
pub mod error;
pub mod layers;
pub mod network;
pub mod ops;
pub mod persistence;
pub mod tensor;
pub mod utils;

pub use error::{NetworkError, Result};
pub use network::{EpochReport, LayerSummary, Network, TrainOptions, TrainingHistory};
pub use tensor::{Matrix, Sample, Shape, Tensor3D};
