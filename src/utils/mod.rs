//! Shared utilities for the engine
//!
//! Activation functions, softmax and the seeded random number generator.

pub mod activations;
pub mod rng;

pub use activations::{softmax, Activation};
pub use rng::SimpleRng;
