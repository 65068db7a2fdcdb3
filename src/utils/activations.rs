//! Activation functions for neural networks
//!
//! This module provides the element-wise activations layers can be configured with:
//! - ReLU (default)
//! - ELU with a fixed alpha
//!
//! and the numerically stable softmax used by the output layer.

use crate::error::{NetworkError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Element-wise activation function.
///
/// Activations are stateless values (`Copy`), so any number of layers can hold
/// the same one without sharing mutable state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Activation {
    /// `max(0, x)`
    #[default]
    Relu,
    /// `x` for positive inputs, `alpha * (e^x - 1)` otherwise.
    Elu { alpha: f64 },
}

impl Activation {
    /// ELU with the given alpha; alpha must be positive and finite.
    pub fn elu(alpha: f64) -> Result<Self> {
        if !(alpha.is_finite() && alpha > 0.0) {
            return Err(NetworkError::InvalidArgument(format!(
                "ELU alpha must be positive, got {}",
                alpha
            )));
        }
        Ok(Activation::Elu { alpha })
    }

    /// Applies the activation to a single value.
    #[inline]
    pub fn activate(&self, x: f64) -> f64 {
        match *self {
            Activation::Relu => x.max(0.0),
            Activation::Elu { alpha } => {
                if x > 0.0 {
                    x
                } else {
                    alpha * (x.exp() - 1.0)
                }
            }
        }
    }

    /// Derivative with respect to the pre-activation value `x`.
    ///
    /// ReLU's derivative at exactly zero is 0.
    #[inline]
    pub fn derivative(&self, x: f64) -> f64 {
        match *self {
            Activation::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Elu { alpha } => {
                if x > 0.0 {
                    1.0
                } else {
                    alpha * x.exp()
                }
            }
        }
    }

    /// Maps the scalar form over a sequence.
    pub fn activate_slice(&self, input: &[f64]) -> Vec<f64> {
        input.iter().map(|&x| self.activate(x)).collect()
    }

    /// Maps the scalar derivative over a sequence.
    pub fn derivative_slice(&self, input: &[f64]) -> Vec<f64> {
        input.iter().map(|&x| self.derivative(x)).collect()
    }

    /// Config name of the variant (`"relu"` or `"elu"`).
    pub fn name(&self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::Elu { .. } => "elu",
        }
    }

    /// Resolves a config name; `elu_alpha` is used only for `"elu"`.
    pub fn from_name(name: &str, elu_alpha: Option<f64>) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "relu" => Ok(Activation::Relu),
            "elu" => Activation::elu(elu_alpha.unwrap_or(1.0)),
            other => Err(NetworkError::Config(format!(
                "invalid activation function '{}'. Must be one of: relu, elu",
                other
            ))),
        }
    }
}

impl FromStr for Activation {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self> {
        Activation::from_name(s, None)
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activation::Relu => write!(f, "ReLU"),
            Activation::Elu { alpha } => write!(f, "ELU({})", alpha),
        }
    }
}

/// Softmax over a single vector.
///
/// Subtracts the maximum before exponentiating so large logits do not overflow.
/// An empty input yields an empty output.
pub fn softmax(input: &[f64]) -> Vec<f64> {
    let Some(max_value) = input.iter().copied().reduce(f64::max) else {
        return Vec::new();
    };

    let mut output: Vec<f64> = input.iter().map(|&x| (x - max_value).exp()).collect();
    let sum: f64 = output.iter().sum();

    let inv_sum = 1.0 / sum;
    for value in output.iter_mut() {
        *value *= inv_sum;
    }
    output
}
