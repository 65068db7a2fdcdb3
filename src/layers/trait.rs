//! Layer trait definitions
//!
//! Every layer implements [`Layer`]. Two optional capabilities sit beside it:
//!
//! - [`Adaptive`]: the layer needs the incoming shape before its first forward pass
//!   (to size weights, or to remember what to reshape back to).
//! - [`Parameterized`]: the layer owns trainable parameters and accumulates their
//!   gradients across a mini-batch.
//!
//! A layer reports its capabilities through `as_adaptive_mut` / `as_parameterized_mut`.
//! The network queries them and dispatches only to layers that opted in; a layer
//! without a capability is a no-op for that step.

use crate::error::Result;
use crate::layers::LayerState;
use crate::tensor::{Shape, Tensor3D};
use crate::utils::SimpleRng;

/// Core trait for neural network layers.
///
/// # Contract
///
/// - `forward` caches whatever `backward` needs. A second `forward` overwrites that
///   cache, so calls must alternate forward, backward, forward, ...
/// - `backward` takes the gradient of the loss with respect to this layer's most
///   recent output (same shape) and returns the gradient with respect to its
///   input (same shape as that input). Parameterized layers add their parameter
///   gradients to their accumulators as a side effect.
/// - `output_shape` is pure and works before initialization, so a pipeline can be
///   planned shape by shape.
/// - Layers are `Send` so a whole network can move to a worker thread.
///
/// # Example
///
/// ```ignore
/// let output = layer.forward(&input)?;
/// let grad_input = layer.backward(&grad_output)?;
/// assert_eq!(grad_input.shape(), input.shape());
/// ```
pub trait Layer: Send {
    /// Human-readable layer type, used in summaries and error messages.
    fn name(&self) -> &'static str;

    /// Forward propagation of one sample.
    fn forward(&mut self, input: &Tensor3D) -> Result<Tensor3D>;

    /// Backward propagation of one sample's output gradient.
    fn backward(&mut self, output_gradient: &Tensor3D) -> Result<Tensor3D>;

    /// Shape this layer produces for an input of `input_shape`.
    fn output_shape(&self, input_shape: Shape) -> Result<Shape>;

    /// Number of trainable scalars (weights + biases).
    fn parameter_count(&self) -> usize {
        0
    }

    /// Serializable snapshot of configuration and parameters.
    fn state(&self) -> LayerState;

    /// Shape-dependent initialization capability.
    fn as_adaptive_mut(&mut self) -> Option<&mut dyn Adaptive> {
        None
    }

    /// Trainable-parameter capability.
    fn as_parameterized_mut(&mut self) -> Option<&mut dyn Parameterized> {
        None
    }
}

/// Layers that size themselves from the shape they will receive.
pub trait Adaptive {
    /// Must be called once, before the first `forward`, with the shape the layer
    /// will actually receive. Layers with weights draw them from `rng`.
    fn initialize(&mut self, input_shape: Shape, rng: &mut SimpleRng) -> Result<()>;

    /// Shape recorded by `initialize`, if it has run.
    fn input_shape(&self) -> Option<Shape>;
}

/// Layers holding trainable parameters and gradient accumulators.
pub trait Parameterized {
    /// Gradient descent step on the accumulated gradients, averaged over
    /// `batch_size`: `p -= learning_rate * acc / batch_size`. Clears the accumulators.
    fn update_parameters(&mut self, learning_rate: f64, batch_size: usize);

    /// Zeroes the gradient accumulators.
    fn reset_gradients(&mut self);
}
