//! Softmax output layer.

use crate::error::{NetworkError, Result};
use crate::layers::{Layer, LayerState};
use crate::tensor::{Shape, Tensor3D};
use crate::utils::softmax;

const NAME: &str = "Softmax";

/// Maps a flat vector to a probability distribution.
///
/// Only meaningful as the final layer under cross-entropy loss: the network seeds
/// backpropagation with `output - label`, which is already the gradient with
/// respect to the softmax input, so `backward` passes the gradient through.
#[derive(Debug, Clone, Default)]
pub struct SoftmaxLayer {
    cached_shape: Option<Shape>,
}

impl SoftmaxLayer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for SoftmaxLayer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &Tensor3D) -> Result<Tensor3D> {
        let shape = input.shape();
        if !shape.is_flat() {
            return Err(NetworkError::ShapeMismatch {
                layer: NAME,
                expected: Shape::flat(shape.len()),
                actual: shape,
            });
        }
        self.cached_shape = Some(shape);
        Ok(Tensor3D::from_flat(softmax(input.as_slice())))
    }

    fn backward(&mut self, output_gradient: &Tensor3D) -> Result<Tensor3D> {
        let shape = self
            .cached_shape
            .ok_or(NetworkError::MissingForwardPass { layer: NAME })?;
        if output_gradient.shape() != shape {
            return Err(NetworkError::ShapeMismatch {
                layer: NAME,
                expected: shape,
                actual: output_gradient.shape(),
            });
        }
        self.cached_shape = None;
        Ok(output_gradient.clone())
    }

    fn output_shape(&self, input_shape: Shape) -> Result<Shape> {
        if !input_shape.is_flat() {
            return Err(NetworkError::ShapeMismatch {
                layer: NAME,
                expected: Shape::flat(input_shape.len()),
                actual: input_shape,
            });
        }
        Ok(input_shape)
    }

    fn state(&self) -> LayerState {
        LayerState::Softmax
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_softmax_forward_sums_to_one() {
        let mut layer = SoftmaxLayer::new();
        let out = layer.forward(&Tensor3D::from_flat(vec![1.0, 2.0, 3.0])).unwrap();
        assert_relative_eq!(out.as_slice().iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(out.as_slice()[2] > out.as_slice()[1]);
    }

    #[test]
    fn test_softmax_backward_passes_gradient_through() {
        let mut layer = SoftmaxLayer::new();
        layer.forward(&Tensor3D::from_flat(vec![0.0, 0.0])).unwrap();
        let grad = Tensor3D::from_flat(vec![0.5, -0.5]);
        assert_eq!(layer.backward(&grad).unwrap(), grad);
    }

    #[test]
    fn test_softmax_backward_without_forward() {
        let mut layer = SoftmaxLayer::new();
        let err = layer.backward(&Tensor3D::from_flat(vec![0.0])).unwrap_err();
        assert!(matches!(err, NetworkError::MissingForwardPass { .. }));
    }

    #[test]
    fn test_softmax_rejects_feature_maps() {
        let mut layer = SoftmaxLayer::new();
        assert!(layer.forward(&Tensor3D::zeros(Shape::new(2, 1, 1))).is_err());
    }
}
