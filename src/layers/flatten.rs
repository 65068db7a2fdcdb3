//! Flatten layer: reshapes a `[d, h, w]` feature map to `[1, 1, d·h·w]`.

use crate::error::{NetworkError, Result};
use crate::layers::{Adaptive, Layer, LayerState};
use crate::tensor::{Shape, Tensor3D};
use crate::utils::SimpleRng;

const NAME: &str = "Flatten";

/// Reshapes its input to a flat vector in row-major order and reshapes the
/// gradient back on the way down. Holds no parameters.
#[derive(Debug, Clone, Default)]
pub struct FlattenLayer {
    input_shape: Option<Shape>,
}

impl FlattenLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer with a known (or unknown) input shape, as restored from disk.
    pub fn with_input_shape(input_shape: Option<Shape>) -> Self {
        Self { input_shape }
    }

    fn expected_shape(&self) -> Result<Shape> {
        self.input_shape.ok_or(NetworkError::Uninitialized { layer: NAME })
    }
}

impl Adaptive for FlattenLayer {
    fn initialize(&mut self, input_shape: Shape, _rng: &mut SimpleRng) -> Result<()> {
        self.input_shape = Some(input_shape);
        Ok(())
    }

    fn input_shape(&self) -> Option<Shape> {
        self.input_shape
    }
}

impl Layer for FlattenLayer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &Tensor3D) -> Result<Tensor3D> {
        let expected = self.expected_shape()?;
        if input.shape() != expected {
            return Err(NetworkError::ShapeMismatch {
                layer: NAME,
                expected,
                actual: input.shape(),
            });
        }
        Ok(Tensor3D::from_flat(input.as_slice().to_vec()))
    }

    fn backward(&mut self, output_gradient: &Tensor3D) -> Result<Tensor3D> {
        let input_shape = self.expected_shape()?;
        let expected = Shape::flat(input_shape.len());
        if output_gradient.shape() != expected {
            return Err(NetworkError::ShapeMismatch {
                layer: NAME,
                expected,
                actual: output_gradient.shape(),
            });
        }
        Tensor3D::from_vec(input_shape, output_gradient.as_slice().to_vec())
    }

    fn output_shape(&self, input_shape: Shape) -> Result<Shape> {
        Ok(Shape::flat(input_shape.len()))
    }

    fn state(&self) -> LayerState {
        LayerState::Flatten {
            input_shape: self.input_shape,
        }
    }

    fn as_adaptive_mut(&mut self) -> Option<&mut dyn Adaptive> {
        Some(self)
    }
}
