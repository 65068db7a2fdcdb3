//! Fully connected layer implementation
//!
//! This module provides a FullyConnectedLayer that performs the transformation
//! `output = activation(input × weights + biases)` on a flat `[1, 1, n]` input.

use crate::error::{NetworkError, Result};
use crate::layers::{Adaptive, Layer, LayerState, Parameterized};
use crate::ops::dense_multiply;
use crate::tensor::{Matrix, Shape, Tensor3D};
use crate::utils::{Activation, SimpleRng};
use rand_distr::{Distribution, Normal};

const NAME: &str = "FullyConnected";

/// Fully connected layer with weights, biases and an element-wise activation.
///
/// Performs `y = f(xW + b)` where x is the flat input (input_size),
/// W is the weight matrix (input_size × output_size), b the bias vector
/// (output_size) and f the activation.
///
/// The input size is taken from the shape passed to `initialize`; the input must
/// already be flat (put a `FlattenLayer` in front of feature maps).
///
/// # Example
///
/// ```
/// use rust_cnn::layers::{Adaptive, FullyConnectedLayer, Layer};
/// use rust_cnn::tensor::Shape;
/// use rust_cnn::utils::{Activation, SimpleRng};
///
/// let mut rng = SimpleRng::new(42);
/// let mut layer = FullyConnectedLayer::new(10, Activation::Relu);
/// layer.initialize(Shape::flat(784), &mut rng).unwrap();
/// assert_eq!(layer.parameter_count(), 784 * 10 + 10);
/// ```
#[derive(Debug, Clone)]
pub struct FullyConnectedLayer {
    output_size: usize,
    activation: Activation,
    input_size: Option<usize>,
    weights: Matrix,
    biases: Vec<f64>,
    grad_weights: Matrix,
    grad_biases: Vec<f64>,
    cached_input: Option<Vec<f64>>,
}

impl FullyConnectedLayer {
    /// Create an uninitialized layer producing `output_size` values.
    pub fn new(output_size: usize, activation: Activation) -> Self {
        Self {
            output_size,
            activation,
            input_size: None,
            weights: Matrix::zeros(0, output_size),
            biases: Vec::new(),
            grad_weights: Matrix::zeros(0, output_size),
            grad_biases: Vec::new(),
            cached_input: None,
        }
    }

    /// Create an initialized layer from known weights (`input_size × output_size`)
    /// and biases (`output_size`).
    pub fn with_parameters(
        weights: Matrix,
        biases: Vec<f64>,
        activation: Activation,
    ) -> Result<Self> {
        if weights.cols() != biases.len() {
            return Err(NetworkError::InvalidArgument(format!(
                "weights have {} columns but there are {} biases",
                weights.cols(),
                biases.len()
            )));
        }
        if weights.rows() == 0 || weights.cols() == 0 {
            return Err(NetworkError::InvalidArgument(
                "fully connected layer needs non-empty weights".to_string(),
            ));
        }
        Ok(Self {
            output_size: weights.cols(),
            activation,
            input_size: Some(weights.rows()),
            grad_weights: Matrix::zeros(weights.rows(), weights.cols()),
            grad_biases: vec![0.0; biases.len()],
            weights,
            biases,
            cached_input: None,
        })
    }

    /// Rebuild a layer from a persisted snapshot.
    pub fn from_state(state: LayerState) -> Result<Self> {
        let (output_size, activation, input_size, weights, biases) = match state {
            LayerState::FullyConnected {
                output_size,
                activation,
                input_size,
                weights,
                biases,
            } => (output_size, activation, input_size, weights, biases),
            other => {
                return Err(NetworkError::format(
                    "layer state",
                    format!("expected fully_connected, got {}", other.type_tag()),
                ))
            }
        };

        match input_size {
            None if weights.is_empty() && biases.is_empty() => {
                Ok(Self::new(output_size, activation))
            }
            None => Err(NetworkError::format(
                "fully connected layer",
                "parameters present on an uninitialized layer",
            )),
            Some(input_size) => {
                if weights.len() != input_size * output_size || biases.len() != output_size {
                    return Err(NetworkError::format(
                        "fully connected layer",
                        format!(
                            "expected {} weights and {} biases, got {} and {}",
                            input_size * output_size,
                            output_size,
                            weights.len(),
                            biases.len()
                        ),
                    ));
                }
                let weights = Matrix::from_vec(input_size, output_size, weights)?;
                Self::with_parameters(weights, biases, activation)
            }
        }
    }

    /// Get the input size, once initialized.
    pub fn input_size(&self) -> Option<usize> {
        self.input_size
    }

    /// Get the output size of the layer.
    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// Weight matrix, `input_size × output_size`.
    pub fn weights(&self) -> &Matrix {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut Matrix {
        &mut self.weights
    }

    pub fn biases(&self) -> &[f64] {
        &self.biases
    }

    pub fn biases_mut(&mut self) -> &mut [f64] {
        &mut self.biases
    }

    /// Accumulated weight gradients since the last reset or update.
    pub fn weight_gradients(&self) -> &Matrix {
        &self.grad_weights
    }

    pub fn bias_gradients(&self) -> &[f64] {
        &self.grad_biases
    }

    fn check_flat(&self, shape: Shape, expected_len: usize) -> Result<()> {
        if !shape.is_flat() || shape.width != expected_len {
            return Err(NetworkError::ShapeMismatch {
                layer: NAME,
                expected: Shape::flat(expected_len),
                actual: shape,
            });
        }
        Ok(())
    }
}

impl Adaptive for FullyConnectedLayer {
    /// Sizes the weights for a flat input and draws them from a zero-mean Gaussian
    /// with standard deviation `sqrt(2 / input_size)`. Biases start at zero.
    fn initialize(&mut self, input_shape: Shape, rng: &mut SimpleRng) -> Result<()> {
        if self.output_size == 0 {
            return Err(NetworkError::InvalidArgument(
                "fully connected layer needs a positive output size".to_string(),
            ));
        }
        if !input_shape.is_flat() || input_shape.width == 0 {
            return Err(NetworkError::ShapeMismatch {
                layer: NAME,
                expected: Shape::flat(input_shape.len().max(1)),
                actual: input_shape,
            });
        }

        let input_size = input_shape.width;
        let normal = Normal::new(0.0, (2.0 / input_size as f64).sqrt())
            .map_err(|e| NetworkError::InvalidArgument(e.to_string()))?;

        let mut weights = Matrix::zeros(input_size, self.output_size);
        for value in weights.as_mut_slice() {
            *value = normal.sample(&mut *rng);
        }

        self.weights = weights;
        self.biases = vec![0.0; self.output_size];
        self.grad_weights = Matrix::zeros(input_size, self.output_size);
        self.grad_biases = vec![0.0; self.output_size];
        self.input_size = Some(input_size);
        self.cached_input = None;
        Ok(())
    }

    fn input_shape(&self) -> Option<Shape> {
        self.input_size.map(Shape::flat)
    }
}

impl Parameterized for FullyConnectedLayer {
    fn update_parameters(&mut self, learning_rate: f64, batch_size: usize) {
        let scale = learning_rate / batch_size.max(1) as f64;

        for (w, g) in self
            .weights
            .as_mut_slice()
            .iter_mut()
            .zip(self.grad_weights.as_mut_slice())
        {
            *w -= scale * *g;
            *g = 0.0;
        }
        for (b, g) in self.biases.iter_mut().zip(self.grad_biases.iter_mut()) {
            *b -= scale * *g;
            *g = 0.0;
        }
    }

    fn reset_gradients(&mut self) {
        self.grad_weights.fill(0.0);
        self.grad_biases.iter_mut().for_each(|g| *g = 0.0);
    }
}

impl Layer for FullyConnectedLayer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &Tensor3D) -> Result<Tensor3D> {
        let input_size = self.input_size.ok_or(NetworkError::Uninitialized { layer: NAME })?;
        self.check_flat(input.shape(), input_size)?;

        let pre_activation = dense_multiply(input.as_slice(), &self.weights, &self.biases)?;
        let output = self.activation.activate_slice(&pre_activation);

        self.cached_input = Some(input.as_slice().to_vec());
        Ok(Tensor3D::from_flat(output))
    }

    fn backward(&mut self, output_gradient: &Tensor3D) -> Result<Tensor3D> {
        if self.cached_input.is_none() {
            return Err(NetworkError::MissingForwardPass { layer: NAME });
        }
        self.check_flat(output_gradient.shape(), self.output_size)?;
        let input = self
            .cached_input
            .take()
            .ok_or(NetworkError::MissingForwardPass { layer: NAME })?;

        // Recomputed from the cached input; parameters do not change between
        // forward and backward within a batch.
        let pre_activation = dense_multiply(&input, &self.weights, &self.biases)?;
        let local: Vec<f64> = output_gradient
            .as_slice()
            .iter()
            .zip(&pre_activation)
            .map(|(g, &z)| g * self.activation.derivative(z))
            .collect();

        let cols = self.output_size;
        let mut input_gradient = vec![0.0; input.len()];
        for (i, (&x, grad_in)) in input.iter().zip(input_gradient.iter_mut()).enumerate() {
            let w_row = &self.weights.as_slice()[i * cols..(i + 1) * cols];
            let g_row = &mut self.grad_weights.as_mut_slice()[i * cols..(i + 1) * cols];
            let mut sum = 0.0;
            for ((&w, g), &delta) in w_row.iter().zip(g_row.iter_mut()).zip(&local) {
                sum += w * delta;
                *g += x * delta;
            }
            *grad_in = sum;
        }
        for (acc, &delta) in self.grad_biases.iter_mut().zip(&local) {
            *acc += delta;
        }

        Ok(Tensor3D::from_flat(input_gradient))
    }

    fn output_shape(&self, input_shape: Shape) -> Result<Shape> {
        if !input_shape.is_flat() {
            return Err(NetworkError::ShapeMismatch {
                layer: NAME,
                expected: Shape::flat(input_shape.len()),
                actual: input_shape,
            });
        }
        Ok(Shape::flat(self.output_size))
    }

    fn parameter_count(&self) -> usize {
        self.weights.as_slice().len() + self.biases.len()
    }

    fn state(&self) -> LayerState {
        LayerState::FullyConnected {
            output_size: self.output_size,
            activation: self.activation,
            input_size: self.input_size,
            weights: self.weights.as_slice().to_vec(),
            biases: self.biases.clone(),
        }
    }

    fn as_adaptive_mut(&mut self) -> Option<&mut dyn Adaptive> {
        Some(self)
    }

    fn as_parameterized_mut(&mut self) -> Option<&mut dyn Parameterized> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initialized(input_size: usize, output_size: usize) -> FullyConnectedLayer {
        let mut rng = SimpleRng::new(42);
        let mut layer = FullyConnectedLayer::new(output_size, Activation::Relu);
        layer.initialize(Shape::flat(input_size), &mut rng).unwrap();
        layer
    }

    #[test]
    fn test_fc_layer_creation() {
        let layer = initialized(10, 5);

        assert_eq!(layer.input_size(), Some(10));
        assert_eq!(layer.output_size(), 5);
        assert_eq!(layer.weights().as_slice().len(), 50); // 10 × 5
        assert_eq!(layer.biases().len(), 5);
    }

    #[test]
    fn test_fc_layer_parameter_count() {
        let layer = initialized(784, 512);

        // 784 × 512 weights + 512 biases = 401,408 + 512 = 401,920
        assert_eq!(layer.parameter_count(), 784 * 512 + 512);
    }

    #[test]
    fn test_he_initialization() {
        let layer = initialized(200, 50);
        let values = layer.weights().as_slice();
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        // He variance = 2 / 200 = 0.01
        assert!(mean.abs() < 0.01, "mean {}", mean);
        assert!((var - 0.01).abs() < 0.002, "variance {}", var);
        assert!(layer.biases().iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_deterministic_initialization() {
        let layer1 = initialized(10, 5);
        let layer2 = initialized(10, 5);

        assert_eq!(layer1.weights(), layer2.weights());
        assert_eq!(layer1.biases(), layer2.biases());
    }

    #[test]
    fn test_initialize_rejects_non_flat_input() {
        let mut rng = SimpleRng::new(1);
        let mut layer = FullyConnectedLayer::new(3, Activation::Relu);
        let err = layer.initialize(Shape::new(2, 3, 4), &mut rng).unwrap_err();
        assert!(matches!(err, NetworkError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_forward_rejects_wrong_length() {
        let mut layer = initialized(4, 2);
        let err = layer.forward(&Tensor3D::from_flat(vec![1.0; 3])).unwrap_err();
        assert!(matches!(err, NetworkError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_with_parameters_validates_bias_length() {
        let weights = Matrix::zeros(3, 2);
        let result = FullyConnectedLayer::with_parameters(weights, vec![0.0; 3], Activation::Relu);
        assert!(result.is_err());
    }

    #[test]
    fn test_update_parameters_averages_over_batch() {
        let weights = Matrix::from_rows(&[vec![1.0], vec![1.0]]).unwrap();
        let mut layer =
            FullyConnectedLayer::with_parameters(weights, vec![0.0], Activation::Relu).unwrap();

        for _ in 0..2 {
            layer.forward(&Tensor3D::from_flat(vec![1.0, 2.0])).unwrap();
            layer.backward(&Tensor3D::from_flat(vec![1.0])).unwrap();
        }
        // Accumulated: dW = [2, 4], db = [2]
        assert_eq!(layer.weight_gradients().as_slice(), &[2.0, 4.0]);
        assert_eq!(layer.bias_gradients(), &[2.0]);

        layer.update_parameters(0.5, 2);
        assert_eq!(layer.weights().as_slice(), &[0.5, 0.0]);
        assert_eq!(layer.biases(), &[-0.5]);
        assert_eq!(layer.bias_gradients(), &[0.0]);
    }
}
