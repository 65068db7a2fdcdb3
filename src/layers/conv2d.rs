//! 2D Convolutional layer implementation
//!
//! This module provides a ConvolutionalLayer that slides square filters over a
//! `[depth, height, width]` input and produces one activated feature map per filter.

use crate::error::{NetworkError, Result};
use crate::layers::{Adaptive, Layer, LayerState, Parameterized};
use crate::ops::{convolve, convolved_size, dilate, full_convolve, rotate180};
use crate::tensor::{Matrix, Shape, Tensor3D};
use crate::utils::{Activation, SimpleRng};
use rand_distr::{Distribution, Normal};

const NAME: &str = "Convolutional";

/// 2D Convolutional layer with learnable filters.
///
/// Each of the `num_filters` filters spans every input channel
/// (`[input_depth][filter_size][filter_size]`) and has one bias. The forward pass
/// cross-correlates each channel at `stride` without padding, sums over channels,
/// adds the bias and applies the activation:
///
/// `out_size = (in_size - filter_size) / stride + 1` (integer division; rows and
/// columns are sized independently)
///
/// # Fields
///
/// * `filters` - `[num_filters][input_depth]` filter matrices
/// * `biases` - One bias per filter
/// * `grad_filters` / `grad_biases` - Gradient accumulators, same shapes as the parameters
/// * `cached_input` / `cached_pre_activation` - Forward-pass state consumed by `backward`
///
/// # Example
///
/// ```
/// use rust_cnn::layers::{ConvolutionalLayer, Layer};
/// use rust_cnn::tensor::Shape;
///
/// let layer = ConvolutionalLayer::new(5, 8);
/// assert_eq!(layer.output_shape(Shape::new(1, 28, 28)).unwrap(), Shape::new(8, 24, 24));
/// ```
#[derive(Debug, Clone)]
pub struct ConvolutionalLayer {
    filter_size: usize,
    num_filters: usize,
    stride: usize,
    activation: Activation,
    input_shape: Option<Shape>,
    filters: Vec<Vec<Matrix>>,
    biases: Vec<f64>,
    grad_filters: Vec<Vec<Matrix>>,
    grad_biases: Vec<f64>,
    cached_input: Option<Tensor3D>,
    cached_pre_activation: Option<Tensor3D>,
}

impl ConvolutionalLayer {
    /// Create an uninitialized layer with stride 1 and ReLU activation.
    ///
    /// Filters are allocated by `initialize`, once the input depth is known.
    pub fn new(filter_size: usize, num_filters: usize) -> Self {
        Self {
            filter_size,
            num_filters,
            stride: 1,
            activation: Activation::default(),
            input_shape: None,
            filters: Vec::new(),
            biases: Vec::new(),
            grad_filters: Vec::new(),
            grad_biases: Vec::new(),
            cached_input: None,
            cached_pre_activation: None,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Rebuild a layer from a persisted snapshot.
    pub fn from_state(state: LayerState) -> Result<Self> {
        let (filter_size, num_filters, stride, activation, input_shape, filters, biases) =
            match state {
                LayerState::Convolutional {
                    filter_size,
                    num_filters,
                    stride,
                    activation,
                    input_shape,
                    filters,
                    biases,
                } => (
                    filter_size,
                    num_filters,
                    stride,
                    activation,
                    input_shape,
                    filters,
                    biases,
                ),
                other => {
                    return Err(NetworkError::format(
                        "layer state",
                        format!("expected convolutional, got {}", other.type_tag()),
                    ))
                }
            };

        let mut layer = Self::new(filter_size, num_filters)
            .with_stride(stride)
            .with_activation(activation);

        let Some(shape) = input_shape else {
            if !filters.is_empty() || !biases.is_empty() {
                return Err(NetworkError::format(
                    "convolutional layer",
                    "parameters present on an uninitialized layer",
                ));
            }
            return Ok(layer);
        };

        layer.output_shape(shape)?;
        let plane = filter_size * filter_size;
        let expected = num_filters * shape.depth * plane;
        if filters.len() != expected || biases.len() != num_filters {
            return Err(NetworkError::format(
                "convolutional layer",
                format!(
                    "expected {} filter values and {} biases, got {} and {}",
                    expected,
                    num_filters,
                    filters.len(),
                    biases.len()
                ),
            ));
        }

        let mut chunks = filters.chunks_exact(plane);
        let mut restored = Vec::with_capacity(num_filters);
        for _ in 0..num_filters {
            let mut per_channel = Vec::with_capacity(shape.depth);
            for _ in 0..shape.depth {
                let values = chunks.next().map(<[f64]>::to_vec).unwrap_or_default();
                per_channel.push(Matrix::from_vec(filter_size, filter_size, values)?);
            }
            restored.push(per_channel);
        }

        layer.grad_filters = zeros_like(&restored);
        layer.grad_biases = vec![0.0; num_filters];
        layer.filters = restored;
        layer.biases = biases;
        layer.input_shape = Some(shape);
        Ok(layer)
    }

    pub fn filter_size(&self) -> usize {
        self.filter_size
    }

    pub fn num_filters(&self) -> usize {
        self.num_filters
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// Filters indexed `[filter][channel]`.
    pub fn filters(&self) -> &[Vec<Matrix>] {
        &self.filters
    }

    pub fn filters_mut(&mut self) -> &mut [Vec<Matrix>] {
        &mut self.filters
    }

    pub fn biases(&self) -> &[f64] {
        &self.biases
    }

    pub fn biases_mut(&mut self) -> &mut [f64] {
        &mut self.biases
    }

    /// Accumulated filter gradients since the last reset or update.
    pub fn filter_gradients(&self) -> &[Vec<Matrix>] {
        &self.grad_filters
    }

    pub fn bias_gradients(&self) -> &[f64] {
        &self.grad_biases
    }
}

fn zeros_like(filters: &[Vec<Matrix>]) -> Vec<Vec<Matrix>> {
    filters
        .iter()
        .map(|per_channel| {
            per_channel
                .iter()
                .map(|m| Matrix::zeros(m.rows(), m.cols()))
                .collect()
        })
        .collect()
}

impl Adaptive for ConvolutionalLayer {
    /// Allocates filters for the input depth and draws them from a zero-mean
    /// Gaussian with standard deviation `sqrt(2 / (depth * filter_size²))` (He).
    /// Biases start at zero.
    fn initialize(&mut self, input_shape: Shape, rng: &mut SimpleRng) -> Result<()> {
        if self.num_filters == 0 {
            return Err(NetworkError::InvalidArgument(
                "convolutional layer needs at least one filter".to_string(),
            ));
        }
        if input_shape.depth == 0 {
            return Err(NetworkError::ShapeMismatch {
                layer: NAME,
                expected: Shape::new(1, input_shape.height, input_shape.width),
                actual: input_shape,
            });
        }
        self.output_shape(input_shape)?;

        let fan_in = (input_shape.depth * self.filter_size * self.filter_size) as f64;
        let normal = Normal::new(0.0, (2.0 / fan_in).sqrt())
            .map_err(|e| NetworkError::InvalidArgument(e.to_string()))?;

        self.filters = (0..self.num_filters)
            .map(|_| {
                (0..input_shape.depth)
                    .map(|_| {
                        let mut filter = Matrix::zeros(self.filter_size, self.filter_size);
                        for value in filter.as_mut_slice() {
                            *value = normal.sample(&mut *rng);
                        }
                        filter
                    })
                    .collect()
            })
            .collect();
        self.biases = vec![0.0; self.num_filters];
        self.grad_filters = zeros_like(&self.filters);
        self.grad_biases = vec![0.0; self.num_filters];
        self.input_shape = Some(input_shape);
        self.cached_input = None;
        self.cached_pre_activation = None;
        Ok(())
    }

    fn input_shape(&self) -> Option<Shape> {
        self.input_shape
    }
}

impl Parameterized for ConvolutionalLayer {
    fn update_parameters(&mut self, learning_rate: f64, batch_size: usize) {
        let scale = learning_rate / batch_size.max(1) as f64;

        for (filter, grad) in self
            .filters
            .iter_mut()
            .flatten()
            .zip(self.grad_filters.iter_mut().flatten())
        {
            for (w, g) in filter.as_mut_slice().iter_mut().zip(grad.as_mut_slice()) {
                *w -= scale * *g;
                *g = 0.0;
            }
        }
        for (b, g) in self.biases.iter_mut().zip(self.grad_biases.iter_mut()) {
            *b -= scale * *g;
            *g = 0.0;
        }
    }

    fn reset_gradients(&mut self) {
        self.grad_filters
            .iter_mut()
            .flatten()
            .for_each(|g| g.fill(0.0));
        self.grad_biases.iter_mut().for_each(|g| *g = 0.0);
    }
}

impl Layer for ConvolutionalLayer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &Tensor3D) -> Result<Tensor3D> {
        let expected = self.input_shape.ok_or(NetworkError::Uninitialized { layer: NAME })?;
        if input.shape() != expected {
            return Err(NetworkError::ShapeMismatch {
                layer: NAME,
                expected,
                actual: input.shape(),
            });
        }
        let out_shape = self.output_shape(expected)?;
        let plane = out_shape.height * out_shape.width;

        let channels: Vec<Matrix> = (0..expected.depth).map(|d| input.channel(d)).collect();
        let mut pre_activation = Tensor3D::zeros(out_shape);

        for (f, (per_channel, &bias)) in self.filters.iter().zip(&self.biases).enumerate() {
            let map = &mut pre_activation.as_mut_slice()[f * plane..(f + 1) * plane];
            map.iter_mut().for_each(|v| *v = bias);
            for (channel, filter) in channels.iter().zip(per_channel) {
                let response = convolve(channel, filter, self.stride)?;
                for (acc, value) in map.iter_mut().zip(response.as_slice()) {
                    *acc += value;
                }
            }
        }

        let mut output = pre_activation.clone();
        for value in output.as_mut_slice() {
            *value = self.activation.activate(*value);
        }

        self.cached_input = Some(input.clone());
        self.cached_pre_activation = Some(pre_activation);
        Ok(output)
    }

    fn backward(&mut self, output_gradient: &Tensor3D) -> Result<Tensor3D> {
        // The cache survives a rejected gradient.
        let out_shape = self
            .cached_pre_activation
            .as_ref()
            .map(Tensor3D::shape)
            .ok_or(NetworkError::MissingForwardPass { layer: NAME })?;
        if output_gradient.shape() != out_shape {
            return Err(NetworkError::ShapeMismatch {
                layer: NAME,
                expected: out_shape,
                actual: output_gradient.shape(),
            });
        }
        let (input, pre_activation) =
            match (self.cached_input.take(), self.cached_pre_activation.take()) {
                (Some(input), Some(pre)) => (input, pre),
                _ => return Err(NetworkError::MissingForwardPass { layer: NAME }),
            };

        let in_shape = input.shape();
        let channels: Vec<Matrix> = (0..in_shape.depth).map(|d| input.channel(d)).collect();
        let mut input_gradient = Tensor3D::zeros(in_shape);
        let in_plane = in_shape.height * in_shape.width;
        let out_plane = out_shape.height * out_shape.width;

        for f in 0..self.num_filters {
            let grads = &output_gradient.as_slice()[f * out_plane..(f + 1) * out_plane];
            let pre = &pre_activation.as_slice()[f * out_plane..(f + 1) * out_plane];
            let local: Vec<f64> = grads
                .iter()
                .zip(pre)
                .map(|(g, &z)| g * self.activation.derivative(z))
                .collect();

            self.grad_biases[f] += local.iter().sum::<f64>();

            let local = Matrix::from_vec(out_shape.height, out_shape.width, local)?;
            let dilated = dilate(&local, self.stride);

            for (d, channel) in channels.iter().enumerate() {
                // The window may be wider than the filter when the stride truncated
                // trailing rows/columns; only the top-left filter_size² block is used.
                let filter_grad = convolve(channel, &dilated, 1)?;
                let acc = &mut self.grad_filters[f][d];
                for i in 0..self.filter_size {
                    for j in 0..self.filter_size {
                        acc.add_at(i, j, filter_grad.get(i, j));
                    }
                }

                let spread = full_convolve(&dilated, &rotate180(&self.filters[f][d]));
                let target = &mut input_gradient.as_mut_slice()[d * in_plane..(d + 1) * in_plane];
                let rows = spread.rows().min(in_shape.height);
                let cols = spread.cols().min(in_shape.width);
                for r in 0..rows {
                    for c in 0..cols {
                        target[r * in_shape.width + c] += spread.get(r, c);
                    }
                }
            }
        }

        Ok(input_gradient)
    }

    fn output_shape(&self, input_shape: Shape) -> Result<Shape> {
        if self.stride == 0 {
            return Err(NetworkError::InvalidArgument(
                "convolution stride must be positive".to_string(),
            ));
        }
        match (
            convolved_size(input_shape.height, self.filter_size, self.stride),
            convolved_size(input_shape.width, self.filter_size, self.stride),
        ) {
            (Some(height), Some(width)) => Ok(Shape::new(self.num_filters, height, width)),
            _ => Err(NetworkError::ShapeMismatch {
                layer: NAME,
                expected: Shape::new(input_shape.depth, self.filter_size, self.filter_size),
                actual: input_shape,
            }),
        }
    }

    fn parameter_count(&self) -> usize {
        self.filters
            .iter()
            .flatten()
            .map(|f| f.as_slice().len())
            .sum::<usize>()
            + self.biases.len()
    }

    fn state(&self) -> LayerState {
        LayerState::Convolutional {
            filter_size: self.filter_size,
            num_filters: self.num_filters,
            stride: self.stride,
            activation: self.activation,
            input_shape: self.input_shape,
            filters: self
                .filters
                .iter()
                .flatten()
                .flat_map(|f| f.as_slice().iter().copied())
                .collect(),
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

    fn initialized(filter_size: usize, num_filters: usize, shape: Shape) -> ConvolutionalLayer {
        let mut rng = SimpleRng::new(42);
        let mut layer = ConvolutionalLayer::new(filter_size, num_filters);
        layer.initialize(shape, &mut rng).unwrap();
        layer
    }

    #[test]
    fn test_conv_defaults() {
        let layer = ConvolutionalLayer::new(3, 8);
        assert_eq!(layer.stride(), 1);
        assert_eq!(layer.activation(), Activation::Relu);
        assert!(layer.input_shape().is_none());
    }

    #[test]
    fn test_conv_parameter_count() {
        let layer = initialized(3, 8, Shape::new(2, 10, 10));
        // weights: 8 * 2 * 3 * 3 = 144, biases: 8
        assert_eq!(layer.parameter_count(), 152);
    }

    #[test]
    fn test_conv_output_dimensions() {
        let layer = ConvolutionalLayer::new(5, 4);
        assert_eq!(
            layer.output_shape(Shape::new(1, 28, 28)).unwrap(),
            Shape::new(4, 24, 24)
        );
        let strided = ConvolutionalLayer::new(3, 4).with_stride(2);
        assert_eq!(
            strided.output_shape(Shape::new(1, 8, 8)).unwrap(),
            Shape::new(4, 3, 3)
        );
    }

    #[test]
    fn test_conv_filter_larger_than_input() {
        let layer = ConvolutionalLayer::new(5, 1);
        assert!(matches!(
            layer.output_shape(Shape::new(1, 3, 3)),
            Err(NetworkError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_conv_zero_stride_rejected() {
        let layer = ConvolutionalLayer::new(3, 1).with_stride(0);
        assert!(matches!(
            layer.output_shape(Shape::new(1, 5, 5)),
            Err(NetworkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_conv_he_initialization_scale() {
        let layer = initialized(5, 16, Shape::new(3, 12, 12));
        let values: Vec<f64> = layer
            .filters()
            .iter()
            .flatten()
            .flat_map(|f| f.as_slice().iter().copied())
            .collect();
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let expected_var = 2.0 / (3.0 * 25.0);
        assert!(mean.abs() < 0.05, "mean {}", mean);
        assert!((var - expected_var).abs() < expected_var * 0.25, "var {}", var);
        assert!(layer.biases().iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_conv_deterministic_initialization() {
        let a = initialized(3, 4, Shape::new(2, 6, 6));
        let b = initialized(3, 4, Shape::new(2, 6, 6));
        assert_eq!(a.filters(), b.filters());
    }

    #[test]
    fn test_conv_forward_before_initialize() {
        let mut layer = ConvolutionalLayer::new(3, 1);
        let input = Tensor3D::zeros(Shape::new(1, 5, 5));
        assert!(matches!(
            layer.forward(&input),
            Err(NetworkError::Uninitialized { .. })
        ));
    }

    #[test]
    fn test_conv_backward_without_forward() {
        let mut layer = initialized(3, 1, Shape::new(1, 5, 5));
        let grad = Tensor3D::zeros(Shape::new(1, 3, 3));
        assert!(matches!(
            layer.backward(&grad),
            Err(NetworkError::MissingForwardPass { .. })
        ));
    }

    #[test]
    fn test_conv_update_applies_averaged_gradient() {
        let mut layer = initialized(2, 1, Shape::new(1, 3, 3));
        layer.filters_mut()[0][0].fill(0.5);
        let input = Tensor3D::from_vec(Shape::new(1, 3, 3), vec![1.0; 9]).unwrap();

        // Every pre-activation is 2.0, so ReLU passes the gradient through.
        layer.forward(&input).unwrap();
        let grad = Tensor3D::from_vec(Shape::new(1, 2, 2), vec![1.0; 4]).unwrap();
        layer.backward(&grad).unwrap();

        assert_eq!(layer.filter_gradients()[0][0].as_slice(), &[4.0; 4]);
        assert_eq!(layer.bias_gradients(), &[4.0]);

        layer.update_parameters(0.1, 2);
        for &w in layer.filters()[0][0].as_slice() {
            assert!((w - 0.3).abs() < 1e-12);
        }
        assert!((layer.biases()[0] + 0.2).abs() < 1e-12);
        assert!(layer.bias_gradients().iter().all(|&g| g == 0.0));
        assert!(layer.filter_gradients()[0][0]
            .as_slice()
            .iter()
            .all(|&g| g == 0.0));
    }

    #[test]
    fn test_conv_reset_gradients() {
        let mut layer = initialized(2, 1, Shape::new(1, 3, 3));
        layer.filters_mut()[0][0].fill(0.5);
        let input = Tensor3D::from_vec(Shape::new(1, 3, 3), vec![1.0; 9]).unwrap();
        layer.forward(&input).unwrap();
        let grad = Tensor3D::from_vec(Shape::new(1, 2, 2), vec![1.0; 4]).unwrap();
        layer.backward(&grad).unwrap();

        layer.reset_gradients();
        assert_eq!(layer.bias_gradients(), &[0.0]);
        assert_eq!(layer.filter_gradients()[0][0].as_slice(), &[0.0; 4]);
        assert_eq!(layer.filters()[0][0].as_slice(), &[0.5; 4]);
    }
}
