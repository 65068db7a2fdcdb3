//! Network orchestrator
//!
//! A [`Network`] owns an ordered pipeline of layers. It threads one sample at a
//! time forward and backward, accumulates gradients across a mini-batch and
//! applies a single averaged update per batch.

use crate::dataset::argmax;
use crate::error::{NetworkError, Result};
use crate::layers::Layer;
use crate::tensor::{Sample, Shape, Tensor3D};
use crate::utils::SimpleRng;
use log::{debug, info};
use rand::seq::SliceRandom;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

/// Floor applied to predictions before taking the log in the loss.
const LOSS_EPSILON: f64 = 1e-12;

/// Settings for a call to [`Network::sgd`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOptions {
    pub epochs: usize,
    pub batch_size: usize,
    /// When set, the network is saved here every time test accuracy improves.
    pub best_model_path: Option<PathBuf>,
}

impl TrainOptions {
    pub fn new(epochs: usize, batch_size: usize) -> Self {
        Self {
            epochs,
            batch_size,
            best_model_path: None,
        }
    }

    pub fn with_best_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.best_model_path = Some(path.into());
        self
    }
}

/// Outcome of one training epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Mean cross-entropy over the training samples seen this epoch.
    pub mean_loss: f64,
    /// Correct test predictions, 0 when no test set was given.
    pub correct: usize,
    pub test_size: usize,
    /// Test accuracy in `[0, 1]`, `None` without a test set.
    pub accuracy: Option<f64>,
    pub elapsed_secs: f64,
}

/// Everything [`Network::sgd`] measured.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochReport>,
    pub best_accuracy: Option<f64>,
}

impl TrainingHistory {
    pub fn last(&self) -> Option<&EpochReport> {
        self.epochs.last()
    }
}

/// One row of [`Network::summary`].
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSummary {
    pub index: usize,
    pub name: &'static str,
    pub input_shape: Shape,
    pub output_shape: Shape,
    pub parameter_count: usize,
}

/// Ordered pipeline of layers trained with mini-batch SGD.
///
/// The shape at every layer boundary is recorded as layers are added, so the
/// output shape of layer `i` is always the shape layer `i + 1` was initialized with.
///
/// # Example
///
/// ```
/// use rust_cnn::layers::{FlattenLayer, FullyConnectedLayer, SoftmaxLayer};
/// use rust_cnn::network::Network;
/// use rust_cnn::tensor::Shape;
/// use rust_cnn::utils::{Activation, SimpleRng};
///
/// let mut rng = SimpleRng::new(7);
/// let mut network = Network::new(0.02, Shape::new(1, 28, 28));
/// network.add_layer(FlattenLayer::new(), &mut rng).unwrap();
/// network.add_layer(FullyConnectedLayer::new(10, Activation::Relu), &mut rng).unwrap();
/// network.add_layer(SoftmaxLayer::new(), &mut rng).unwrap();
/// assert_eq!(network.output_shape(), Shape::flat(10));
/// ```
pub struct Network {
    learning_rate: f64,
    /// `shapes[0]` is the network input, `shapes[i + 1]` the output of layer `i`.
    shapes: Vec<Shape>,
    layers: Vec<Box<dyn Layer>>,
}

impl Network {
    /// Empty network accepting inputs of `input_shape`.
    pub fn new(learning_rate: f64, input_shape: Shape) -> Self {
        Self {
            learning_rate,
            shapes: vec![input_shape],
            layers: Vec::new(),
        }
    }

    /// Appends a layer at the end of the pipeline.
    ///
    /// Adaptive layers are initialized with the current trailing shape, drawing
    /// any weights from `rng`. A layer that already knows its input shape (built
    /// from fixed parameters) is checked against the trailing shape instead.
    pub fn add_layer<L: Layer + 'static>(&mut self, layer: L, rng: &mut SimpleRng) -> Result<()> {
        self.append(Box::new(layer), Some(rng))
    }

    /// Same as [`Network::add_layer`] for an already boxed layer.
    pub fn add_boxed_layer(&mut self, layer: Box<dyn Layer>, rng: &mut SimpleRng) -> Result<()> {
        self.append(layer, Some(rng))
    }

    /// Appends a layer restored from disk. Adaptive layers must already be
    /// initialized; nothing is drawn from a generator.
    pub(crate) fn append_restored(&mut self, layer: Box<dyn Layer>) -> Result<()> {
        self.append(layer, None)
    }

    fn append(&mut self, mut layer: Box<dyn Layer>, rng: Option<&mut SimpleRng>) -> Result<()> {
        let name = layer.name();
        let input_shape = self.output_shape();

        if let Some(adaptive) = layer.as_adaptive_mut() {
            match (adaptive.input_shape(), rng) {
                (Some(existing), _) if existing != input_shape => {
                    return Err(NetworkError::ShapeMismatch {
                        layer: name,
                        expected: existing,
                        actual: input_shape,
                    });
                }
                (Some(_), _) => {}
                (None, Some(rng)) => adaptive.initialize(input_shape, rng)?,
                (None, None) => return Err(NetworkError::Uninitialized { layer: name }),
            }
        }

        let output_shape = layer.output_shape(input_shape)?;
        debug!(
            "added layer {} ({}): {} -> {}",
            self.layers.len(),
            name,
            input_shape,
            output_shape
        );

        self.shapes.push(output_shape);
        self.layers.push(layer);
        Ok(())
    }

    /// Runs one sample through every layer in order.
    pub fn forward(&mut self, input: &Tensor3D) -> Result<Tensor3D> {
        if input.shape() != self.input_shape() {
            return Err(NetworkError::ShapeMismatch {
                layer: "Network",
                expected: self.input_shape(),
                actual: input.shape(),
            });
        }

        let mut current = input.clone();
        for layer in self.layers.iter_mut() {
            current = layer.forward(&current)?;
        }
        Ok(current)
    }

    /// Runs a gradient of the output back through every layer in reverse order.
    pub fn backward(&mut self, gradient: &Tensor3D) -> Result<Tensor3D> {
        let mut current = gradient.clone();
        for layer in self.layers.iter_mut().rev() {
            current = layer.backward(&current)?;
        }
        Ok(current)
    }

    /// Zeroes the gradient accumulators of every parameterized layer.
    pub fn reset_gradients(&mut self) {
        for layer in self.layers.iter_mut() {
            if let Some(parameterized) = layer.as_parameterized_mut() {
                parameterized.reset_gradients();
            }
        }
    }

    /// Applies the accumulated gradients, averaged over `batch_size`.
    pub fn update_parameters(&mut self, batch_size: usize) {
        let learning_rate = self.learning_rate;
        for layer in self.layers.iter_mut() {
            if let Some(parameterized) = layer.as_parameterized_mut() {
                parameterized.update_parameters(learning_rate, batch_size);
            }
        }
    }

    /// One mini-batch step: reset, accumulate over every sample, update once.
    ///
    /// Parameters move by `learning_rate * gradient_sum / batch_size`; pass the
    /// configured batch size even for a smaller final batch. Returns the summed
    /// cross-entropy of the batch, measured before the update.
    pub fn train_mini_batch(&mut self, batch: &[Sample], batch_size: usize) -> Result<f64> {
        self.train_batch(batch.iter(), batch_size)
    }

    fn train_batch<'a, I>(&mut self, batch: I, batch_size: usize) -> Result<f64>
    where
        I: IntoIterator<Item = &'a Sample>,
    {
        if batch_size == 0 {
            return Err(NetworkError::InvalidArgument("batch size must be positive".to_string()));
        }

        self.reset_gradients();

        let mut total_loss = 0.0;
        for sample in batch {
            let prediction = self.forward(sample.input())?;
            let gradient = self.output_gradient(&prediction, sample.label())?;
            total_loss += cross_entropy(prediction.as_slice(), sample.label());
            self.backward(&gradient)?;
        }

        self.update_parameters(batch_size);
        Ok(total_loss)
    }

    /// `prediction - target`, the gradient of softmax followed by cross-entropy.
    fn output_gradient(&self, prediction: &Tensor3D, label: &[f64]) -> Result<Tensor3D> {
        if prediction.as_slice().len() != label.len() {
            return Err(NetworkError::ShapeMismatch {
                layer: "Network",
                expected: prediction.shape(),
                actual: Shape::flat(label.len()),
            });
        }
        let gradient = prediction
            .as_slice()
            .iter()
            .zip(label)
            .map(|(p, t)| p - t)
            .collect();
        Tensor3D::from_vec(prediction.shape(), gradient)
    }

    /// Mini-batch stochastic gradient descent.
    ///
    /// Every epoch shuffles the training set, splits it into contiguous batches of
    /// `options.batch_size` (the last one may be smaller) and trains on each. With a
    /// test set the epoch ends with an evaluation, and if `best_model_path` is set
    /// the network is saved whenever accuracy beats the best seen so far.
    pub fn sgd(
        &mut self,
        options: &TrainOptions,
        training: &[Sample],
        test: Option<&[Sample]>,
        rng: &mut SimpleRng,
    ) -> Result<TrainingHistory> {
        if options.batch_size == 0 {
            return Err(NetworkError::InvalidArgument("batch size must be positive".to_string()));
        }

        let mut history = TrainingHistory::default();
        let mut order: Vec<&Sample> = training.iter().collect();

        for epoch in 1..=options.epochs {
            let start_time = Instant::now();
            order.shuffle(rng);

            let mut total_loss = 0.0;
            for (batch_index, batch) in order.chunks(options.batch_size).enumerate() {
                let batch_loss = self.train_batch(batch.iter().copied(), options.batch_size)?;
                debug!(
                    "epoch {} batch {}: loss={:.6}",
                    epoch,
                    batch_index,
                    batch_loss / batch.len() as f64
                );
                total_loss += batch_loss;
            }
            let mean_loss = if training.is_empty() {
                0.0
            } else {
                total_loss / training.len() as f64
            };

            let (correct, test_size, accuracy) = match test {
                Some(test) if !test.is_empty() => {
                    let correct = self.evaluate(test)?;
                    (correct, test.len(), Some(correct as f64 / test.len() as f64))
                }
                _ => (0, 0, None),
            };

            let elapsed_secs = start_time.elapsed().as_secs_f64();
            match accuracy {
                Some(accuracy) => info!(
                    "Epoch {} | loss={:.6} | {}/{} correct ({:.2}%) | time={:.3}s",
                    epoch,
                    mean_loss,
                    correct,
                    test_size,
                    accuracy * 100.0,
                    elapsed_secs
                ),
                None => info!(
                    "Epoch {} | loss={:.6} | time={:.3}s",
                    epoch, mean_loss, elapsed_secs
                ),
            }

            if let Some(accuracy) = accuracy {
                let improved = history.best_accuracy.map_or(true, |best| accuracy > best);
                if improved {
                    history.best_accuracy = Some(accuracy);
                    if let Some(path) = &options.best_model_path {
                        self.save(path)?;
                        info!(
                            "new best accuracy {:.2}%, saved network to {}",
                            accuracy * 100.0,
                            path.display()
                        );
                    }
                }
            }

            history.epochs.push(EpochReport {
                epoch,
                mean_loss,
                correct,
                test_size,
                accuracy,
                elapsed_secs,
            });
        }

        Ok(history)
    }

    /// Number of samples whose predicted class matches the arg-max of the label.
    pub fn evaluate(&mut self, samples: &[Sample]) -> Result<usize> {
        let mut correct = 0;
        for sample in samples {
            if self.predict(sample.input())? == argmax(sample.label()) {
                correct += 1;
            }
        }
        Ok(correct)
    }

    /// Arg-max class of a forward pass; ties resolve to the lowest index.
    pub fn predict(&mut self, input: &Tensor3D) -> Result<usize> {
        let output = self.forward(input)?;
        Ok(argmax(output.as_slice()))
    }

    /// Mean cross-entropy over `samples`. Forward passes only; parameters and
    /// gradient accumulators are left untouched.
    pub fn loss(&mut self, samples: &[Sample]) -> Result<f64> {
        if samples.is_empty() {
            return Ok(0.0);
        }
        let mut total = 0.0;
        for sample in samples {
            let prediction = self.forward(sample.input())?;
            total += cross_entropy(prediction.as_slice(), sample.label());
        }
        Ok(total / samples.len() as f64)
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    pub fn input_shape(&self) -> Shape {
        self.shapes[0]
    }

    /// Shape produced by the last layer (the input shape of an empty network).
    pub fn output_shape(&self) -> Shape {
        self.shapes[self.shapes.len() - 1]
    }

    /// Shapes at every layer boundary, `len() + 1` entries.
    pub fn layer_shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(|layer| layer.parameter_count()).sum()
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    /// Mutable access to one layer, for inspecting or adjusting parameters in
    /// place. The pipeline itself (order, count, shapes) cannot be changed.
    pub fn layer_mut(&mut self, index: usize) -> Option<&mut (dyn Layer + 'static)> {
        self.layers.get_mut(index).map(|layer| layer.as_mut())
    }

    pub fn summary(&self) -> Vec<LayerSummary> {
        self.layers
            .iter()
            .enumerate()
            .map(|(index, layer)| LayerSummary {
                index,
                name: layer.name(),
                input_shape: self.shapes[index],
                output_shape: self.shapes[index + 1],
                parameter_count: layer.parameter_count(),
            })
            .collect()
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("learning_rate", &self.learning_rate)
            .field("shapes", &self.shapes)
            .field("layers", &self.layers.iter().map(|l| l.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Network summary (learning rate {})", self.learning_rate)?;
        writeln!(
            f,
            "{:<4} {:<16} {:<16} {:<16} {:>10}",
            "#", "Layer", "Input", "Output", "Params"
        )?;
        for row in self.summary() {
            writeln!(
                f,
                "{:<4} {:<16} {:<16} {:<16} {:>10}",
                row.index,
                row.name,
                row.input_shape.to_string(),
                row.output_shape.to_string(),
                row.parameter_count
            )?;
        }
        write!(f, "Total parameters: {}", self.parameter_count())
    }
}

/// `-Σ target · ln(max(prediction, ε))`.
fn cross_entropy(prediction: &[f64], target: &[f64]) -> f64 {
    -prediction
        .iter()
        .zip(target)
        .map(|(&p, &t)| t * p.max(LOSS_EPSILON).ln())
        .sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{ConvolutionalLayer, FlattenLayer, FullyConnectedLayer, SoftmaxLayer};
    use crate::tensor::Matrix;
    use crate::utils::Activation;
    use approx::assert_relative_eq;

    fn small_cnn(rng: &mut SimpleRng) -> Network {
        let mut network = Network::new(0.1, Shape::new(1, 6, 6));
        network.add_layer(ConvolutionalLayer::new(3, 2), rng).unwrap();
        network.add_layer(FlattenLayer::new(), rng).unwrap();
        network
            .add_layer(FullyConnectedLayer::new(3, Activation::elu(1.0).unwrap()), rng)
            .unwrap();
        network.add_layer(SoftmaxLayer::new(), rng).unwrap();
        network
    }

    #[test]
    fn test_shape_chain_is_recorded() {
        let mut rng = SimpleRng::new(3);
        let network = small_cnn(&mut rng);

        assert_eq!(
            network.layer_shapes(),
            &[
                Shape::new(1, 6, 6),
                Shape::new(2, 4, 4),
                Shape::flat(32),
                Shape::flat(3),
                Shape::flat(3),
            ]
        );
        assert_eq!(network.len(), 4);
        assert_eq!(network.parameter_count(), (2 * 9 + 2) + (32 * 3 + 3));
    }

    #[test]
    fn test_fully_connected_needs_flat_input() {
        let mut rng = SimpleRng::new(3);
        let mut network = Network::new(0.1, Shape::new(1, 4, 4));
        let err = network
            .add_layer(FullyConnectedLayer::new(3, Activation::Relu), &mut rng)
            .unwrap_err();
        assert!(matches!(err, NetworkError::ShapeMismatch { .. }));
        assert!(network.is_empty());
    }

    #[test]
    fn test_preinitialized_layer_must_match_chain() {
        let mut rng = SimpleRng::new(3);
        let mut network = Network::new(0.1, Shape::flat(3));
        let weights = Matrix::zeros(4, 2);
        let layer =
            FullyConnectedLayer::with_parameters(weights, vec![0.0; 2], Activation::Relu).unwrap();
        let err = network.add_layer(layer, &mut rng).unwrap_err();
        assert!(matches!(err, NetworkError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_forward_rejects_wrong_input_shape() {
        let mut rng = SimpleRng::new(3);
        let mut network = small_cnn(&mut rng);
        assert!(network.forward(&Tensor3D::zeros(Shape::new(1, 5, 5))).is_err());
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let mut rng = SimpleRng::new(3);
        let mut network = small_cnn(&mut rng);
        let err = network
            .sgd(&TrainOptions::new(1, 0), &[], None, &mut rng)
            .unwrap_err();
        assert!(matches!(err, NetworkError::InvalidArgument(_)));
    }

    #[test]
    fn test_layer_mut_reaches_one_layer() {
        let mut rng = SimpleRng::new(3);
        let mut network = small_cnn(&mut rng);

        let layer = network.layer_mut(2).unwrap();
        assert_eq!(layer.name(), "FullyConnected");
        assert!(layer.as_parameterized_mut().is_some());
        assert!(network.layer_mut(1).unwrap().as_parameterized_mut().is_none());
        assert!(network.layer_mut(4).is_none());
        assert_eq!(network.len(), 4);
    }

    #[test]
    fn test_cross_entropy_clamps_zero_predictions() {
        let loss = cross_entropy(&[0.0, 1.0], &[1.0, 0.0]);
        assert_relative_eq!(loss, -(1e-12f64).ln());
    }

    #[test]
    fn test_summary_and_display() {
        let mut rng = SimpleRng::new(3);
        let network = small_cnn(&mut rng);
        let summary = network.summary();

        assert_eq!(summary.len(), 4);
        assert_eq!(summary[0].name, "Convolutional");
        assert_eq!(summary[0].parameter_count, 20);
        assert_eq!(summary[2].input_shape, Shape::flat(32));

        let text = network.to_string();
        assert!(text.contains("Softmax"));
        assert!(text.contains("Total parameters: 119"));
    }
}
