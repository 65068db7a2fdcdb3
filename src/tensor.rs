//! Tensor containers used by every layer
//!
//! The engine has exactly one data shape: a rank-3 tensor addressed as
//! (channel, row, column). Images, feature maps and flat vectors are all
//! `Tensor3D`s; a flat vector of `n` values has shape `[1, 1, n]`.
//!
//! `Matrix` is the 2-D (row, column) view the convolution kernels work on.

use crate::error::{NetworkError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dimensions of a `Tensor3D`: depth (channels) × height (rows) × width (columns).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub depth: usize,
    pub height: usize,
    pub width: usize,
}

impl Shape {
    pub const fn new(depth: usize, height: usize, width: usize) -> Self {
        Self {
            depth,
            height,
            width,
        }
    }

    /// Shape of a flat vector holding `len` values.
    pub const fn flat(len: usize) -> Self {
        Self::new(1, 1, len)
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.depth * self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True for the `[1, 1, n]` vector arity.
    pub fn is_flat(&self) -> bool {
        self.depth == 1 && self.height == 1
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.depth, self.height, self.width)
    }
}

impl From<[usize; 3]> for Shape {
    fn from(dims: [usize; 3]) -> Self {
        Self::new(dims[0], dims[1], dims[2])
    }
}

/// Row-major 2-D matrix of reals.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Builds a matrix from row-major values.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(NetworkError::InvalidArgument(format!(
                "matrix {}x{} needs {} values, got {}",
                rows,
                cols,
                rows * cols,
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Builds a matrix from nested rows; every row must have the same length.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (r, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(NetworkError::InvalidArgument(format!(
                    "row {} has {} columns, expected {}",
                    r,
                    row.len(),
                    cols
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] = value;
    }

    #[inline]
    pub fn add_at(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] += value;
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    pub fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|v| *v = value);
    }
}

/// Rank-3 tensor stored contiguously in (channel, row, column) order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor3D {
    shape: Shape,
    data: Vec<f64>,
}

impl Tensor3D {
    pub fn zeros(shape: Shape) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.len()],
        }
    }

    /// Wraps row-major values; the length must match `shape`.
    pub fn from_vec(shape: Shape, data: Vec<f64>) -> Result<Self> {
        if data.len() != shape.len() {
            return Err(NetworkError::InvalidArgument(format!(
                "tensor of shape {} needs {} values, got {}",
                shape,
                shape.len(),
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// A `[1, 1, n]` tensor holding `values`.
    pub fn from_flat(values: Vec<f64>) -> Self {
        Self {
            shape: Shape::flat(values.len()),
            data: values,
        }
    }

    /// Builds a tensor from nested `[channel][row][col]` vectors.
    pub fn from_nested(nested: &[Vec<Vec<f64>>]) -> Result<Self> {
        let channels = nested
            .iter()
            .map(|c| Matrix::from_rows(c))
            .collect::<Result<Vec<_>>>()?;
        Self::from_channels(&channels)
    }

    /// Stacks equally-sized matrices as channels.
    pub fn from_channels(channels: &[Matrix]) -> Result<Self> {
        let (height, width) = channels.first().map_or((0, 0), |m| (m.rows(), m.cols()));
        let shape = Shape::new(channels.len(), height, width);
        let mut data = Vec::with_capacity(shape.len());
        for channel in channels {
            if channel.rows() != height || channel.cols() != width {
                return Err(NetworkError::ShapeMismatch {
                    layer: "Tensor3D",
                    expected: Shape::new(1, height, width),
                    actual: Shape::new(1, channel.rows(), channel.cols()),
                });
            }
            data.extend_from_slice(channel.as_slice());
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    #[inline]
    fn index(&self, c: usize, r: usize, w: usize) -> usize {
        (c * self.shape.height + r) * self.shape.width + w
    }

    #[inline]
    pub fn get(&self, c: usize, r: usize, w: usize) -> f64 {
        self.data[self.index(c, r, w)]
    }

    #[inline]
    pub fn set(&mut self, c: usize, r: usize, w: usize, value: f64) {
        let i = self.index(c, r, w);
        self.data[i] = value;
    }

    /// Copies channel `c` out as a matrix.
    pub fn channel(&self, c: usize) -> Matrix {
        let plane = self.shape.height * self.shape.width;
        Matrix {
            rows: self.shape.height,
            cols: self.shape.width,
            data: self.data[c * plane..(c + 1) * plane].to_vec(),
        }
    }

    /// Borrow of channel `c` in row-major order.
    pub fn channel_slice(&self, c: usize) -> &[f64] {
        let plane = self.shape.height * self.shape.width;
        &self.data[c * plane..(c + 1) * plane]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Same values with a different shape of equal length.
    pub fn reshape(self, shape: Shape) -> Result<Self> {
        if shape.len() != self.data.len() {
            return Err(NetworkError::ShapeMismatch {
                layer: "Tensor3D",
                expected: shape,
                actual: self.shape,
            });
        }
        Ok(Self {
            shape,
            data: self.data,
        })
    }
}

/// One training or test example: an input tensor and its one-hot label.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    input: Tensor3D,
    label: Vec<f64>,
}

impl Sample {
    pub fn new(input: Tensor3D, label: Vec<f64>) -> Self {
        Self { input, label }
    }

    pub fn input(&self) -> &Tensor3D {
        &self.input
    }

    pub fn label(&self) -> &[f64] {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_len_and_flat() {
        let shape = Shape::new(3, 4, 5);
        assert_eq!(shape.len(), 60);
        assert!(!shape.is_flat());
        assert!(Shape::flat(7).is_flat());
    }

    #[test]
    fn test_tensor_indexing_is_row_major() {
        let t = Tensor3D::from_vec(Shape::new(2, 2, 3), (0..12).map(f64::from).collect()).unwrap();
        assert_eq!(t.get(0, 0, 0), 0.0);
        assert_eq!(t.get(0, 1, 2), 5.0);
        assert_eq!(t.get(1, 0, 0), 6.0);
        assert_eq!(t.get(1, 1, 1), 10.0);
    }

    #[test]
    fn test_channel_extraction() {
        let t = Tensor3D::from_nested(&[
            vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            vec![vec![5.0, 6.0], vec![7.0, 8.0]],
        ])
        .unwrap();
        let c1 = t.channel(1);
        assert_eq!(c1.as_slice(), &[5.0, 6.0, 7.0, 8.0]);
        assert_eq!(t.channel_slice(0), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        assert!(Tensor3D::from_vec(Shape::new(1, 2, 2), vec![1.0; 3]).is_err());
        assert!(Matrix::from_vec(2, 2, vec![1.0; 5]).is_err());
    }

    #[test]
    fn test_ragged_rows_rejected() {
        assert!(Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).is_err());
    }

    #[test]
    fn test_reshape_keeps_values() {
        let t = Tensor3D::from_vec(Shape::new(1, 2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let flat = t.reshape(Shape::flat(4)).unwrap();
        assert_eq!(flat.shape(), Shape::flat(4));
        assert_eq!(flat.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
    }
}
