//! Tensor math kernels
//!
//! Pure functions over `Matrix` and `Tensor3D`. Convolutions here are
//! cross-correlations (no kernel flip); the backward pass obtains the flipped
//! form explicitly through [`rotate180`].

use crate::error::{NetworkError, Result};
use crate::tensor::{Matrix, Shape, Tensor3D};

/// Sum of element-wise products between `filter` and the window of `input`
/// whose top-left corner is at (`x`, `y`).
///
/// `x` indexes rows and `y` columns. Window positions outside `input`
/// contribute zero, so negative anchors are allowed.
pub fn apply_filter_at(input: &Matrix, filter: &Matrix, x: isize, y: isize) -> f64 {
    let rows = input.rows() as isize;
    let cols = input.cols() as isize;
    let mut sum = 0.0;

    for i in 0..filter.rows() {
        let r = x + i as isize;
        if r < 0 || r >= rows {
            continue;
        }
        for j in 0..filter.cols() {
            let c = y + j as isize;
            if c < 0 || c >= cols {
                continue;
            }
            sum += input.get(r as usize, c as usize) * filter.get(i, j);
        }
    }
    sum
}

/// Output length of a valid correlation: `(input - filter) / stride + 1`.
///
/// Returns `None` when the filter does not fit.
pub fn convolved_size(input: usize, filter: usize, stride: usize) -> Option<usize> {
    if stride == 0 || filter > input || filter == 0 {
        return None;
    }
    Some((input - filter) / stride + 1)
}

/// Valid-mode cross-correlation of `input` with `filter` at `stride`.
pub fn convolve(input: &Matrix, filter: &Matrix, stride: usize) -> Result<Matrix> {
    if stride == 0 {
        return Err(NetworkError::InvalidArgument(
            "convolution stride must be positive".to_string(),
        ));
    }
    let (out_rows, out_cols) = match (
        convolved_size(input.rows(), filter.rows(), stride),
        convolved_size(input.cols(), filter.cols(), stride),
    ) {
        (Some(r), Some(c)) => (r, c),
        _ => {
            return Err(NetworkError::ShapeMismatch {
                layer: "convolve",
                expected: Shape::new(1, filter.rows(), filter.cols()),
                actual: Shape::new(1, input.rows(), input.cols()),
            })
        }
    };

    let mut output = Matrix::zeros(out_rows, out_cols);
    for i in 0..out_rows {
        for j in 0..out_cols {
            let value =
                apply_filter_at(input, filter, (i * stride) as isize, (j * stride) as isize);
            output.set(i, j, value);
        }
    }
    Ok(output)
}

/// Full correlation: every anchor with any overlap, from `-(filter - 1)` to
/// `input - 1` on each axis. Output is `(input + filter - 1)` per axis.
pub fn full_convolve(input: &Matrix, filter: &Matrix) -> Matrix {
    let out_rows = (input.rows() + filter.rows()).saturating_sub(1);
    let out_cols = (input.cols() + filter.cols()).saturating_sub(1);
    let row_offset = filter.rows() as isize - 1;
    let col_offset = filter.cols() as isize - 1;

    let mut output = Matrix::zeros(out_rows, out_cols);
    for i in 0..out_rows {
        for j in 0..out_cols {
            let value = apply_filter_at(
                input,
                filter,
                i as isize - row_offset,
                j as isize - col_offset,
            );
            output.set(i, j, value);
        }
    }
    output
}

/// Reverses both axes.
pub fn rotate180(matrix: &Matrix) -> Matrix {
    let (rows, cols) = (matrix.rows(), matrix.cols());
    let mut rotated = Matrix::zeros(rows, cols);
    for i in 0..rows {
        for j in 0..cols {
            rotated.set(i, j, matrix.get(rows - 1 - i, cols - 1 - j));
        }
    }
    rotated
}

/// Spreads elements `stride` apart, filling the gaps with zeros.
///
/// A strided correlation's gradient equals the stride-1 correlation with the
/// dilated upstream gradient. `stride == 1` returns a copy.
pub fn dilate(matrix: &Matrix, stride: usize) -> Matrix {
    if stride <= 1 || matrix.rows() == 0 || matrix.cols() == 0 {
        return matrix.clone();
    }
    let rows = (matrix.rows() - 1) * stride + 1;
    let cols = (matrix.cols() - 1) * stride + 1;
    let mut dilated = Matrix::zeros(rows, cols);
    for i in 0..matrix.rows() {
        for j in 0..matrix.cols() {
            dilated.set(i * stride, j * stride, matrix.get(i, j));
        }
    }
    dilated
}

fn pool(
    input: &Matrix,
    pool_size: usize,
    reduce: impl Fn(&Matrix, usize, usize) -> f64,
) -> Result<Matrix> {
    if pool_size == 0 {
        return Err(NetworkError::InvalidArgument(
            "pool size must be positive".to_string(),
        ));
    }
    let out_rows = input.rows() / pool_size;
    let out_cols = input.cols() / pool_size;
    let mut output = Matrix::zeros(out_rows, out_cols);
    for i in 0..out_rows {
        for j in 0..out_cols {
            output.set(i, j, reduce(input, i * pool_size, j * pool_size));
        }
    }
    Ok(output)
}

/// Non-overlapping `pool_size × pool_size` max pooling. Trailing partial
/// windows are dropped.
pub fn max_pooling(input: &Matrix, pool_size: usize) -> Result<Matrix> {
    pool(input, pool_size, |m, r0, c0| {
        let mut max = m.get(r0, c0);
        for r in r0..r0 + pool_size {
            for c in c0..c0 + pool_size {
                max = max.max(m.get(r, c));
            }
        }
        max
    })
}

/// Non-overlapping `pool_size × pool_size` mean pooling. Trailing partial
/// windows are dropped.
pub fn average_pooling(input: &Matrix, pool_size: usize) -> Result<Matrix> {
    let area = (pool_size * pool_size) as f64;
    pool(input, pool_size, |m, r0, c0| {
        let mut sum = 0.0;
        for r in r0..r0 + pool_size {
            for c in c0..c0 + pool_size {
                sum += m.get(r, c);
            }
        }
        sum / area
    })
}

/// `output[j] = biases[j] + Σ_i input[i] * weights[i][j]`.
///
/// `weights` is `input.len() × biases.len()`.
pub fn dense_multiply(input: &[f64], weights: &Matrix, biases: &[f64]) -> Result<Vec<f64>> {
    if weights.rows() != input.len() || weights.cols() != biases.len() {
        return Err(NetworkError::ShapeMismatch {
            layer: "dense_multiply",
            expected: Shape::new(1, weights.rows(), weights.cols()),
            actual: Shape::new(1, input.len(), biases.len()),
        });
    }

    let mut output = biases.to_vec();
    for (i, &x) in input.iter().enumerate() {
        if x == 0.0 {
            continue;
        }
        let row = &weights.as_slice()[i * weights.cols()..(i + 1) * weights.cols()];
        for (out, &w) in output.iter_mut().zip(row) {
            *out += x * w;
        }
    }
    Ok(output)
}

/// Element-wise sum of two tensors of identical shape.
pub fn add(a: &Tensor3D, b: &Tensor3D) -> Result<Tensor3D> {
    if a.shape() != b.shape() {
        return Err(NetworkError::ShapeMismatch {
            layer: "add",
            expected: a.shape(),
            actual: b.shape(),
        });
    }
    let data = a
        .as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(x, y)| x + y)
        .collect();
    Tensor3D::from_vec(a.shape(), data)
}

/// Divides every element by `scalar`.
pub fn divide(a: &Tensor3D, scalar: f64) -> Tensor3D {
    let mut out = a.clone();
    out.as_mut_slice().iter_mut().for_each(|v| *v /= scalar);
    out
}

/// Inverse of the row-major flatten: rebuilds a `[depth, height, width]` tensor.
pub fn unflatten(vector: &[f64], depth: usize, height: usize, width: usize) -> Result<Tensor3D> {
    let shape = Shape::new(depth, height, width);
    if vector.len() != shape.len() {
        return Err(NetworkError::ShapeMismatch {
            layer: "unflatten",
            expected: Shape::flat(shape.len()),
            actual: Shape::flat(vector.len()),
        });
    }
    Tensor3D::from_vec(shape, vector.to_vec())
}
