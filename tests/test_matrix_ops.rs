//! Tests for the tensor math kernels
//!
//! Convolution, full convolution, rotation, dilation, pooling, dense multiply and
//! the element-wise tensor helpers, checked against hand-computed values.

use approx::assert_relative_eq;
use rust_cnn::ops::{
    add, average_pooling, convolve, dense_multiply, dilate, divide, full_convolve, max_pooling,
    rotate180, unflatten,
};
use rust_cnn::{Matrix, NetworkError, Shape, Tensor3D};

fn matrix(rows: &[&[f64]]) -> Matrix {
    Matrix::from_rows(&rows.iter().map(|r| r.to_vec()).collect::<Vec<_>>()).unwrap()
}

fn counting(rows: usize, cols: usize) -> Matrix {
    Matrix::from_vec(rows, cols, (0..rows * cols).map(|v| v as f64).collect()).unwrap()
}

// ============================================================================
// Convolution Tests
// ============================================================================

mod convolution_tests {
    use super::*;

    #[test]
    fn test_valid_convolution_values() {
        let input = matrix(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0], &[7.0, 8.0, 9.0]]);
        let filter = matrix(&[&[1.0, 0.0], &[0.0, -1.0]]);

        let output = convolve(&input, &filter, 1).unwrap();

        assert_eq!(output, matrix(&[&[-4.0, -4.0], &[-4.0, -4.0]]));
    }

    #[test]
    fn test_strided_convolution_truncates() {
        let input = matrix(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0], &[7.0, 8.0, 9.0]]);
        let filter = matrix(&[&[1.0, 0.0], &[0.0, -1.0]]);

        // (3 - 2) / 2 + 1 = 1
        let output = convolve(&input, &filter, 2).unwrap();
        assert_eq!(output, matrix(&[&[-4.0]]));
    }

    #[test]
    fn test_mnist_sized_output() {
        let input = Matrix::zeros(28, 28);
        let filter = Matrix::zeros(5, 5);
        let output = convolve(&input, &filter, 1).unwrap();
        assert_eq!((output.rows(), output.cols()), (24, 24));
    }

    #[test]
    fn test_rectangular_convolution() {
        let output = convolve(&Matrix::zeros(4, 6), &Matrix::zeros(2, 3), 1).unwrap();
        assert_eq!((output.rows(), output.cols()), (3, 4));
    }

    #[test]
    fn test_filter_larger_than_input() {
        let err = convolve(&Matrix::zeros(2, 2), &Matrix::zeros(3, 3), 1).unwrap_err();
        assert!(matches!(err, NetworkError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_zero_stride() {
        let err = convolve(&Matrix::zeros(3, 3), &Matrix::zeros(2, 2), 0).unwrap_err();
        assert!(matches!(err, NetworkError::InvalidArgument(_)));
    }

    #[test]
    fn test_full_convolution_with_ones() {
        let input = matrix(&[&[1.0, 2.0], &[3.0, 4.0]]);
        let ones = matrix(&[&[1.0, 1.0], &[1.0, 1.0]]);

        let output = full_convolve(&input, &ones);

        assert_eq!(
            output,
            matrix(&[&[1.0, 3.0, 2.0], &[4.0, 10.0, 6.0], &[3.0, 7.0, 4.0]])
        );
    }

    #[test]
    fn test_full_convolution_identity() {
        let input = counting(3, 2);
        assert_eq!(full_convolve(&input, &matrix(&[&[1.0]])), input);
    }

    #[test]
    fn test_rotate180() {
        let rotated = rotate180(&counting(2, 3));
        assert_eq!(rotated, matrix(&[&[5.0, 4.0, 3.0], &[2.0, 1.0, 0.0]]));
        assert_eq!(rotate180(&rotated), counting(2, 3));
    }

    #[test]
    fn test_dilate() {
        let dilated = dilate(&matrix(&[&[1.0, 2.0], &[3.0, 4.0]]), 2);
        assert_eq!(
            dilated,
            matrix(&[&[1.0, 0.0, 2.0], &[0.0, 0.0, 0.0], &[3.0, 0.0, 4.0]])
        );
        assert_eq!(dilate(&counting(2, 2), 1), counting(2, 2));
    }
}

// ============================================================================
// Pooling Tests
// ============================================================================

mod pooling_tests {
    use super::*;

    #[test]
    fn test_max_pooling_drops_partial_windows() {
        let output = max_pooling(&counting(5, 5), 2).unwrap();
        assert_eq!(output, matrix(&[&[6.0, 8.0], &[16.0, 18.0]]));
    }

    #[test]
    fn test_average_pooling() {
        let output = average_pooling(&counting(5, 5), 2).unwrap();
        assert_eq!(output, matrix(&[&[3.0, 5.0], &[13.0, 15.0]]));
    }

    #[test]
    fn test_zero_pool_size() {
        assert!(matches!(
            max_pooling(&counting(2, 2), 0),
            Err(NetworkError::InvalidArgument(_))
        ));
    }
}

// ============================================================================
// Dense and Element-wise Tests
// ============================================================================

mod dense_tests {
    use super::*;

    #[test]
    fn test_dense_multiply() {
        let weights = matrix(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]]);
        let output = dense_multiply(&[1.0, 2.0], &weights, &[0.5, 0.0, 0.0]).unwrap();
        assert_eq!(output, vec![9.5, 12.0, 15.0]);
    }

    #[test]
    fn test_dense_multiply_size_mismatch() {
        let weights = Matrix::zeros(3, 2);
        assert!(dense_multiply(&[1.0, 2.0], &weights, &[0.0, 0.0]).is_err());
    }

    #[test]
    fn test_add_and_divide() {
        let a = Tensor3D::from_flat(vec![1.0, 2.0, 3.0]);
        let b = Tensor3D::from_flat(vec![0.5, 0.5, 0.5]);

        let sum = add(&a, &b).unwrap();
        assert_eq!(sum.as_slice(), &[1.5, 2.5, 3.5]);

        let halved = divide(&sum, 2.0);
        assert_relative_eq!(halved.as_slice()[2], 1.75);
    }

    #[test]
    fn test_add_shape_mismatch() {
        let a = Tensor3D::zeros(Shape::new(1, 2, 2));
        let b = Tensor3D::zeros(Shape::flat(4));
        assert!(matches!(add(&a, &b), Err(NetworkError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_unflatten_is_row_major() {
        let values: Vec<f64> = (0..12).map(|v| v as f64).collect();
        let tensor = unflatten(&values, 2, 2, 3).unwrap();

        assert_eq!(tensor.shape(), Shape::new(2, 2, 3));
        assert_eq!(tensor.get(0, 1, 2), 5.0);
        assert_eq!(tensor.get(1, 0, 0), 6.0);
        assert!(unflatten(&values, 2, 2, 2).is_err());
    }
}
