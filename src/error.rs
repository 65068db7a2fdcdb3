//! Error types shared by every part of the engine.

use crate::tensor::Shape;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building, training, loading or saving a network.
///
/// Nothing is retried: every variant aborts the operation that produced it and is
/// propagated to the caller unchanged.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// A tensor reached a layer (or kernel) with a shape it was not built for.
    #[error("shape mismatch in {layer}: expected {expected}, got {actual}")]
    ShapeMismatch {
        layer: &'static str,
        expected: Shape,
        actual: Shape,
    },

    /// An adaptive layer was used before `initialize`.
    #[error("{layer} layer used before initialization")]
    Uninitialized { layer: &'static str },

    /// `backward` was called without a cached forward pass.
    #[error("{layer} layer: backward called without a preceding forward pass")]
    MissingForwardPass { layer: &'static str },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Image and label files disagree.
    #[error("dataset inconsistency: {0}")]
    Consistency(String),

    /// A file was readable but its content is truncated or malformed.
    #[error("malformed {what}: {reason}")]
    Format { what: &'static str, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl NetworkError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        NetworkError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(what: &'static str, reason: impl Into<String>) -> Self {
        NetworkError::Format {
            what,
            reason: reason.into(),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T, E = NetworkError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_message() {
        let err = NetworkError::ShapeMismatch {
            layer: "Flatten",
            expected: Shape::new(1, 2, 2),
            actual: Shape::new(1, 3, 3),
        };
        assert_eq!(
            err.to_string(),
            "shape mismatch in Flatten: expected [1, 2, 2], got [1, 3, 3]"
        );
    }

    #[test]
    fn test_io_error_mentions_path() {
        let err = NetworkError::io(
            "missing.idx",
            std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        );
        assert!(err.to_string().contains("missing.idx"));
    }
}
