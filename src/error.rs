//! Error types
//!
//! Every layer validates its inputs before doing any arithmetic. A caller
//! contract violation (wrong shapes, an unknown mode string, a label outside
//! the class range) comes back as a [`LayerError`] instead of a silently
//! broadcast or garbage result.

use thiserror::Error;

/// Errors raised by layer forward/backward passes and configuration parsing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayerError {
    /// A tensor did not have the dimensions the operation requires
    #[error("{op}: shape mismatch, expected {expected}, got {actual:?}")]
    ShapeMismatch {
        op: &'static str,
        expected: String,
        actual: Vec<usize>,
    },

    /// Mode string other than "train" or "test"
    #[error("invalid mode \"{0}\", expected \"train\" or \"test\"")]
    InvalidMode(String),

    /// Class label outside `[0, num_classes)`
    #[error("label {label} at index {index} is out of range for {num_classes} classes")]
    InvalidLabel {
        index: usize,
        label: usize,
        num_classes: usize,
    },

    /// Dropout retention probability outside `[0, 1]`
    #[error("dropout retention probability must lie in [0, 1], got {0}")]
    InvalidProbability(f64),

    /// Stride of zero, or a window that does not fit the input
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LayerError {
    pub(crate) fn shape(op: &'static str, expected: impl Into<String>, actual: &[usize]) -> Self {
        LayerError::ShapeMismatch {
            op,
            expected: expected.into(),
            actual: actual.to_vec(),
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, LayerError>;
