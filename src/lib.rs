//! Convnet Layers: Forward and Backward Primitives
//!
//! The layer-level pieces of a small convolutional network classifier,
//! written from scratch with explicit backpropagation. Every layer exposes a
//! forward pass that returns its output plus a cache, and a backward pass
//! that turns an upstream gradient and that cache into gradients for the
//! inputs and parameters.
//!
//! # Modules
//!
//! - [`tensor`] - Dense `f64` tensors
//! - [`layers`] - Affine, ReLU, batch norm, dropout, convolution, max pooling
//! - [`loss`] - Multiclass SVM and softmax cross-entropy
//! - [`config`] - Layer parameter records (mode, stride, padding, ...)
//! - [`gradient_check`] - Finite-difference gradient estimates
//! - [`error`] - Error type shared by every fallible operation
//!
//! # Example
//!
//! ```rust
//! use convnet_layers::layers::{affine_relu_backward, affine_relu_forward};
//! use convnet_layers::loss::softmax_loss;
//! use convnet_layers::Tensor;
//!
//! let x = Tensor::linspace(-0.5, 0.5, vec![4, 6]);
//! let w = Tensor::linspace(-0.2, 0.3, vec![6, 3]);
//! let b = Tensor::zeros(vec![3]);
//!
//! let (scores, cache) = affine_relu_forward(&x, &w, &b)?;
//! let (loss, dscores) = softmax_loss(&scores, &[0, 1, 2, 1])?;
//! let grads = affine_relu_backward(&dscores, &cache)?;
//!
//! assert!(loss > 0.0);
//! assert_eq!(grads.w.shape, vec![6, 3]);
//! # Ok::<(), convnet_layers::LayerError>(())
//! ```

pub mod config;
pub mod error;
pub mod gradient_check;
pub mod layers;
pub mod loss;
pub mod tensor;

// Re-export main types for convenience
pub use error::{LayerError, Result};
pub use tensor::Tensor;
