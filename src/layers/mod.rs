//! Neural Network Layers
//!
//! Forward and backward passes for the building blocks of a small
//! convolutional network. Every layer is a pair of free functions.
//!
//! ## Layers
//!
//! - **affine**: Fully connected layer
//! - **relu**: Rectified linear unit
//! - **batch_norm**: Batch normalization with running statistics
//! - **dropout**: Dropout regularization
//! - **conv**: Naive 2-D convolution
//! - **pool**: Naive max pooling
//! - **sandwich**: Common chains of the layers above
//!
//! ## Design Pattern
//!
//! Each layer follows a consistent pattern:
//!
//! ```rust,ignore
//! pub fn layer_forward(x: &Tensor, params...) -> Result<(Tensor, LayerCache)> { }
//! pub fn layer_backward(dout: &Tensor, cache: &LayerCache) -> Result<LayerGradients> { }
//!
//! pub struct LayerCache {
//!     // Values needed for backward pass
//! }
//!
//! pub struct LayerGradients {
//!     // Gradients for parameters and input
//! }
//! ```
//!
//! The forward pass never keeps hidden state: whatever the backward pass
//! needs travels in the cache, and the caller owns it. Layers without
//! parameters return the input gradient directly instead of a gradients
//! struct.

pub mod affine;
pub mod batch_norm;
pub mod conv;
pub mod dropout;
pub mod pool;
pub mod relu;
pub mod sandwich;

// Re-export main types for convenience
pub use affine::{affine_backward, affine_forward, AffineCache, AffineGradients};
pub use batch_norm::{
    batchnorm_backward, batchnorm_backward_alt, batchnorm_forward, BatchNormCache,
    BatchNormGradients,
};
pub use conv::{conv_backward_naive, conv_forward_naive, ConvCache, ConvGradients};
pub use dropout::{dropout_backward, dropout_forward, DropoutCache};
pub use pool::{max_pool_backward_naive, max_pool_forward_naive, PoolCache};
pub use relu::{relu_backward, relu_forward, ReluCache};
pub use sandwich::{
    affine_relu_backward, affine_relu_forward, conv_relu_backward, conv_relu_forward,
    conv_relu_pool_backward, conv_relu_pool_forward, AffineReluCache, ConvReluCache,
    ConvReluPoolCache,
};
