//! Composite Layers
//!
//! Small networks repeat the same short chains of layers, so these helpers
//! bundle them:
//!
//! - **affine_relu**: affine → ReLU
//! - **conv_relu**: convolution → ReLU
//! - **conv_relu_pool**: convolution → ReLU → max pool
//!
//! Each cache holds the caches of its parts; each backward runs the parts'
//! backward passes in reverse order.

use super::affine::{affine_backward, affine_forward, AffineCache, AffineGradients};
use super::conv::{conv_backward_naive, conv_forward_naive, ConvCache, ConvGradients};
use super::pool::{max_pool_backward_naive, max_pool_forward_naive, PoolCache};
use super::relu::{relu_backward, relu_forward, ReluCache};
use crate::config::{ConvParam, PoolParam};
use crate::error::Result;
use crate::tensor::Tensor;

/// Cache for affine → ReLU
#[derive(Clone, Debug)]
pub struct AffineReluCache {
    pub affine: AffineCache,
    pub relu: ReluCache,
}

/// Affine transform followed by ReLU
pub fn affine_relu_forward(x: &Tensor, w: &Tensor, b: &Tensor) -> Result<(Tensor, AffineReluCache)> {
    let (a, affine) = affine_forward(x, w, b)?;
    let (out, relu) = relu_forward(&a);
    Ok((out, AffineReluCache { affine, relu }))
}

/// Backward pass for [`affine_relu_forward`]
pub fn affine_relu_backward(dout: &Tensor, cache: &AffineReluCache) -> Result<AffineGradients> {
    let da = relu_backward(dout, &cache.relu)?;
    affine_backward(&da, &cache.affine)
}

/// Cache for convolution → ReLU
#[derive(Clone, Debug)]
pub struct ConvReluCache {
    pub conv: ConvCache,
    pub relu: ReluCache,
}

/// Convolution followed by ReLU
pub fn conv_relu_forward(
    x: &Tensor,
    w: &Tensor,
    b: &Tensor,
    conv_param: &ConvParam,
) -> Result<(Tensor, ConvReluCache)> {
    let (a, conv) = conv_forward_naive(x, w, b, conv_param)?;
    let (out, relu) = relu_forward(&a);
    Ok((out, ConvReluCache { conv, relu }))
}

/// Backward pass for [`conv_relu_forward`]
pub fn conv_relu_backward(dout: &Tensor, cache: &ConvReluCache) -> Result<ConvGradients> {
    let da = relu_backward(dout, &cache.relu)?;
    conv_backward_naive(&da, &cache.conv)
}

/// Cache for convolution → ReLU → max pool
#[derive(Clone, Debug)]
pub struct ConvReluPoolCache {
    pub conv: ConvCache,
    pub relu: ReluCache,
    pub pool: PoolCache,
}

/// Convolution, ReLU, then max pooling
///
/// # Example
///
/// ```rust
/// # use convnet_layers::{Tensor, layers::conv_relu_pool_forward};
/// # use convnet_layers::config::{ConvParam, PoolParam};
/// let x = Tensor::linspace(-1.0, 1.0, vec![2, 3, 8, 8]);
/// let w = Tensor::linspace(-0.2, 0.2, vec![4, 3, 3, 3]);
/// let b = Tensor::zeros(vec![4]);
/// let (out, _) = conv_relu_pool_forward(&x, &w, &b, &ConvParam::same(3), &PoolParam::default())?;
/// assert_eq!(out.shape, vec![2, 4, 4, 4]);
/// # Ok::<(), convnet_layers::LayerError>(())
/// ```
pub fn conv_relu_pool_forward(
    x: &Tensor,
    w: &Tensor,
    b: &Tensor,
    conv_param: &ConvParam,
    pool_param: &PoolParam,
) -> Result<(Tensor, ConvReluPoolCache)> {
    let (a, conv) = conv_forward_naive(x, w, b, conv_param)?;
    let (s, relu) = relu_forward(&a);
    let (out, pool) = max_pool_forward_naive(&s, pool_param)?;
    Ok((out, ConvReluPoolCache { conv, relu, pool }))
}

/// Backward pass for [`conv_relu_pool_forward`]
pub fn conv_relu_pool_backward(dout: &Tensor, cache: &ConvReluPoolCache) -> Result<ConvGradients> {
    let ds = max_pool_backward_naive(dout, &cache.pool)?;
    let da = relu_backward(&ds, &cache.relu)?;
    conv_backward_naive(&da, &cache.conv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affine_relu_matches_parts() {
        let x = Tensor::linspace(-1.0, 1.0, vec![3, 4]);
        let w = Tensor::linspace(-0.7, 0.5, vec![4, 5]);
        let b = Tensor::linspace(-0.1, 0.1, vec![5]);

        let (out, cache) = affine_relu_forward(&x, &w, &b).unwrap();
        let (a, _) = affine_forward(&x, &w, &b).unwrap();
        let (expected, _) = relu_forward(&a);
        assert_eq!(out, expected);

        let grads = affine_relu_backward(&out.ones_like(), &cache).unwrap();
        assert_eq!(grads.x.shape, x.shape);
        assert_eq!(grads.w.shape, w.shape);
    }

    #[test]
    fn test_conv_relu_output_nonnegative() {
        let x = Tensor::linspace(-1.0, 1.0, vec![1, 2, 5, 5]);
        let w = Tensor::linspace(-0.5, 0.5, vec![3, 2, 3, 3]);
        let b = Tensor::new(vec![-0.1, 0.0, 0.1], vec![3]);
        let (out, cache) = conv_relu_forward(&x, &w, &b, &ConvParam::same(3)).unwrap();
        assert!(out.data.iter().all(|&v| v >= 0.0));
        let grads = conv_relu_backward(&out.ones_like(), &cache).unwrap();
        assert_eq!(grads.b.shape, vec![3]);
    }

    #[test]
    fn test_conv_relu_pool_backward_shapes() {
        let x = Tensor::linspace(-1.0, 1.0, vec![2, 1, 4, 4]);
        let w = Tensor::linspace(-0.3, 0.3, vec![2, 1, 3, 3]);
        let b = Tensor::zeros(vec![2]);
        let (out, cache) =
            conv_relu_pool_forward(&x, &w, &b, &ConvParam::same(3), &PoolParam::default()).unwrap();
        assert_eq!(out.shape, vec![2, 2, 2, 2]);
        let grads = conv_relu_pool_backward(&out.ones_like(), &cache).unwrap();
        assert_eq!(grads.x.shape, x.shape);
        assert_eq!(grads.w.shape, w.shape);
    }
}
