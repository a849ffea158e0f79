//! Affine Layer (Fully Connected)
//!
//! The affine layer performs `y = x @ W + b` after flattening every
//! non-batch dimension of the input into one feature axis.
//!
//! ## Forward Pass
//!
//! ```text
//! Input:  x [N, d_1, ..., d_k]   viewed as x_flat [N, D], D = d_1 * ... * d_k
//! Weight: W [D, M]
//! Bias:   b [M]
//! Output: y = x_flat @ W + b [N, M]
//! ```
//!
//! ## Backward Pass
//!
//! Using the chain rule:
//! ```text
//! grad_W = x_flat^T @ grad_y
//! grad_b = sum(grad_y, axis=0)
//! grad_x = (grad_y @ W^T) reshaped to x's original shape
//! ```

use crate::error::{LayerError, Result};
use crate::tensor::Tensor;

/// Cache for affine backward pass
#[derive(Clone, Debug)]
pub struct AffineCache {
    /// Input in its original (unflattened) shape
    pub x: Tensor,
    pub w: Tensor,
}

/// Gradients for affine layer
#[derive(Clone, Debug)]
pub struct AffineGradients {
    pub x: Tensor,
    pub w: Tensor,
    pub b: Tensor,
}

/// Forward pass
///
/// # Arguments
///
/// * `x` - Input of shape `[N, d_1, ..., d_k]`
/// * `w` - Weights `[D, M]` where `D = d_1 * ... * d_k`
/// * `b` - Bias `[M]`
///
/// # Errors
///
/// `ShapeMismatch` if `x` has no batch axis, `w` is not 2-D, the flattened
/// feature size differs from `w.shape[0]`, or `b` is not `[M]`.
///
/// # Example
///
/// ```rust
/// # use convnet_layers::{Tensor, layers::affine_forward};
/// let x = Tensor::new(vec![1.0, 2.0], vec![1, 2]);
/// let w = Tensor::new(vec![1.0, 0.0, 0.0, 1.0], vec![2, 2]);
/// let b = Tensor::new(vec![0.5, -0.5], vec![2]);
/// let (out, _cache) = affine_forward(&x, &w, &b)?;
/// assert_eq!(out.data, vec![1.5, 1.5]);
/// # Ok::<(), convnet_layers::LayerError>(())
/// ```
pub fn affine_forward(x: &Tensor, w: &Tensor, b: &Tensor) -> Result<(Tensor, AffineCache)> {
    if x.ndim() < 2 {
        return Err(LayerError::shape("affine_forward", "x of shape [N, ...]", &x.shape));
    }
    if w.ndim() != 2 {
        return Err(LayerError::shape("affine_forward", "w of shape [D, M]", &w.shape));
    }

    let x_flat = x.flatten_batch();
    let (d, m) = (w.shape[0], w.shape[1]);
    if x_flat.shape[1] != d {
        return Err(LayerError::shape(
            "affine_forward",
            format!("x with {} features per example", d),
            &x.shape,
        ));
    }
    if b.shape != [m] {
        return Err(LayerError::shape(
            "affine_forward",
            format!("b of shape [{}]", m),
            &b.shape,
        ));
    }

    let out = x_flat.matmul(w).add(b);
    let cache = AffineCache {
        x: x.clone(),
        w: w.clone(),
    };
    Ok((out, cache))
}

/// Backward pass
///
/// # Arguments
///
/// * `dout` - Upstream gradient `[N, M]`
/// * `cache` - Cached values from [`affine_forward`]
///
/// # Returns
///
/// Gradients for input (original shape), weight and bias
pub fn affine_backward(dout: &Tensor, cache: &AffineCache) -> Result<AffineGradients> {
    let n = cache.x.shape[0];
    let m = cache.w.shape[1];
    if dout.shape != [n, m] {
        return Err(LayerError::shape(
            "affine_backward",
            format!("dout of shape [{}, {}]", n, m),
            &dout.shape,
        ));
    }

    let x_flat = cache.x.flatten_batch();

    // grad_W = x^T @ dout
    let dw = x_flat.transpose().matmul(dout);

    // grad_b = column sums of dout
    let db = dout.sum_rows();

    // grad_x = dout @ W^T, back to the input's shape
    let dx = dout.matmul(&cache.w.transpose()).reshape(&cache.x.shape);

    Ok(AffineGradients { x: dx, w: dw, b: db })
}
