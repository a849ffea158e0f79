//! ReLU Activation
//!
//! ```text
//! forward:  y = max(x, 0)
//! backward: grad_x = grad_y where x > 0, 0 elsewhere
//! ```
//!
//! The gate is strict: an input of exactly zero passes no gradient.
//!
//! The upstream gradient is only borrowed. The backward pass writes into a
//! fresh tensor, so a caller may keep using `dout` after the call.

use crate::error::{LayerError, Result};
use crate::tensor::Tensor;

/// Cache for ReLU backward pass: the pre-activation input
#[derive(Clone, Debug)]
pub struct ReluCache {
    pub x: Tensor,
}

/// ReLU forward pass
///
/// # Example
///
/// ```rust
/// # use convnet_layers::{Tensor, layers::relu_forward};
/// let x = Tensor::new(vec![1.0, -2.0, 3.0], vec![1, 3]);
/// let (out, _) = relu_forward(&x);
/// assert_eq!(out.data, vec![1.0, 0.0, 3.0]);
/// ```
pub fn relu_forward(x: &Tensor) -> (Tensor, ReluCache) {
    let out = x.map(|v| v.max(0.0));
    (out, ReluCache { x: x.clone() })
}

/// ReLU backward pass
///
/// # Errors
///
/// `ShapeMismatch` if `dout` does not have the shape of the cached input
pub fn relu_backward(dout: &Tensor, cache: &ReluCache) -> Result<Tensor> {
    if dout.shape != cache.x.shape {
        return Err(LayerError::shape(
            "relu_backward",
            format!("dout of shape {:?}", cache.x.shape),
            &dout.shape,
        ));
    }
    Ok(dout.zip_map(&cache.x, |g, x| if x > 0.0 { g } else { 0.0 }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relu_scenario() {
        let x = Tensor::new(vec![1.0, -2.0, 3.0], vec![1, 3]);
        let (out, cache) = relu_forward(&x);
        assert_eq!(out.data, vec![1.0, 0.0, 3.0]);

        let dx = relu_backward(&Tensor::ones(vec![1, 3]), &cache).unwrap();
        assert_eq!(dx.data, vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_zero_input_blocks_gradient() {
        let x = Tensor::new(vec![0.0, 1e-12, -1e-12], vec![3]);
        let (_, cache) = relu_forward(&x);
        let dx = relu_backward(&Tensor::full(vec![3], 5.0), &cache).unwrap();
        assert_eq!(dx.data, vec![0.0, 5.0, 0.0]);
    }

    #[test]
    fn test_backward_leaves_dout_untouched() {
        let x = Tensor::new(vec![-1.0, 2.0], vec![2]);
        let (_, cache) = relu_forward(&x);
        let dout = Tensor::new(vec![3.0, 4.0], vec![2]);
        let dx = relu_backward(&dout, &cache).unwrap();
        assert_eq!(dx.data, vec![0.0, 4.0]);
        assert_eq!(dout.data, vec![3.0, 4.0]);
    }

    #[test]
    fn test_backward_rejects_shape_mismatch() {
        let (_, cache) = relu_forward(&Tensor::zeros(vec![2, 2]));
        assert!(relu_backward(&Tensor::zeros(vec![4]), &cache).is_err());
    }
}
