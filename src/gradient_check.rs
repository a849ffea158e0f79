//! Numerical Gradient Checking
//!
//! Analytic backward passes are easy to get subtly wrong. These helpers
//! estimate gradients with centred finite differences so a backward pass can
//! be compared against them:
//!
//! ```text
//! df/dx_i ≈ (f(x + h e_i) - f(x - h e_i)) / 2h
//! ```
//!
//! The centred form has error O(h²), so with `h = 1e-5` and `f64` values a
//! correct backward pass typically agrees to a relative error of 1e-8 or
//! better.
//!
//! ## Example
//!
//! ```rust
//! use convnet_layers::gradient_check::{eval_numerical_gradient_array, rel_error};
//! use convnet_layers::layers::{relu_backward, relu_forward};
//! use convnet_layers::Tensor;
//!
//! let x = Tensor::linspace(-1.05, 1.05, vec![3, 4]);
//! let dout = Tensor::linspace(0.5, -0.5, vec![3, 4]);
//!
//! let (_, cache) = relu_forward(&x);
//! let dx = relu_backward(&dout, &cache)?;
//! let dx_num = eval_numerical_gradient_array(|x| relu_forward(x).0, &x, &dout, 1e-5);
//! assert!(rel_error(&dx, &dx_num) < 1e-7);
//! # Ok::<(), convnet_layers::LayerError>(())
//! ```

use crate::tensor::Tensor;

/// Default finite-difference step
pub const DEFAULT_STEP: f64 = 1e-5;

/// Numerical gradient of a scalar-valued function at `x`
///
/// # Arguments
///
/// * `f` - Function to differentiate, e.g. a loss
/// * `x` - Point at which to evaluate the gradient
/// * `h` - Step size
pub fn eval_numerical_gradient<F>(mut f: F, x: &Tensor, h: f64) -> Tensor
where
    F: FnMut(&Tensor) -> f64,
{
    let mut x = x.clone();
    let mut grad = x.zeros_like();

    for i in 0..x.len() {
        let old = x.data[i];
        x.data[i] = old + h;
        let f_plus = f(&x);
        x.data[i] = old - h;
        let f_minus = f(&x);
        x.data[i] = old;

        grad.data[i] = (f_plus - f_minus) / (2.0 * h);
    }
    grad
}

/// Numerical gradient of a tensor-valued function, contracted with the
/// upstream gradient `df`
///
/// For `y = f(x)` this estimates `Σ_k df[k] * dy[k]/dx`, which is exactly
/// what a layer's backward pass returns for upstream gradient `df`.
///
/// # Panics
///
/// Panics if `f` returns a tensor whose shape differs from `df`
pub fn eval_numerical_gradient_array<F>(mut f: F, x: &Tensor, df: &Tensor, h: f64) -> Tensor
where
    F: FnMut(&Tensor) -> Tensor,
{
    let mut x = x.clone();
    let mut grad = x.zeros_like();

    for i in 0..x.len() {
        let old = x.data[i];
        x.data[i] = old + h;
        let pos = f(&x);
        x.data[i] = old - h;
        let neg = f(&x);
        x.data[i] = old;

        assert_eq!(pos.shape, df.shape, "upstream gradient shape must match f(x)");
        grad.data[i] = pos
            .data
            .iter()
            .zip(&neg.data)
            .zip(&df.data)
            .map(|((p, n), d)| (p - n) * d)
            .sum::<f64>()
            / (2.0 * h);
    }
    grad
}

/// Maximum element-wise relative error between two tensors
///
/// ```text
/// max_i |a_i - b_i| / max(1e-8, |a_i| + |b_i|)
/// ```
///
/// # Panics
///
/// Panics if the shapes differ
pub fn rel_error(a: &Tensor, b: &Tensor) -> f64 {
    assert_eq!(a.shape, b.shape, "rel_error needs tensors of equal shape");
    a.data
        .iter()
        .zip(&b.data)
        .map(|(x, y)| (x - y).abs() / (x.abs() + y.abs()).max(1e-8))
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_gradient_of_quadratic() {
        // f(x) = Σ x² has gradient 2x
        let x = Tensor::linspace(-2.0, 2.0, vec![5]);
        let grad = eval_numerical_gradient(|t| t.data.iter().map(|v| v * v).sum(), &x, DEFAULT_STEP);
        assert!(rel_error(&grad, &x.scale(2.0)) < 1e-8);
    }

    #[test]
    fn test_array_gradient_of_elementwise_square() {
        let x = Tensor::linspace(0.5, 3.0, vec![2, 3]);
        let df = Tensor::linspace(1.0, -1.0, vec![2, 3]);
        let grad = eval_numerical_gradient_array(|t| t.map(|v| v * v), &x, &df, DEFAULT_STEP);
        let expected = x.zip_map(&df, |v, d| 2.0 * v * d);
        assert!(rel_error(&grad, &expected) < 1e-8);
    }

    #[test]
    fn test_rel_error() {
        let a = Tensor::new(vec![1.0, 0.0], vec![2]);
        let b = Tensor::new(vec![1.0, 0.0], vec![2]);
        assert_eq!(rel_error(&a, &b), 0.0);

        let c = Tensor::new(vec![1.0, 3.0], vec![2]);
        let d = Tensor::new(vec![1.0, 1.0], vec![2]);
        assert!((rel_error(&c, &d) - 0.5).abs() < 1e-12);
    }
}
