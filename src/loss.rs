//! Classification Losses
//!
//! Both losses take class scores `x [N, C]` and labels `y` with
//! `0 <= y[i] < C`, and return the mean loss over the batch together with its
//! gradient with respect to `x`.
//!
//! ## Multiclass SVM (hinge)
//!
//! ```text
//! margin[i, j] = max(0, x[i, j] - x[i, y_i] + 1)   for j != y_i
//! loss         = Σ margin / N
//! dx[i, j]     = 1/N                               for each margin[i, j] > 0
//! dx[i, y_i]   = -(number of positive margins in row i) / N
//! ```
//!
//! ## Softmax cross-entropy
//!
//! The row max is subtracted before exponentiating, which leaves the
//! probabilities unchanged but keeps `exp` from overflowing:
//!
//! ```text
//! log_p[i, j] = (x[i, j] - max_i) - ln Σ_k exp(x[i, k] - max_i)
//! loss        = -Σ_i log_p[i, y_i] / N
//! dx          = (softmax(x) - one_hot(y)) / N
//! ```

use crate::error::{LayerError, Result};
use crate::tensor::Tensor;

/// Check `x` is `[N, C]` and every label is a valid class index
fn check_inputs(op: &'static str, x: &Tensor, y: &[usize]) -> Result<(usize, usize)> {
    if x.ndim() != 2 {
        return Err(LayerError::shape(op, "scores of shape [N, C]", &x.shape));
    }
    let (n, c) = (x.shape[0], x.shape[1]);
    if y.len() != n {
        return Err(LayerError::shape(
            op,
            format!("{} labels", n),
            &[y.len()],
        ));
    }
    if let Some((index, &label)) = y.iter().enumerate().find(|&(_, &label)| label >= c) {
        return Err(LayerError::InvalidLabel {
            index,
            label,
            num_classes: c,
        });
    }
    Ok((n, c))
}

/// Multiclass SVM loss and gradient
///
/// # Example
///
/// ```rust
/// # use convnet_layers::{Tensor, loss::svm_loss};
/// let x = Tensor::new(vec![3.0, 1.0, 2.5], vec![1, 3]);
/// let (loss, _dx) = svm_loss(&x, &[0])?;
/// // only class 2 is within the margin: 2.5 - 3.0 + 1 = 0.5
/// assert!((loss - 0.5).abs() < 1e-12);
/// # Ok::<(), convnet_layers::LayerError>(())
/// ```
pub fn svm_loss(x: &Tensor, y: &[usize]) -> Result<(f64, Tensor)> {
    let (n, c) = check_inputs("svm_loss", x, y)?;
    let nf = n as f64;

    let mut loss = 0.0;
    let mut dx = x.zeros_like();
    for (i, &yi) in y.iter().enumerate() {
        let correct = x.at2(i, yi);
        let mut positive = 0usize;
        for j in 0..c {
            if j == yi {
                continue;
            }
            let margin = (x.at2(i, j) - correct + 1.0).max(0.0);
            if margin > 0.0 {
                loss += margin;
                positive += 1;
                dx.data[i * c + j] = 1.0 / nf;
            }
        }
        dx.data[i * c + yi] = -(positive as f64) / nf;
    }

    Ok((loss / nf, dx))
}

/// Softmax cross-entropy loss and gradient
///
/// # Example
///
/// ```rust
/// # use convnet_layers::{Tensor, loss::softmax_loss};
/// let x = Tensor::new(vec![0.0, 0.0], vec![1, 2]);
/// let (loss, dx) = softmax_loss(&x, &[0])?;
/// assert!((loss - 2f64.ln()).abs() < 1e-12);
/// assert!((dx.data[0] + 0.5).abs() < 1e-12 && (dx.data[1] - 0.5).abs() < 1e-12);
/// # Ok::<(), convnet_layers::LayerError>(())
/// ```
pub fn softmax_loss(x: &Tensor, y: &[usize]) -> Result<(f64, Tensor)> {
    let (n, c) = check_inputs("softmax_loss", x, y)?;
    let nf = n as f64;

    let mut loss = 0.0;
    let mut dx = vec![0.0; n * c];
    for (i, &yi) in y.iter().enumerate() {
        let row = &x.data[i * c..(i + 1) * c];

        // Find max for numerical stability
        let max = row.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let log_z = row.iter().map(|&v| (v - max).exp()).sum::<f64>().ln();

        for (j, &v) in row.iter().enumerate() {
            let log_p = v - max - log_z;
            if j == yi {
                loss -= log_p;
            }
            let one_hot = if j == yi { 1.0 } else { 0.0 };
            dx[i * c + j] = (log_p.exp() - one_hot) / nf;
        }
    }

    Ok((loss / nf, Tensor::new(dx, vec![n, c])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_two_class_scenario() {
        let x = Tensor::new(vec![0.0, 0.0], vec![1, 2]);
        let (loss, dx) = softmax_loss(&x, &[0]).unwrap();
        assert!((loss - std::f64::consts::LN_2).abs() < 1e-12);
        assert!((dx.data[0] + 0.5).abs() < 1e-12);
        assert!((dx.data[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_softmax_is_shift_invariant_and_stable() {
        let x = Tensor::new(vec![1000.0, 1001.0, 1002.0], vec![1, 3]);
        let shifted = Tensor::new(vec![0.0, 1.0, 2.0], vec![1, 3]);
        let (a, da) = softmax_loss(&x, &[2]).unwrap();
        let (b, db) = softmax_loss(&shifted, &[2]).unwrap();
        assert!(a.is_finite());
        assert!((a - b).abs() < 1e-12);
        for (p, q) in da.data.iter().zip(&db.data) {
            assert!((p - q).abs() < 1e-12);
        }
    }

    #[test]
    fn test_softmax_gradient_rows_sum_to_zero() {
        let x = Tensor::linspace(-2.0, 3.0, vec![4, 5]);
        let (_, dx) = softmax_loss(&x, &[0, 4, 2, 1]).unwrap();
        for i in 0..4 {
            let s: f64 = (0..5).map(|j| dx.at2(i, j)).sum();
            assert!(s.abs() < 1e-12);
        }
    }

    #[test]
    fn test_svm_counts_positive_margins() {
        // row 0: correct class 1 (score 2); margins: class 0 -> 0, class 2 -> 2.5
        // row 1: correct class 0 (score 5); every margin is zero
        let x = Tensor::new(vec![1.0, 2.0, 3.5, 5.0, 1.0, 4.0], vec![2, 3]);
        let (loss, dx) = svm_loss(&x, &[1, 0]).unwrap();
        assert!((loss - 2.5 / 2.0).abs() < 1e-12);
        assert_eq!(dx.data, vec![0.0, -0.5, 0.5, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_svm_margin_exactly_zero_has_no_gradient() {
        let x = Tensor::new(vec![2.0, 1.0], vec![1, 2]);
        let (loss, dx) = svm_loss(&x, &[0]).unwrap();
        assert_eq!(loss, 0.0);
        assert_eq!(dx.data, vec![0.0, 0.0]);
    }

    #[test]
    fn test_rejects_out_of_range_label() {
        let x = Tensor::zeros(vec![2, 3]);
        let expected = LayerError::InvalidLabel {
            index: 1,
            label: 3,
            num_classes: 3,
        };
        assert_eq!(softmax_loss(&x, &[0, 3]).unwrap_err(), expected);
        assert_eq!(svm_loss(&x, &[0, 3]).unwrap_err(), expected);
    }

    #[test]
    fn test_rejects_label_count_mismatch() {
        let x = Tensor::zeros(vec![2, 3]);
        assert!(matches!(
            softmax_loss(&x, &[0]),
            Err(LayerError::ShapeMismatch { op: "softmax_loss", .. })
        ));
    }
}
