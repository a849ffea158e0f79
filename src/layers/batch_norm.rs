//! Batch Normalization
//!
//! Batch normalization normalizes every feature over the batch axis, then
//! applies a learnable scale (gamma) and shift (beta).
//!
//! ## Forward Pass (train mode)
//!
//! ```text
//! 1. mean = sum(x, axis=0) / N
//! 2. var  = sum((x - mean)², axis=0) / N          (biased)
//! 3. x_hat = (x - mean) / √(var + ε)
//! 4. y = γ * x_hat + β
//! 5. running_mean = m * running_mean + (1 - m) * mean
//!    running_var  = m * running_var  + (1 - m) * var
//! ```
//!
//! In test mode steps 1, 2 and 5 are skipped and the running statistics take
//! the place of `mean` and `var`. Test mode never changes them, so its output
//! depends only on `x`, the running statistics, gamma and beta.
//!
//! ## Backward Pass
//!
//! Every `x[i, j]` reaches the output three ways: directly through
//! `x_hat[i, j]`, through `var[j]`, and through `mean[j]`. With
//! `dx_hat = grad_y * γ`:
//!
//! ```text
//! dvar  = Σ_i dx_hat * (x - mean) * -½ (var + ε)^(-3/2)
//! dmean = Σ_i dx_hat * -1/√(var + ε)  +  dvar * Σ_i -2 (x - mean) / N
//! dx    = dx_hat / √(var + ε)  +  dvar * 2 (x - mean) / N  +  dmean / N
//! ```
//!
//! Collapsing the three terms gives the closed form used by
//! [`batchnorm_backward_alt`]:
//!
//! ```text
//! dx = γ / (N √(var + ε)) * (N grad_y - Σ_i grad_y - x_hat * Σ_i grad_y * x_hat)
//! ```
//!
//! Both produce the same result up to rounding.

use crate::config::{BatchNormParam, Mode, RunningStats};
use crate::error::{LayerError, Result};
use crate::tensor::Tensor;
use tracing::debug;

/// Cache for batch norm backward pass
#[derive(Clone, Debug)]
pub struct BatchNormCache {
    pub x: Tensor,
    /// Per-feature batch mean `[D]`
    pub mean: Vec<f64>,
    /// Per-feature biased batch variance `[D]`
    pub var: Vec<f64>,
    pub x_hat: Tensor,
    pub gamma: Tensor,
    pub eps: f64,
}

/// Gradients for batch norm
#[derive(Clone, Debug)]
pub struct BatchNormGradients {
    pub x: Tensor,
    pub gamma: Tensor,
    pub beta: Tensor,
}

/// Size the running statistics to `d` features on first use; reject a state
/// that belongs to a layer of a different width.
fn ensure_running(running: &mut RunningStats, d: usize) -> Result<()> {
    if running.is_empty() {
        debug!(features = d, "initialising batch norm running statistics to zero");
        running.mean = vec![0.0; d];
        running.var = vec![0.0; d];
        return Ok(());
    }
    if running.mean.len() != d || running.var.len() != d {
        return Err(LayerError::shape(
            "batchnorm_forward",
            format!("running statistics of length {}", d),
            &[running.mean.len(), running.var.len()],
        ));
    }
    Ok(())
}

/// Batch normalization forward pass
///
/// # Arguments
///
/// * `x` - Input `[N, D]`
/// * `gamma` - Scale `[D]`
/// * `beta` - Shift `[D]`
/// * `bn_param` - Mode, eps, momentum and the running statistics, updated in
///   place in train mode
///
/// # Returns
///
/// The output `[N, D]` and, in train mode, the cache for the backward pass.
/// Test mode returns no cache.
///
/// # Example
///
/// ```rust
/// # use convnet_layers::{Tensor, layers::batchnorm_forward};
/// # use convnet_layers::config::{BatchNormParam, Mode};
/// let x = Tensor::new(vec![1.0, 10.0, 3.0, 30.0], vec![2, 2]);
/// let gamma = Tensor::ones(vec![2]);
/// let beta = Tensor::zeros(vec![2]);
/// let mut bn_param = BatchNormParam::new(Mode::Train);
///
/// let (out, cache) = batchnorm_forward(&x, &gamma, &beta, &mut bn_param)?;
/// assert!(cache.is_some());
/// assert!((out.data[0] + 1.0).abs() < 1e-4);
/// assert!((bn_param.running.mean[0] - 0.2).abs() < 1e-12);
/// # Ok::<(), convnet_layers::LayerError>(())
/// ```
pub fn batchnorm_forward(
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    bn_param: &mut BatchNormParam,
) -> Result<(Tensor, Option<BatchNormCache>)> {
    if x.ndim() != 2 {
        return Err(LayerError::shape("batchnorm_forward", "x of shape [N, D]", &x.shape));
    }
    let (n, d) = (x.shape[0], x.shape[1]);
    if gamma.shape != [d] {
        return Err(LayerError::shape(
            "batchnorm_forward",
            format!("gamma of shape [{}]", d),
            &gamma.shape,
        ));
    }
    if beta.shape != [d] {
        return Err(LayerError::shape(
            "batchnorm_forward",
            format!("beta of shape [{}]", d),
            &beta.shape,
        ));
    }
    if bn_param.mode == Mode::Train && n == 0 {
        return Err(LayerError::shape(
            "batchnorm_forward",
            "at least one example in train mode",
            &x.shape,
        ));
    }
    ensure_running(&mut bn_param.running, d)?;
    let eps = bn_param.eps;

    match bn_param.mode {
        Mode::Train => {
            // Per-feature statistics over the batch axis
            let mean: Vec<f64> = x.sum_rows().data.iter().map(|s| s / n as f64).collect();
            let mut var = vec![0.0; d];
            for row in x.data.chunks(d.max(1)) {
                for j in 0..d {
                    let diff = row[j] - mean[j];
                    var[j] += diff * diff;
                }
            }
            for v in var.iter_mut() {
                *v /= n as f64;
            }

            let mut x_hat = vec![0.0; n * d];
            let mut out = vec![0.0; n * d];
            for i in 0..n {
                for j in 0..d {
                    let idx = i * d + j;
                    x_hat[idx] = (x.data[idx] - mean[j]) / (var[j] + eps).sqrt();
                    out[idx] = gamma.data[j] * x_hat[idx] + beta.data[j];
                }
            }
            let x_hat = Tensor::new(x_hat, vec![n, d]);
            let out = Tensor::new(out, vec![n, d]);

            let momentum = bn_param.momentum;
            let running = &mut bn_param.running;
            for j in 0..d {
                running.mean[j] = momentum * running.mean[j] + (1.0 - momentum) * mean[j];
                running.var[j] = momentum * running.var[j] + (1.0 - momentum) * var[j];
            }
            debug!(features = d, batch = n, momentum, "updated batch norm running statistics");

            let cache = BatchNormCache {
                x: x.clone(),
                mean,
                var,
                x_hat,
                gamma: gamma.clone(),
                eps,
            };
            Ok((out, Some(cache)))
        }
        Mode::Test => {
            let running = &bn_param.running;
            let mut out = vec![0.0; n * d];
            for i in 0..n {
                for j in 0..d {
                    let idx = i * d + j;
                    let x_hat = (x.data[idx] - running.mean[j]) / (running.var[j] + eps).sqrt();
                    out[idx] = gamma.data[j] * x_hat + beta.data[j];
                }
            }
            Ok((Tensor::new(out, vec![n, d]), None))
        }
    }
}

fn check_dout(op: &'static str, dout: &Tensor, cache: &BatchNormCache) -> Result<(usize, usize)> {
    if dout.shape != cache.x.shape {
        return Err(LayerError::shape(
            op,
            format!("dout of shape {:?}", cache.x.shape),
            &dout.shape,
        ));
    }
    Ok((cache.x.shape[0], cache.x.shape[1]))
}

/// gamma and beta gradients, shared by both backward variants
fn param_grads(dout: &Tensor, cache: &BatchNormCache) -> (Tensor, Tensor) {
    let dgamma = dout.zip_map(&cache.x_hat, |g, xh| g * xh).sum_rows();
    let dbeta = dout.sum_rows();
    (dgamma, dbeta)
}

/// Batch normalization backward pass, propagated step by step through the
/// mean and variance nodes of the computation graph
///
/// # Arguments
///
/// * `dout` - Upstream gradient `[N, D]`
/// * `cache` - Cache from a train-mode [`batchnorm_forward`]
pub fn batchnorm_backward(dout: &Tensor, cache: &BatchNormCache) -> Result<BatchNormGradients> {
    let (n, d) = check_dout("batchnorm_backward", dout, cache)?;
    let nf = n as f64;
    let (dgamma, dbeta) = param_grads(dout, cache);

    let mut dx = vec![0.0; n * d];
    for j in 0..d {
        let mu = cache.mean[j];
        let var_eps = cache.var[j] + cache.eps;
        let std_inv = 1.0 / var_eps.sqrt();
        let gamma = cache.gamma.data[j];

        let mut dvar = 0.0;
        let mut dx_hat_sum = 0.0;
        let mut centered_sum = 0.0;
        for i in 0..n {
            let idx = i * d + j;
            let dx_hat = dout.data[idx] * gamma;
            let centered = cache.x.data[idx] - mu;
            dvar += dx_hat * centered * -0.5 * var_eps.powf(-1.5);
            dx_hat_sum += dx_hat;
            centered_sum += centered;
        }
        let dmean = -std_inv * dx_hat_sum + dvar * (-2.0 * centered_sum) / nf;

        for i in 0..n {
            let idx = i * d + j;
            let dx_hat = dout.data[idx] * gamma;
            let centered = cache.x.data[idx] - mu;
            dx[idx] = dx_hat * std_inv + dvar * 2.0 * centered / nf + dmean / nf;
        }
    }

    Ok(BatchNormGradients {
        x: Tensor::new(dx, vec![n, d]),
        gamma: dgamma,
        beta: dbeta,
    })
}

/// Batch normalization backward pass using the simplified closed form
///
/// Takes the same cache as [`batchnorm_backward`] and agrees with it to
/// within rounding error.
pub fn batchnorm_backward_alt(dout: &Tensor, cache: &BatchNormCache) -> Result<BatchNormGradients> {
    let (n, d) = check_dout("batchnorm_backward_alt", dout, cache)?;
    let nf = n as f64;
    let (dgamma, dbeta) = param_grads(dout, cache);

    let mut dx = vec![0.0; n * d];
    for j in 0..d {
        let scale = cache.gamma.data[j] / (nf * (cache.var[j] + cache.eps).sqrt());
        for i in 0..n {
            let idx = i * d + j;
            dx[idx] = scale
                * (nf * dout.data[idx] - dbeta.data[j] - cache.x_hat.data[idx] * dgamma.data[j]);
        }
    }

    Ok(BatchNormGradients {
        x: Tensor::new(dx, vec![n, d]),
        gamma: dgamma,
        beta: dbeta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Tensor, Tensor, Tensor) {
        let x = Tensor::from_fn(vec![4, 3], |i| ((i * 7) % 5) as f64 * 1.5 - 2.0 + i as f64 * 0.1);
        let gamma = Tensor::new(vec![1.0, 2.0, 0.5], vec![3]);
        let beta = Tensor::new(vec![0.0, -1.0, 3.0], vec![3]);
        (x, gamma, beta)
    }

    #[test]
    fn test_train_output_is_normalized() {
        let (x, _, _) = fixture();
        let gamma = Tensor::ones(vec![3]);
        let beta = Tensor::zeros(vec![3]);
        let mut bn_param = BatchNormParam::new(Mode::Train);

        let (out, _) = batchnorm_forward(&x, &gamma, &beta, &mut bn_param).unwrap();
        for j in 0..3 {
            let col: Vec<f64> = (0..4).map(|i| out.at2(i, j)).collect();
            let mean = col.iter().sum::<f64>() / 4.0;
            let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 4.0;
            assert!(mean.abs() < 1e-10);
            assert!((var - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_train_updates_running_stats() {
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 6.0], vec![2, 2]);
        let gamma = Tensor::ones(vec![2]);
        let beta = Tensor::zeros(vec![2]);
        let mut bn_param = BatchNormParam::new(Mode::Train);

        batchnorm_forward(&x, &gamma, &beta, &mut bn_param).unwrap();
        // mean = [2, 4], var = [1, 4]; running = 0.1 * sample
        assert!((bn_param.running.mean[0] - 0.2).abs() < 1e-12);
        assert!((bn_param.running.mean[1] - 0.4).abs() < 1e-12);
        assert!((bn_param.running.var[0] - 0.1).abs() < 1e-12);
        assert!((bn_param.running.var[1] - 0.4).abs() < 1e-12);

        batchnorm_forward(&x, &gamma, &beta, &mut bn_param).unwrap();
        assert!((bn_param.running.mean[0] - (0.9 * 0.2 + 0.2)).abs() < 1e-12);
    }

    #[test]
    fn test_test_mode_leaves_running_stats() {
        let (x, gamma, beta) = fixture();
        let running = RunningStats::new(vec![0.5, -1.0, 2.0], vec![1.0, 4.0, 0.25]);
        let mut bn_param = BatchNormParam::new(Mode::Test).with_running(running.clone());

        let (out, cache) = batchnorm_forward(&x, &gamma, &beta, &mut bn_param).unwrap();
        assert!(cache.is_none());
        assert_eq!(bn_param.running, running);

        let expected = gamma.data[1] * (x.at2(2, 1) + 1.0) / (4.0f64 + 1e-5).sqrt() + beta.data[1];
        assert!((out.at2(2, 1) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_running_stats_width_mismatch() {
        let (x, gamma, beta) = fixture();
        let running = RunningStats::new(vec![0.0; 5], vec![1.0; 5]);
        let mut bn_param = BatchNormParam::new(Mode::Test).with_running(running);
        assert!(batchnorm_forward(&x, &gamma, &beta, &mut bn_param).is_err());
    }

    #[test]
    fn test_rejects_bad_gamma() {
        let (x, _, beta) = fixture();
        let mut bn_param = BatchNormParam::new(Mode::Train);
        let gamma = Tensor::ones(vec![2]);
        assert!(batchnorm_forward(&x, &gamma, &beta, &mut bn_param).is_err());
        assert!(bn_param.running.is_empty());
    }

    #[test]
    fn test_empty_train_batch_leaves_running_stats() {
        let x = Tensor::zeros(vec![0, 3]);
        let gamma = Tensor::ones(vec![3]);
        let beta = Tensor::zeros(vec![3]);
        let mut bn_param = BatchNormParam::new(Mode::Train);

        assert!(batchnorm_forward(&x, &gamma, &beta, &mut bn_param).is_err());
        assert!(bn_param.running.is_empty());
    }

    #[test]
    fn test_backward_variants_agree() {
        let (x, gamma, beta) = fixture();
        let mut bn_param = BatchNormParam::new(Mode::Train);
        let (_, cache) = batchnorm_forward(&x, &gamma, &beta, &mut bn_param).unwrap();
        let cache = cache.unwrap();

        let dout = Tensor::from_fn(vec![4, 3], |i| (i as f64 * 0.37).sin());
        let a = batchnorm_backward(&dout, &cache).unwrap();
        let b = batchnorm_backward_alt(&dout, &cache).unwrap();

        for (p, q) in a.x.data.iter().zip(&b.x.data) {
            assert!((p - q).abs() < 1e-9 * (1.0 + p.abs()));
        }
        assert_eq!(a.gamma, b.gamma);
        assert_eq!(a.beta, b.beta);
    }

    #[test]
    fn test_backward_dx_sums_to_zero() {
        // Shifting every example of a feature by a constant leaves the
        // normalized output unchanged, so dx sums to zero per feature.
        let (x, gamma, beta) = fixture();
        let mut bn_param = BatchNormParam::new(Mode::Train);
        let (_, cache) = batchnorm_forward(&x, &gamma, &beta, &mut bn_param).unwrap();
        let dout = Tensor::linspace(-1.0, 2.0, vec![4, 3]);
        let grads = batchnorm_backward(&dout, &cache.unwrap()).unwrap();
        for s in grads.x.sum_rows().data {
            assert!(s.abs() < 1e-10);
        }
    }
}
