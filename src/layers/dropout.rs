//! Dropout Layer
//!
//! Dropout randomly zeros activations during training to prevent
//! overfitting. At test time it passes values through unchanged.
//!
//! ## Retention probability
//!
//! [`DropoutParam::p`] is the probability of **keeping** a unit. Each element
//! gets an independent Bernoulli(p) draw: `p = 1.0` keeps everything,
//! `p = 0.0` drops everything.
//!
//! ## No rescaling
//!
//! Kept activations are *not* multiplied by `1 / p`. The train-time output is
//! `x * mask` and the test-time output is `x`, so expected activations differ
//! between the two modes by a factor of `p`.
//!
//! ## Reproducibility
//!
//! With `seed: Some(s)` the mask comes from a fresh `StdRng` seeded with `s`,
//! so the same seed and shape always give the same mask (needed for gradient
//! checking). Without a seed the thread-local RNG is used.

use crate::config::{DropoutParam, Mode};
use crate::error::{LayerError, Result};
use crate::tensor::Tensor;
use rand::distr::{Bernoulli, Distribution};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Cache for dropout backward pass
#[derive(Clone, Debug)]
pub struct DropoutCache {
    /// Configuration the forward pass ran with
    pub param: DropoutParam,
    /// Shape of the input
    pub shape: Vec<usize>,
    /// Dropout mask (true = kept, false = dropped).
    /// None in test mode
    pub mask: Option<Vec<bool>>,
}

fn sample_mask<R: Rng + ?Sized>(rng: &mut R, len: usize, p: f64) -> Result<Vec<bool>> {
    let bernoulli = Bernoulli::new(p).map_err(|_| LayerError::InvalidProbability(p))?;
    Ok((0..len).map(|_| bernoulli.sample(&mut *rng)).collect())
}

/// Dropout forward pass
///
/// # Arguments
///
/// * `x` - Input of any shape
/// * `param` - Retention probability, mode and optional seed
///
/// # Returns
///
/// Tuple of (output, cache) where cache stores the configuration and the mask
///
/// # Errors
///
/// `InvalidProbability` if `p` is outside `[0, 1]`
///
/// # Example
///
/// ```rust
/// # use convnet_layers::{Tensor, layers::dropout_forward};
/// # use convnet_layers::config::{DropoutParam, Mode};
/// let x = Tensor::ones(vec![4, 4]);
/// let param = DropoutParam::new(0.5, Mode::Train).with_seed(42);
/// let (a, _) = dropout_forward(&x, &param)?;
/// let (b, _) = dropout_forward(&x, &param)?;
/// assert_eq!(a, b);
/// # Ok::<(), convnet_layers::LayerError>(())
/// ```
pub fn dropout_forward(x: &Tensor, param: &DropoutParam) -> Result<(Tensor, DropoutCache)> {
    param.validate()?;

    let mask = match param.mode {
        Mode::Test => None,
        Mode::Train => {
            let mask = match param.seed {
                Some(seed) => sample_mask(&mut StdRng::seed_from_u64(seed), x.len(), param.p)?,
                None => sample_mask(&mut rand::rng(), x.len(), param.p)?,
            };
            debug!(
                elements = mask.len(),
                kept = mask.iter().filter(|&&keep| keep).count(),
                seeded = param.seed.is_some(),
                "sampled dropout mask"
            );
            Some(mask)
        }
    };

    let out = match &mask {
        Some(mask) => apply_mask(x, mask),
        None => x.clone(),
    };

    let cache = DropoutCache {
        param: param.clone(),
        shape: x.shape.clone(),
        mask,
    };
    Ok((out, cache))
}

/// `t * mask`, so a dropped NaN or infinity still comes out as NaN
fn apply_mask(t: &Tensor, mask: &[bool]) -> Tensor {
    let data = t
        .data
        .iter()
        .zip(mask)
        .map(|(&v, &keep)| v * if keep { 1.0 } else { 0.0 })
        .collect();
    Tensor::new(data, t.shape.clone())
}

/// Dropout backward pass
///
/// Applies the cached mask to the upstream gradient in train mode and passes
/// it through unchanged in test mode.
pub fn dropout_backward(dout: &Tensor, cache: &DropoutCache) -> Result<Tensor> {
    if dout.shape != cache.shape {
        return Err(LayerError::shape(
            "dropout_backward",
            format!("dout of shape {:?}", cache.shape),
            &dout.shape,
        ));
    }
    match &cache.mask {
        Some(mask) => Ok(apply_mask(dout, mask)),
        None => Ok(dout.clone()),
    }
}
