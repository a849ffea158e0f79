//! Max Pooling (naive)
//!
//! Slides a `pool_height x pool_width` window over every channel of every
//! image with the given stride (no padding) and keeps the window maximum.
//!
//! ```text
//! Input:  x [N, C, H, W]
//! Output: y [N, C, H', W']
//!
//! H' = (H - pool_height) / stride + 1
//! W' = (W - pool_width) / stride + 1
//! ```
//!
//! ## Backward Pass
//!
//! The max is only sensitive to the element that achieved it, so each
//! window's upstream gradient goes entirely to that one input position.
//! When several positions tie, the first one in row-major scan order of the
//! window wins. Windows overlap when `stride < pool size`; their
//! contributions are added, never overwritten.

use crate::config::PoolParam;
use crate::error::{LayerError, Result};
use crate::tensor::Tensor;
use tracing::trace;

/// Cache for max pooling backward pass
#[derive(Clone, Debug)]
pub struct PoolCache {
    pub x: Tensor,
    pub pool_param: PoolParam,
}

fn pooled_dims(x: &Tensor, pool_param: &PoolParam, op: &'static str) -> Result<[usize; 6]> {
    let (n, c, h, w) = x
        .dims4()
        .ok_or_else(|| LayerError::shape(op, "x of shape [N, C, H, W]", &x.shape))?;
    let PoolParam {
        pool_height: ph,
        pool_width: pw,
        stride,
    } = *pool_param;
    if stride == 0 {
        return Err(LayerError::InvalidConfig("pool stride must be at least 1".to_string()));
    }
    if ph == 0 || pw == 0 || ph > h || pw > w {
        return Err(LayerError::InvalidConfig(format!(
            "pool window {}x{} does not fit input {}x{}",
            ph, pw, h, w
        )));
    }
    Ok([n, c, h, w, (h - ph) / stride + 1, (w - pw) / stride + 1])
}

/// Row and column of the first maximum in the window at `(h0, w0)`
fn argmax_window(x: &Tensor, ni: usize, ci: usize, h0: usize, w0: usize, p: &PoolParam) -> (usize, usize) {
    let mut best = (h0, w0);
    let mut best_val = x.at4(ni, ci, h0, w0);
    for r in h0..h0 + p.pool_height {
        for s in w0..w0 + p.pool_width {
            let v = x.at4(ni, ci, r, s);
            // strict comparison keeps the earliest position on ties
            if v > best_val {
                best_val = v;
                best = (r, s);
            }
        }
    }
    best
}

/// Max pooling forward pass
///
/// # Example
///
/// ```rust
/// # use convnet_layers::{Tensor, layers::max_pool_forward_naive};
/// # use convnet_layers::config::PoolParam;
/// let x = Tensor::linspace(1.0, 16.0, vec![1, 1, 4, 4]);
/// let (out, _) = max_pool_forward_naive(&x, &PoolParam::new(2, 2, 2))?;
/// assert_eq!(out.data, vec![6.0, 8.0, 14.0, 16.0]);
/// # Ok::<(), convnet_layers::LayerError>(())
/// ```
pub fn max_pool_forward_naive(x: &Tensor, pool_param: &PoolParam) -> Result<(Tensor, PoolCache)> {
    let [n, c, _, _, h_out, w_out] = pooled_dims(x, pool_param, "max_pool_forward_naive")?;
    let stride = pool_param.stride;
    trace!(input = ?x.shape, ?pool_param, h_out, w_out, "max pool forward");

    let mut out = Tensor::zeros(vec![n, c, h_out, w_out]);
    for ni in 0..n {
        for ci in 0..c {
            for i in 0..h_out {
                for j in 0..w_out {
                    let (r, s) = argmax_window(x, ni, ci, i * stride, j * stride, pool_param);
                    let idx = out.offset4(ni, ci, i, j);
                    out.data[idx] = x.at4(ni, ci, r, s);
                }
            }
        }
    }

    let cache = PoolCache {
        x: x.clone(),
        pool_param: *pool_param,
    };
    Ok((out, cache))
}

/// Max pooling backward pass
///
/// # Arguments
///
/// * `dout` - Upstream gradient `[N, C, H', W']`
/// * `cache` - Cache from [`max_pool_forward_naive`]
///
/// # Returns
///
/// Gradient with respect to the input, `[N, C, H, W]`
pub fn max_pool_backward_naive(dout: &Tensor, cache: &PoolCache) -> Result<Tensor> {
    let x = &cache.x;
    let p = &cache.pool_param;
    let [n, c, _, _, h_out, w_out] = pooled_dims(x, p, "max_pool_backward_naive")?;
    if dout.shape != [n, c, h_out, w_out] {
        return Err(LayerError::shape(
            "max_pool_backward_naive",
            format!("dout of shape [{}, {}, {}, {}]", n, c, h_out, w_out),
            &dout.shape,
        ));
    }

    let mut dx = x.zeros_like();
    for ni in 0..n {
        for ci in 0..c {
            for i in 0..h_out {
                for j in 0..w_out {
                    let (r, s) = argmax_window(x, ni, ci, i * p.stride, j * p.stride, p);
                    let idx = dx.offset4(ni, ci, r, s);
                    dx.data[idx] += dout.at4(ni, ci, i, j);
                }
            }
        }
    }
    Ok(dx)
}
