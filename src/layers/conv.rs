//! 2-D Convolution (naive)
//!
//! A direct, loop-based convolution over `(N, C, H, W)` images. Each of the
//! `F` filters spans all `C` input channels:
//!
//! ```text
//! Input:  x [N, C, H, W]
//! Filter: w [F, C, HH, WW]
//! Bias:   b [F]
//! Output: y [N, F, H', W']
//!
//! H' = (H + 2 * pad - HH) / stride + 1
//! W' = (W + 2 * pad - WW) / stride + 1
//!
//! y[n, f, i, j] = b[f] + Σ_c Σ_di Σ_dj  x_pad[n, c, i*stride + di, j*stride + dj] * w[f, c, di, dj]
//! ```
//!
//! `x_pad` is `x` with `pad` zeros added on each spatial side. No padded copy
//! is built: reads that land in the border contribute zero, and in the
//! backward pass gradient that lands in the border is dropped, so `dx` never
//! carries gradient outside the original spatial extent.
//!
//! ## Backward Pass
//!
//! ```text
//! db[f]               = Σ_n Σ_i Σ_j dy[n, f, i, j]
//! dw[f, c, di, dj]   += x_pad[n, c, i*s + di, j*s + dj] * dy[n, f, i, j]
//! dx_pad[n, c, i*s + di, j*s + dj] += w[f, c, di, dj] * dy[n, f, i, j]
//! ```

use crate::config::ConvParam;
use crate::error::{LayerError, Result};
use crate::tensor::Tensor;
use rayon::prelude::*;
use tracing::trace;

/// Cache for convolution backward pass
#[derive(Clone, Debug)]
pub struct ConvCache {
    /// Unpadded input
    pub x: Tensor,
    pub w: Tensor,
    pub conv_param: ConvParam,
}

/// Gradients for convolution layer
#[derive(Clone, Debug)]
pub struct ConvGradients {
    pub x: Tensor,
    pub w: Tensor,
    pub b: Tensor,
}

/// Map a coordinate in the padded image back to the original image.
/// `None` means the coordinate lies in the zero border.
#[inline]
fn unpad(p: usize, pad: usize, size: usize) -> Option<usize> {
    p.checked_sub(pad).filter(|&q| q < size)
}

/// Output spatial size of a window sliding over `size + 2 * pad`
fn output_size(size: usize, pad: usize, window: usize, stride: usize) -> Result<usize> {
    if stride == 0 {
        return Err(LayerError::InvalidConfig("stride must be at least 1".to_string()));
    }
    let padded = size + 2 * pad;
    if window == 0 || window > padded {
        return Err(LayerError::InvalidConfig(format!(
            "filter size {} does not fit padded input size {}",
            window, padded
        )));
    }
    Ok((padded - window) / stride + 1)
}

/// Convolution forward pass
///
/// # Arguments
///
/// * `x` - Input `[N, C, H, W]`
/// * `w` - Filters `[F, C, HH, WW]`
/// * `b` - Bias `[F]`
/// * `conv_param` - Stride and zero padding
///
/// # Returns
///
/// Output `[N, F, H', W']` and the cache for the backward pass
///
/// # Errors
///
/// `ShapeMismatch` for non 4-D inputs, channel or bias mismatches;
/// `InvalidConfig` for a zero stride or a filter larger than the padded
/// input.
pub fn conv_forward_naive(
    x: &Tensor,
    w: &Tensor,
    b: &Tensor,
    conv_param: &ConvParam,
) -> Result<(Tensor, ConvCache)> {
    let (n, c, h, wd) = x
        .dims4()
        .ok_or_else(|| LayerError::shape("conv_forward_naive", "x of shape [N, C, H, W]", &x.shape))?;
    let (f, wc, hh, ww) = w
        .dims4()
        .ok_or_else(|| LayerError::shape("conv_forward_naive", "w of shape [F, C, HH, WW]", &w.shape))?;
    if wc != c {
        return Err(LayerError::shape(
            "conv_forward_naive",
            format!("w with {} input channels", c),
            &w.shape,
        ));
    }
    if b.shape != [f] {
        return Err(LayerError::shape(
            "conv_forward_naive",
            format!("b of shape [{}]", f),
            &b.shape,
        ));
    }

    let ConvParam { stride, pad } = *conv_param;
    let h_out = output_size(h, pad, hh, stride)?;
    let w_out = output_size(wd, pad, ww, stride)?;
    trace!(input = ?x.shape, filters = ?w.shape, stride, pad, h_out, w_out, "conv forward");

    let per_example = f * h_out * w_out;
    let mut out = vec![0.0; n * per_example];

    // Examples are independent; each output value is still summed in a fixed order
    if per_example > 0 {
        out.par_chunks_mut(per_example)
            .enumerate()
            .for_each(|(ni, chunk)| {
                for fi in 0..f {
                    for i in 0..h_out {
                        for j in 0..w_out {
                            let mut acc = 0.0;
                            for ci in 0..c {
                                for di in 0..hh {
                                    let Some(row) = unpad(i * stride + di, pad, h) else {
                                        continue;
                                    };
                                    for dj in 0..ww {
                                        let Some(col) = unpad(j * stride + dj, pad, wd) else {
                                            continue;
                                        };
                                        acc += x.at4(ni, ci, row, col) * w.at4(fi, ci, di, dj);
                                    }
                                }
                            }
                            chunk[(fi * h_out + i) * w_out + j] = acc + b.data[fi];
                        }
                    }
                }
            });
    }

    let cache = ConvCache {
        x: x.clone(),
        w: w.clone(),
        conv_param: *conv_param,
    };
    Ok((Tensor::new(out, vec![n, f, h_out, w_out]), cache))
}

/// Convolution backward pass
///
/// # Arguments
///
/// * `dout` - Upstream gradient `[N, F, H', W']`
/// * `cache` - Cache from [`conv_forward_naive`]
///
/// # Returns
///
/// Gradients for input (same shape as the unpadded `x`), filters and bias
pub fn conv_backward_naive(dout: &Tensor, cache: &ConvCache) -> Result<ConvGradients> {
    let x = &cache.x;
    let w = &cache.w;
    let ConvParam { stride, pad } = cache.conv_param;
    let (n, c, h, wd) = x.dims4().ok_or_else(|| {
        LayerError::shape("conv_backward_naive", "cached x of shape [N, C, H, W]", &x.shape)
    })?;
    let (f, _, hh, ww) = w.dims4().ok_or_else(|| {
        LayerError::shape("conv_backward_naive", "cached w of shape [F, C, HH, WW]", &w.shape)
    })?;
    let h_out = output_size(h, pad, hh, stride)?;
    let w_out = output_size(wd, pad, ww, stride)?;
    if dout.shape != [n, f, h_out, w_out] {
        return Err(LayerError::shape(
            "conv_backward_naive",
            format!("dout of shape [{}, {}, {}, {}]", n, f, h_out, w_out),
            &dout.shape,
        ));
    }

    let mut dx = x.zeros_like();
    let mut dw = w.zeros_like();
    let mut db = Tensor::zeros(vec![f]);

    for ni in 0..n {
        for fi in 0..f {
            for i in 0..h_out {
                for j in 0..w_out {
                    let g = dout.at4(ni, fi, i, j);
                    db.data[fi] += g;
                    for ci in 0..c {
                        for di in 0..hh {
                            let Some(row) = unpad(i * stride + di, pad, h) else {
                                continue;
                            };
                            for dj in 0..ww {
                                let Some(col) = unpad(j * stride + dj, pad, wd) else {
                                    continue;
                                };
                                let w_idx = w.offset4(fi, ci, di, dj);
                                let x_idx = x.offset4(ni, ci, row, col);
                                dw.data[w_idx] += x.data[x_idx] * g;
                                dx.data[x_idx] += w.data[w_idx] * g;
                            }
                        }
                    }
                }
            }
        }
    }

    trace!(dout = ?dout.shape, "conv backward");
    Ok(ConvGradients { x: dx, w: dw, b: db })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_shape_with_padding_and_stride() {
        let x = Tensor::zeros(vec![2, 3, 5, 7]);
        let w = Tensor::zeros(vec![4, 3, 3, 3]);
        let b = Tensor::zeros(vec![4]);
        let (out, _) = conv_forward_naive(&x, &w, &b, &ConvParam::new(2, 1)).unwrap();
        // (5 + 2 - 3) / 2 + 1 = 3, (7 + 2 - 3) / 2 + 1 = 4
        assert_eq!(out.shape, vec![2, 4, 3, 4]);
    }

    #[test]
    fn test_identity_filter_is_scalar_multiply_plus_bias() {
        let x = Tensor::linspace(-2.0, 2.0, vec![2, 1, 3, 3]);
        let w = Tensor::new(vec![3.0], vec![1, 1, 1, 1]);
        let b = Tensor::new(vec![0.5], vec![1]);
        let (out, _) = conv_forward_naive(&x, &w, &b, &ConvParam::new(1, 0)).unwrap();
        assert_eq!(out.shape, x.shape);
        for (o, v) in out.data.iter().zip(&x.data) {
            assert!((o - (3.0 * v + 0.5)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_box_filter_sums_window() {
        let x = Tensor::linspace(1.0, 16.0, vec![1, 1, 4, 4]);
        let w = Tensor::ones(vec![1, 1, 2, 2]);
        let b = Tensor::zeros(vec![1]);
        let (out, _) = conv_forward_naive(&x, &w, &b, &ConvParam::new(2, 0)).unwrap();
        // windows: [1,2,5,6] [3,4,7,8] [9,10,13,14] [11,12,15,16]
        assert_eq!(out.data, vec![14.0, 22.0, 46.0, 54.0]);
    }

    #[test]
    fn test_padding_reads_zero() {
        let x = Tensor::ones(vec![1, 1, 2, 2]);
        let w = Tensor::ones(vec![1, 1, 3, 3]);
        let b = Tensor::zeros(vec![1]);
        let (out, _) = conv_forward_naive(&x, &w, &b, &ConvParam::same(3)).unwrap();
        // Every 3x3 window around a 2x2 image of ones covers all four pixels
        assert_eq!(out.data, vec![4.0; 4]);
    }

    #[test]
    fn test_backward_bias_is_spatial_sum() {
        let x = Tensor::linspace(-1.0, 1.0, vec![2, 2, 4, 4]);
        let w = Tensor::linspace(-0.3, 0.3, vec![3, 2, 3, 3]);
        let b = Tensor::zeros(vec![3]);
        let (out, cache) = conv_forward_naive(&x, &w, &b, &ConvParam::same(3)).unwrap();
        let grads = conv_backward_naive(&out.ones_like(), &cache).unwrap();
        assert_eq!(grads.b.data, vec![32.0; 3]);
        assert_eq!(grads.x.shape, x.shape);
        assert_eq!(grads.w.shape, w.shape);
    }

    #[test]
    fn test_rejects_channel_mismatch() {
        let x = Tensor::zeros(vec![1, 3, 4, 4]);
        let w = Tensor::zeros(vec![2, 2, 3, 3]);
        let b = Tensor::zeros(vec![2]);
        assert!(matches!(
            conv_forward_naive(&x, &w, &b, &ConvParam::new(1, 0)),
            Err(LayerError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_zero_stride_and_oversized_filter() {
        let x = Tensor::zeros(vec![1, 1, 3, 3]);
        let b = Tensor::zeros(vec![1]);
        let w = Tensor::zeros(vec![1, 1, 3, 3]);
        assert!(matches!(
            conv_forward_naive(&x, &w, &b, &ConvParam::new(0, 0)),
            Err(LayerError::InvalidConfig(_))
        ));
        let big = Tensor::zeros(vec![1, 1, 5, 5]);
        assert!(matches!(
            conv_forward_naive(&x, &big, &b, &ConvParam::new(1, 0)),
            Err(LayerError::InvalidConfig(_))
        ));
    }
}
