//! Max pooling
//!
//! Each `(pool_height, pool_width)` window of every channel is reduced to its maximum.
//! The backward pass routes the upstream gradient to the window position(s) holding that
//! maximum. When several positions tie, each one receives the full gradient, and
//! positions shared by overlapping windows accumulate the contributions of all of them.

use super::config::PoolParam;
use crate::error::{ensure_shape, LayerKind, Result};
use crate::utils::Scalar;
use ndarray::{s, Array4, Zip};

/// Intermediates from `max_pool_forward_naive`: the input, the pooled output and the
/// window configuration.
#[derive(Debug, Clone)]
pub struct PoolCache<A> {
    x: Array4<A>,
    out: Array4<A>,
    param: PoolParam,
}

/// Forward pass for max pooling over `(N, C, H, W)` input.
///
/// # Errors
///
/// `InvalidGeometry` when the window does not fit or does not tile evenly with `stride`.
///
/// # Examples
///
/// ```
/// use backprop_layers::layers::{max_pool_forward_naive, PoolParam};
/// use ndarray::Array4;
///
/// let x = Array4::from_shape_vec((1, 1, 2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
/// let param = PoolParam::new(2, 2, 2).unwrap();
/// let (out, _) = max_pool_forward_naive(&x, &param).unwrap();
/// assert_eq!(out[[0, 0, 0, 0]], 4.0);
/// ```
pub fn max_pool_forward_naive<A: Scalar>(
    x: &Array4<A>,
    param: &PoolParam,
) -> Result<(Array4<A>, PoolCache<A>)> {
    let (n, c, h, w) = x.dim();
    let (h_out, w_out) = param.output_dims((h, w))?;
    let (ph, pw, stride) = (param.pool_height(), param.pool_width(), param.stride());

    let mut out = Array4::zeros((n, c, h_out, w_out));
    for i in 0..n {
        for ch in 0..c {
            for r in 0..h_out {
                for col in 0..w_out {
                    let (rs, cs) = (r * stride, col * stride);
                    let window = x.slice(s![i, ch, rs..rs + ph, cs..cs + pw]);
                    out[[i, ch, r, col]] = window.fold(A::neg_infinity(), |m, &v| m.max(v));
                }
            }
        }
    }

    let cache = PoolCache {
        x: x.clone(),
        out: out.clone(),
        param: *param,
    };
    Ok((out, cache))
}

/// Backward pass for max pooling; returns `dx` with the shape of the pooled input.
pub fn max_pool_backward_naive<A: Scalar>(
    dout: &Array4<A>,
    cache: PoolCache<A>,
) -> Result<Array4<A>> {
    ensure_shape(LayerKind::MaxPool2d, cache.out.shape(), dout.shape())?;
    let (n, c, h_out, w_out) = cache.out.dim();
    let param = cache.param;
    let (ph, pw, stride) = (param.pool_height(), param.pool_width(), param.stride());

    let mut dx = Array4::zeros(cache.x.raw_dim());
    for i in 0..n {
        for ch in 0..c {
            for r in 0..h_out {
                for col in 0..w_out {
                    let (rs, cs) = (r * stride, col * stride);
                    let max = cache.out[[i, ch, r, col]];
                    let g = dout[[i, ch, r, col]];
                    Zip::from(dx.slice_mut(s![i, ch, rs..rs + ph, cs..cs + pw]))
                        .and(cache.x.slice(s![i, ch, rs..rs + ph, cs..cs + pw]))
                        .for_each(|d, &v| {
                            if v == max {
                                *d += g;
                            }
                        });
                }
            }
        }
    }
    Ok(dx)
}
