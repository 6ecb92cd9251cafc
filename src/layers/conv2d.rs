//! 2D convolution
//!
//! This module provides the direct (naive) convolution, which slides every filter over the
//! zero-padded input and takes a dot product per output cell, and an im2col formulation
//! that unrolls receptive fields into columns so the whole layer becomes one matrix
//! product. Both compute the same result.
//!
//! Shapes follow the `(N, C, H, W)` convention:
//!
//! * input `x` - `(N, C, H, W)`
//! * filters `w` - `(F, C, HH, WW)`
//! * biases `b` - `(F,)`
//! * output - `(N, F, H', W')` with `H' = 1 + (H + 2*pad - HH) / stride`

use super::config::ConvParam;
use crate::error::{ensure_shape, LayerKind, Result};
use crate::utils::tensor::reshape;
use crate::utils::Scalar;
use ndarray::{s, Array1, Array2, Array4, ArrayView1, ArrayView4, Axis, Zip};

/// Sizes shared by the forward and backward passes of one convolution call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Geometry {
    n: usize,
    c: usize,
    h: usize,
    w: usize,
    f: usize,
    hh: usize,
    ww: usize,
    h_out: usize,
    w_out: usize,
    stride: usize,
    pad: usize,
}

impl Geometry {
    fn new<A>(
        x: &Array4<A>,
        w: &ArrayView4<'_, A>,
        b: &ArrayView1<'_, A>,
        param: &ConvParam,
    ) -> Result<Self> {
        let (n, c, h, width) = x.dim();
        let (f, _, hh, ww) = w.dim();
        ensure_shape(LayerKind::Conv2d, &[f, c, hh, ww], w.shape())?;
        ensure_shape(LayerKind::Conv2d, &[f], b.shape())?;
        let (h_out, w_out) = param.output_dims((h, width), (hh, ww))?;
        Ok(Self {
            n,
            c,
            h,
            w: width,
            f,
            hh,
            ww,
            h_out,
            w_out,
            stride: param.stride(),
            pad: param.pad(),
        })
    }

    fn output_dim(&self) -> (usize, usize, usize, usize) {
        (self.n, self.f, self.h_out, self.w_out)
    }

    /// Top-left corner of output cell `(r, col)` in padded coordinates.
    fn origin(&self, r: usize, col: usize) -> (usize, usize) {
        (r * self.stride, col * self.stride)
    }

    fn patch_len(&self) -> usize {
        self.c * self.hh * self.ww
    }

    fn column(&self, i: usize, r: usize, col: usize) -> usize {
        (i * self.h_out + r) * self.w_out + col
    }
}

fn zero_pad<A: Scalar>(x: &Array4<A>, pad: usize) -> Array4<A> {
    if pad == 0 {
        return x.clone();
    }
    let (n, c, h, w) = x.dim();
    let mut padded = Array4::zeros((n, c, h + 2 * pad, w + 2 * pad));
    padded
        .slice_mut(s![.., .., pad..pad + h, pad..pad + w])
        .assign(x);
    padded
}

fn strip_pad<A: Scalar>(x: Array4<A>, geom: &Geometry) -> Array4<A> {
    if geom.pad == 0 {
        return x;
    }
    let p = geom.pad;
    x.slice(s![.., .., p..p + geom.h, p..p + geom.w]).to_owned()
}

/// Intermediates from `conv_forward_naive`.
#[derive(Debug, Clone)]
pub struct ConvCache<A> {
    x_padded: Array4<A>,
    w: Array4<A>,
    geom: Geometry,
}

/// Forward pass for a convolutional layer, computed directly.
///
/// # Arguments
///
/// * `x` - Input of shape `(N, C, H, W)`
/// * `w` - Filters of shape `(F, C, HH, WW)`
/// * `b` - Biases of shape `(F,)`
/// * `param` - Stride and zero padding
///
/// # Errors
///
/// `InvalidGeometry` when the padded input does not tile evenly with `stride`,
/// `ShapeMismatch` when channels or bias length disagree.
pub fn conv_forward_naive<A: Scalar>(
    x: &Array4<A>,
    w: ArrayView4<'_, A>,
    b: ArrayView1<'_, A>,
    param: &ConvParam,
) -> Result<(Array4<A>, ConvCache<A>)> {
    let geom = Geometry::new(x, &w, &b, param)?;
    let x_padded = zero_pad(x, geom.pad);
    let mut out = Array4::zeros(geom.output_dim());

    for i in 0..geom.n {
        for k in 0..geom.f {
            let filter = w.index_axis(Axis(0), k);
            for r in 0..geom.h_out {
                for col in 0..geom.w_out {
                    let (rs, cs) = geom.origin(r, col);
                    let patch = x_padded.slice(s![i, .., rs..rs + geom.hh, cs..cs + geom.ww]);
                    out[[i, k, r, col]] = Zip::from(&patch)
                        .and(&filter)
                        .fold(b[k], |acc, &p, &q| acc + p * q);
                }
            }
        }
    }

    let cache = ConvCache {
        x_padded,
        w: w.to_owned(),
        geom,
    };
    Ok((out, cache))
}

fn bias_grad<A: Scalar>(dout: &Array4<A>) -> Array1<A> {
    dout.sum_axis(Axis(3)).sum_axis(Axis(2)).sum_axis(Axis(0))
}

/// Backward pass for the direct convolution; returns `(dx, dw, db)`.
pub fn conv_backward_naive<A: Scalar>(
    dout: &Array4<A>,
    cache: ConvCache<A>,
) -> Result<(Array4<A>, Array4<A>, Array1<A>)> {
    let geom = cache.geom;
    let (n, f, h_out, w_out) = geom.output_dim();
    ensure_shape(LayerKind::Conv2d, &[n, f, h_out, w_out], dout.shape())?;

    let mut dx_padded = Array4::zeros(cache.x_padded.raw_dim());
    let mut dw = Array4::zeros(cache.w.raw_dim());

    for i in 0..n {
        for k in 0..f {
            let filter = cache.w.index_axis(Axis(0), k);
            for r in 0..h_out {
                for col in 0..w_out {
                    let g = dout[[i, k, r, col]];
                    let (rs, cs) = geom.origin(r, col);
                    let patch = cache
                        .x_padded
                        .slice(s![i, .., rs..rs + geom.hh, cs..cs + geom.ww]);
                    dw.index_axis_mut(Axis(0), k).scaled_add(g, &patch);
                    dx_padded
                        .slice_mut(s![i, .., rs..rs + geom.hh, cs..cs + geom.ww])
                        .scaled_add(g, &filter);
                }
            }
        }
    }

    Ok((strip_pad(dx_padded, &geom), dw, bias_grad(dout)))
}

/// Intermediates from `conv_forward_im2col`.
#[derive(Debug, Clone)]
pub struct Im2colCache<A> {
    cols: Array2<A>,
    w: Array4<A>,
    geom: Geometry,
}

/// Unrolls every receptive field of `x_padded` into one column of a
/// `(C*HH*WW, N*H'*W')` matrix.
fn im2col<A: Scalar>(x_padded: &Array4<A>, geom: &Geometry) -> Array2<A> {
    let mut cols = Array2::zeros((geom.patch_len(), geom.n * geom.h_out * geom.w_out));
    for i in 0..geom.n {
        for r in 0..geom.h_out {
            for col in 0..geom.w_out {
                let (rs, cs) = geom.origin(r, col);
                let patch = x_padded.slice(s![i, .., rs..rs + geom.hh, cs..cs + geom.ww]);
                let mut column = cols.column_mut(geom.column(i, r, col));
                for (dst, &v) in column.iter_mut().zip(patch.iter()) {
                    *dst = v;
                }
            }
        }
    }
    cols
}

/// Scatter-adds columns back into a padded input; the adjoint of `im2col`.
fn col2im<A: Scalar>(cols: &Array2<A>, geom: &Geometry) -> Array4<A> {
    let dims = (geom.n, geom.c, geom.h + 2 * geom.pad, geom.w + 2 * geom.pad);
    let mut x_padded = Array4::zeros(dims);
    for i in 0..geom.n {
        for r in 0..geom.h_out {
            for col in 0..geom.w_out {
                let (rs, cs) = geom.origin(r, col);
                let mut patch =
                    x_padded.slice_mut(s![i, .., rs..rs + geom.hh, cs..cs + geom.ww]);
                let column = cols.column(geom.column(i, r, col));
                for (dst, &v) in patch.iter_mut().zip(column.iter()) {
                    *dst += v;
                }
            }
        }
    }
    x_padded
}

/// Forward pass for a convolutional layer as a single matrix product over unrolled
/// receptive fields. Same arguments and result as `conv_forward_naive`.
pub fn conv_forward_im2col<A: Scalar>(
    x: &Array4<A>,
    w: ArrayView4<'_, A>,
    b: ArrayView1<'_, A>,
    param: &ConvParam,
) -> Result<(Array4<A>, Im2colCache<A>)> {
    let geom = Geometry::new(x, &w, &b, param)?;
    let cols = im2col(&zero_pad(x, geom.pad), &geom);
    let w_flat = reshape(&w, (geom.f, geom.patch_len()))?;

    let bias = b.insert_axis(Axis(1));
    let out = w_flat.dot(&cols) + &bias;
    let out = reshape(&out, (geom.f, geom.n, geom.h_out, geom.w_out))?.permuted_axes([1, 0, 2, 3]);

    let cache = Im2colCache {
        cols,
        w: w.to_owned(),
        geom,
    };
    Ok((out, cache))
}

/// Backward pass for the im2col convolution; returns `(dx, dw, db)`.
pub fn conv_backward_im2col<A: Scalar>(
    dout: &Array4<A>,
    cache: Im2colCache<A>,
) -> Result<(Array4<A>, Array4<A>, Array1<A>)> {
    let geom = cache.geom;
    let (n, f, h_out, w_out) = geom.output_dim();
    ensure_shape(LayerKind::Conv2d, &[n, f, h_out, w_out], dout.shape())?;

    // (N, F, H', W') -> (F, N*H'*W'), matching the column order of `im2col`.
    let dout_flat = reshape(&dout.view().permuted_axes([1, 0, 2, 3]), (f, n * h_out * w_out))?;

    let db = dout_flat.sum_axis(Axis(1));
    let dw = reshape(&dout_flat.dot(&cache.cols.t()), cache.w.raw_dim())?;

    let w_flat = reshape(&cache.w, (f, geom.patch_len()))?;
    let dcols = w_flat.t().dot(&dout_flat);
    let dx = strip_pad(col2im(&dcols, &geom), &geom);
    Ok((dx, dw, db))
}
