//! Convenience layers that chain primitive forward/backward passes
//!
//! `affine_relu` is the hidden block of the two-layer network. `affine_norm_relu_dropout`
//! is the full hidden block of a fully connected network: affine, optional batch or layer
//! normalization, ReLU and optional dropout, in that order.

use super::affine::{affine_backward, affine_forward, AffineCache};
use super::batchnorm::{batchnorm_backward_alt, batchnorm_forward, BatchNormCache};
use super::config::{BatchNormParam, DropoutParam, LayerNormParam, Mode};
use super::dropout::{dropout_backward, dropout_forward, DropoutCache};
use super::layernorm::{layernorm_backward, layernorm_forward, LayerNormCache};
use super::relu::{relu_backward, relu_forward, ReluCache};
use crate::error::Result;
use crate::utils::Scalar;
use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Ix2};

/// Caches of the affine and ReLU stages of `affine_relu_forward`.
#[derive(Debug, Clone)]
pub struct AffineReluCache<A> {
    affine: AffineCache<A>,
    relu: ReluCache<A, Ix2>,
}

/// Affine transform followed by ReLU.
pub fn affine_relu_forward<A: Scalar>(
    x: &ArrayD<A>,
    w: ArrayView2<'_, A>,
    b: ArrayView1<'_, A>,
) -> Result<(Array2<A>, AffineReluCache<A>)> {
    let (a, affine) = affine_forward(x, w, b)?;
    let (out, relu) = relu_forward(&a);
    Ok((out, AffineReluCache { affine, relu }))
}

/// Backward pass for `affine_relu_forward`; returns `(dx, dw, db)`.
pub fn affine_relu_backward<A: Scalar>(
    dout: &Array2<A>,
    cache: AffineReluCache<A>,
) -> Result<(ArrayD<A>, Array2<A>, Array1<A>)> {
    let da = relu_backward(dout, cache.relu)?;
    affine_backward(&da, cache.affine)
}

/// Normalization stage of a hidden block, with the parameters it needs.
#[derive(Debug)]
pub enum NormStage<'a, A> {
    None,
    Batch {
        gamma: ArrayView1<'a, A>,
        beta: ArrayView1<'a, A>,
        param: &'a mut BatchNormParam<A>,
    },
    Layer {
        gamma: ArrayView1<'a, A>,
        beta: ArrayView1<'a, A>,
        param: &'a LayerNormParam<A>,
    },
}

#[derive(Debug, Clone)]
enum NormCache<A> {
    None,
    Batch(BatchNormCache<A>),
    Layer(LayerNormCache<A>),
}

/// Caches of every stage of `affine_norm_relu_dropout_forward`.
#[derive(Debug, Clone)]
pub struct AffineNormReluDropoutCache<A> {
    affine: AffineCache<A>,
    norm: NormCache<A>,
    relu: ReluCache<A, Ix2>,
    dropout: Option<DropoutCache<A, Ix2>>,
}

/// Gradients of a hidden block. `dgamma`/`dbeta` are present only when the block
/// normalizes.
#[derive(Debug, Clone)]
pub struct AffineNormReluDropoutGrads<A> {
    pub dx: ArrayD<A>,
    pub dw: Array2<A>,
    pub db: Array1<A>,
    pub dgamma: Option<Array1<A>>,
    pub dbeta: Option<Array1<A>>,
}

/// Affine, optional normalization, ReLU, optional dropout.
///
/// # Arguments
///
/// * `x` - Input of shape `(N, d_1, ..., d_k)`
/// * `w` / `b` - Affine parameters
/// * `norm` - Normalization stage; batch normalization updates its running statistics in
///   `Mode::Train`
/// * `dropout` - Dropout configuration, or `None` to skip dropout
/// * `mode` - Train or test behavior for normalization and dropout
pub fn affine_norm_relu_dropout_forward<A: Scalar>(
    x: &ArrayD<A>,
    w: ArrayView2<'_, A>,
    b: ArrayView1<'_, A>,
    norm: NormStage<'_, A>,
    dropout: Option<&DropoutParam>,
    mode: Mode,
) -> Result<(Array2<A>, AffineNormReluDropoutCache<A>)> {
    let (a, affine) = affine_forward(x, w, b)?;

    let (normed, norm) = match norm {
        NormStage::None => (a, NormCache::None),
        NormStage::Batch { gamma, beta, param } => {
            let (out, cache) = batchnorm_forward(&a, gamma, beta, param, mode)?;
            (out, NormCache::Batch(cache))
        }
        NormStage::Layer { gamma, beta, param } => {
            let (out, cache) = layernorm_forward(&a, gamma, beta, param)?;
            (out, NormCache::Layer(cache))
        }
    };

    let (activated, relu) = relu_forward(&normed);

    let (out, dropout) = match dropout {
        Some(param) => {
            let (out, cache) = dropout_forward(&activated, param, mode);
            (out, Some(cache))
        }
        None => (activated, None),
    };

    let cache = AffineNormReluDropoutCache {
        affine,
        norm,
        relu,
        dropout,
    };
    Ok((out, cache))
}

/// Backward pass for `affine_norm_relu_dropout_forward`.
pub fn affine_norm_relu_dropout_backward<A: Scalar>(
    dout: &Array2<A>,
    cache: AffineNormReluDropoutCache<A>,
) -> Result<AffineNormReluDropoutGrads<A>> {
    let AffineNormReluDropoutCache {
        affine,
        norm,
        relu,
        dropout,
    } = cache;

    let dactivated = match dropout {
        Some(cache) => dropout_backward(dout, cache)?,
        None => dout.clone(),
    };
    let dnormed = relu_backward(&dactivated, relu)?;

    let (da, dgamma, dbeta) = match norm {
        NormCache::None => (dnormed, None, None),
        NormCache::Batch(cache) => {
            let (da, dgamma, dbeta) = batchnorm_backward_alt(&dnormed, cache)?;
            (da, Some(dgamma), Some(dbeta))
        }
        NormCache::Layer(cache) => {
            let (da, dgamma, dbeta) = layernorm_backward(&dnormed, cache)?;
            (da, Some(dgamma), Some(dbeta))
        }
    };

    let (dx, dw, db) = affine_backward(&da, affine)?;
    Ok(AffineNormReluDropoutGrads {
        dx,
        dw,
        db,
        dgamma,
        dbeta,
    })
}
