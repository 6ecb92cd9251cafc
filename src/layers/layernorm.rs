//! Layer normalization
//!
//! Normalizes each sample over its own features, then applies per-feature gamma and beta.
//! Statistics never cross the batch, so train and test behave identically and there are
//! no running averages to maintain.
//!
//! Internally this is batch normalization applied to the transposed input: rows become
//! columns, the column-wise normalization runs, and the result is transposed back.

use super::batchnorm::{normalize_columns, normalize_columns_backward};
use super::config::{LayerNormParam, Mode};
use super::r#trait::{Layer, LayerCache, LayerGrads};
use crate::error::{ensure_shape, LayerKind, Result};
use crate::utils::tensor::param_view;
use crate::utils::Scalar;
use crate::Params;
use ndarray::{Array1, Array2, ArrayD, ArrayView1, Axis, Ix1, Ix2};

/// Intermediates from `layernorm_forward`, stored in the transposed `(D, N)` layout.
#[derive(Debug, Clone)]
pub struct LayerNormCache<A> {
    x_hat_t: Array2<A>,
    std: Array1<A>,
    gamma: Array1<A>,
}

/// Forward pass for layer normalization.
///
/// # Arguments
///
/// * `x` - Data of shape `(N, D)`
/// * `gamma` / `beta` - Scale and shift of shape `(D,)`
/// * `param` - Holds `eps`
pub fn layernorm_forward<A: Scalar>(
    x: &Array2<A>,
    gamma: ArrayView1<'_, A>,
    beta: ArrayView1<'_, A>,
    param: &LayerNormParam<A>,
) -> Result<(Array2<A>, LayerNormCache<A>)> {
    let features = x.ncols();
    ensure_shape(LayerKind::LayerNorm, &[features], gamma.shape())?;
    ensure_shape(LayerKind::LayerNorm, &[features], beta.shape())?;

    let norm = normalize_columns(x.t(), param.eps(), LayerKind::LayerNorm)?;
    let out = &norm.x_hat.t() * &gamma + &beta;

    let cache = LayerNormCache {
        x_hat_t: norm.x_hat,
        std: norm.std,
        gamma: gamma.to_owned(),
    };
    Ok((out, cache))
}

/// Backward pass for layer normalization; returns `(dx, dgamma, dbeta)`.
pub fn layernorm_backward<A: Scalar>(
    dout: &Array2<A>,
    cache: LayerNormCache<A>,
) -> Result<(Array2<A>, Array1<A>, Array1<A>)> {
    let (d, n) = cache.x_hat_t.dim();
    ensure_shape(LayerKind::LayerNorm, &[n, d], dout.shape())?;

    let x_hat = cache.x_hat_t.t();
    let dgamma = (dout * &x_hat).sum_axis(Axis(0));
    let dbeta = dout.sum_axis(Axis(0));

    let dx_hat = dout * &cache.gamma;
    let dx_t = normalize_columns_backward(dx_hat.t(), cache.x_hat_t.view(), cache.std.view());
    Ok((dx_t.reversed_axes(), dgamma, dbeta))
}

/// Layer normalization layer reading `gamma{index}` / `beta{index}`.
#[derive(Debug, Clone)]
pub struct LayerNormLayer<A> {
    gamma_key: String,
    beta_key: String,
    param: LayerNormParam<A>,
}

impl<A: Scalar> LayerNormLayer<A> {
    pub fn new(index: usize, param: LayerNormParam<A>) -> Self {
        Self {
            gamma_key: format!("gamma{}", index),
            beta_key: format!("beta{}", index),
            param,
        }
    }
}

impl<A: Scalar> Layer<A> for LayerNormLayer<A> {
    fn kind(&self) -> LayerKind {
        LayerKind::LayerNorm
    }

    fn forward(
        &mut self,
        input: &ArrayD<A>,
        params: &Params<A>,
        _mode: Mode,
    ) -> Result<(ArrayD<A>, LayerCache<A>)> {
        let gamma = param_view::<A, Ix1>(params, &self.gamma_key)?;
        let beta = param_view::<A, Ix1>(params, &self.beta_key)?;
        let x = input.view().into_dimensionality::<Ix2>()?.to_owned();
        let (out, cache) = layernorm_forward(&x, gamma, beta, &self.param)?;
        Ok((out.into_dyn(), LayerCache::LayerNorm(cache)))
    }

    fn backward(&self, grad_output: &ArrayD<A>, cache: LayerCache<A>) -> Result<LayerGrads<A>> {
        let cache = match cache {
            LayerCache::LayerNorm(cache) => cache,
            other => return Err(other.mismatch(LayerKind::LayerNorm)),
        };
        let dout = grad_output.view().into_dimensionality::<Ix2>()?.to_owned();
        let (dx, dgamma, dbeta) = layernorm_backward(&dout, cache)?;
        Ok(LayerGrads {
            dx: dx.into_dyn(),
            params: vec![
                (self.gamma_key.clone(), dgamma.into_dyn()),
                (self.beta_key.clone(), dbeta.into_dyn()),
            ],
        })
    }

    fn param_keys(&self) -> Vec<String> {
        vec![self.gamma_key.clone(), self.beta_key.clone()]
    }
}
