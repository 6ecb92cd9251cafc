//! Batch normalization and spatial batch normalization
//!
//! Batch normalization normalizes each feature to zero mean and unit variance over the
//! mini-batch, then applies a learnable scale (gamma) and shift (beta):
//!
//! 1. Compute batch statistics: mean μ and variance σ² per feature
//! 2. Normalize: x̂ = (x - μ) / sqrt(σ² + ε)
//! 3. Scale and shift: y = γ * x̂ + β
//!
//! Training mode also folds the batch statistics into exponential running averages,
//! which test mode uses instead of batch statistics so inference does not depend on the
//! batch. The column-wise normalization helpers here are shared with layer and group
//! normalization, which normalize along a different axis of the same computation.
//!
//! # References
//!
//! Ioffe, S., & Szegedy, C. (2015). Batch Normalization: Accelerating Deep Network Training
//! by Reducing Internal Covariate Shift. ICML.

use super::config::{BatchNormParam, Mode};
use super::r#trait::{Layer, LayerCache, LayerGrads};
use crate::error::{ensure_shape, LayerKind, NetError, Result};
use crate::utils::tensor::{param_view, reshape};
use crate::utils::{cast_count, Scalar};
use crate::Params;
use ndarray::{Array1, Array2, Array4, ArrayD, ArrayView1, ArrayView2, Axis, Ix1, Ix2};

/// Column-wise normalization of a 2-D view.
#[derive(Debug, Clone)]
pub(crate) struct Normalized<A> {
    pub x_centered: Array2<A>,
    pub x_hat: Array2<A>,
    pub mean: Array1<A>,
    pub var: Array1<A>,
    pub std: Array1<A>,
}

/// Normalizes every column of `x` with its own mean and (biased) variance.
pub(crate) fn normalize_columns<A: Scalar>(
    x: ArrayView2<'_, A>,
    eps: A,
    layer: LayerKind,
) -> Result<Normalized<A>> {
    let rows = x.nrows();
    if rows == 0 {
        return Err(NetError::InvalidGeometry {
            layer,
            msg: "cannot normalize over an empty axis".to_string(),
        });
    }
    let n = cast_count::<A>(rows);

    let mean = x.sum_axis(Axis(0)) / n;
    let x_centered = &x - &mean;
    let var = x_centered.mapv(|v| v * v).sum_axis(Axis(0)) / n;
    let std = var.mapv(|v| (v + eps).sqrt());
    let x_hat = &x_centered / &std;

    Ok(Normalized {
        x_centered,
        x_hat,
        mean,
        var,
        std,
    })
}

/// Gradient through `x̂ = (x - mean) / std` with column statistics, in closed form:
///
/// `dx = (dx̂ - mean(dx̂) - x̂ * mean(dx̂ * x̂)) / std`
pub(crate) fn normalize_columns_backward<A: Scalar>(
    dx_hat: ArrayView2<'_, A>,
    x_hat: ArrayView2<'_, A>,
    std: ArrayView1<'_, A>,
) -> Array2<A> {
    let n = cast_count::<A>(dx_hat.nrows());
    let mean_dx_hat = dx_hat.sum_axis(Axis(0)) / n;
    let mean_dx_hat_x_hat = (&dx_hat * &x_hat).sum_axis(Axis(0)) / n;

    let centered = &dx_hat - &mean_dx_hat;
    (&centered - &(&x_hat * &mean_dx_hat_x_hat)) / &std
}

/// Intermediates from `batchnorm_forward`.
///
/// `batch_stats` records whether normalization used batch statistics (train mode) or the
/// running averages (test mode), which the backward pass treats as constants.
#[derive(Debug, Clone)]
pub struct BatchNormCache<A> {
    x_centered: Array2<A>,
    x_hat: Array2<A>,
    std: Array1<A>,
    gamma: Array1<A>,
    batch_stats: bool,
}

fn check_affine_params<A>(
    layer: LayerKind,
    features: usize,
    gamma: &ArrayView1<'_, A>,
    beta: &ArrayView1<'_, A>,
) -> Result<()> {
    ensure_shape(layer, &[features], gamma.shape())?;
    ensure_shape(layer, &[features], beta.shape())
}

/// Forward pass for batch normalization.
///
/// # Arguments
///
/// * `x` - Data of shape `(N, D)`
/// * `gamma` / `beta` - Scale and shift of shape `(D,)`
/// * `param` - `eps`, `momentum` and the running statistics, updated only in `Mode::Train`
/// * `mode` - `Train` normalizes with batch statistics, `Test` with running statistics
pub fn batchnorm_forward<A: Scalar>(
    x: &Array2<A>,
    gamma: ArrayView1<'_, A>,
    beta: ArrayView1<'_, A>,
    param: &mut BatchNormParam<A>,
    mode: Mode,
) -> Result<(Array2<A>, BatchNormCache<A>)> {
    let features = param.num_features();
    ensure_shape(LayerKind::BatchNorm, &[x.nrows(), features], x.shape())?;
    check_affine_params(LayerKind::BatchNorm, features, &gamma, &beta)?;

    let eps = param.eps();
    let (x_centered, x_hat, std, batch_stats) = match mode {
        Mode::Train => {
            let norm = normalize_columns(x.view(), eps, LayerKind::BatchNorm)?;
            param.update_running(&norm.mean, &norm.var);
            (norm.x_centered, norm.x_hat, norm.std, true)
        }
        Mode::Test => {
            let std = param.running_var().mapv(|v| (v + eps).sqrt());
            let x_centered = x - param.running_mean();
            let x_hat = &x_centered / &std;
            (x_centered, x_hat, std, false)
        }
    };

    let out = &x_hat * &gamma + &beta;
    let cache = BatchNormCache {
        x_centered,
        x_hat,
        std,
        gamma: gamma.to_owned(),
        batch_stats,
    };
    Ok((out, cache))
}

fn scale_shift_grads<A: Scalar>(dout: &Array2<A>, x_hat: &Array2<A>) -> (Array1<A>, Array1<A>) {
    let dgamma = (dout * x_hat).sum_axis(Axis(0));
    let dbeta = dout.sum_axis(Axis(0));
    (dgamma, dbeta)
}

/// Backward pass for batch normalization, node by node through the computation graph.
///
/// Returns `(dx, dgamma, dbeta)`.
pub fn batchnorm_backward<A: Scalar>(
    dout: &Array2<A>,
    cache: BatchNormCache<A>,
) -> Result<(Array2<A>, Array1<A>, Array1<A>)> {
    ensure_shape(LayerKind::BatchNorm, cache.x_hat.shape(), dout.shape())?;
    let (dgamma, dbeta) = scale_shift_grads(dout, &cache.x_hat);
    let dx_hat = dout * &cache.gamma;

    // x̂ = x_centered * inv_std
    let dx_centered_direct = &dx_hat / &cache.std;
    if !cache.batch_stats {
        return Ok((dx_centered_direct, dgamma, dbeta));
    }

    let n = cast_count::<A>(dout.nrows());
    let two = A::one() + A::one();

    // inv_std = 1 / std, std = sqrt(var + eps)
    let dinv_std = (&dx_hat * &cache.x_centered).sum_axis(Axis(0));
    let dstd = &dinv_std * &cache.std.mapv(|s| -A::one() / (s * s));
    let dvar = &dstd / &cache.std.mapv(|s| two * s);

    // var = mean(x_centered²)
    let dx_centered_var = &cache.x_centered * &dvar.mapv(|v| two * v / n);
    let dx_centered = dx_centered_direct + dx_centered_var;

    // x_centered = x - mean(x)
    let dmean = dx_centered.sum_axis(Axis(0)).mapv(|v| -v / n);
    let dx = dx_centered + &dmean;
    Ok((dx, dgamma, dbeta))
}

/// Backward pass for batch normalization using the simplified closed form.
///
/// Numerically equivalent to `batchnorm_backward`; returns `(dx, dgamma, dbeta)`.
pub fn batchnorm_backward_alt<A: Scalar>(
    dout: &Array2<A>,
    cache: BatchNormCache<A>,
) -> Result<(Array2<A>, Array1<A>, Array1<A>)> {
    ensure_shape(LayerKind::BatchNorm, cache.x_hat.shape(), dout.shape())?;
    let (dgamma, dbeta) = scale_shift_grads(dout, &cache.x_hat);
    let dx_hat = dout * &cache.gamma;

    let dx = if cache.batch_stats {
        normalize_columns_backward(dx_hat.view(), cache.x_hat.view(), cache.std.view())
    } else {
        dx_hat / &cache.std
    };
    Ok((dx, dgamma, dbeta))
}

/// Intermediates from `spatial_batchnorm_forward`.
#[derive(Debug, Clone)]
pub struct SpatialBatchNormCache<A> {
    inner: BatchNormCache<A>,
    dims: (usize, usize, usize, usize),
}

/// `(N, C, H, W)` to `(N*H*W, C)`: channels become features, positions become samples.
fn channels_last<A: Scalar>(x: &Array4<A>) -> Result<Array2<A>> {
    let (n, c, h, w) = x.dim();
    reshape(&x.view().permuted_axes([0, 2, 3, 1]), (n * h * w, c))
}

fn channels_first<A: Scalar>(x: &Array2<A>, dims: (usize, usize, usize, usize)) -> Result<Array4<A>> {
    let (n, c, h, w) = dims;
    let nhwc = reshape(x, (n, h, w, c))?;
    Ok(nhwc.permuted_axes([0, 3, 1, 2]))
}

/// Forward pass for spatial batch normalization over `(N, C, H, W)` input.
///
/// `gamma`, `beta` and the running statistics are per channel (`C`).
pub fn spatial_batchnorm_forward<A: Scalar>(
    x: &Array4<A>,
    gamma: ArrayView1<'_, A>,
    beta: ArrayView1<'_, A>,
    param: &mut BatchNormParam<A>,
    mode: Mode,
) -> Result<(Array4<A>, SpatialBatchNormCache<A>)> {
    let dims = x.dim();
    let (out, inner) = batchnorm_forward(&channels_last(x)?, gamma, beta, param, mode)?;
    Ok((channels_first(&out, dims)?, SpatialBatchNormCache { inner, dims }))
}

/// Backward pass for spatial batch normalization; returns `(dx, dgamma, dbeta)`.
pub fn spatial_batchnorm_backward<A: Scalar>(
    dout: &Array4<A>,
    cache: SpatialBatchNormCache<A>,
) -> Result<(Array4<A>, Array1<A>, Array1<A>)> {
    let (n, c, h, w) = cache.dims;
    ensure_shape(LayerKind::BatchNorm, &[n, c, h, w], dout.shape())?;
    let (dx, dgamma, dbeta) = batchnorm_backward_alt(&channels_last(dout)?, cache.inner)?;
    Ok((channels_first(&dx, cache.dims)?, dgamma, dbeta))
}

/// Batch normalization layer reading `gamma{index}` / `beta{index}` and owning its
/// running statistics.
#[derive(Debug, Clone)]
pub struct BatchNormLayer<A> {
    gamma_key: String,
    beta_key: String,
    param: BatchNormParam<A>,
}

impl<A: Scalar> BatchNormLayer<A> {
    pub fn new(index: usize, param: BatchNormParam<A>) -> Self {
        Self {
            gamma_key: format!("gamma{}", index),
            beta_key: format!("beta{}", index),
            param,
        }
    }

    pub fn param(&self) -> &BatchNormParam<A> {
        &self.param
    }
}

impl<A: Scalar> Layer<A> for BatchNormLayer<A> {
    fn kind(&self) -> LayerKind {
        LayerKind::BatchNorm
    }

    fn forward(
        &mut self,
        input: &ArrayD<A>,
        params: &Params<A>,
        mode: Mode,
    ) -> Result<(ArrayD<A>, LayerCache<A>)> {
        let gamma = param_view::<A, Ix1>(params, &self.gamma_key)?;
        let beta = param_view::<A, Ix1>(params, &self.beta_key)?;
        let x = input.view().into_dimensionality::<Ix2>()?.to_owned();
        let (out, cache) = batchnorm_forward(&x, gamma, beta, &mut self.param, mode)?;
        Ok((out.into_dyn(), LayerCache::BatchNorm(cache)))
    }

    fn backward(&self, grad_output: &ArrayD<A>, cache: LayerCache<A>) -> Result<LayerGrads<A>> {
        let cache = match cache {
            LayerCache::BatchNorm(cache) => cache,
            other => return Err(other.mismatch(LayerKind::BatchNorm)),
        };
        let dout = grad_output.view().into_dimensionality::<Ix2>()?.to_owned();
        let (dx, dgamma, dbeta) = batchnorm_backward_alt(&dout, cache)?;
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

    fn running_stats(&self) -> Option<(&Array1<A>, &Array1<A>)> {
        Some((self.param.running_mean(), self.param.running_var()))
    }
}
