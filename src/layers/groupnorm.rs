//! Group normalization
//!
//! Features (or channels) are split into `G` contiguous groups and each group of each
//! sample is normalized with its own mean and variance. The learnable scale and shift are
//! applied afterwards at full feature (or channel) resolution. Nothing is shared across
//! the batch, so there is no train/test distinction and no running state.
//!
//! # References
//!
//! Wu, Y., & He, K. (2018). Group Normalization. ECCV.

use super::batchnorm::{normalize_columns, normalize_columns_backward};
use super::config::GroupNormParam;
use crate::error::{ensure_shape, LayerKind, Result};
use crate::utils::tensor::reshape;
use crate::utils::Scalar;
use ndarray::{Array1, Array2, Array3, Array4, ArrayView1, Axis};

/// Per-group statistics over an `(N, D)` input, kept in the `(D/G, N*G)` layout that the
/// column-wise normalization produces.
#[derive(Debug, Clone)]
struct Grouped<A> {
    x_hat_t: Array2<A>,
    std: Array1<A>,
    dims: (usize, usize),
}

impl<A: Scalar> Grouped<A> {
    fn normalize(x: &Array2<A>, groups: usize, eps: A) -> Result<Self> {
        let (n, d) = x.dim();
        let group_len = d / groups;
        let rows = reshape(x, (n * groups, group_len))?;
        let norm = normalize_columns(rows.t(), eps, LayerKind::GroupNorm)?;
        Ok(Self {
            x_hat_t: norm.x_hat,
            std: norm.std,
            dims: (n, d),
        })
    }

    fn x_hat(&self) -> Result<Array2<A>> {
        reshape(&self.x_hat_t.t(), self.dims)
    }

    fn backward(&self, dx_hat: &Array2<A>) -> Result<Array2<A>> {
        let (group_len, rows) = self.x_hat_t.dim();
        let dx_hat_rows = reshape(dx_hat, (rows, group_len))?;
        let dx_t =
            normalize_columns_backward(dx_hat_rows.t(), self.x_hat_t.view(), self.std.view());
        reshape(&dx_t.t(), self.dims)
    }
}

/// Intermediates from `groupnorm_forward`.
#[derive(Debug, Clone)]
pub struct GroupNormCache<A> {
    grouped: Grouped<A>,
    x_hat: Array2<A>,
    gamma: Array1<A>,
}

/// Forward pass for group normalization on `(N, D)` input with `G` contiguous feature
/// groups. `gamma` and `beta` have shape `(D,)`.
pub fn groupnorm_forward<A: Scalar>(
    x: &Array2<A>,
    gamma: ArrayView1<'_, A>,
    beta: ArrayView1<'_, A>,
    param: &GroupNormParam<A>,
) -> Result<(Array2<A>, GroupNormCache<A>)> {
    let features = x.ncols();
    param.group_size(features)?;
    ensure_shape(LayerKind::GroupNorm, &[features], gamma.shape())?;
    ensure_shape(LayerKind::GroupNorm, &[features], beta.shape())?;

    let grouped = Grouped::normalize(x, param.groups(), param.eps())?;
    let x_hat = grouped.x_hat()?;
    let out = &x_hat * &gamma + &beta;
    let cache = GroupNormCache {
        grouped,
        x_hat,
        gamma: gamma.to_owned(),
    };
    Ok((out, cache))
}

/// Backward pass for 2-D group normalization; returns `(dx, dgamma, dbeta)`.
pub fn groupnorm_backward<A: Scalar>(
    dout: &Array2<A>,
    cache: GroupNormCache<A>,
) -> Result<(Array2<A>, Array1<A>, Array1<A>)> {
    ensure_shape(LayerKind::GroupNorm, cache.x_hat.shape(), dout.shape())?;
    let dgamma = (dout * &cache.x_hat).sum_axis(Axis(0));
    let dbeta = dout.sum_axis(Axis(0));
    let dx = cache.grouped.backward(&(dout * &cache.gamma))?;
    Ok((dx, dgamma, dbeta))
}

/// Intermediates from `spatial_groupnorm_forward`.
#[derive(Debug, Clone)]
pub struct SpatialGroupNormCache<A> {
    grouped: Grouped<A>,
    x_hat: Array4<A>,
    gamma: Array1<A>,
}

fn per_channel<A: Scalar>(v: ArrayView1<'_, A>) -> Result<Array3<A>> {
    reshape(&v, (v.len(), 1, 1))
}

fn sum_per_channel<A: Scalar>(x: &Array4<A>) -> Array1<A> {
    x.sum_axis(Axis(3)).sum_axis(Axis(2)).sum_axis(Axis(0))
}

/// Forward pass for spatial group normalization.
///
/// # Arguments
///
/// * `x` - Input of shape `(N, C, H, W)`
/// * `gamma` / `beta` - Per-channel scale and shift of shape `(C,)`
/// * `param` - `G` groups (must divide `C`) and `eps`
///
/// Statistics are computed per sample over `(C/G) x H x W` values of each group.
pub fn spatial_groupnorm_forward<A: Scalar>(
    x: &Array4<A>,
    gamma: ArrayView1<'_, A>,
    beta: ArrayView1<'_, A>,
    param: &GroupNormParam<A>,
) -> Result<(Array4<A>, SpatialGroupNormCache<A>)> {
    let (n, c, h, w) = x.dim();
    param.group_size(c)?;
    ensure_shape(LayerKind::GroupNorm, &[c], gamma.shape())?;
    ensure_shape(LayerKind::GroupNorm, &[c], beta.shape())?;

    // Channels are contiguous in each flattened sample, so feature groups are channel groups.
    let flat = reshape(x, (n, c * h * w))?;
    let grouped = Grouped::normalize(&flat, param.groups(), param.eps())?;
    let x_hat = reshape(&grouped.x_hat()?, (n, c, h, w))?;

    let out = &x_hat * &per_channel(gamma)? + &per_channel(beta)?;
    let cache = SpatialGroupNormCache {
        grouped,
        x_hat,
        gamma: gamma.to_owned(),
    };
    Ok((out, cache))
}

/// Backward pass for spatial group normalization; returns `(dx, dgamma, dbeta)` with the
/// parameter gradients per channel.
pub fn spatial_groupnorm_backward<A: Scalar>(
    dout: &Array4<A>,
    cache: SpatialGroupNormCache<A>,
) -> Result<(Array4<A>, Array1<A>, Array1<A>)> {
    let (n, c, h, w) = cache.x_hat.dim();
    ensure_shape(LayerKind::GroupNorm, &[n, c, h, w], dout.shape())?;

    let dgamma = sum_per_channel(&(dout * &cache.x_hat));
    let dbeta = sum_per_channel(dout);

    let dx_hat = dout * &per_channel(cache.gamma.view())?;
    let dx_flat = cache.grouped.backward(&reshape(&dx_hat, (n, c * h * w))?)?;
    let dx = reshape(&dx_flat, (n, c, h, w))?;
    Ok((dx, dgamma, dbeta))
}
