//! Rectified linear unit.

use super::config::Mode;
use super::r#trait::{Layer, LayerCache, LayerGrads};
use crate::error::{ensure_shape, LayerKind, Result};
use crate::utils::Scalar;
use crate::Params;
use ndarray::{Array, ArrayD, Dimension, Zip};

/// Keeps the pre-activation input for the backward pass.
#[derive(Debug, Clone)]
pub struct ReluCache<A, D: Dimension> {
    x: Array<A, D>,
}

/// Elementwise `max(x, 0)`, for input of any shape.
pub fn relu_forward<A: Scalar, D: Dimension>(x: &Array<A, D>) -> (Array<A, D>, ReluCache<A, D>) {
    let out = x.mapv(|v| if v > A::zero() { v } else { A::zero() });
    (out, ReluCache { x: x.clone() })
}

/// Passes `dout` through where the cached input was strictly positive; the subgradient at 0 is 0.
pub fn relu_backward<A: Scalar, D: Dimension>(
    dout: &Array<A, D>,
    cache: ReluCache<A, D>,
) -> Result<Array<A, D>> {
    ensure_shape(LayerKind::Relu, cache.x.shape(), dout.shape())?;
    Ok(Zip::from(dout)
        .and(&cache.x)
        .map_collect(|&g, &x| if x > A::zero() { g } else { A::zero() }))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReluLayer;

impl<A: Scalar> Layer<A> for ReluLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Relu
    }

    fn forward(
        &mut self,
        input: &ArrayD<A>,
        _params: &Params<A>,
        _mode: Mode,
    ) -> Result<(ArrayD<A>, LayerCache<A>)> {
        let (out, cache) = relu_forward(input);
        Ok((out, LayerCache::Relu(cache)))
    }

    fn backward(&self, grad_output: &ArrayD<A>, cache: LayerCache<A>) -> Result<LayerGrads<A>> {
        let cache = match cache {
            LayerCache::Relu(cache) => cache,
            other => return Err(other.mismatch(LayerKind::Relu)),
        };
        Ok(LayerGrads {
            dx: relu_backward(grad_output, cache)?,
            params: Vec::new(),
        })
    }
}
