//! Inverted dropout for regularization
//!
//! During training each unit is kept with probability `p` and survivors are scaled by
//! `1/p`, so the expected activation is unchanged and test mode is the identity.

use super::config::{DropoutParam, Mode};
use super::r#trait::{Layer, LayerCache, LayerGrads};
use crate::error::{ensure_shape, LayerKind, Result};
use crate::utils::{cast, seeded_rng, Scalar};
use crate::Params;
use ndarray::{Array, ArrayD, Dimension};
use rand::Rng;

/// Dropout mask from a training-mode forward pass; `None` in test mode.
///
/// The mask already carries the `1/p` scaling of kept units.
#[derive(Debug, Clone)]
pub struct DropoutCache<A, D: Dimension> {
    mask: Option<Array<A, D>>,
}

impl<A, D: Dimension> DropoutCache<A, D> {
    pub fn mask(&self) -> Option<&Array<A, D>> {
        self.mask.as_ref()
    }
}

/// Forward pass for inverted dropout.
///
/// # Arguments
///
/// * `x` - Input of any shape
/// * `param` - Keep probability and optional seed
/// * `mode` - `Train` draws and applies a mask, `Test` returns the input unchanged
pub fn dropout_forward<A: Scalar, D: Dimension>(
    x: &Array<A, D>,
    param: &DropoutParam,
    mode: Mode,
) -> (Array<A, D>, DropoutCache<A, D>) {
    match mode {
        Mode::Train => {
            let keep_prob = param.keep_prob();
            let scale: A = cast(1.0 / keep_prob);
            let mut rng = seeded_rng(param.seed());
            let mask = Array::from_shape_simple_fn(x.raw_dim(), || {
                if rng.gen::<f64>() < keep_prob {
                    scale
                } else {
                    A::zero()
                }
            });
            let out = x * &mask;
            (out, DropoutCache { mask: Some(mask) })
        }
        Mode::Test => (x.clone(), DropoutCache { mask: None }),
    }
}

/// Backward pass for inverted dropout: multiplies by the stored mask, identity in test mode.
pub fn dropout_backward<A: Scalar, D: Dimension>(
    dout: &Array<A, D>,
    cache: DropoutCache<A, D>,
) -> Result<Array<A, D>> {
    match cache.mask {
        Some(mask) => {
            ensure_shape(LayerKind::Dropout, mask.shape(), dout.shape())?;
            Ok(dout * &mask)
        }
        None => Ok(dout.clone()),
    }
}

/// Dropout layer for network models.
#[derive(Debug, Clone)]
pub struct DropoutLayer {
    param: DropoutParam,
}

impl DropoutLayer {
    pub fn new(param: DropoutParam) -> Self {
        Self { param }
    }

    pub fn param(&self) -> &DropoutParam {
        &self.param
    }
}

impl<A: Scalar> Layer<A> for DropoutLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Dropout
    }

    fn forward(
        &mut self,
        input: &ArrayD<A>,
        _params: &Params<A>,
        mode: Mode,
    ) -> Result<(ArrayD<A>, LayerCache<A>)> {
        let (out, cache) = dropout_forward(input, &self.param, mode);
        Ok((out, LayerCache::Dropout(cache)))
    }

    fn backward(&self, grad_output: &ArrayD<A>, cache: LayerCache<A>) -> Result<LayerGrads<A>> {
        let cache = match cache {
            LayerCache::Dropout(cache) => cache,
            other => return Err(other.mismatch(LayerKind::Dropout)),
        };
        Ok(LayerGrads {
            dx: dropout_backward(grad_output, cache)?,
            params: Vec::new(),
        })
    }
}
