//! Layer trait definition for network models
//!
//! This module defines the polymorphic contract shared by the layers a network model
//! stacks: a forward pass that returns its output together with a cache, and a backward
//! pass that consumes that cache exactly once.

use super::affine::AffineCache;
use super::batchnorm::BatchNormCache;
use super::config::Mode;
use super::dropout::DropoutCache;
use super::layernorm::LayerNormCache;
use super::relu::ReluCache;
use crate::error::{LayerKind, NetError};
use crate::utils::Scalar;
use crate::{Params, Result};
use ndarray::{Array1, ArrayD, IxDyn};

/// Forward-pass intermediates, one variant per layer family.
///
/// A layer's backward pass only accepts its own variant, so a cache can never be
/// routed to the wrong layer kind.
#[derive(Debug, Clone)]
pub enum LayerCache<A> {
    Affine(AffineCache<A>),
    Relu(ReluCache<A, IxDyn>),
    Dropout(DropoutCache<A, IxDyn>),
    BatchNorm(BatchNormCache<A>),
    LayerNorm(LayerNormCache<A>),
}

impl<A> LayerCache<A> {
    pub fn kind(&self) -> LayerKind {
        match self {
            LayerCache::Affine(_) => LayerKind::Affine,
            LayerCache::Relu(_) => LayerKind::Relu,
            LayerCache::Dropout(_) => LayerKind::Dropout,
            LayerCache::BatchNorm(_) => LayerKind::BatchNorm,
            LayerCache::LayerNorm(_) => LayerKind::LayerNorm,
        }
    }

    /// Error for a layer of kind `layer` handed this cache.
    pub(crate) fn mismatch(&self, layer: LayerKind) -> NetError {
        NetError::CacheMismatch {
            layer,
            got: self.kind(),
        }
    }
}

/// Gradients produced by one backward call.
///
/// # Fields
///
/// * `dx` - Gradient with respect to the layer input, same shape as the input
/// * `params` - Gradients keyed like the model's parameter mapping (`W1`, `gamma2`, ...)
#[derive(Debug, Clone)]
pub struct LayerGrads<A> {
    pub dx: ArrayD<A>,
    pub params: Vec<(String, ArrayD<A>)>,
}

/// Core trait for layers stacked by a network model.
///
/// Learnable parameters live in the model's parameter mapping, not in the layer; a
/// layer only knows the keys it reads. Normalization layers do own their running
/// statistics, which is why `forward` takes `&mut self`.
///
/// # Example
///
/// ```ignore
/// let (out, cache) = layer.forward(&x, &params, Mode::Train)?;
/// let grads = layer.backward(&dout, cache)?;
/// assert_eq!(grads.dx.shape(), x.shape());
/// ```
pub trait Layer<A: Scalar> {
    /// Layer family, used for error reporting.
    fn kind(&self) -> LayerKind;

    /// Forward propagation.
    ///
    /// Returns the output and a fresh cache for the matching backward call. Only a
    /// `Mode::Train` call may update internal running statistics.
    fn forward(
        &mut self,
        input: &ArrayD<A>,
        params: &Params<A>,
        mode: Mode,
    ) -> Result<(ArrayD<A>, LayerCache<A>)>;

    /// Backward propagation, consuming the cache from the matching forward call.
    fn backward(&self, grad_output: &ArrayD<A>, cache: LayerCache<A>) -> Result<LayerGrads<A>>;

    /// Keys of the parameters this layer reads from the parameter mapping.
    fn param_keys(&self) -> Vec<String> {
        Vec::new()
    }

    /// Running `(mean, variance)` for layers that keep them.
    fn running_stats(&self) -> Option<(&Array1<A>, &Array1<A>)> {
        None
    }
}
