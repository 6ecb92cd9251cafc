//! Network models and the linear softmax classifier
//!
//! Models own their parameter mapping and expose it through the `Model` trait, which is
//! the whole contract an external optimizer needs: read and write parameters, and call
//! `loss` to get either class scores (no labels) or the loss with a gradient for every
//! parameter (labels given).

pub mod fc_net;
pub mod linear_softmax;
pub mod two_layer;

pub use fc_net::FullyConnectedNet;
pub use linear_softmax::{linear_softmax_loss_naive, linear_softmax_loss_vectorized};
pub use two_layer::TwoLayerNet;

use crate::error::{NetError, Result};
use crate::utils::{cast, Scalar};
use crate::Params;
use ndarray::{Array2, ArrayD};

/// Result of a `Model::loss` call.
#[derive(Debug, Clone)]
pub enum LossOutput<A> {
    /// Test mode: class scores of shape `(N, C)`.
    Scores(Array2<A>),
    /// Train mode: total loss and a gradient for every parameter key.
    Train { loss: A, grads: Params<A> },
}

impl<A> LossOutput<A> {
    pub fn scores(&self) -> Option<&Array2<A>> {
        match self {
            LossOutput::Scores(scores) => Some(scores),
            LossOutput::Train { .. } => None,
        }
    }

    pub fn into_train(self) -> Option<(A, Params<A>)> {
        match self {
            LossOutput::Train { loss, grads } => Some((loss, grads)),
            LossOutput::Scores(_) => None,
        }
    }
}

/// Contract between a network model and the optimizer that trains it.
///
/// # Example
///
/// ```ignore
/// // One step of vanilla SGD
/// if let LossOutput::Train { grads, .. } = model.loss(&x, Some(&y))? {
///     for (key, grad) in grads {
///         model.params_mut().get_mut(&key).unwrap().scaled_add(-lr, &grad);
///     }
/// }
/// ```
pub trait Model<A: Scalar> {
    fn params(&self) -> &Params<A>;

    fn params_mut(&mut self) -> &mut Params<A>;

    /// Scores when `labels` is `None`; otherwise the regularized loss and its gradients,
    /// updating normalization running statistics on the way.
    fn loss(&mut self, x: &ArrayD<A>, labels: Option<&[usize]>) -> Result<LossOutput<A>>;
}

/// Adds `0.5 * reg * ΣW²` over `W1..W{num_layers}` and accumulates `reg * W` into each
/// weight gradient. Returns the penalty.
pub(crate) fn l2_penalty<A: Scalar>(
    params: &Params<A>,
    grads: &mut Params<A>,
    reg: A,
    num_layers: usize,
) -> Result<A> {
    let mut sum_sq = A::zero();
    for i in 1..=num_layers {
        let key = format!("W{}", i);
        let w = params
            .get(&key)
            .ok_or_else(|| NetError::MissingParameter(key.clone()))?;
        sum_sq = sum_sq + w.fold(A::zero(), |acc, &v| acc + v * v);
        grads
            .get_mut(&key)
            .ok_or(NetError::MissingParameter(key))?
            .scaled_add(reg, w);
    }
    Ok(cast::<A>(0.5) * reg * sum_sq)
}
