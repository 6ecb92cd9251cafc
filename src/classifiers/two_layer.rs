//! Two-layer fully connected network
//!
//! `affine - relu - affine - softmax`, with L2 regularization on both weight matrices.
//! Input dimension `D`, hidden dimension `H`, `C` classes.

use super::{l2_penalty, LossOutput, Model};
use crate::error::{NetError, Result};
use crate::layers::{affine_backward, affine_forward, affine_relu_backward, affine_relu_forward};
use crate::loss::softmax_loss;
use crate::utils::tensor::param_view;
use crate::utils::{randn, Scalar};
use crate::Params;
use ndarray::{Array1, ArrayD, Ix1, Ix2};
use rand::Rng;
use tracing::{debug, trace};

/// Two-layer network; parameters `W1 (D, H)`, `b1 (H)`, `W2 (H, C)`, `b2 (C)`.
///
/// # Example
///
/// ```
/// use backprop_layers::{Model, TwoLayerNet};
/// use backprop_layers::utils::seeded_rng;
/// use ndarray::Array2;
///
/// let mut rng = seeded_rng(Some(0));
/// let mut net = TwoLayerNet::<f64>::new(4, 8, 3, 1e-2, 0.0, &mut rng).unwrap();
/// let x = Array2::<f64>::zeros((2, 4)).into_dyn();
/// let scores = net.loss(&x, None).unwrap();
/// assert_eq!(scores.scores().unwrap().dim(), (2, 3));
/// ```
#[derive(Debug, Clone)]
pub struct TwoLayerNet<A> {
    params: Params<A>,
    reg: A,
}

impl<A: Scalar> TwoLayerNet<A> {
    /// Weights are drawn from `N(0, weight_scale²)`, biases start at zero.
    pub fn new<R: Rng>(
        input_dim: usize,
        hidden_dim: usize,
        num_classes: usize,
        weight_scale: f64,
        reg: A,
        rng: &mut R,
    ) -> Result<Self> {
        if input_dim == 0 || hidden_dim == 0 || num_classes == 0 {
            return Err(NetError::InvalidConfig(
                "layer sizes must be greater than 0".to_string(),
            ));
        }

        let mut params = Params::new();
        params.insert(
            "W1".to_string(),
            randn((input_dim, hidden_dim), weight_scale, rng).into_dyn(),
        );
        params.insert("b1".to_string(), Array1::zeros(hidden_dim).into_dyn());
        params.insert(
            "W2".to_string(),
            randn((hidden_dim, num_classes), weight_scale, rng).into_dyn(),
        );
        params.insert("b2".to_string(), Array1::zeros(num_classes).into_dyn());

        debug!(input_dim, hidden_dim, num_classes, "constructed two-layer network");
        Ok(Self { params, reg })
    }

    pub fn reg(&self) -> A {
        self.reg
    }
}

impl<A: Scalar> Model<A> for TwoLayerNet<A> {
    fn params(&self) -> &Params<A> {
        &self.params
    }

    fn params_mut(&mut self) -> &mut Params<A> {
        &mut self.params
    }

    fn loss(&mut self, x: &ArrayD<A>, labels: Option<&[usize]>) -> Result<LossOutput<A>> {
        let w1 = param_view::<A, Ix2>(&self.params, "W1")?;
        let b1 = param_view::<A, Ix1>(&self.params, "b1")?;
        let w2 = param_view::<A, Ix2>(&self.params, "W2")?;
        let b2 = param_view::<A, Ix1>(&self.params, "b2")?;

        let (hidden, hidden_cache) = affine_relu_forward(x, w1, b1)?;
        let (scores, scores_cache) = affine_forward(&hidden.into_dyn(), w2, b2)?;

        let labels = match labels {
            Some(labels) => labels,
            None => return Ok(LossOutput::Scores(scores)),
        };

        let (data_loss, dscores) = softmax_loss(&scores, labels)?;
        let (dhidden, dw2, db2) = affine_backward(&dscores, scores_cache)?;
        let dhidden = dhidden.into_dimensionality::<Ix2>()?;
        let (_, dw1, db1) = affine_relu_backward(&dhidden, hidden_cache)?;

        let mut grads = Params::new();
        grads.insert("W1".to_string(), dw1.into_dyn());
        grads.insert("b1".to_string(), db1.into_dyn());
        grads.insert("W2".to_string(), dw2.into_dyn());
        grads.insert("b2".to_string(), db2.into_dyn());

        let reg_loss = l2_penalty(&self.params, &mut grads, self.reg, 2)?;
        trace!(data_loss = ?data_loss, reg_loss = ?reg_loss, "two-layer loss");
        Ok(LossOutput::Train {
            loss: data_loss + reg_loss,
            grads,
        })
    }
}
