//! Fully connected network of arbitrary depth
//!
//! Each hidden layer is `affine - [batch/layer norm] - relu - [dropout]`, followed by a
//! final affine layer producing class scores and a softmax loss. The network keeps its
//! hidden blocks as a flat stack of `Layer` trait objects, so the forward pass is one
//! loop over the stack and the backward pass is the same loop in reverse.

use super::{l2_penalty, LossOutput, Model};
use crate::config::{NetConfig, Normalization};
use crate::error::{LayerKind, Result};
use crate::layers::{
    AffineLayer, BatchNormLayer, BatchNormParam, DropoutLayer, DropoutParam, Layer, LayerGrads,
    LayerNormLayer, LayerNormParam, Mode, ReluLayer,
};
use crate::loss::{check_labels, softmax_loss};
use crate::utils::{cast, randn, Scalar};
use crate::Params;
use ndarray::{Array1, ArrayD, Ix2};
use rand::Rng;
use tracing::{debug, trace};

/// Fully connected classifier built from a `NetConfig`.
///
/// Parameters are stored under `W{i}`/`b{i}` for `i = 1..=num_layers`, plus
/// `gamma{i}`/`beta{i}` for every hidden layer when normalization is enabled. The
/// gradient mapping returned by `loss` has exactly the same keys.
///
/// # Example
///
/// ```
/// use backprop_layers::config::{NetConfig, Normalization};
/// use backprop_layers::utils::seeded_rng;
/// use backprop_layers::{FullyConnectedNet, Model};
/// use ndarray::Array2;
///
/// let mut config = NetConfig::new(vec![16, 8]);
/// config.input_dim = 12;
/// config.normalization = Normalization::BatchNorm;
///
/// let mut rng = seeded_rng(Some(0));
/// let mut net = FullyConnectedNet::<f64>::new(&config, &mut rng).unwrap();
/// let x = Array2::<f64>::ones((4, 12)).into_dyn();
/// let (loss, grads) = net.loss(&x, Some(&[1, 2, 3, 4][..])).unwrap().into_train().unwrap();
/// assert!(loss > 0.0);
/// assert_eq!(grads.len(), net.params().len());
/// ```
pub struct FullyConnectedNet<A: Scalar> {
    params: Params<A>,
    layers: Vec<Box<dyn Layer<A>>>,
    num_layers: usize,
    num_classes: usize,
    normalization: Normalization,
    reg: A,
}

impl<A: Scalar> FullyConnectedNet<A> {
    /// Builds the network, drawing weights from `N(0, weight_scale²)`. Biases and betas
    /// start at zero, gammas at one.
    pub fn new<R: Rng>(config: &NetConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;

        let mut dims = Vec::with_capacity(config.hidden_dims.len() + 2);
        dims.push(config.input_dim);
        dims.extend_from_slice(&config.hidden_dims);
        dims.push(config.num_classes);
        let num_layers = dims.len() - 1;

        let mut params = Params::new();
        let mut layers: Vec<Box<dyn Layer<A>>> = Vec::new();

        for i in 1..=num_layers {
            let (fan_in, fan_out) = (dims[i - 1], dims[i]);
            params.insert(
                format!("W{}", i),
                randn((fan_in, fan_out), config.weight_scale, rng).into_dyn(),
            );
            params.insert(format!("b{}", i), Array1::zeros(fan_out).into_dyn());
            layers.push(Box::new(AffineLayer::new(i)));

            if i == num_layers {
                break;
            }

            match config.normalization {
                Normalization::None => {}
                Normalization::BatchNorm => {
                    insert_scale_shift(&mut params, i, fan_out);
                    let param = BatchNormParam::with_defaults(fan_out);
                    layers.push(Box::new(BatchNormLayer::new(i, param)));
                }
                Normalization::LayerNorm => {
                    insert_scale_shift(&mut params, i, fan_out);
                    layers.push(Box::new(LayerNormLayer::new(i, LayerNormParam::default())));
                }
            }

            layers.push(Box::new(ReluLayer));

            if config.use_dropout() {
                let param = DropoutParam::new(config.dropout_keep_probability, config.seed)?;
                layers.push(Box::new(DropoutLayer::new(param)));
            }
        }

        debug!(
            num_layers,
            normalization = %config.normalization,
            dropout = config.use_dropout(),
            stack = layers.len(),
            "constructed fully connected network"
        );

        Ok(Self {
            params,
            layers,
            num_layers,
            num_classes: config.num_classes,
            normalization: config.normalization,
            reg: cast(config.reg),
        })
    }

    /// Number of affine layers, hidden layers plus the output layer.
    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    pub fn reg(&self) -> A {
        self.reg
    }

    /// Kinds of the stacked layers, in forward order.
    pub fn layer_kinds(&self) -> Vec<LayerKind> {
        self.layers.iter().map(|layer| layer.kind()).collect()
    }

    /// `(running_mean, running_var)` of every batch normalization layer, in forward order.
    pub fn running_stats(&self) -> Vec<(&Array1<A>, &Array1<A>)> {
        self.layers
            .iter()
            .filter_map(|layer| layer.running_stats())
            .collect()
    }
}

fn insert_scale_shift<A: Scalar>(params: &mut Params<A>, index: usize, features: usize) {
    params.insert(format!("gamma{}", index), Array1::ones(features).into_dyn());
    params.insert(format!("beta{}", index), Array1::zeros(features).into_dyn());
}

impl<A: Scalar> Model<A> for FullyConnectedNet<A> {
    fn params(&self) -> &Params<A> {
        &self.params
    }

    fn params_mut(&mut self) -> &mut Params<A> {
        &mut self.params
    }

    fn loss(&mut self, x: &ArrayD<A>, labels: Option<&[usize]>) -> Result<LossOutput<A>> {
        // Labels are checked before any batchnorm layer updates its running statistics.
        let mode = match labels {
            Some(labels) => {
                check_labels(x.shape().first().copied().unwrap_or(0), self.num_classes, labels)?;
                Mode::Train
            }
            None => Mode::Test,
        };

        let mut out = x.clone();
        let mut caches = Vec::with_capacity(self.layers.len());
        for layer in self.layers.iter_mut() {
            let (next, cache) = layer.forward(&out, &self.params, mode)?;
            caches.push(cache);
            out = next;
        }
        let scores = out.into_dimensionality::<Ix2>()?;

        let labels = match labels {
            Some(labels) => labels,
            None => return Ok(LossOutput::Scores(scores)),
        };

        let (data_loss, dscores) = softmax_loss(&scores, labels)?;

        let mut grads = Params::new();
        let mut dout = dscores.into_dyn();
        for (layer, cache) in self.layers.iter().zip(caches).rev() {
            let LayerGrads { dx, params } = layer.backward(&dout, cache)?;
            grads.extend(params);
            dout = dx;
        }

        let reg_loss = l2_penalty(&self.params, &mut grads, self.reg, self.num_layers)?;
        trace!(data_loss = ?data_loss, reg_loss = ?reg_loss, "fully connected loss");
        Ok(LossOutput::Train {
            loss: data_loss + reg_loss,
            grads,
        })
    }
}
