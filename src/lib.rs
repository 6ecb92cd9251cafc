//! Hand-differentiated neural network layers
//!
//! This library provides forward and backward passes for the usual building blocks of
//! a classifier network, each with a closed-form gradient rather than automatic
//! differentiation, plus the network models that route caches and gradients through them.
//!
//! # Modules
//!
//! - `layers`: Primitive layers (affine, ReLU, dropout, normalizations, conv, pooling),
//!   composite layers and the polymorphic `Layer` trait
//! - `loss`: Softmax and multiclass SVM losses
//! - `classifiers`: `TwoLayerNet`, `FullyConnectedNet` and the linear softmax classifier
//! - `config`: Model configuration and JSON loading
//! - `utils`: Scalar trait, RNG helpers, tensor helpers and gradient checking
//! - `error`: Error type shared by every operation

pub mod classifiers;
pub mod config;
pub mod error;
pub mod layers;
pub mod loss;
pub mod utils;

pub use classifiers::{FullyConnectedNet, LossOutput, Model, TwoLayerNet};
pub use error::{NetError, Result};
pub use layers::Mode;
pub use utils::Scalar;

use ndarray::ArrayD;
use std::collections::BTreeMap;

/// Parameter mapping owned by a model: `W{i}`, `b{i}`, `gamma{i}`, `beta{i}` to tensors.
pub type Params<A> = BTreeMap<String, ArrayD<A>>;
