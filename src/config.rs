//! Configuration structures for network models
//!
//! This module provides the configuration record of a fully connected network and the
//! JSON loader for it. Every field except `hidden_dims` has a default.

use crate::error::{NetError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Normalization applied after each hidden affine layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Normalization {
    #[default]
    None,
    BatchNorm,
    LayerNorm,
}

impl FromStr for Normalization {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Normalization::None),
            "batchnorm" => Ok(Normalization::BatchNorm),
            "layernorm" => Ok(Normalization::LayerNorm),
            other => Err(NetError::InvalidConfig(format!(
                "unknown normalization '{}'. Must be one of: none, batchnorm, layernorm",
                other
            ))),
        }
    }
}

impl TryFrom<String> for Normalization {
    type Error = NetError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Normalization> for String {
    fn from(value: Normalization) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Normalization::None => write!(f, "none"),
            Normalization::BatchNorm => write!(f, "batchnorm"),
            Normalization::LayerNorm => write!(f, "layernorm"),
        }
    }
}

fn default_input_dim() -> usize {
    3 * 32 * 32
}

fn default_num_classes() -> usize {
    10
}

fn default_weight_scale() -> f64 {
    1e-2
}

fn default_keep_probability() -> f64 {
    1.0
}

/// Configuration of a `FullyConnectedNet`.
///
/// Numeric precision is not part of the record: it is the scalar type the network is
/// instantiated with (`FullyConnectedNet::<f32>` or `FullyConnectedNet::<f64>`).
///
/// # Example
///
/// ```json
/// {
///   "input_dim": 784,
///   "hidden_dims": [100, 50],
///   "num_classes": 10,
///   "weight_scale": 0.05,
///   "reg": 0.001,
///   "normalization": "batchnorm",
///   "dropout_keep_probability": 0.75,
///   "seed": 231
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetConfig {
    /// Size of one flattened input sample
    #[serde(default = "default_input_dim")]
    pub input_dim: usize,

    /// Width of each hidden layer, in order; empty for a plain softmax classifier
    pub hidden_dims: Vec<usize>,

    #[serde(default = "default_num_classes")]
    pub num_classes: usize,

    /// Standard deviation of the Gaussian weight initialization
    #[serde(default = "default_weight_scale")]
    pub weight_scale: f64,

    /// L2 regularization strength
    #[serde(default)]
    pub reg: f64,

    #[serde(default)]
    pub normalization: Normalization,

    /// Probability of keeping a hidden unit; 1.0 disables dropout
    #[serde(default = "default_keep_probability")]
    pub dropout_keep_probability: f64,

    /// Seed for the dropout masks, making them identical across calls
    #[serde(default)]
    pub seed: Option<u64>,
}

impl NetConfig {
    /// Configuration with the given hidden layers and every other field at its default.
    pub fn new(hidden_dims: Vec<usize>) -> Self {
        Self {
            input_dim: default_input_dim(),
            hidden_dims,
            num_classes: default_num_classes(),
            weight_scale: default_weight_scale(),
            reg: 0.0,
            normalization: Normalization::None,
            dropout_keep_probability: default_keep_probability(),
            seed: None,
        }
    }

    /// Whether hidden layers end with dropout.
    pub fn use_dropout(&self) -> bool {
        self.dropout_keep_probability < 1.0
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: NetConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_dim == 0 {
            return Err(NetError::InvalidConfig(
                "input_dim must be greater than 0".to_string(),
            ));
        }
        if self.num_classes == 0 {
            return Err(NetError::InvalidConfig(
                "num_classes must be greater than 0".to_string(),
            ));
        }
        if let Some(pos) = self.hidden_dims.iter().position(|&d| d == 0) {
            return Err(NetError::InvalidConfig(format!(
                "hidden_dims[{}] must be greater than 0",
                pos
            )));
        }
        if !(self.weight_scale.is_finite() && self.weight_scale > 0.0) {
            return Err(NetError::InvalidConfig(
                "weight_scale must be positive".to_string(),
            ));
        }
        if !(self.reg.is_finite() && self.reg >= 0.0) {
            return Err(NetError::InvalidConfig(
                "reg must be non-negative".to_string(),
            ));
        }
        let p = self.dropout_keep_probability;
        if !(p > 0.0 && p <= 1.0) {
            return Err(NetError::InvalidConfig(format!(
                "dropout_keep_probability must be in (0, 1], got {}",
                p
            )));
        }
        Ok(())
    }
}

/// Loads a network configuration from a JSON file.
///
/// Reads the file at `path`, deserializes it into a `NetConfig` and validates it.
///
/// # Examples
///
/// ```no_run
/// use backprop_layers::config::load_config;
///
/// let cfg = load_config("config/fc_net_batchnorm.json").unwrap();
/// assert_eq!(cfg.hidden_dims.len(), 2);
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<NetConfig> {
    let path = path.as_ref();
    debug!(path = %path.display(), "loading network configuration");
    let contents = fs::read_to_string(path)?;
    NetConfig::from_json(&contents)
}
