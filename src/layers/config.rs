//! Per-layer configuration records
//!
//! Each layer family gets its own record carrying only the hyperparameters it needs,
//! validated once at construction. Batch normalization additionally owns its running
//! statistics, which only a training-mode forward pass may update.

use crate::error::{LayerKind, NetError, Result};
use crate::utils::{cast, Scalar};
use ndarray::Array1;
use std::fmt;
use std::str::FromStr;

/// Train/test switch for layers whose behaviour depends on it (batch norm, dropout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Train,
    Test,
}

impl FromStr for Mode {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Mode::Train),
            "test" => Ok(Mode::Test),
            other => Err(NetError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Train => write!(f, "train"),
            Mode::Test => write!(f, "test"),
        }
    }
}

fn ensure_eps<A: Scalar>(eps: A) -> Result<()> {
    if !(eps > A::zero()) {
        return Err(NetError::InvalidConfig(format!(
            "eps must be positive, got {}",
            eps
        )));
    }
    Ok(())
}

/// Batch normalization hyperparameters and running statistics.
///
/// # Fields
///
/// * `eps` - Added to the variance before the square root
/// * `momentum` - Decay of the running averages:
///   `running = momentum * running + (1 - momentum) * batch_stat`
/// * `running_mean` / `running_var` - Per-feature statistics used in test mode
#[derive(Debug, Clone)]
pub struct BatchNormParam<A> {
    eps: A,
    momentum: A,
    running_mean: Array1<A>,
    running_var: Array1<A>,
}

impl<A: Scalar> BatchNormParam<A> {
    /// Creates the record with zero-initialised running statistics.
    ///
    /// # Examples
    ///
    /// ```
    /// use backprop_layers::layers::BatchNormParam;
    /// let param = BatchNormParam::<f64>::new(4, 1e-5, 0.9).unwrap();
    /// assert_eq!(param.num_features(), 4);
    /// assert!(BatchNormParam::<f64>::new(4, 0.0, 0.9).is_err());
    /// ```
    pub fn new(num_features: usize, eps: A, momentum: A) -> Result<Self> {
        ensure_eps(eps)?;
        if !(momentum >= A::zero() && momentum <= A::one()) {
            return Err(NetError::InvalidConfig(format!(
                "momentum must be in range [0.0, 1.0], got {}",
                momentum
            )));
        }
        Ok(Self {
            eps,
            momentum,
            running_mean: Array1::zeros(num_features),
            running_var: Array1::zeros(num_features),
        })
    }

    /// `eps = 1e-5`, `momentum = 0.9`.
    pub fn with_defaults(num_features: usize) -> Self {
        Self {
            eps: cast(1e-5),
            momentum: cast(0.9),
            running_mean: Array1::zeros(num_features),
            running_var: Array1::zeros(num_features),
        }
    }

    pub fn num_features(&self) -> usize {
        self.running_mean.len()
    }

    pub fn eps(&self) -> A {
        self.eps
    }

    pub fn momentum(&self) -> A {
        self.momentum
    }

    pub fn running_mean(&self) -> &Array1<A> {
        &self.running_mean
    }

    pub fn running_var(&self) -> &Array1<A> {
        &self.running_var
    }

    /// Folds one batch's statistics into the running averages.
    pub(crate) fn update_running(&mut self, mean: &Array1<A>, var: &Array1<A>) {
        let keep = self.momentum;
        let take = A::one() - keep;
        self.running_mean
            .zip_mut_with(mean, |running, &batch| *running = keep * *running + take * batch);
        self.running_var
            .zip_mut_with(var, |running, &batch| *running = keep * *running + take * batch);
    }
}

/// Layer normalization hyperparameters. Layer norm keeps no running statistics.
#[derive(Debug, Clone, Copy)]
pub struct LayerNormParam<A> {
    eps: A,
}

impl<A: Scalar> LayerNormParam<A> {
    pub fn new(eps: A) -> Result<Self> {
        ensure_eps(eps)?;
        Ok(Self { eps })
    }

    pub fn eps(&self) -> A {
        self.eps
    }
}

impl<A: Scalar> Default for LayerNormParam<A> {
    fn default() -> Self {
        Self { eps: cast(1e-5) }
    }
}

/// Group normalization hyperparameters: number of contiguous feature groups and `eps`.
#[derive(Debug, Clone, Copy)]
pub struct GroupNormParam<A> {
    groups: usize,
    eps: A,
}

impl<A: Scalar> GroupNormParam<A> {
    pub fn new(groups: usize, eps: A) -> Result<Self> {
        if groups == 0 {
            return Err(NetError::InvalidConfig(
                "group count must be greater than 0".to_string(),
            ));
        }
        ensure_eps(eps)?;
        Ok(Self { groups, eps })
    }

    pub fn groups(&self) -> usize {
        self.groups
    }

    pub fn eps(&self) -> A {
        self.eps
    }

    /// Size of each group, failing when `groups` does not divide `channels`.
    pub(crate) fn group_size(&self, channels: usize) -> Result<usize> {
        if channels % self.groups != 0 {
            return Err(NetError::InvalidGroups {
                groups: self.groups,
                channels,
            });
        }
        Ok(channels / self.groups)
    }
}

/// Inverted dropout configuration.
///
/// `keep_prob` is the probability of *keeping* a unit (1.0 disables dropout). A seed
/// makes every forward call draw the same mask, which gradient checking relies on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropoutParam {
    keep_prob: f64,
    seed: Option<u64>,
}

impl DropoutParam {
    pub fn new(keep_prob: f64, seed: Option<u64>) -> Result<Self> {
        if !(keep_prob > 0.0 && keep_prob <= 1.0) {
            return Err(NetError::InvalidConfig(format!(
                "dropout keep probability must be in range (0.0, 1.0], got {}",
                keep_prob
            )));
        }
        Ok(Self { keep_prob, seed })
    }

    pub fn keep_prob(&self) -> f64 {
        self.keep_prob
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

/// Number of window positions along one axis, rejecting non-integral layouts.
fn window_count(
    layer: LayerKind,
    extent: usize,
    window: usize,
    stride: usize,
    axis: &str,
) -> Result<usize> {
    if window == 0 || window > extent {
        return Err(NetError::InvalidGeometry {
            layer,
            msg: format!("window {} does not fit {} extent {}", window, axis, extent),
        });
    }
    let span = extent - window;
    if span % stride != 0 {
        return Err(NetError::InvalidGeometry {
            layer,
            msg: format!(
                "{} extent {} with window {} is not divisible by stride {}",
                axis, extent, window, stride
            ),
        });
    }
    Ok(1 + span / stride)
}

/// Convolution stride and symmetric zero padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvParam {
    stride: usize,
    pad: usize,
}

impl ConvParam {
    pub fn new(stride: usize, pad: usize) -> Result<Self> {
        if stride == 0 {
            return Err(NetError::InvalidConfig(
                "stride must be greater than 0".to_string(),
            ));
        }
        Ok(Self { stride, pad })
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn pad(&self) -> usize {
        self.pad
    }

    /// Output `(H', W')` = `1 + (H + 2*pad - kh) / stride`, per axis.
    ///
    /// # Examples
    ///
    /// ```
    /// use backprop_layers::layers::ConvParam;
    /// let param = ConvParam::new(1, 1).unwrap();
    /// assert_eq!(param.output_dims((5, 5), (3, 3)).unwrap(), (5, 5));
    /// assert!(ConvParam::new(2, 0).unwrap().output_dims((6, 6), (3, 3)).is_err());
    /// ```
    pub fn output_dims(&self, input: (usize, usize), kernel: (usize, usize)) -> Result<(usize, usize)> {
        let height = window_count(
            LayerKind::Conv2d,
            input.0 + 2 * self.pad,
            kernel.0,
            self.stride,
            "height",
        )?;
        let width = window_count(
            LayerKind::Conv2d,
            input.1 + 2 * self.pad,
            kernel.1,
            self.stride,
            "width",
        )?;
        Ok((height, width))
    }
}

/// Max pooling window and stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolParam {
    pool_height: usize,
    pool_width: usize,
    stride: usize,
}

impl PoolParam {
    pub fn new(pool_height: usize, pool_width: usize, stride: usize) -> Result<Self> {
        if pool_height == 0 || pool_width == 0 {
            return Err(NetError::InvalidConfig(
                "pooling window must be non-empty".to_string(),
            ));
        }
        if stride == 0 {
            return Err(NetError::InvalidConfig(
                "stride must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            pool_height,
            pool_width,
            stride,
        })
    }

    pub fn pool_height(&self) -> usize {
        self.pool_height
    }

    pub fn pool_width(&self) -> usize {
        self.pool_width
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Output `(H', W')` = `1 + (H - pool) / stride`, per axis.
    pub fn output_dims(&self, input: (usize, usize)) -> Result<(usize, usize)> {
        let height = window_count(
            LayerKind::MaxPool2d,
            input.0,
            self.pool_height,
            self.stride,
            "height",
        )?;
        let width = window_count(
            LayerKind::MaxPool2d,
            input.1,
            self.pool_width,
            self.stride,
            "width",
        )?;
        Ok((height, width))
    }
}
