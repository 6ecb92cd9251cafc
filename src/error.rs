//! Error type for layer, loss and model operations.

use std::fmt;
use thiserror::Error;

/// Layer families, used to tag errors with where they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Affine,
    Relu,
    Dropout,
    BatchNorm,
    LayerNorm,
    GroupNorm,
    Conv2d,
    MaxPool2d,
    Loss,
    Model,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::Affine => write!(f, "Affine"),
            LayerKind::Relu => write!(f, "ReLU"),
            LayerKind::Dropout => write!(f, "Dropout"),
            LayerKind::BatchNorm => write!(f, "BatchNorm"),
            LayerKind::LayerNorm => write!(f, "LayerNorm"),
            LayerKind::GroupNorm => write!(f, "GroupNorm"),
            LayerKind::Conv2d => write!(f, "Conv2d"),
            LayerKind::MaxPool2d => write!(f, "MaxPool2d"),
            LayerKind::Loss => write!(f, "Loss"),
            LayerKind::Model => write!(f, "Model"),
        }
    }
}

#[derive(Debug, Error)]
pub enum NetError {
    #[error("Shape mismatch in {layer}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        layer: LayerKind,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Invalid geometry in {layer}: {msg}")]
    InvalidGeometry { layer: LayerKind, msg: String },

    #[error("Group count {groups} does not divide {channels} channels")]
    InvalidGroups { groups: usize, channels: usize },

    #[error("Invalid mode '{0}', expected 'train' or 'test'")]
    InvalidMode(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing parameter '{0}'")]
    MissingParameter(String),

    #[error("{layer} layer received a {got} cache")]
    CacheMismatch { layer: LayerKind, got: LayerKind },

    #[error("Label {label} out of range for {num_classes} classes")]
    InvalidLabel { label: usize, num_classes: usize },

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NetError>;

/// Fails with `ShapeMismatch` unless `got == expected`.
pub(crate) fn ensure_shape(layer: LayerKind, expected: &[usize], got: &[usize]) -> Result<()> {
    if expected != got {
        return Err(NetError::ShapeMismatch {
            layer,
            expected: expected.to_vec(),
            got: got.to_vec(),
        });
    }
    Ok(())
}
