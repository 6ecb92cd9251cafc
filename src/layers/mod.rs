//! Layer abstractions for neural networks
//!
//! Every primitive layer exposes a forward function returning `(output, cache)` and a
//! backward function consuming the upstream gradient together with that cache. Layers
//! stacked by the fully connected network additionally implement the `Layer` trait.

mod r#trait;
pub mod affine;
pub mod batchnorm;
pub mod composite;
pub mod config;
pub mod conv2d;
pub mod dropout;
pub mod groupnorm;
pub mod layernorm;
pub mod pooling;
pub mod relu;

// Re-export the Layer trait and its cache/gradient types for convenience
pub use r#trait::{Layer, LayerCache, LayerGrads};

pub use config::{
    BatchNormParam, ConvParam, DropoutParam, GroupNormParam, LayerNormParam, Mode, PoolParam,
};

pub use affine::{affine_backward, affine_forward, AffineCache, AffineLayer};
pub use batchnorm::{
    batchnorm_backward, batchnorm_backward_alt, batchnorm_forward, spatial_batchnorm_backward,
    spatial_batchnorm_forward, BatchNormCache, BatchNormLayer, SpatialBatchNormCache,
};
pub use composite::{
    affine_norm_relu_dropout_backward, affine_norm_relu_dropout_forward, affine_relu_backward,
    affine_relu_forward, AffineNormReluDropoutCache, AffineNormReluDropoutGrads,
    AffineReluCache, NormStage,
};
pub use conv2d::{
    conv_backward_im2col, conv_backward_naive, conv_forward_im2col, conv_forward_naive,
    ConvCache, Im2colCache,
};
pub use dropout::{dropout_backward, dropout_forward, DropoutCache, DropoutLayer};
pub use groupnorm::{
    groupnorm_backward, groupnorm_forward, spatial_groupnorm_backward, spatial_groupnorm_forward,
    GroupNormCache, SpatialGroupNormCache,
};
pub use layernorm::{layernorm_backward, layernorm_forward, LayerNormCache, LayerNormLayer};
pub use pooling::{max_pool_backward_naive, max_pool_forward_naive, PoolCache};
pub use relu::{relu_backward, relu_forward, ReluCache, ReluLayer};
