//! Shape helpers shared by the layers.

use crate::error::{LayerKind, NetError, Result};
use crate::Params;
use ndarray::{Array, Array2, ArrayBase, ArrayView, Data, Dimension, IntoDimension};

/// Row-major reshape that works for any memory layout (transposed and permuted views included).
pub fn reshape<A, S, D, E>(x: &ArrayBase<S, D>, shape: E) -> Result<Array<A, E::Dim>>
where
    A: Clone,
    S: Data<Elem = A>,
    D: Dimension,
    E: IntoDimension,
{
    Ok(Array::from_shape_vec(
        shape.into_dimension(),
        x.iter().cloned().collect(),
    )?)
}

/// Collapses every axis after the first into one feature axis: `(N, d_1, ..., d_k) -> (N, D)`.
pub fn flatten_rows<A, S, D>(x: &ArrayBase<S, D>) -> Result<Array2<A>>
where
    A: Clone,
    S: Data<Elem = A>,
    D: Dimension,
{
    let shape = x.shape();
    if shape.is_empty() {
        return Err(NetError::ShapeMismatch {
            layer: LayerKind::Affine,
            expected: vec![0, 0],
            got: Vec::new(),
        });
    }
    let rows = shape[0];
    let features = shape[1..].iter().product();
    reshape(x, (rows, features))
}

/// Looks up `key` in a parameter mapping and views it with dimensionality `D`.
pub fn param_view<'a, A, D>(params: &'a Params<A>, key: &str) -> Result<ArrayView<'a, A, D>>
where
    D: Dimension,
{
    let value = params
        .get(key)
        .ok_or_else(|| NetError::MissingParameter(key.to_string()))?;
    Ok(value.view().into_dimensionality::<D>()?)
}
