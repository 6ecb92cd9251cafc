//! Affine (fully connected) layer
//!
//! Performs `out = x_flat · W + b`, where every trailing axis of the input is first
//! collapsed into a single feature axis.

use super::r#trait::{Layer, LayerCache, LayerGrads};
use super::config::Mode;
use crate::error::{ensure_shape, LayerKind, Result};
use crate::utils::tensor::{flatten_rows, param_view, reshape};
use crate::utils::Scalar;
use crate::Params;
use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis, Ix1, Ix2};

/// Intermediates kept for `affine_backward`: the unflattened input, `W` and `b`.
#[derive(Debug, Clone)]
pub struct AffineCache<A> {
    x: ArrayD<A>,
    w: Array2<A>,
    b: Array1<A>,
}

/// Forward pass for an affine layer.
///
/// # Arguments
///
/// * `x` - Input of shape `(N, d_1, ..., d_k)`
/// * `w` - Weights of shape `(D, M)` with `D = d_1 * ... * d_k`
/// * `b` - Biases of shape `(M,)`
///
/// # Returns
///
/// Output of shape `(N, M)` and the cache for the backward pass.
pub fn affine_forward<A: Scalar>(
    x: &ArrayD<A>,
    w: ArrayView2<'_, A>,
    b: ArrayView1<'_, A>,
) -> Result<(Array2<A>, AffineCache<A>)> {
    let x_flat = flatten_rows(x)?;
    ensure_shape(LayerKind::Affine, &[x_flat.ncols(), b.len()], w.shape())?;

    let out = x_flat.dot(&w) + &b;
    let cache = AffineCache {
        x: x.clone(),
        w: w.to_owned(),
        b: b.to_owned(),
    };
    Ok((out, cache))
}

/// Backward pass for an affine layer.
///
/// Returns `(dx, dw, db)` where `dx` has the original input shape, `dw = x_flatᵀ · dout`
/// and `db` is the column sum of `dout`.
pub fn affine_backward<A: Scalar>(
    dout: &Array2<A>,
    cache: AffineCache<A>,
) -> Result<(ArrayD<A>, Array2<A>, Array1<A>)> {
    let AffineCache { x, w, b } = cache;
    let x_flat = flatten_rows(&x)?;
    ensure_shape(LayerKind::Affine, &[x_flat.nrows(), b.len()], dout.shape())?;

    let dx = reshape(&dout.dot(&w.t()), x.raw_dim())?;
    let dw = x_flat.t().dot(dout);
    let db = dout.sum_axis(Axis(0));
    Ok((dx, dw, db))
}

/// Affine layer reading `W{index}` and `b{index}` from the parameter mapping.
#[derive(Debug, Clone)]
pub struct AffineLayer {
    weight_key: String,
    bias_key: String,
}

impl AffineLayer {
    pub fn new(index: usize) -> Self {
        Self {
            weight_key: format!("W{}", index),
            bias_key: format!("b{}", index),
        }
    }
}

impl<A: Scalar> Layer<A> for AffineLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Affine
    }

    fn forward(
        &mut self,
        input: &ArrayD<A>,
        params: &Params<A>,
        _mode: Mode,
    ) -> Result<(ArrayD<A>, LayerCache<A>)> {
        let w = param_view::<A, Ix2>(params, &self.weight_key)?;
        let b = param_view::<A, Ix1>(params, &self.bias_key)?;
        let (out, cache) = affine_forward(input, w, b)?;
        Ok((out.into_dyn(), LayerCache::Affine(cache)))
    }

    fn backward(&self, grad_output: &ArrayD<A>, cache: LayerCache<A>) -> Result<LayerGrads<A>> {
        let cache = match cache {
            LayerCache::Affine(cache) => cache,
            other => return Err(other.mismatch(LayerKind::Affine)),
        };
        let dout = grad_output.view().into_dimensionality::<Ix2>()?.to_owned();
        let (dx, dw, db) = affine_backward(&dout, cache)?;
        Ok(LayerGrads {
            dx,
            params: vec![
                (self.weight_key.clone(), dw.into_dyn()),
                (self.bias_key.clone(), db.into_dyn()),
            ],
        })
    }

    fn param_keys(&self) -> Vec<String> {
        vec![self.weight_key.clone(), self.bias_key.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetError;
    use ndarray::{array, Array, Array3};

    #[test]
    fn test_affine_forward_known_values() {
        // Two samples of shape (2, 2), flattened to 4 features.
        let x = Array::from_shape_vec((2, 2, 2), (0..8).map(|v| v as f64).collect())
            .unwrap()
            .into_dyn();
        let w = Array2::from_shape_vec((4, 3), (0..12).map(|v| v as f64 * 0.1).collect()).unwrap();
        let b = array![1.0, -1.0, 0.5];

        let (out, _) = affine_forward(&x, w.view(), b.view()).unwrap();

        // Row 0: [0,1,2,3] · W + b
        let expected0 = [
            0.0 * 0.0 + 1.0 * 0.3 + 2.0 * 0.6 + 3.0 * 0.9 + 1.0,
            0.0 * 0.1 + 1.0 * 0.4 + 2.0 * 0.7 + 3.0 * 1.0 - 1.0,
            0.0 * 0.2 + 1.0 * 0.5 + 2.0 * 0.8 + 3.0 * 1.1 + 0.5,
        ];
        for (j, &e) in expected0.iter().enumerate() {
            assert!((out[[0, j]] - e).abs() < 1e-12);
        }
        assert_eq!(out.dim(), (2, 3));
    }

    #[test]
    fn test_affine_backward_shapes() {
        let x = Array3::<f64>::ones((5, 2, 3)).into_dyn();
        let w = Array2::<f64>::ones((6, 4));
        let b = Array1::<f64>::zeros(4);

        let (out, cache) = affine_forward(&x, w.view(), b.view()).unwrap();
        let dout = Array2::<f64>::ones(out.raw_dim());
        let (dx, dw, db) = affine_backward(&dout, cache).unwrap();

        assert_eq!(dx.shape(), &[5, 2, 3]);
        assert_eq!(dw.dim(), (6, 4));
        assert_eq!(db, Array1::from_elem(4, 5.0));
    }

    #[test]
    fn test_affine_forward_shape_mismatch() {
        let x = Array2::<f64>::ones((2, 3)).into_dyn();
        let w = Array2::<f64>::ones((4, 2));
        let b = Array1::<f64>::zeros(2);

        assert!(matches!(
            affine_forward(&x, w.view(), b.view()),
            Err(NetError::ShapeMismatch { layer: LayerKind::Affine, .. })
        ));

        let w = Array2::<f64>::ones((3, 2));
        let b = Array1::<f64>::zeros(5);
        assert!(affine_forward(&x, w.view(), b.view()).is_err());
    }

    #[test]
    fn test_affine_layer_rejects_foreign_cache() {
        let layer = AffineLayer::new(1);
        let cache = LayerCache::Relu(crate::layers::relu::relu_forward(&Array2::<f64>::zeros((1, 1)).into_dyn()).1);
        let grad = Array2::<f64>::zeros((1, 1)).into_dyn();

        assert!(matches!(
            Layer::<f64>::backward(&layer, &grad, cache),
            Err(NetError::CacheMismatch { layer: LayerKind::Affine, got: LayerKind::Relu })
        ));
    }
}
