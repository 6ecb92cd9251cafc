//! Softmax loss of a linear classifier `scores = X · W`
//!
//! The regularization term here is `reg * ΣW²` with gradient `2 * reg * W`.

use crate::error::{ensure_shape, LayerKind, Result};
use crate::loss::{check_labels, softmax_loss};
use crate::utils::{cast, cast_count, Scalar};
use ndarray::{Array2, ArrayView2};

/// Softmax loss and weight gradient computed one sample at a time.
///
/// # Arguments
///
/// * `w` - Weights of shape `(D, C)`
/// * `x` - Minibatch of shape `(N, D)`
/// * `labels` - Class of each sample, in `0..C`
/// * `reg` - Regularization strength
pub fn linear_softmax_loss_naive<A: Scalar>(
    w: ArrayView2<'_, A>,
    x: ArrayView2<'_, A>,
    labels: &[usize],
    reg: A,
) -> Result<(A, Array2<A>)> {
    let (n, d) = x.dim();
    let classes = w.ncols();
    ensure_shape(LayerKind::Loss, &[d, classes], w.shape())?;
    check_labels(n, classes, labels)?;

    let mut loss = A::zero();
    let mut dw = Array2::zeros(w.raw_dim());
    for (row, &y) in x.outer_iter().zip(labels) {
        let scores = row.dot(&w);
        let max = scores.fold(A::neg_infinity(), |m, &v| m.max(v));
        let exp = scores.mapv(|s| (s - max).exp());
        let total = exp.sum();
        loss = loss - (exp[y] / total).ln();

        for j in 0..classes {
            let p = exp[j] / total;
            let coeff = if j == y { p - A::one() } else { p };
            dw.column_mut(j).scaled_add(coeff, &row);
        }
    }

    let count = cast_count::<A>(n);
    let two = cast::<A>(2.0);
    loss = loss / count + reg * w.fold(A::zero(), |acc, &v| acc + v * v);
    dw.mapv_inplace(|v| v / count);
    dw.scaled_add(two * reg, &w);
    Ok((loss, dw))
}

/// Softmax loss and weight gradient without explicit loops; same result as
/// `linear_softmax_loss_naive`.
pub fn linear_softmax_loss_vectorized<A: Scalar>(
    w: ArrayView2<'_, A>,
    x: ArrayView2<'_, A>,
    labels: &[usize],
    reg: A,
) -> Result<(A, Array2<A>)> {
    ensure_shape(LayerKind::Loss, &[x.ncols(), w.ncols()], w.shape())?;
    let scores = x.dot(&w);
    let (data_loss, dscores) = softmax_loss(&scores, labels)?;

    let loss = data_loss + reg * w.fold(A::zero(), |acc, &v| acc + v * v);
    let mut dw = x.t().dot(&dscores);
    dw.scaled_add(cast::<A>(2.0) * reg, &w);
    Ok((loss, dw))
}
