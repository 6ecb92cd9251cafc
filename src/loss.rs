//! Classification losses over a batch of class scores
//!
//! Both losses take scores of shape `(N, C)` and one label per row, and return the mean
//! loss over the batch together with its gradient with respect to the scores.

use crate::error::{ensure_shape, LayerKind, NetError, Result};
use crate::utils::{cast_count, Scalar};
use ndarray::{Array2, Axis};

/// Checks that there is one label per sample and each lies in `0..num_classes`.
pub(crate) fn check_labels(batch: usize, num_classes: usize, labels: &[usize]) -> Result<()> {
    if batch == 0 {
        return Err(NetError::InvalidGeometry {
            layer: LayerKind::Loss,
            msg: "empty batch".to_string(),
        });
    }
    ensure_shape(LayerKind::Loss, &[batch], &[labels.len()])?;
    if let Some(&label) = labels.iter().find(|&&label| label >= num_classes) {
        return Err(NetError::InvalidLabel {
            label,
            num_classes,
        });
    }
    Ok(())
}

/// Softmax cross-entropy loss.
///
/// Scores are shifted by their row maximum before exponentiating, so large logits do
/// not overflow.
///
/// # Arguments
///
/// * `scores` - Class scores of shape `(N, C)`
/// * `labels` - True class of each row, each in `0..C`
///
/// # Returns
///
/// `(loss, dscores)`: mean negative log-probability of the true classes and its gradient.
///
/// # Examples
///
/// ```
/// use backprop_layers::loss::softmax_loss;
/// use ndarray::Array2;
///
/// let scores = Array2::<f64>::zeros((2, 4));
/// let (loss, _) = softmax_loss(&scores, &[0, 3]).unwrap();
/// assert!((loss - 4f64.ln()).abs() < 1e-12);
/// ```
pub fn softmax_loss<A: Scalar>(scores: &Array2<A>, labels: &[usize]) -> Result<(A, Array2<A>)> {
    check_labels(scores.nrows(), scores.ncols(), labels)?;
    let n = cast_count::<A>(scores.nrows());

    let row_max = scores.fold_axis(Axis(1), A::neg_infinity(), |&m, &v| m.max(v));
    let shifted = scores - &row_max.insert_axis(Axis(1));
    let log_sum = shifted
        .mapv(|v| v.exp())
        .sum_axis(Axis(1))
        .mapv(|v| v.ln())
        .insert_axis(Axis(1));
    let log_probs = shifted - &log_sum;

    let loss = labels
        .iter()
        .enumerate()
        .fold(A::zero(), |acc, (i, &y)| acc - log_probs[[i, y]])
        / n;

    let mut dscores = log_probs.mapv(|v| v.exp());
    for (i, &y) in labels.iter().enumerate() {
        dscores[[i, y]] -= A::one();
    }
    dscores.mapv_inplace(|v| v / n);
    Ok((loss, dscores))
}

/// Multiclass SVM (hinge) loss with margin 1.
///
/// # Returns
///
/// `(loss, dscores)`: mean over rows of `Σ_{j≠y} max(0, s_j - s_y + 1)` and its gradient.
pub fn svm_loss<A: Scalar>(scores: &Array2<A>, labels: &[usize]) -> Result<(A, Array2<A>)> {
    check_labels(scores.nrows(), scores.ncols(), labels)?;
    let n = cast_count::<A>(scores.nrows());

    let mut margins = Array2::zeros(scores.raw_dim());
    for ((i, row), &y) in scores.outer_iter().enumerate().zip(labels) {
        let correct = row[y];
        for (j, &s) in row.iter().enumerate() {
            if j != y {
                margins[[i, j]] = (s - correct + A::one()).max(A::zero());
            }
        }
    }
    let loss = margins.sum() / n;

    let mut dscores = margins.mapv(|m| if m > A::zero() { A::one() } else { A::zero() });
    for (mut row, &y) in dscores.outer_iter_mut().zip(labels) {
        let violations = row.sum();
        row[y] = -violations;
    }
    dscores.mapv_inplace(|v| v / n);
    Ok((loss, dscores))
}
