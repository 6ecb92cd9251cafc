//! Numerical gradient checking using centered finite differences.
//!
//! Every analytic backward pass in this crate is validated against these estimates:
//! perturb one element by `±h`, re-run the forward computation and compare the slope
//! with the analytic gradient through `rel_error`.

use super::{cast, Scalar};
use crate::classifiers::Model;
use crate::error::{NetError, Result};
use ndarray::{Array, ArrayD, Dimension, Zip};

fn set_nth<A, D: Dimension>(x: &mut Array<A, D>, index: usize, value: A) {
    if let Some(slot) = x.iter_mut().nth(index) {
        *slot = value;
    }
}

/// Gradient of a scalar-valued `f` at `x`.
pub fn eval_numerical_gradient<A, D, F>(mut f: F, x: &Array<A, D>, h: A) -> Result<Array<A, D>>
where
    A: Scalar,
    D: Dimension,
    F: FnMut(&Array<A, D>) -> Result<A>,
{
    let values: Vec<A> = x.iter().cloned().collect();
    let mut shifted = x.to_owned();
    let mut grad = Vec::with_capacity(values.len());

    for (i, &old) in values.iter().enumerate() {
        set_nth(&mut shifted, i, old + h);
        let plus = f(&shifted)?;
        set_nth(&mut shifted, i, old - h);
        let minus = f(&shifted)?;
        set_nth(&mut shifted, i, old);

        grad.push((plus - minus) / (h + h));
    }

    Ok(Array::from_shape_vec(x.raw_dim(), grad)?)
}

/// Gradient of `sum(f(x) * dout)` at `x`, for array-valued `f`.
///
/// This is the numerical counterpart of a layer's backward pass given upstream
/// gradient `dout`.
pub fn eval_numerical_gradient_array<A, D, E, F>(
    mut f: F,
    x: &Array<A, D>,
    dout: &Array<A, E>,
    h: A,
) -> Result<Array<A, D>>
where
    A: Scalar,
    D: Dimension,
    E: Dimension,
    F: FnMut(&Array<A, D>) -> Result<Array<A, E>>,
{
    eval_numerical_gradient(
        |shifted| {
            let out = f(shifted)?;
            if out.shape() != dout.shape() {
                return Err(NetError::ShapeMismatch {
                    layer: crate::error::LayerKind::Model,
                    expected: dout.shape().to_vec(),
                    got: out.shape().to_vec(),
                });
            }
            Ok(Zip::from(&out)
                .and(dout)
                .fold(A::zero(), |acc, &o, &g| acc + o * g))
        },
        x,
        h,
    )
}

/// Numerical gradient of a model's training loss with respect to one parameter.
///
/// Perturbs `model.params_mut()[key]` one element at a time, restoring each element
/// before moving to the next. The parameter is left unchanged on error.
pub fn model_numerical_gradient<A, M>(
    model: &mut M,
    x: &ArrayD<A>,
    labels: &[usize],
    key: &str,
    h: A,
) -> Result<ArrayD<A>>
where
    A: Scalar,
    M: Model<A> + ?Sized,
{
    let original = model
        .params()
        .get(key)
        .cloned()
        .ok_or_else(|| NetError::MissingParameter(key.to_string()))?;

    let values: Vec<A> = original.iter().cloned().collect();
    let mut grad = Vec::with_capacity(values.len());
    for (i, &old) in values.iter().enumerate() {
        let plus = perturbed_loss(model, x, labels, key, i, old + h);
        let minus = perturbed_loss(model, x, labels, key, i, old - h);
        if let Some(param) = model.params_mut().get_mut(key) {
            set_nth(param, i, old);
        }
        match (plus, minus) {
            (Ok(plus), Ok(minus)) => grad.push((plus - minus) / (h + h)),
            (Err(e), _) | (_, Err(e)) => {
                model.params_mut().insert(key.to_string(), original);
                return Err(e);
            }
        }
    }

    Ok(Array::from_shape_vec(original.raw_dim(), grad)?)
}

/// Training loss with element `index` of `params[key]` set to `value`.
fn perturbed_loss<A, M>(
    model: &mut M,
    x: &ArrayD<A>,
    labels: &[usize],
    key: &str,
    index: usize,
    value: A,
) -> Result<A>
where
    A: Scalar,
    M: Model<A> + ?Sized,
{
    if let Some(param) = model.params_mut().get_mut(key) {
        set_nth(param, index, value);
    }
    model
        .loss(x, Some(labels))?
        .into_train()
        .map(|(loss, _)| loss)
        .ok_or_else(|| NetError::InvalidConfig("loss with labels returned scores".into()))
}

/// Maximum elementwise relative error `|x - y| / max(1e-8, |x| + |y|)`.
///
/// Returns infinity when the shapes differ.
pub fn rel_error<A, D>(x: &Array<A, D>, y: &Array<A, D>) -> A
where
    A: Scalar,
    D: Dimension,
{
    if x.shape() != y.shape() {
        return A::infinity();
    }
    let floor = cast::<A>(1e-8);
    Zip::from(x).and(y).fold(A::zero(), |worst, &a, &b| {
        let err = (a - b).abs() / floor.max(a.abs() + b.abs());
        worst.max(err)
    })
}
