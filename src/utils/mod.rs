//! Shared utilities for the layer library
//!
//! This module provides the scalar bound every layer is generic over, seeded random
//! sampling, small tensor helpers and the numerical gradient checks used to validate
//! each hand-derived backward pass.

pub mod gradient_check;
pub mod rng;
pub mod tensor;

use ndarray::NdFloat;
use num_traits::FromPrimitive;

/// Floating point element type accepted by every layer (`f32` or `f64`).
///
/// Use `f64` when gradient checking; `f32` halves memory and is accurate enough
/// for training.
pub trait Scalar: NdFloat + FromPrimitive {}

impl<T: NdFloat + FromPrimitive> Scalar for T {}

/// Converts an `f64` constant into the layer's scalar type.
pub fn cast<A: Scalar>(value: f64) -> A {
    A::from_f64(value).unwrap_or_else(A::nan)
}

/// Converts a count (batch size, group size) into the layer's scalar type.
pub fn cast_count<A: Scalar>(count: usize) -> A {
    A::from_usize(count).unwrap_or_else(A::nan)
}

pub use gradient_check::{
    eval_numerical_gradient, eval_numerical_gradient_array, model_numerical_gradient, rel_error,
};
pub use rng::{randn, seeded_rng};
