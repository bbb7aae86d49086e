//! Arithmetic capability set shared by the eager and deferred execution models.
//!
//! Index formulas are written once against [`BandAlgebra`]. `Array2<f64>`
//! evaluates immediately in-process; [`ImageHandle`] only records graph nodes
//! for the compute service.

use ndarray::{Array2, Zip};

use crate::core::graph::ImageHandle;
use crate::types::BandArray;

/// Value substituted for a zero denominator on the eager path
pub const DIVISION_EPSILON: f64 = 1e-4;

/// How a band-algebra backend runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionModel {
    /// In-process array arithmetic, zero denominators replaced by `DIVISION_EPSILON`
    Eager,
    /// Graph building; division follows the service's IEEE-754 arithmetic
    Deferred,
}

pub trait BandAlgebra: Clone + Sized {
    const MODEL: ExecutionModel;

    fn add(&self, other: &Self) -> Self;
    fn subtract(&self, other: &Self) -> Self;
    fn multiply(&self, other: &Self) -> Self;
    fn divide(&self, other: &Self) -> Self;
    fn add_scalar(&self, value: f64) -> Self;
    fn multiply_scalar(&self, value: f64) -> Self;
    fn clip(&self, low: f64, high: f64) -> Self;

    fn square(&self) -> Self {
        self.multiply(self)
    }

    /// Attach the output name; backends without band names ignore it
    fn labelled(self, _name: &str) -> Self {
        self
    }
}

impl BandAlgebra for BandArray {
    const MODEL: ExecutionModel = ExecutionModel::Eager;

    fn add(&self, other: &Self) -> Self {
        self + other
    }

    fn subtract(&self, other: &Self) -> Self {
        self - other
    }

    fn multiply(&self, other: &Self) -> Self {
        self * other
    }

    fn divide(&self, other: &Self) -> Self {
        let mut out = Array2::<f64>::zeros(self.raw_dim());
        Zip::from(&mut out)
            .and(self)
            .and(other)
            .for_each(|o, &numerator, &denominator| {
                // Per-pixel substitution keeps the result finite
                let denominator = if denominator == 0.0 {
                    DIVISION_EPSILON
                } else {
                    denominator
                };
                *o = numerator / denominator;
            });
        out
    }

    fn add_scalar(&self, value: f64) -> Self {
        self + value
    }

    fn multiply_scalar(&self, value: f64) -> Self {
        self * value
    }

    fn clip(&self, low: f64, high: f64) -> Self {
        self.mapv(|v| v.clamp(low, high))
    }
}

impl BandAlgebra for ImageHandle {
    const MODEL: ExecutionModel = ExecutionModel::Deferred;

    fn add(&self, other: &Self) -> Self {
        ImageHandle::add(self, other)
    }

    fn subtract(&self, other: &Self) -> Self {
        ImageHandle::subtract(self, other)
    }

    fn multiply(&self, other: &Self) -> Self {
        ImageHandle::multiply(self, other)
    }

    fn divide(&self, other: &Self) -> Self {
        ImageHandle::divide(self, other)
    }

    fn add_scalar(&self, value: f64) -> Self {
        ImageHandle::add_scalar(self, value)
    }

    fn multiply_scalar(&self, value: f64) -> Self {
        ImageHandle::multiply_scalar(self, value)
    }

    fn clip(&self, low: f64, high: f64) -> Self {
        self.clamp(low, high)
    }

    fn labelled(self, name: &str) -> Self {
        self.rename([name])
    }
}
