//! Immutable dense feature vectors.

use std::{fmt, ops::Deref, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{distance, Error, Result};

/// An immutable dense vector of `f64` values.
///
/// Storage is shared so clones are cheap; a vector can be handed to many workers or stored in
/// several indexes without copying its contents.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<f64>", into = "Vec<f64>")]
pub struct FeatureVector(Arc<[f64]>);

impl FeatureVector {
    pub fn new(values: impl Into<Arc<[f64]>>) -> Self {
        Self(values.into())
    }

    /// A vector of `dimensions` zeros.
    pub fn zeros(dimensions: usize) -> Self {
        Self(vec![0.0; dimensions].into())
    }

    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Return true if every component is finite.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    pub fn dot(&self, other: &FeatureVector) -> Result<f64> {
        self.check_dimensions(other)?;
        Ok(distance::dot(&self.0, &other.0))
    }

    pub fn squared_norm(&self) -> f64 {
        distance::dot(&self.0, &self.0)
    }

    pub fn squared_distance(&self, other: &FeatureVector) -> Result<f64> {
        self.check_dimensions(other)?;
        Ok(distance::l2sq(&self.0, &other.0))
    }

    /// Return a new vector with every component multiplied by `factor`.
    pub fn scale(&self, factor: f64) -> FeatureVector {
        self.0.iter().map(|v| v * factor).collect()
    }

    /// Return the component-wise sum of `self` and `other`.
    pub fn add(&self, other: &FeatureVector) -> Result<FeatureVector> {
        self.check_dimensions(other)?;
        Ok(self.0.iter().zip(other.0.iter()).map(|(a, b)| a + b).collect())
    }

    /// Return `self - other`.
    pub fn subtract(&self, other: &FeatureVector) -> Result<FeatureVector> {
        self.check_dimensions(other)?;
        Ok(self.0.iter().zip(other.0.iter()).map(|(a, b)| a - b).collect())
    }

    /// Bit patterns of each component, used to hash vectors by value. Negative zero maps to the
    /// same pattern as positive zero.
    pub(crate) fn bits(&self) -> impl Iterator<Item = u64> + '_ {
        self.0
            .iter()
            .map(|v| if *v == 0.0 { 0 } else { v.to_bits() })
    }

    pub(crate) fn check_dimensions(&self, other: &FeatureVector) -> Result<()> {
        if self.dimensions() == other.dimensions() {
            Ok(())
        } else {
            Err(Error::DimensionMismatch {
                expected: self.dimensions(),
                actual: other.dimensions(),
            })
        }
    }
}

impl Deref for FeatureVector {
    type Target = [f64];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for FeatureVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(value: Vec<f64>) -> Self {
        Self(value.into())
    }
}

impl From<&[f64]> for FeatureVector {
    fn from(value: &[f64]) -> Self {
        Self(value.into())
    }
}

impl<const N: usize> From<[f64; N]> for FeatureVector {
    fn from(value: [f64; N]) -> Self {
        Self(value.into())
    }
}

impl From<FeatureVector> for Vec<f64> {
    fn from(value: FeatureVector) -> Self {
        value.0.to_vec()
    }
}

impl FromIterator<f64> for FeatureVector {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// An item paired with a non-negative weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weighted<T> {
    pub item: T,
    pub weight: f64,
}

impl<T> Weighted<T> {
    pub fn new(item: T, weight: f64) -> Self {
        Self { item, weight }
    }
}
