//! An ordered, deduplicated set of cluster centers.

use std::ops::Index;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::{Error, FeatureVector, Neighbor, Result};

/// Cluster centers for a single clustering, identified by position.
///
/// A `Centers` is never empty and all of its points share one dimensionality. Construction drops
/// repeated points (by value), keeping the first occurrence. Instances are immutable; extending
/// produces a new instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FeatureVector>", into = "Vec<FeatureVector>")]
pub struct Centers(Vec<FeatureVector>);

impl Centers {
    pub fn new<I>(points: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<FeatureVector>,
    {
        let mut seen = FxHashSet::default();
        let mut centers: Vec<FeatureVector> = Vec::new();
        for p in points.into_iter().map(Into::into) {
            if let Some(first) = centers.first() {
                first.check_dimensions(&p)?;
            }
            if seen.insert(p.bits().collect::<Vec<_>>()) {
                centers.push(p);
            }
        }
        if centers.is_empty() {
            Err(Error::EmptyCenters)
        } else {
            Ok(Self(centers))
        }
    }

    /// Build from points that must keep their positions, e.g. the output of a refinement round
    /// where center ids are stable across iterations. Points are not deduplicated.
    pub(crate) fn from_positions(points: Vec<FeatureVector>) -> Self {
        assert!(!points.is_empty(), "centers must not be empty");
        Self(points)
    }

    /// Return a new instance containing these centers followed by `points`.
    pub fn extend<I>(&self, points: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<FeatureVector>,
    {
        Self::new(
            self.0
                .iter()
                .cloned()
                .chain(points.into_iter().map(Into::into)),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; provided for symmetry with `len()`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.0[0].dimensions()
    }

    pub fn get(&self, index: usize) -> Option<&FeatureVector> {
        self.0.get(index)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &FeatureVector> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[FeatureVector] {
        &self.0
    }

    /// Return the closest center to `point` and the squared distance to it.
    ///
    /// Ties are broken in favor of the lowest center id. A point with a NaN value has a NaN
    /// distance to every center.
    pub fn nearest(&self, point: &FeatureVector) -> Result<Neighbor> {
        self.0[0].check_dimensions(point)?;
        Ok(self
            .0
            .iter()
            .enumerate()
            .map(|(i, c)| Neighbor::new(i, crate::distance::l2sq(c, point)))
            .min()
            .expect("centers are never empty"))
    }

    /// Squared distance from `point` to its closest center.
    pub fn distance(&self, point: &FeatureVector) -> Result<f64> {
        self.nearest(point).map(|n| n.distance())
    }
}

impl Index<usize> for Centers {
    type Output = FeatureVector;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl TryFrom<Vec<FeatureVector>> for Centers {
    type Error = Error;

    fn try_from(value: Vec<FeatureVector>) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Centers> for Vec<FeatureVector> {
    fn from(value: Centers) -> Self {
        value.0
    }
}

impl<'a> IntoIterator for &'a Centers {
    type Item = &'a FeatureVector;
    type IntoIter = std::slice::Iter<'a, FeatureVector>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod test {
    use crate::{index::IndexParams, CentersIndex, Error, FeatureVector, Neighbor, SearchMode};

    use super::Centers;

    #[test]
    fn empty_is_rejected() {
        assert_eq!(
            Centers::new(Vec::<FeatureVector>::new()),
            Err(Error::EmptyCenters)
        );
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let centers = Centers::new([[1.0, 2.0], [3.0, 4.0], [1.0, 2.0], [0.0, -0.0], [-0.0, 0.0]])
            .unwrap();
        assert_eq!(centers.len(), 3);
        assert_eq!(centers[0], FeatureVector::from([1.0, 2.0]));
        assert_eq!(centers[1], FeatureVector::from([3.0, 4.0]));
        assert_eq!(centers[2], FeatureVector::from([0.0, -0.0]));
    }

    #[test]
    fn mixed_dimensions_rejected() {
        assert!(matches!(
            Centers::new(vec![vec![1.0, 2.0], vec![1.0]]),
            Err(Error::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn extend_returns_new_instance() {
        let a = Centers::new([[1.0, 1.0]]).unwrap();
        let b = a.extend([[1.0, 1.0], [2.0, 2.0]]).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 2);
        assert_eq!(b[1], FeatureVector::from([2.0, 2.0]));
    }

    #[test]
    fn nearest_breaks_ties_low() {
        let centers = Centers::new([[0.0, 0.0], [2.0, 0.0], [1.0, 5.0]]).unwrap();
        assert_eq!(
            centers.nearest(&FeatureVector::from([1.0, 0.0])).unwrap(),
            Neighbor::new(0, 1.0)
        );
        assert_eq!(
            centers.nearest(&FeatureVector::from([1.0, 4.0])).unwrap(),
            Neighbor::new(2, 1.0)
        );
        assert!(centers.nearest(&FeatureVector::from([1.0])).is_err());
    }

    #[test]
    fn nan_point_has_nan_distance() {
        let centers = Centers::new([[0.0, 0.0], [2.0, 0.0]]).unwrap();
        let point = FeatureVector::from([f64::NAN, 1.0]);
        let n = centers.nearest(&point).unwrap();
        assert!(n.distance().is_nan());
        assert!(centers.distance(&point).unwrap().is_nan());

        let index = CentersIndex::from_centers(&[centers], IndexParams::default()).unwrap();
        let indexed = index.nearest(&point, 0, SearchMode::Exact).unwrap();
        assert!(indexed.distance().is_nan());
        assert_eq!(indexed.center(), n.center());
    }

    #[test]
    fn deserialize_validates() {
        assert!(serde_json::from_str::<Centers>("[]").is_err());
        let c: Centers = serde_json::from_str("[[1.0,2.0],[1.0,2.0],[3.0,4.0]]").unwrap();
        assert_eq!(c.len(), 2);
    }
}
