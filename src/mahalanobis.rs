//! Mahalanobis distance outlier scoring against per-cluster covariance models.

use std::collections::BTreeMap;

use faer::Mat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    covariance::ClusterCovariance,
    input::{Partitioned, Record, RecordId},
    pass::{run_pass, ShardPass},
    CentersIndex, ClusterKey, Error, FeatureVector, Result, SearchMode,
};

/// Mean and inverse covariance of one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MahalanobisModel {
    key: ClusterKey,
    mean: FeatureVector,
    // dimensions x dimensions, row-major.
    inverse: Vec<f64>,
    count: u64,
    rank: usize,
}

impl MahalanobisModel {
    /// Build a model from a cluster covariance.
    ///
    /// The covariance is inverted with an SVD pseudo-inverse, discarding singular values no
    /// larger than `max(s) * dimensions * f64::EPSILON`, so rank deficient covariance (e.g. a
    /// constant dimension) still yields a model that ignores the degenerate directions.
    pub fn from_covariance(covariance: &ClusterCovariance) -> Result<Self> {
        let d = covariance.dimensions();
        let dense = covariance.to_dense();
        let matrix = Mat::from_fn(d, d, |i, j| dense[i][j]);
        let svd = matrix
            .as_ref()
            .svd()
            .map_err(|e| Error::Numerical(format!("covariance svd failed: {e:?}")))?;
        let (u, s, v) = (svd.U(), svd.S().column_vector(), svd.V());

        let max_s = (0..d).map(|k| s[k]).fold(0.0, f64::max);
        let tolerance = max_s * d as f64 * f64::EPSILON;
        let mut inverse = vec![0.0; d * d];
        let mut rank = 0;
        for k in 0..d {
            if s[k] <= tolerance {
                continue;
            }
            rank += 1;
            let inv = 1.0 / s[k];
            for i in 0..d {
                for j in 0..d {
                    inverse[i * d + j] += v[(i, k)] * inv * u[(j, k)];
                }
            }
        }
        if rank < d {
            warn!(
                "covariance of cluster {:?} is singular (rank {rank} of {d}); using pseudo-inverse",
                covariance.key
            );
        }
        Ok(Self {
            key: covariance.key,
            mean: covariance.mean.clone(),
            inverse,
            count: covariance.count,
            rank,
        })
    }

    pub fn key(&self) -> ClusterKey {
        self.key
    }

    pub fn mean(&self) -> &FeatureVector {
        &self.mean
    }

    /// Number of records the covariance was computed from.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Rank of the covariance matrix.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn dimensions(&self) -> usize {
        self.mean.dimensions()
    }

    /// Squared Mahalanobis distance `dᵗ Σ⁻¹ d` where `d = vector - mean`.
    pub fn distance(&self, vector: &FeatureVector) -> Result<f64> {
        let delta = vector.subtract(&self.mean)?;
        Ok(self
            .inverse
            .chunks(delta.len().max(1))
            .zip(delta.iter())
            .map(|(row, di)| di * crate::distance::dot(row, &delta))
            .sum())
    }
}

/// Build a model for every cluster covariance, keyed by cluster.
pub fn build_models(
    covariances: &[ClusterCovariance],
) -> Result<BTreeMap<ClusterKey, MahalanobisModel>> {
    covariances
        .par_iter()
        .map(|c| MahalanobisModel::from_covariance(c).map(|m| (c.key, m)))
        .collect::<Result<Vec<_>>>()
        .map(|m| m.into_iter().collect())
}

/// Outlier score of one record within one clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierScore {
    pub id: RecordId,
    pub key: ClusterKey,
    /// Squared Mahalanobis distance to the assigned cluster.
    pub distance: f64,
}

/// Output of [`compute_outliers`].
#[derive(Debug, Clone, PartialEq)]
pub struct Outliers {
    /// One score per record and clustering, in dataset order.
    pub scores: Vec<OutlierScore>,
    /// Records ignored because they were not finite.
    pub skipped: usize,
}

struct OutlierPass<'a> {
    index: &'a CentersIndex,
    models: &'a BTreeMap<ClusterKey, MahalanobisModel>,
    mode: SearchMode,
}

impl ShardPass for OutlierPass<'_> {
    type Input = Record;
    type Partial = (Vec<OutlierScore>, BTreeMap<ClusterKey, u64>, usize);

    fn empty(&self) -> Self::Partial {
        (vec![], BTreeMap::new(), 0)
    }

    fn process(&self, shard: &[Record]) -> Result<Self::Partial> {
        let (mut scores, mut counts, mut skipped) = self.empty();
        for r in shard {
            let distances = self.index.distances(&r.vector, self.mode)?;
            if !r.vector.is_finite() || distances.iter().any(|n| !n.distance().is_finite()) {
                skipped += 1;
                continue;
            }
            for (clustering, n) in distances.iter().enumerate() {
                let key = ClusterKey::new(clustering, n.center());
                let model = self.models.get(&key).ok_or_else(|| {
                    Error::ModelMismatch(format!("no model for cluster {key:?}"))
                })?;
                scores.push(OutlierScore {
                    id: r.id.clone(),
                    key,
                    distance: model.distance(&r.vector)?,
                });
                *counts.entry(key).or_default() += 1;
            }
        }
        Ok((scores, counts, skipped))
    }

    fn merge(&self, a: Self::Partial, b: Self::Partial) -> Self::Partial {
        let (mut scores, mut counts, skipped) = a;
        scores.extend(b.0);
        for (k, c) in b.1 {
            *counts.entry(k).or_default() += c;
        }
        (scores, counts, skipped + b.2)
    }
}

/// Score every record by its Mahalanobis distance to its closest cluster in each clustering.
///
/// Fails with [`Error::ModelMismatch`] if any center of `index` has no model or a model has the
/// wrong dimensionality. With `validate_counts`, also fails if the number of records assigned to
/// a cluster differs from the number its model was built from, which usually means the models
/// came from different data or centers.
pub fn compute_outliers(
    dataset: &Partitioned<Record>,
    index: &CentersIndex,
    models: &BTreeMap<ClusterKey, MahalanobisModel>,
    mode: SearchMode,
    validate_counts: bool,
) -> Result<Outliers> {
    for clustering in 0..index.num_clusterings() {
        for center in 0..index.len(clustering)? {
            let key = ClusterKey::new(clustering, center);
            match models.get(&key) {
                None => {
                    return Err(Error::ModelMismatch(format!(
                        "no model for cluster {key:?}"
                    )))
                }
                Some(m) if m.dimensions() != index.dimensions() => {
                    return Err(Error::ModelMismatch(format!(
                        "model for cluster {key:?} has {} dimensions, expected {}",
                        m.dimensions(),
                        index.dimensions()
                    )))
                }
                Some(_) => {}
            }
        }
    }

    if mode == SearchMode::Approximate {
        index.prepare();
    }
    let (scores, counts, skipped) = run_pass(
        &OutlierPass {
            index,
            models,
            mode,
        },
        dataset,
    )?;
    if skipped > 0 {
        warn!("outlier scoring skipped {skipped} records with non-finite values");
    }
    if validate_counts {
        for (key, model) in models {
            let count = counts.get(key).copied().unwrap_or(0);
            if count != model.count() {
                return Err(Error::ModelMismatch(format!(
                    "cluster {key:?} has {count} records but its model was built from {}",
                    model.count()
                )));
            }
        }
    }
    Ok(Outliers { scores, skipped })
}
