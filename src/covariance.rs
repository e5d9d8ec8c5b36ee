//! Streaming per-cluster covariance.
//!
//! Records are assigned to their closest center and every cluster accumulates one [`CoMoment`]
//! per pair of dimensions `(i, j)` with `i <= j`. Accumulators from different partitions merge
//! exactly as if they had seen the union of their records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    input::{Partitioned, Record},
    pass::{run_pass, ShardPass},
    CentersIndex, ClusterKey, FeatureVector, Result, SearchMode,
};

/// Online co-moment of two variables: count, both means and the sum of products of deviations.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CoMoment {
    n: u64,
    mean_x: f64,
    mean_y: f64,
    comoment: f64,
}

impl CoMoment {
    pub fn update(&mut self, x: f64, y: f64) {
        self.n += 1;
        let n = self.n as f64;
        let dx = x - self.mean_x;
        self.mean_x += dx / n;
        self.mean_y += (y - self.mean_y) / n;
        self.comoment += dx * (y - self.mean_y);
    }

    /// Combine two accumulators using the pairwise update of Chan et al.
    pub fn merge(&self, other: &Self) -> Self {
        if self.n == 0 {
            return *other;
        }
        if other.n == 0 {
            return *self;
        }
        let (na, nb) = (self.n as f64, other.n as f64);
        let n = self.n + other.n;
        let nf = n as f64;
        let dx = other.mean_x - self.mean_x;
        let dy = other.mean_y - self.mean_y;
        Self {
            n,
            mean_x: self.mean_x + dx * nb / nf,
            mean_y: self.mean_y + dy * nb / nf,
            comoment: self.comoment + other.comoment + dx * dy * na * nb / nf,
        }
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn mean_x(&self) -> f64 {
        self.mean_x
    }

    pub fn mean_y(&self) -> f64 {
        self.mean_y
    }

    /// Sample covariance (divisor `n - 1`), or `None` with fewer than two observations.
    pub fn covariance(&self) -> Option<f64> {
        if self.n < 2 {
            None
        } else {
            Some(self.comoment / (self.n - 1) as f64)
        }
    }
}

/// Covariance of the records assigned to one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterCovariance {
    pub key: ClusterKey,
    /// Number of records assigned to the cluster.
    pub count: u64,
    /// Mean of the assigned records.
    pub mean: FeatureVector,
    /// Non-zero `(row, col, value)` entries of the upper triangle (`row <= col`) of the sample
    /// covariance matrix.
    pub entries: Vec<(usize, usize, f64)>,
}

impl ClusterCovariance {
    pub fn dimensions(&self) -> usize {
        self.mean.dimensions()
    }

    /// Full symmetric covariance matrix, row-major.
    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        let d = self.dimensions();
        let mut m = vec![vec![0.0; d]; d];
        for &(i, j, v) in &self.entries {
            m[i][j] = v;
            m[j][i] = v;
        }
        m
    }
}

/// Index of `(i, j)`, `i <= j`, in a row-major packed upper triangle of a `d`-square matrix.
fn upper_index(d: usize, i: usize, j: usize) -> usize {
    i * d - i * (i + 1) / 2 + j
}

struct CovariancePass<'a> {
    index: &'a CentersIndex,
    mode: SearchMode,
}

impl ShardPass for CovariancePass<'_> {
    type Input = Record;
    type Partial = (BTreeMap<ClusterKey, Vec<CoMoment>>, usize);

    fn empty(&self) -> Self::Partial {
        (BTreeMap::new(), 0)
    }

    fn process(&self, shard: &[Record]) -> Result<Self::Partial> {
        let d = self.index.dimensions();
        let (mut moments, mut skipped) = self.empty();
        for r in shard {
            let distances = self.index.distances(&r.vector, self.mode)?;
            if !r.vector.is_finite() || distances.iter().any(|n| !n.distance().is_finite()) {
                skipped += 1;
                continue;
            }
            for (clustering, n) in distances.iter().enumerate() {
                let m = moments
                    .entry(ClusterKey::new(clustering, n.center()))
                    .or_insert_with(|| vec![CoMoment::default(); d * (d + 1) / 2]);
                for i in 0..d {
                    for j in i..d {
                        m[upper_index(d, i, j)].update(r.vector[i], r.vector[j]);
                    }
                }
            }
        }
        Ok((moments, skipped))
    }

    fn merge(&self, a: Self::Partial, b: Self::Partial) -> Self::Partial {
        let (mut moments, skipped) = a;
        for (key, m) in b.0 {
            match moments.get_mut(&key) {
                Some(existing) => {
                    for (x, y) in existing.iter_mut().zip(m.iter()) {
                        *x = x.merge(y);
                    }
                }
                None => {
                    moments.insert(key, m);
                }
            }
        }
        (moments, skipped + b.1)
    }
}

/// Compute the covariance of the records assigned to each cluster of every clustering in
/// `index`. Clusters with no records are omitted; clusters with a single record have a mean and
/// no entries. Results are ordered by [`ClusterKey`].
pub fn compute_cluster_covariance(
    dataset: &Partitioned<Record>,
    index: &CentersIndex,
    mode: SearchMode,
) -> Result<Vec<ClusterCovariance>> {
    if mode == SearchMode::Approximate {
        index.prepare();
    }
    let (moments, skipped) = run_pass(&CovariancePass { index, mode }, dataset)?;
    if skipped > 0 {
        warn!("covariance skipped {skipped} records with non-finite values");
    }
    let d = index.dimensions();
    Ok(moments
        .into_iter()
        .map(|(key, m)| {
            let mean = (0..d)
                .map(|i| m[upper_index(d, i, i)].mean_x())
                .collect::<FeatureVector>();
            let entries = (0..d)
                .flat_map(|i| (i..d).map(move |j| (i, j)))
                .filter_map(|(i, j)| {
                    m[upper_index(d, i, j)]
                        .covariance()
                        .filter(|v| *v != 0.0)
                        .map(|v| (i, j, v))
                })
                .collect();
            ClusterCovariance {
                key,
                count: m[0].count(),
                mean,
                entries,
            }
        })
        .collect())
}

#[cfg(test)]
mod test {
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    use crate::{
        index::IndexParams,
        input::{Partitioned, Record},
        Centers, CentersIndex, ClusterKey, FeatureVector, SearchMode,
    };

    use super::{compute_cluster_covariance, upper_index, CoMoment};

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() <= 1e-9 * (1.0 + a.abs().max(b.abs())), "{a} vs {b}");
    }

    #[test]
    fn upper_index_is_dense() {
        let d = 4;
        let indices = (0..d)
            .flat_map(|i| (i..d).map(move |j| upper_index(d, i, j)))
            .collect::<Vec<_>>();
        assert_eq!(indices, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn comoment_matches_two_pass() {
        let xs = [1.0, 2.0, 4.0, 7.0];
        let ys = [2.0, 1.0, 5.0, 3.0];
        let mut m = CoMoment::default();
        for (x, y) in xs.iter().zip(ys.iter()) {
            m.update(*x, *y);
        }
        // means 3.5 and 2.75
        let expected = xs
            .iter()
            .zip(ys.iter())
            .map(|(x, y)| (x - 3.5) * (y - 2.75))
            .sum::<f64>()
            / 3.0;
        assert_close(m.mean_x(), 3.5);
        assert_close(m.mean_y(), 2.75);
        assert_close(m.covariance().unwrap(), expected);
        assert_eq!(CoMoment::default().covariance(), None);
    }

    #[test]
    fn merge_of_halves_equals_full() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0xc0c0);
        let sample = (0..101)
            .map(|_| (rng.random_range(-5.0..5.0), rng.random_range(0.0..100.0)))
            .collect::<Vec<(f64, f64)>>();
        let accumulate = |s: &[(f64, f64)]| {
            let mut m = CoMoment::default();
            for (x, y) in s {
                m.update(*x, *y);
            }
            m
        };
        let full = accumulate(&sample);
        let (a, b) = sample.split_at(37);
        let merged = accumulate(a).merge(&accumulate(b));
        assert_eq!(merged.count(), full.count());
        assert_close(merged.mean_x(), full.mean_x());
        assert_close(merged.mean_y(), full.mean_y());
        assert_close(merged.covariance().unwrap(), full.covariance().unwrap());
        assert_eq!(accumulate(&[]).merge(&full), full);
        assert_eq!(full.merge(&CoMoment::default()), full);
    }

    #[test]
    fn per_cluster_covariance() {
        let index = CentersIndex::from_centers(
            &[Centers::new([[0.0, 0.0], [10.0, 10.0]]).unwrap()],
            IndexParams::default(),
        )
        .unwrap();
        let records = [
            [-1.0, -1.0],
            [1.0, 1.0],
            [1.0, -1.0],
            [-1.0, 1.0],
            [10.0, 9.0],
            [10.0, 11.0],
        ]
        .into_iter()
        .map(Record::anonymous)
        .collect::<Vec<_>>();
        let covariance = compute_cluster_covariance(
            &Partitioned::round_robin(records, 3),
            &index,
            SearchMode::Exact,
        )
        .unwrap();
        assert_eq!(covariance.len(), 2);

        let first = &covariance[0];
        assert_eq!(first.key, ClusterKey::new(0, 0));
        assert_eq!(first.count, 4);
        let dense = first.to_dense();
        assert_close(first.mean[0], 0.0);
        assert_close(first.mean[1], 0.0);
        assert_close(dense[0][0], 4.0 / 3.0);
        assert_close(dense[1][1], 4.0 / 3.0);
        assert_close(dense[0][1], 0.0);
        assert_close(dense[1][0], dense[0][1]);

        // x is constant in the second cluster, so only the y variance is kept.
        let second = &covariance[1];
        assert_eq!(second.key, ClusterKey::new(0, 1));
        assert_eq!(second.count, 2);
        assert_eq!(second.mean, FeatureVector::from([10.0, 10.0]));
        assert_eq!(second.entries, vec![(1, 1, 2.0)]);
    }
}
