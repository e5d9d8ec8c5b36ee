//! Lloyd's algorithm over a partitioned dataset.
//!
//! Every iteration assigns each record to its closest center in every clustering, sums the
//! assigned vectors per center and moves each center to the mean of its records. Centers keep
//! their ids across iterations; a center that attracts no records stays where it is.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    index::IndexParams,
    input::{Partitioned, Record},
    pass::{run_pass, ShardPass},
    sum::ExactSum,
    Centers, CentersIndex, Error, FeatureVector, Result, SearchMode,
};

/// Parameters for Lloyd refinement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LloydParams {
    /// Number of iterations. There is no convergence check.
    pub iterations: usize,
    /// Search mode used to assign records to centers.
    pub mode: SearchMode,
}

impl Default for LloydParams {
    fn default() -> Self {
        Self {
            iterations: 10,
            mode: SearchMode::Exact,
        }
    }
}

/// Statistics for a single refinement iteration.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LloydIteration {
    pub iteration: usize,
    /// Sum of squared distances from each record to its assigned center, per clustering, for
    /// the centers at the start of the iteration.
    pub cost: Vec<f64>,
    /// Number of centers across all clusterings that were assigned no records.
    pub empty_centers: usize,
    /// Records ignored because their distance was not finite.
    pub skipped: usize,
}

/// Output of [`refine`].
#[derive(Clone, Debug)]
pub struct Refined {
    pub centers: Vec<Centers>,
    pub iterations: Vec<LloydIteration>,
}

/// Per-center vector sums and counts for one clustering.
///
/// Sums are exact, so the centroids do not depend on how records were partitioned.
#[derive(Debug, Clone)]
struct CentroidSums {
    sums: Vec<Vec<ExactSum>>,
    counts: Vec<u64>,
}

impl CentroidSums {
    fn new(len: usize, dimensions: usize) -> Self {
        Self {
            sums: vec![vec![ExactSum::default(); dimensions]; len],
            counts: vec![0; len],
        }
    }

    fn add(&mut self, center: usize, vector: &[f64]) {
        for (s, v) in self.sums[center].iter_mut().zip(vector) {
            s.add(*v);
        }
        self.counts[center] += 1;
    }

    fn merge(&mut self, other: Self) {
        for (a, b) in self.sums.iter_mut().zip(other.sums) {
            for (x, y) in a.iter_mut().zip(b) {
                x.merge(&y);
            }
        }
        for (a, b) in self.counts.iter_mut().zip(other.counts) {
            *a += b;
        }
    }
}

struct AssignPass<'a> {
    index: &'a CentersIndex,
    mode: SearchMode,
}

struct AssignPartial {
    sums: Vec<CentroidSums>,
    cost: Vec<ExactSum>,
    skipped: usize,
}

impl ShardPass for AssignPass<'_> {
    type Input = Record;
    type Partial = AssignPartial;

    fn empty(&self) -> Self::Partial {
        let n = self.index.num_clusterings();
        AssignPartial {
            sums: (0..n)
                .map(|c| {
                    CentroidSums::new(
                        self.index.len(c).expect("clustering in range"),
                        self.index.dimensions(),
                    )
                })
                .collect(),
            cost: vec![ExactSum::default(); n],
            skipped: 0,
        }
    }

    fn process(&self, shard: &[Record]) -> Result<Self::Partial> {
        let mut partial = self.empty();
        for r in shard {
            let distances = self.index.distances(&r.vector, self.mode)?;
            if distances.iter().any(|n| !n.distance().is_finite()) {
                partial.skipped += 1;
                continue;
            }
            for (clustering, n) in distances.iter().enumerate() {
                partial.sums[clustering].add(n.center(), &r.vector);
                partial.cost[clustering].add(n.distance());
            }
        }
        Ok(partial)
    }

    fn merge(&self, mut a: Self::Partial, b: Self::Partial) -> Self::Partial {
        for (x, y) in a.sums.iter_mut().zip(b.sums) {
            x.merge(y);
        }
        for (x, y) in a.cost.iter_mut().zip(b.cost) {
            x.merge(&y);
        }
        a.skipped += b.skipped;
        a
    }
}

/// Refine `centers` (one entry per clustering) against every record of `dataset`.
///
/// Each record contributes to every clustering. All clusterings must share a dimensionality.
/// Centers and costs are bit-identical however `dataset` is partitioned.
pub fn refine(
    dataset: &Partitioned<Record>,
    centers: &[Centers],
    params: &LloydParams,
    index_params: &IndexParams,
) -> Result<Refined> {
    if centers.is_empty() {
        return Err(Error::EmptyCenters);
    }
    let mut centers = centers.to_vec();
    let mut iterations = Vec::with_capacity(params.iterations);
    for iteration in 0..params.iterations {
        let index = CentersIndex::from_centers(&centers, *index_params)?;
        if params.mode == SearchMode::Approximate {
            index.prepare();
        }
        let partial = run_pass(
            &AssignPass {
                index: &index,
                mode: params.mode,
            },
            dataset,
        )?;

        let mut empty_centers = 0;
        centers = centers
            .iter()
            .zip(partial.sums)
            .enumerate()
            .map(|(clustering, (old, sums))| {
                let points = old
                    .iter()
                    .zip(sums.sums.into_iter().zip(sums.counts))
                    .enumerate()
                    .map(|(center, (p, (sum, count)))| {
                        if count == 0 {
                            warn!(
                                "lloyd iteration {iteration}: center {center} of clustering \
                                 {clustering} has no records, leaving it unchanged"
                            );
                            empty_centers += 1;
                            p.clone()
                        } else {
                            let n = count as f64;
                            sum.iter().map(|s| s.value() / n).collect::<FeatureVector>()
                        }
                    })
                    .collect();
                Centers::from_positions(points)
            })
            .collect();

        if partial.skipped > 0 {
            warn!(
                "lloyd iteration {iteration} skipped {} records with non-finite distance",
                partial.skipped
            );
        }
        let cost = partial.cost.iter().map(ExactSum::value).collect::<Vec<_>>();
        info!("lloyd iteration {iteration}: cost {cost:?}, {empty_centers} empty centers");
        iterations.push(LloydIteration {
            iteration,
            cost,
            empty_centers,
            skipped: partial.skipped,
        });
    }
    Ok(Refined {
        centers,
        iterations,
    })
}
