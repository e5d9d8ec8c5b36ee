//! Read-only passes that label and score records against finalized centers.

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    input::{Partitioned, Record, RecordId},
    pass::{run_pass, ShardPass},
    sum::ExactSum,
    CentersIndex, ClusteringId, Distances, Result, SearchMode,
};

/// The closest center of one clustering to one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: RecordId,
    pub clustering: ClusteringId,
    pub center: usize,
    /// Squared euclidean distance to the center.
    pub distance: f64,
}

/// Output of [`compute_assignments`].
#[derive(Debug, Clone, PartialEq)]
pub struct Assignments {
    /// One assignment per record and clustering, in dataset order.
    pub assignments: Vec<Assignment>,
    /// Records ignored because their distance was not finite.
    pub skipped: usize,
}

/// The closest center in every clustering for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosestCenters {
    pub id: RecordId,
    pub distances: Distances,
}

/// Applies `f` to the distances of each record with finite distances and concatenates the
/// results in dataset order.
struct MapPass<'a, T, F> {
    index: &'a CentersIndex,
    mode: SearchMode,
    f: F,
    _output: PhantomData<fn() -> T>,
}

impl<T, F> ShardPass for MapPass<'_, T, F>
where
    T: Send,
    F: Fn(&Record, Distances) -> Vec<T> + Sync,
{
    type Input = Record;
    type Partial = (Vec<T>, usize);

    fn empty(&self) -> Self::Partial {
        (vec![], 0)
    }

    fn process(&self, shard: &[Record]) -> Result<Self::Partial> {
        let mut out = Vec::with_capacity(shard.len());
        let mut skipped = 0;
        for r in shard {
            let distances = self.index.distances(&r.vector, self.mode)?;
            if distances.iter().all(|n| n.distance().is_finite()) {
                out.extend((self.f)(r, distances));
            } else {
                skipped += 1;
            }
        }
        Ok((out, skipped))
    }

    fn merge(&self, mut a: Self::Partial, b: Self::Partial) -> Self::Partial {
        a.0.extend(b.0);
        (a.0, a.1 + b.1)
    }
}

fn map_records<T, F>(
    dataset: &Partitioned<Record>,
    index: &CentersIndex,
    mode: SearchMode,
    f: F,
) -> Result<(Vec<T>, usize)>
where
    T: Send,
    F: Fn(&Record, Distances) -> Vec<T> + Sync,
{
    if mode == SearchMode::Approximate {
        index.prepare();
    }
    let (out, skipped) = run_pass(
        &MapPass {
            index,
            mode,
            f,
            _output: PhantomData,
        },
        dataset,
    )?;
    if skipped > 0 {
        warn!("skipped {skipped} records with non-finite distance");
    }
    Ok((out, skipped))
}

/// Label every record with its closest center in each clustering of `index`.
pub fn compute_assignments(
    dataset: &Partitioned<Record>,
    index: &CentersIndex,
    mode: SearchMode,
) -> Result<Assignments> {
    let (assignments, skipped) = map_records(dataset, index, mode, |r, d| {
        d.iter()
            .enumerate()
            .map(|(clustering, n)| Assignment {
                id: r.id.clone(),
                clustering,
                center: n.center(),
                distance: n.distance(),
            })
            .collect()
    })?;
    Ok(Assignments {
        assignments,
        skipped,
    })
}

/// Return the closest center in every clustering for each record, in dataset order.
pub fn closest_centers(
    dataset: &Partitioned<Record>,
    index: &CentersIndex,
    mode: SearchMode,
) -> Result<Vec<ClosestCenters>> {
    map_records(dataset, index, mode, |r, distances| {
        vec![ClosestCenters {
            id: r.id.clone(),
            distances,
        }]
    })
    .map(|(c, _)| c)
}

struct CostPass<'a> {
    index: &'a CentersIndex,
    mode: SearchMode,
}

impl ShardPass for CostPass<'_> {
    type Input = Record;
    type Partial = (Vec<ExactSum>, usize);

    fn empty(&self) -> Self::Partial {
        (vec![ExactSum::default(); self.index.num_clusterings()], 0)
    }

    fn process(&self, shard: &[Record]) -> Result<Self::Partial> {
        let (mut cost, mut skipped) = self.empty();
        for r in shard {
            let distances = self.index.distances(&r.vector, self.mode)?;
            if distances.iter().any(|n| !n.distance().is_finite()) {
                skipped += 1;
                continue;
            }
            for (c, n) in cost.iter_mut().zip(distances.iter()) {
                c.add(n.distance());
            }
        }
        Ok((cost, skipped))
    }

    fn merge(&self, mut a: Self::Partial, b: Self::Partial) -> Self::Partial {
        for (x, y) in a.0.iter_mut().zip(b.0) {
            x.merge(&y);
        }
        (a.0, a.1 + b.1)
    }
}

/// Sum of squared distances from each record to its closest center, per clustering.
pub fn costs(
    dataset: &Partitioned<Record>,
    index: &CentersIndex,
    mode: SearchMode,
) -> Result<Vec<f64>> {
    if mode == SearchMode::Approximate {
        index.prepare();
    }
    let (cost, skipped) = run_pass(&CostPass { index, mode }, dataset)?;
    if skipped > 0 {
        warn!("cost skipped {skipped} records with non-finite distance");
    }
    Ok(cost.iter().map(ExactSum::value).collect())
}
