//! k-means|| initialization by weighted oversampling.
//!
//! Starting from a set of seed points shared by every clustering, each round scores every record
//! by its squared distance to the closest candidate of its clustering, draws
//! `samples_per_iteration` records per clustering with probability proportional to that distance
//! and adds them to the candidate pool. A final pass weights every candidate by the number of
//! records closest to it. The weighted pool is then reduced to `k` centers locally, see
//! [`crate::kmeans::reduce_candidates`].

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    index::IndexParams,
    input::{FoldedRecord, Partitioned},
    pass::{run_pass, ShardPass},
    reservoir::WeightedReservoir,
    seed,
    sum::ExactSum, CentersIndex, ClusteringId, Error, FeatureVector, Result, SearchMode, Weighted,
};

/// Parameters for oversampling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitParams {
    /// Number of sampling rounds.
    pub iterations: usize,
    /// Number of records sampled per clustering in each round.
    pub samples_per_iteration: usize,
    /// Search mode used for scoring and the final counting pass.
    pub mode: SearchMode,
}

impl Default for InitParams {
    fn default() -> Self {
        Self {
            iterations: 5,
            samples_per_iteration: 20,
            mode: SearchMode::Approximate,
        }
    }
}

impl InitParams {
    pub fn validate(&self) -> Result<()> {
        if self.samples_per_iteration == 0 && self.iterations > 0 {
            return Err(Error::InvalidConfig(
                "samples_per_iteration must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Statistics for a single sampling round.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InitRound {
    pub round: usize,
    /// Number of points sampled for each clustering.
    pub sampled: Vec<usize>,
    /// Sum of squared distances to the closest candidate, per clustering, before sampling.
    pub cost: Vec<f64>,
    /// Records ignored because their distance was not finite.
    pub skipped: usize,
}

/// Output of [`oversample`].
#[derive(Clone, Debug)]
pub struct Oversampled {
    /// Candidates of each clustering in insertion order, weighted by the number of records of
    /// that clustering closest to them. Candidates closest to no record have weight 0.
    pub candidates: Vec<Vec<Weighted<FeatureVector>>>,
    pub rounds: Vec<InitRound>,
    /// Records ignored by the counting pass because their distance was not finite.
    pub skipped: usize,
}

/// Salt distinguishing oversampling draws from other per-record draws.
const INIT_SALT: u64 = 0x696e_6974;

struct ScorePass<'a> {
    index: &'a CentersIndex,
    mode: SearchMode,
    samples: usize,
    seed: u64,
    round: u64,
}

struct ScorePartial {
    reservoir: WeightedReservoir<ClusteringId, FeatureVector>,
    cost: Vec<ExactSum>,
    skipped: usize,
}

impl ShardPass for ScorePass<'_> {
    type Input = FoldedRecord;
    type Partial = ScorePartial;

    fn empty(&self) -> Self::Partial {
        ScorePartial {
            reservoir: WeightedReservoir::new(self.samples),
            cost: vec![ExactSum::default(); self.index.num_clusterings()],
            skipped: 0,
        }
    }

    fn process(&self, shard: &[FoldedRecord]) -> Result<Self::Partial> {
        let mut partial = self.empty();
        for r in shard {
            let distance = self
                .index
                .nearest(&r.record.vector, r.fold, self.mode)?
                .distance();
            if !distance.is_finite() {
                partial.skipped += 1;
                continue;
            }
            partial.cost[r.fold].add(distance);
            // records already in the pool can't be drawn.
            if distance == 0.0 {
                continue;
            }
            let mut rng = seed::record_rng(
                self.seed,
                &[INIT_SALT, self.round, r.fold as u64],
                r.record.seed_key(),
            );
            partial
                .reservoir
                .offer(r.fold, r.record.vector.clone(), distance, &mut rng);
        }
        Ok(partial)
    }

    fn merge(&self, mut a: Self::Partial, b: Self::Partial) -> Self::Partial {
        for (x, y) in a.cost.iter_mut().zip(b.cost.iter()) {
            x.merge(y);
        }
        ScorePartial {
            reservoir: a.reservoir.merge(b.reservoir),
            cost: a.cost,
            skipped: a.skipped + b.skipped,
        }
    }
}

struct CountPass<'a> {
    index: &'a CentersIndex,
    mode: SearchMode,
}

impl ShardPass for CountPass<'_> {
    type Input = FoldedRecord;
    type Partial = (Vec<Vec<u64>>, usize);

    fn empty(&self) -> Self::Partial {
        let counts = (0..self.index.num_clusterings())
            .map(|c| vec![0; self.index.len(c).expect("clustering in range")])
            .collect();
        (counts, 0)
    }

    fn process(&self, shard: &[FoldedRecord]) -> Result<Self::Partial> {
        let (mut counts, mut skipped) = self.empty();
        for r in shard {
            let n = self.index.nearest(&r.record.vector, r.fold, self.mode)?;
            if n.distance().is_finite() {
                counts[r.fold][n.center()] += 1;
            } else {
                skipped += 1;
            }
        }
        Ok((counts, skipped))
    }

    fn merge(&self, a: Self::Partial, b: Self::Partial) -> Self::Partial {
        let (mut counts, skipped) = a;
        for (x, y) in counts.iter_mut().zip(b.0) {
            for (i, j) in x.iter_mut().zip(y) {
                *i += j;
            }
        }
        (counts, skipped + b.1)
    }
}

/// Build a weighted pool of candidate centers for each of `num_clusterings` clusterings.
///
/// Every clustering starts with all of `initial_points`. Records are routed to the clustering
/// named by their fold; a fold outside `0..num_clusterings` fails the pass. The result depends
/// only on the records, the parameters and `seed`, not on how `dataset` is partitioned.
pub fn oversample(
    dataset: &Partitioned<FoldedRecord>,
    initial_points: &[FeatureVector],
    num_clusterings: usize,
    params: &InitParams,
    index_params: &IndexParams,
    seed: u64,
) -> Result<Oversampled> {
    params.validate()?;
    let mut index = CentersIndex::with_seeds(num_clusterings, initial_points, *index_params)?;
    let mut rounds = Vec::with_capacity(params.iterations);
    let approximate = params.mode == SearchMode::Approximate;
    for round in 0..params.iterations {
        if approximate {
            index.prepare();
        }
        let scored = run_pass(
            &ScorePass {
                index: &index,
                mode: params.mode,
                samples: params.samples_per_iteration,
                seed,
                round: round as u64,
            },
            dataset,
        )?;
        if scored.skipped > 0 {
            warn!(
                "oversampling round {round} skipped {} records with non-finite distance",
                scored.skipped
            );
        }
        let mut sampled = vec![0; num_clusterings];
        for (clustering, points) in scored.reservoir.into_samples() {
            sampled[clustering] = points.len();
            for p in points {
                index.add(p, clustering)?;
            }
        }
        info!(
            "oversampling round {round}: sampled {} points, {} candidates",
            sampled.iter().sum::<usize>(),
            index.total_len()
        );
        rounds.push(InitRound {
            round,
            sampled,
            cost: scored.cost.iter().map(ExactSum::value).collect(),
            skipped: scored.skipped,
        });
    }

    if approximate {
        index.prepare();
    }
    let (counts, skipped) = run_pass(
        &CountPass {
            index: &index,
            mode: params.mode,
        },
        dataset,
    )?;
    if skipped > 0 {
        warn!("candidate weighting skipped {skipped} records with non-finite distance");
    }
    let candidates = counts
        .into_iter()
        .enumerate()
        .map(|(clustering, counts)| {
            index
                .points(clustering)
                .expect("clustering in range")
                .zip(counts)
                .map(|(p, c)| Weighted::new(p.clone(), c as f64))
                .collect::<Vec<_>>()
        })
        .collect();
    Ok(Oversampled {
        candidates,
        rounds,
        skipped,
    })
}

#[cfg(test)]
mod test {
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    use crate::{
        index::IndexParams,
        input::{assign_folds, tag_all, FoldedRecord, Partitioned, Record, RecordId},
        test::{blobs, init_tracing},
        Error, FeatureVector, SearchMode,
    };

    use super::{oversample, InitParams};

    fn params(mode: SearchMode) -> InitParams {
        InitParams {
            iterations: 3,
            samples_per_iteration: 4,
            mode,
        }
    }

    #[test]
    fn weights_sum_to_records() {
        init_tracing();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let records = blobs(&mut rng, &[[0.0, 0.0], [10.0, 10.0], [-10.0, 5.0]], 50, 0.5);
        let dataset = assign_folds(&Partitioned::round_robin(records, 4), 2, 7);
        let out = oversample(
            &dataset,
            &[FeatureVector::from([0.0, 0.0])],
            2,
            &params(SearchMode::Approximate),
            &IndexParams::default(),
            11,
        )
        .unwrap();
        assert_eq!(out.candidates.len(), 2);
        assert_eq!(out.rounds.len(), 3);
        for (clustering, candidates) in out.candidates.iter().enumerate() {
            // the seed point comes first, followed by up to 3 * 4 sampled points.
            assert_eq!(candidates[0].item, FeatureVector::from([0.0, 0.0]));
            assert!(candidates.len() > 1 && candidates.len() <= 13);
            let total: f64 = candidates.iter().map(|w| w.weight).sum();
            let expected = dataset.iter().filter(|r| r.fold == clustering).count();
            assert_eq!(total, expected as f64);
        }
        assert_eq!(out.skipped, 0);
    }

    #[test]
    fn independent_of_partitioning() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let records = blobs(&mut rng, &[[1.0, 2.0, 3.0], [-4.0, 0.0, 8.0]], 80, 1.0);
        let run = |dataset: Partitioned<Record>| {
            oversample(
                &tag_all(&dataset, 3),
                &[FeatureVector::from([0.0, 0.0, 0.0])],
                3,
                &params(SearchMode::Approximate),
                &IndexParams::default(),
                99,
            )
            .unwrap()
            .candidates
        };
        let a = run(Partitioned::round_robin(records.clone(), 5));
        let b = run(Partitioned::chunked(records.clone(), 17));
        let c = run(Partitioned::new(vec![records]));
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn non_finite_records_are_skipped() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
        let records = blobs(&mut rng, &[[0.0, 0.0], [6.0, 6.0]], 30, 1.0);
        let mut with_nan = records.clone();
        with_nan.push(Record::new(
            RecordId::Text("nan".into()),
            [f64::NAN, 1.0],
        ));
        let run = |records: Vec<Record>| {
            oversample(
                &tag_all(&Partitioned::round_robin(records, 3), 1),
                &[FeatureVector::from([0.0, 0.0])],
                1,
                &params(SearchMode::Exact),
                &IndexParams::default(),
                21,
            )
            .unwrap()
        };
        let clean = run(records);
        let dirty = run(with_nan);
        assert_eq!(dirty.candidates, clean.candidates);
        assert_eq!(dirty.skipped, 1);
        assert!(dirty.rounds.iter().all(|r| r.skipped == 1));
        assert!(dirty.rounds.iter().all(|r| r.cost[0].is_finite()));
        let total: f64 = dirty.candidates[0].iter().map(|w| w.weight).sum();
        assert_eq!(total, 60.0);
    }

    #[test]
    fn duplicates_of_seed_are_never_sampled() {
        let records = (0..10)
            .map(|_| FoldedRecord {
                fold: 0,
                record: Record::anonymous([1.0, 1.0]),
            })
            .collect::<Vec<_>>();
        let out = oversample(
            &Partitioned::round_robin(records, 3),
            &[FeatureVector::from([1.0, 1.0])],
            1,
            &params(SearchMode::Exact),
            &IndexParams::default(),
            0,
        )
        .unwrap();
        assert_eq!(out.candidates[0].len(), 1);
        assert_eq!(out.candidates[0][0].weight, 10.0);
        assert!(out.rounds.iter().all(|r| r.sampled == vec![0]));
    }

    #[test]
    fn fold_out_of_range_fails() {
        let records = vec![FoldedRecord {
            fold: 2,
            record: Record::anonymous([1.0]),
        }];
        assert_eq!(
            oversample(
                &Partitioned::new(vec![records]),
                &[FeatureVector::from([0.0])],
                2,
                &params(SearchMode::Exact),
                &IndexParams::default(),
                0,
            )
            .unwrap_err(),
            Error::ClusteringOutOfRange {
                clustering: 2,
                len: 2
            }
        );
    }

    #[test]
    fn no_initial_points_fails() {
        assert_eq!(
            oversample(
                &Partitioned::new(vec![]),
                &[],
                1,
                &InitParams::default(),
                &IndexParams::default(),
                0
            )
            .unwrap_err(),
            Error::EmptyCenters
        );
    }
}
