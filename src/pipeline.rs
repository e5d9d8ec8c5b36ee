//! End-to-end k-means|| training driven by a [`Config`].

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use tracing::info;

use crate::{
    init::{self, InitRound},
    input::{assign_folds, tag_all, Partitioned, Record},
    kmeans,
    lloyd::{self, LloydIteration},
    seed, Centers, Config, Error, FeatureVector, Result,
};

/// Salt for the local candidate reduction of each clustering.
const REDUCE_SALT: u64 = 0x7265_6475;

/// Output of [`train`].
#[derive(Debug, Clone)]
pub struct Trained {
    /// `k` (or fewer, if the data has fewer distinct points) centers per clustering.
    pub centers: Vec<Centers>,
    pub init_rounds: Vec<InitRound>,
    pub lloyd_iterations: Vec<LloydIteration>,
}

/// Train `config.num_clusterings` clusterings of `k` centers over `dataset`.
///
/// With more than one clustering every record is routed to a single random fold for
/// initialization; refinement uses every record for every clustering. All passes run on the
/// thread pool described by `config`.
pub fn train(
    config: &Config,
    dataset: &Partitioned<Record>,
    initial_points: &[FeatureVector],
    k: usize,
) -> Result<Trained> {
    config.validate()?;
    if k == 0 {
        return Err(Error::InvalidConfig("k must be > 0".into()));
    }
    config.thread_pool()?.install(|| {
        let folded = if config.num_clusterings > 1 {
            assign_folds(dataset, config.num_clusterings, config.seed)
        } else {
            tag_all(dataset, 1)
        };
        let oversampled = init::oversample(
            &folded,
            initial_points,
            config.num_clusterings,
            &config.init,
            &config.index,
            config.seed,
        )?;
        let centers = oversampled
            .candidates
            .iter()
            .enumerate()
            .map(|(clustering, candidates)| {
                let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed::derive_seed(
                    config.seed,
                    &[REDUCE_SALT, clustering as u64],
                ));
                kmeans::reduce_candidates(candidates, k, &kmeans::Params::default(), &mut rng)
            })
            .collect::<Result<Vec<_>>>()?;
        info!(
            "reduced candidates to {:?} centers",
            centers.iter().map(Centers::len).collect::<Vec<_>>()
        );
        let refined = lloyd::refine(dataset, &centers, &config.lloyd, &config.index)?;
        Ok(Trained {
            centers: refined.centers,
            init_rounds: oversampled.rounds,
            lloyd_iterations: refined.iterations,
        })
    })
}
