//! Data-parallel passes over a partitioned dataset.
//!
//! A pass maps each partition to a partial result and merges partial results with an
//! associative, commutative operation. Partitions are processed in parallel on the current rayon
//! pool (use [`rayon::ThreadPool::install`] to pick a pool) and partials are merged in partition
//! order, so a pass over a given partitioning is fully reproducible.

use rayon::prelude::*;

use crate::{input::Partitioned, Result};

/// A pure function from a shard of input to a mergeable partial result.
pub trait ShardPass: Sync {
    type Input: Sync;
    type Partial: Send;

    /// The identity element for [`ShardPass::merge`].
    fn empty(&self) -> Self::Partial;

    /// Compute the partial result for a single shard.
    fn process(&self, shard: &[Self::Input]) -> Result<Self::Partial>;

    /// Combine two partial results. Must be associative and commutative.
    fn merge(&self, a: Self::Partial, b: Self::Partial) -> Self::Partial;
}

/// Run `pass` over every partition of `dataset` and merge the results.
///
/// Fails with the first error produced by any partition.
pub fn run_pass<P: ShardPass>(pass: &P, dataset: &Partitioned<P::Input>) -> Result<P::Partial> {
    let partials = dataset
        .partitions()
        .par_iter()
        .map(|shard| pass.process(shard))
        .collect::<Result<Vec<_>>>()?;
    Ok(partials
        .into_iter()
        .fold(pass.empty(), |acc, p| pass.merge(acc, p)))
}

#[cfg(test)]
mod test {
    use crate::{input::Partitioned, Error, Result};

    use super::{run_pass, ShardPass};

    struct SumPass;

    impl ShardPass for SumPass {
        type Input = i64;
        type Partial = (i64, usize);

        fn empty(&self) -> Self::Partial {
            (0, 0)
        }

        fn process(&self, shard: &[i64]) -> Result<Self::Partial> {
            if shard.contains(&-1) {
                return Err(Error::InvalidConfig("negative".into()));
            }
            Ok((shard.iter().sum(), shard.len()))
        }

        fn merge(&self, a: Self::Partial, b: Self::Partial) -> Self::Partial {
            (a.0 + b.0, a.1 + b.1)
        }
    }

    #[test]
    fn sums_across_partitionings() {
        let a = run_pass(&SumPass, &Partitioned::round_robin(0..100i64, 7)).unwrap();
        let b = run_pass(&SumPass, &Partitioned::chunked((0..100i64).collect(), 3)).unwrap();
        assert_eq!(a, (4950, 100));
        assert_eq!(a, b);
    }

    #[test]
    fn empty_dataset_yields_identity() {
        assert_eq!(
            run_pass(&SumPass, &Partitioned::<i64>::new(vec![])).unwrap(),
            (0, 0)
        );
    }

    #[test]
    fn errors_propagate() {
        assert!(run_pass(&SumPass, &Partitioned::round_robin([1, 2, -1, 4], 2)).is_err());
    }
}
