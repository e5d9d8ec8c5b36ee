//! Keyed weighted reservoir sampling without replacement (A-ES).
//!
//! Each offered item draws `u` uniformly from (0, 1] and is scored `ln(u) / weight`; a reservoir
//! keeps the `size` highest scores per key. Entries are identified by their score and a second
//! random draw, so merging the same partial twice, or merging partials in any grouping or order,
//! yields the same reservoir.

use std::{cmp::Ordering, collections::BTreeMap, marker::PhantomData};

use rand::Rng;
use tracing::warn;

use crate::{
    input::Partitioned,
    pass::{run_pass, ShardPass},
    seed, Result, Weighted,
};

#[derive(Debug, Clone, Copy)]
struct Score {
    score: f64,
    tiebreak: u64,
}

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.tiebreak.cmp(&other.tiebreak))
    }
}

/// Per-key reservoirs holding at most `size` items each.
#[derive(Debug, Clone)]
pub struct WeightedReservoir<K, T> {
    size: usize,
    reservoirs: BTreeMap<K, BTreeMap<Score, T>>,
}

impl<K: Ord, T> WeightedReservoir<K, T> {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            reservoirs: BTreeMap::new(),
        }
    }

    /// Maximum number of items kept per key.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Offer `item` with `weight` to the reservoir for `key`, drawing its score from `rng`.
    ///
    /// Returns false without consuming randomness if `weight` is not a positive finite value;
    /// such items can never be sampled.
    pub fn offer<R: Rng>(&mut self, key: K, item: T, weight: f64, rng: &mut R) -> bool {
        if !(weight > 0.0 && weight.is_finite()) {
            return false;
        }
        let u = 1.0 - rng.random::<f64>();
        let score = Score {
            score: u.ln() / weight,
            tiebreak: rng.random(),
        };
        Self::insert(self.size, self.reservoirs.entry(key).or_default(), score, item);
        true
    }

    /// Merge `other` into this reservoir, keeping the `size` highest scores for every key.
    pub fn merge(mut self, other: Self) -> Self {
        debug_assert_eq!(self.size, other.size);
        for (key, entries) in other.reservoirs {
            let reservoir = self.reservoirs.entry(key).or_default();
            for (score, item) in entries {
                Self::insert(self.size, reservoir, score, item);
            }
        }
        self
    }

    fn insert(size: usize, reservoir: &mut BTreeMap<Score, T>, score: Score, item: T) {
        if reservoir.len() >= size
            && reservoir
                .first_key_value()
                .is_none_or(|(lowest, _)| score <= *lowest)
        {
            return;
        }
        reservoir.insert(score, item);
        if reservoir.len() > size {
            reservoir.pop_first();
        }
    }

    /// Number of items currently held for `key`.
    pub fn len(&self, key: &K) -> usize {
        self.reservoirs.get(key).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.reservoirs.values().all(BTreeMap::is_empty)
    }

    /// Consume the reservoir, returning the samples for each key in descending score order.
    pub fn into_samples(self) -> BTreeMap<K, Vec<T>> {
        self.reservoirs
            .into_iter()
            .filter(|(_, r)| !r.is_empty())
            .map(|(k, r)| (k, r.into_values().rev().collect()))
            .collect()
    }
}

/// Salt distinguishing standalone sampling draws from other per-record draws.
const SAMPLE_SALT: u64 = 0x7361_6d70;

/// Result of [`sample_weighted`].
#[derive(Debug, Clone)]
pub struct Sampled<K, T> {
    /// Up to `size` items for each key, highest scores first.
    pub samples: BTreeMap<K, Vec<T>>,
    /// Items ignored because their weight was negative or not finite.
    pub skipped: usize,
}

struct SamplePass<'a, K, T, F> {
    size: usize,
    seed: u64,
    seed_key: &'a F,
    _marker: PhantomData<fn() -> (K, T)>,
}

impl<K, T, F> ShardPass for SamplePass<'_, K, T, F>
where
    K: Ord + Clone + Send + Sync,
    T: Clone + Send + Sync,
    F: Fn(&T) -> u64 + Sync,
{
    type Input = (K, Weighted<T>);
    type Partial = (WeightedReservoir<K, T>, usize);

    fn empty(&self) -> Self::Partial {
        (WeightedReservoir::new(self.size), 0)
    }

    fn process(&self, shard: &[Self::Input]) -> Result<Self::Partial> {
        let (mut reservoir, mut skipped) = self.empty();
        for (key, w) in shard {
            // zero weights are legal but can never be drawn.
            if w.weight == 0.0 {
                continue;
            }
            let mut rng = seed::record_rng(self.seed, &[SAMPLE_SALT], (self.seed_key)(&w.item));
            if !reservoir.offer(key.clone(), w.item.clone(), w.weight, &mut rng) {
                skipped += 1;
            }
        }
        Ok((reservoir, skipped))
    }

    fn merge(&self, a: Self::Partial, b: Self::Partial) -> Self::Partial {
        (a.0.merge(b.0), a.1 + b.1)
    }
}

/// Draw up to `size` items per key from a partitioned stream of keyed, weighted items.
///
/// Each item's draw is seeded from `seed` and `seed_key(item)`, so the sample does not depend on
/// how the stream is partitioned. Items sharing a seed key within one key collapse into a single
/// entry.
pub fn sample_weighted<K, T, F>(
    dataset: &Partitioned<(K, Weighted<T>)>,
    size: usize,
    seed: u64,
    seed_key: F,
) -> Result<Sampled<K, T>>
where
    K: Ord + Clone + Send + Sync,
    T: Clone + Send + Sync,
    F: Fn(&T) -> u64 + Sync,
{
    let pass = SamplePass {
        size,
        seed,
        seed_key: &seed_key,
        _marker: PhantomData,
    };
    let (reservoir, skipped) = run_pass(&pass, dataset)?;
    if skipped > 0 {
        warn!("skipped {skipped} items with negative or non-finite weight");
    }
    Ok(Sampled {
        samples: reservoir.into_samples(),
        skipped,
    })
}
