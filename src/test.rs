//! Shared helpers for unit tests.

use std::sync::Once;

use rand::Rng;
use rand_distr::StandardNormal;

use crate::{
    input::{Record, RecordId},
    FeatureVector,
};

/// `n` vectors of `dimensions` values drawn uniformly from [-1, 1).
pub fn random_vectors(rng: &mut impl Rng, n: usize, dimensions: usize) -> Vec<FeatureVector> {
    (0..n)
        .map(|_| {
            (0..dimensions)
                .map(|_| rng.random_range(-1.0..1.0))
                .collect()
        })
        .collect()
}

/// `per_center` records around each of `centers` with gaussian noise scaled by `spread`.
///
/// Records are grouped by center, in the order of `centers`, and carry sequential ids.
pub fn blobs<const N: usize>(
    rng: &mut impl Rng,
    centers: &[[f64; N]],
    per_center: usize,
    spread: f64,
) -> Vec<Record> {
    centers
        .iter()
        .flat_map(|c| std::iter::repeat_n(c, per_center))
        .enumerate()
        .map(|(i, c)| {
            let v = c
                .iter()
                .map(|x| x + spread * rng.sample::<f64, _>(StandardNormal))
                .collect::<FeatureVector>();
            Record::new(RecordId::Long(i as i64), v)
        })
        .collect()
}

/// Route `tracing` output to the test harness so logs show up for failing tests.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}
