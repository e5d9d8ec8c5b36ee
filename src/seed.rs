//! Reproducible random streams that do not depend on how a dataset is partitioned.
//!
//! Every random draw that affects the output of a pass comes from a generator seeded by hashing
//! the configured base seed, a per-use salt (round, clustering, ...) and a stable key. Keys are
//! derived from the record itself or supplied by the caller; worker identity and wall-clock time
//! never participate.

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use xxhash_rust::xxh3::{xxh3_64, xxh3_64_with_seed};

/// Mix a base seed with a sequence of salt values into a new seed.
pub fn derive_seed(seed: u64, salt: &[u64]) -> u64 {
    let bytes = salt
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect::<Vec<_>>();
    xxh3_64_with_seed(&bytes, seed)
}

/// Hash arbitrary bytes into a stable 64-bit key.
pub fn stable_key(bytes: &[u8]) -> u64 {
    xxh3_64(bytes)
}

/// Random generator for a single record identified by `record_key`.
pub fn record_rng(seed: u64, salt: &[u64], record_key: u64) -> Xoshiro256PlusPlus {
    Xoshiro256PlusPlus::seed_from_u64(derive_seed(derive_seed(seed, salt), &[record_key]))
}

#[cfg(test)]
mod test {
    use rand::Rng;

    use super::{derive_seed, record_rng};

    #[test]
    fn derive_seed_is_stable_and_salted() {
        assert_eq!(derive_seed(7, &[1, 2]), derive_seed(7, &[1, 2]));
        assert_ne!(derive_seed(7, &[1, 2]), derive_seed(7, &[2, 1]));
        assert_ne!(derive_seed(7, &[1, 2]), derive_seed(8, &[1, 2]));
    }

    #[test]
    fn record_rng_reproducible() {
        let a: Vec<u64> = record_rng(42, &[3], 99).random_iter().take(4).collect();
        let b: Vec<u64> = record_rng(42, &[3], 99).random_iter().take(4).collect();
        let c: Vec<u64> = record_rng(42, &[4], 99).random_iter().take(4).collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
