//! Exact floating point summation.
//!
//! [`ExactSum`] holds the running total as a list of non-overlapping partials (Shewchuk's
//! algorithm) so no precision is lost while accumulating. [`ExactSum::value`] rounds the exact
//! total to the nearest `f64`, so the result depends only on the multiset of values added and not
//! on the order they were added or how partial sums were grouped.

/// Exact sum of finite `f64` values.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ExactSum {
    // Non-overlapping, increasing in magnitude.
    partials: Vec<f64>,
}

impl ExactSum {
    pub fn add(&mut self, value: f64) {
        let mut x = value;
        let mut i = 0;
        for j in 0..self.partials.len() {
            let mut y = self.partials[j];
            if x.abs() < y.abs() {
                std::mem::swap(&mut x, &mut y);
            }
            let hi = x + y;
            let lo = y - (hi - x);
            if lo != 0.0 {
                self.partials[i] = lo;
                i += 1;
            }
            x = hi;
        }
        self.partials.truncate(i);
        self.partials.push(x);
    }

    pub fn merge(&mut self, other: &Self) {
        for p in other.partials.iter() {
            self.add(*p);
        }
    }

    /// The exact sum correctly rounded to the nearest `f64`, ties to even.
    pub fn value(&self) -> f64 {
        let p = &self.partials;
        let Some(&top) = p.last() else {
            return 0.0;
        };
        let mut n = p.len() - 1;
        let mut hi = top;
        let mut lo = 0.0;
        while n > 0 {
            let x = hi;
            n -= 1;
            let y = p[n];
            hi = x + y;
            lo = y - (hi - x);
            if lo != 0.0 {
                break;
            }
        }
        // hi + lo is a tie; the remaining partials decide which way it rounds.
        if n > 0 && ((lo < 0.0 && p[n - 1] < 0.0) || (lo > 0.0 && p[n - 1] > 0.0)) {
            let y = lo * 2.0;
            let x = hi + y;
            if y == x - hi {
                hi = x;
            }
        }
        hi
    }
}

impl FromIterator<f64> for ExactSum {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut sum = Self::default();
        for v in iter {
            sum.add(v);
        }
        sum
    }
}

#[cfg(test)]
mod test {
    use rand::{seq::SliceRandom, Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    use super::ExactSum;

    #[test]
    fn no_cancellation_loss() {
        let sum = [1e100, 1.0, -1e100].into_iter().collect::<ExactSum>();
        assert_eq!(sum.value(), 1.0);
        let sum = [0.1; 10].into_iter().collect::<ExactSum>();
        assert_eq!(sum.value(), 1.0);
        assert_eq!(ExactSum::default().value(), 0.0);
    }

    #[test]
    fn rounds_half_way_using_tail() {
        // 1 + 2^-53 is a tie between 1 and 1 + 2^-52; the tiny tail breaks it upward.
        let sum = [1.0, f64::EPSILON / 2.0, 1e-300]
            .into_iter()
            .collect::<ExactSum>();
        assert_eq!(sum.value(), 1.0 + f64::EPSILON);
        let sum = [1.0, f64::EPSILON / 2.0].into_iter().collect::<ExactSum>();
        assert_eq!(sum.value(), 1.0);
    }

    #[test]
    fn independent_of_order_and_grouping() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0x5e5);
        let mut values = (0..1000)
            .map(|_| rng.random_range(-1.0..1.0) * 10f64.powi(rng.random_range(-8..8)))
            .collect::<Vec<f64>>();
        let expected = values.iter().copied().collect::<ExactSum>().value();
        for chunk_size in [1, 7, 64, 333] {
            values.shuffle(&mut rng);
            let mut merged = ExactSum::default();
            for chunk in values.chunks(chunk_size) {
                merged.merge(&chunk.iter().copied().collect());
            }
            assert_eq!(merged.value(), expected);
        }
    }
}
