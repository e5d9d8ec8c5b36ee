//! Local weighted k-means for reducing an oversampled candidate pool to exactly `k` centers.
//!
//! The candidate pool produced by [`crate::init::oversample`] is small enough to cluster in
//! memory, so this runs on a single machine: weighted k-means++ seeding, repeated
//! `init_iters` times keeping the cheapest seeding, followed by weighted Lloyd iterations.

use rand::{distr::weighted::WeightedIndex, prelude::*};
use rayon::prelude::*;

use crate::{distance, Centers, Error, FeatureVector, Result, Weighted};

/// Parameters for local k-means.
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    /// Maximum number of iterations to run before exiting, even if the centers have not converged.
    pub iters: usize,
    /// Number of k-means++ seedings to try; the one with the lowest weighted cost is kept.
    pub init_iters: usize,
    /// Convergence epsilon. Computation has converged when no center moves by more than this
    /// squared distance between two iterations.
    pub epsilon: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            iters: 30,
            init_iters: 3,
            epsilon: 1e-9,
        }
    }
}

/// Reduce weighted `candidates` to at most `k` centers.
///
/// If there are no more than `k` distinct candidates they are all returned. Candidates with zero
/// weight only influence the result if every candidate has zero weight, in which case all are
/// weighted equally.
pub fn reduce_candidates(
    candidates: &[Weighted<FeatureVector>],
    k: usize,
    params: &Params,
    rng: &mut impl Rng,
) -> Result<Centers> {
    if k == 0 {
        return Err(Error::InvalidConfig("k must be > 0".into()));
    }
    if let Some(w) = candidates
        .iter()
        .find(|c| !(c.weight >= 0.0 && c.weight.is_finite()))
    {
        return Err(Error::Numerical(format!("invalid candidate weight {}", w.weight)));
    }
    let distinct = Centers::new(candidates.iter().map(|c| c.item.clone()))?;
    if distinct.len() <= k {
        return Ok(distinct);
    }

    let points = candidates.iter().map(|c| c.item.clone()).collect::<Vec<_>>();
    let mut weights = candidates.iter().map(|c| c.weight).collect::<Vec<_>>();
    if weights.iter().all(|w| *w == 0.0) {
        weights.fill(1.0);
    }

    let mut centroids = (0..params.init_iters.max(1))
        .map(|_| initialize_centroids(&points, &weights, k, rng))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .expect("non-zero iters")
        .0;
    for _ in 0..params.iters {
        let new_centroids = update_centroids(&points, &weights, &centroids);
        let moved = centroids
            .iter()
            .zip(new_centroids.iter())
            .map(|(a, b)| distance::l2sq(a, b))
            .fold(0.0, f64::max);
        centroids = new_centroids;
        if moved < params.epsilon {
            break;
        }
    }
    Centers::new(centroids)
}

/// Weighted k-means++: each new center is drawn with probability proportional to
/// `weight * distance`. Returns the centers and the weighted cost of the seeding.
fn initialize_centroids(
    points: &[FeatureVector],
    weights: &[f64],
    k: usize,
    rng: &mut impl Rng,
) -> (Vec<FeatureVector>, f64) {
    let first = WeightedIndex::new(weights)
        .expect("positive total weight")
        .sample(rng);
    let mut centroids = vec![points[first].clone()];
    let mut assignments = compute_assignments(points, &centroids);
    while centroids.len() < k {
        let scores = assignments
            .iter()
            .zip(weights)
            .map(|(a, w)| a.1 * w)
            .collect::<Vec<_>>();
        let index = match WeightedIndex::new(&scores) {
            Ok(d) => d.sample(rng),
            // every remaining point with weight sits on a center; take the farthest point.
            Err(_) => match assignments
                .iter()
                .enumerate()
                .filter(|(_, a)| a.1 > 0.0)
                .max_by(|a, b| a.1 .1.total_cmp(&b.1 .1))
            {
                Some((i, _)) => i,
                None => break,
            },
        };

        let centroid = centroids.len();
        centroids.push(points[index].clone());
        let centroid_vector = &centroids[centroid];
        let distances = points
            .par_iter()
            .map(|p| distance::l2sq(p, centroid_vector))
            .collect::<Vec<_>>();
        for ((cluster, distance), new_distance) in assignments.iter_mut().zip(distances) {
            if new_distance < *distance {
                *cluster = centroid;
                *distance = new_distance;
            }
        }
    }
    let cost = assignments
        .iter()
        .zip(weights)
        .map(|(a, w)| a.1 * w)
        .sum::<f64>();
    (centroids, cost)
}

/// Move every centroid to the weighted mean of the points assigned to it. Centroids with no
/// assigned weight are left in place.
fn update_centroids(
    points: &[FeatureVector],
    weights: &[f64],
    centroids: &[FeatureVector],
) -> Vec<FeatureVector> {
    let dimensions = centroids[0].dimensions();
    let mut sums = vec![vec![0.0; dimensions]; centroids.len()];
    let mut totals = vec![0.0; centroids.len()];
    for ((p, w), (cluster, _)) in points
        .iter()
        .zip(weights)
        .zip(compute_assignments(points, centroids))
    {
        totals[cluster] += *w;
        for (s, v) in sums[cluster].iter_mut().zip(p.iter()) {
            *s += *w * *v;
        }
    }
    centroids
        .iter()
        .zip(sums.into_iter().zip(totals))
        .map(|(c, (sum, total))| {
            if total > 0.0 {
                sum.into_iter().map(|s| s / total).collect()
            } else {
                c.clone()
            }
        })
        .collect()
}

/// For each point compute the closest centroid and the squared distance to that centroid.
fn compute_assignments(points: &[FeatureVector], centroids: &[FeatureVector]) -> Vec<(usize, f64)> {
    points
        .par_iter()
        .map(|p| {
            centroids
                .iter()
                .map(|c| distance::l2sq(p, c))
                .enumerate()
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .expect("at least one centroid")
        })
        .collect()
}

#[cfg(test)]
mod test {
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    use crate::{Error, FeatureVector, Weighted};

    use super::{reduce_candidates, Params};

    fn weighted(points: &[([f64; 2], f64)]) -> Vec<Weighted<FeatureVector>> {
        points
            .iter()
            .map(|(p, w)| Weighted::new(FeatureVector::from(*p), *w))
            .collect()
    }

    fn sorted(centers: crate::Centers) -> Vec<Vec<f64>> {
        let mut v = centers
            .iter()
            .map(|c| c.as_slice().to_vec())
            .collect::<Vec<_>>();
        v.sort_by(|a, b| a[0].total_cmp(&b[0]));
        v
    }

    #[test]
    fn four_points() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0x4);
        let candidates = weighted(&[
            ([1.0, 1.0], 1.0),
            ([5.0, 4.0], 1.0),
            ([4.0, 3.0], 1.0),
            ([2.0, 1.0], 1.0),
        ]);
        let centers = reduce_candidates(&candidates, 2, &Params::default(), &mut rng).unwrap();
        assert_eq!(sorted(centers), vec![vec![1.5, 1.0], vec![4.5, 3.5]]);
    }

    #[test]
    fn weights_pull_centers() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0x5);
        let candidates = weighted(&[([0.0, 0.0], 3.0), ([1.0, 0.0], 1.0), ([10.0, 0.0], 1.0)]);
        let centers = reduce_candidates(&candidates, 2, &Params::default(), &mut rng).unwrap();
        assert_eq!(sorted(centers), vec![vec![0.25, 0.0], vec![10.0, 0.0]]);
    }

    #[test]
    fn few_candidates_returned_whole() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0x6);
        let candidates = weighted(&[([0.0, 0.0], 0.0), ([1.0, 0.0], 0.0), ([0.0, 0.0], 2.0)]);
        let centers = reduce_candidates(&candidates, 3, &Params::default(), &mut rng).unwrap();
        assert_eq!(centers.len(), 2);
    }

    #[test]
    fn zero_weights_treated_equally() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0x7);
        let candidates = weighted(&[
            ([0.0, 0.0], 0.0),
            ([0.0, 1.0], 0.0),
            ([9.0, 0.0], 0.0),
            ([9.0, 1.0], 0.0),
        ]);
        let centers = reduce_candidates(&candidates, 2, &Params::default(), &mut rng).unwrap();
        assert_eq!(sorted(centers), vec![vec![0.0, 0.5], vec![9.0, 0.5]]);
    }

    #[test]
    fn bad_input_rejected() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0x8);
        assert_eq!(
            reduce_candidates(&[], 2, &Params::default(), &mut rng),
            Err(Error::EmptyCenters)
        );
        let candidates = weighted(&[([0.0, 0.0], 1.0), ([1.0, 0.0], -1.0), ([2.0, 0.0], 1.0)]);
        assert!(matches!(
            reduce_candidates(&candidates, 2, &Params::default(), &mut rng),
            Err(Error::Numerical(_))
        ));
        assert!(matches!(
            reduce_candidates(&candidates, 0, &Params::default(), &mut rng),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn bad_weights_rejected_with_few_candidates() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0x9);
        for bad in [-1.0, f64::NAN, f64::INFINITY] {
            let candidates = weighted(&[([0.0, 0.0], 1.0), ([1.0, 0.0], bad)]);
            assert!(matches!(
                reduce_candidates(&candidates, 4, &Params::default(), &mut rng),
                Err(Error::Numerical(_))
            ));
        }
    }
}
