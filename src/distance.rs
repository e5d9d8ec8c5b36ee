//! Distance kernels shared by the vector primitives and the centers index.
//!
//! With the `simsimd` feature enabled these dispatch to SIMD implementations; otherwise a scalar
//! loop is used. Callers are responsible for checking that inputs have equal length.

#[inline(always)]
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    #[cfg(feature = "simsimd")]
    {
        simsimd::SpatialSimilarity::dot(a, b).expect("same dimensions")
    }
    #[cfg(not(feature = "simsimd"))]
    {
        a.iter().zip(b.iter()).map(|(a, b)| a * b).sum::<f64>()
    }
}

#[inline(always)]
pub(crate) fn l2sq(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    #[cfg(feature = "simsimd")]
    {
        simsimd::SpatialSimilarity::l2sq(a, b).expect("same dimensions")
    }
    #[cfg(not(feature = "simsimd"))]
    {
        a.iter()
            .zip(b.iter())
            .map(|(a, b)| {
                let delta = a - b;
                delta * delta
            })
            .sum::<f64>()
    }
}

/// Squared euclidean distance computed from precomputed squared norms and a dot product.
///
/// Rounding may push the result slightly below zero for identical vectors so it is clamped. NaN
/// inputs produce a NaN distance.
#[inline(always)]
pub(crate) fn l2sq_from_norms(a: &[f64], a_norm: f64, b: &[f64], b_norm: f64) -> f64 {
    let d = a_norm + b_norm - 2.0 * dot(a, b);
    if d < 0.0 {
        0.0
    } else {
        d
    }
}

/// Count of differing bits between two equal length bitmaps.
#[inline(always)]
pub(crate) fn hamming(a: &[u8], b: &[u8]) -> u32 {
    debug_assert_eq!(a.len(), b.len());
    #[cfg(feature = "simsimd")]
    {
        simsimd::BinarySimilarity::hamming(a, b).expect("same dimensions") as u32
    }
    #[cfg(not(feature = "simsimd"))]
    {
        a.iter()
            .zip(b.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum::<u32>()
    }
}

#[cfg(test)]
mod test {
    use super::{dot, hamming, l2sq, l2sq_from_norms};

    #[test]
    fn dot_and_l2sq() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, -5.0, 6.0];
        assert_eq!(dot(&a, &b), 12.0);
        assert_eq!(l2sq(&a, &b), 9.0 + 49.0 + 9.0);
    }

    #[test]
    fn l2sq_from_norms_matches_direct() {
        let a = [0.5, -1.5, 2.25, 8.0];
        let b = [1.0, 1.0, -3.0, 0.125];
        let direct = l2sq(&a, &b);
        let norms = l2sq_from_norms(&a, dot(&a, &a), &b, dot(&b, &b));
        assert!((direct - norms).abs() < 1e-9, "{direct} vs {norms}");
    }

    #[test]
    fn l2sq_from_norms_clamps_to_zero() {
        let a = [0.1, 0.2, 0.3];
        let n = dot(&a, &a);
        assert!(l2sq_from_norms(&a, n, &a, n) >= 0.0);
        let nan = [f64::NAN, 0.0, 0.0];
        assert!(l2sq_from_norms(&nan, dot(&nan, &nan), &a, n).is_nan());
    }

    #[test]
    fn hamming_counts_bits() {
        assert_eq!(hamming(&[0b1010_1010, 0xff], &[0b0101_0101, 0xff]), 8);
        assert_eq!(hamming(&[0, 0], &[0, 0]), 0);
        assert_eq!(hamming(&[0b1, 0b1000_0000], &[0, 0]), 2);
    }
}
