//! Random hyperplane (SimHash) signatures used to shortlist candidate centers.
//!
//! Each signature bit is the sign of the dot product between a vector and one row of a Gaussian
//! projection matrix. Vectors that are close in angle agree on most bits, so the hamming distance
//! between signatures is a cheap proxy for closeness.

use std::collections::BinaryHeap;

use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::distance;

/// Pack a sequence of projections into a bitmap, one bit per projection.
///
/// Values > 0 produce a 1 bit, all others a 0 bit; bit `i` of byte `j` holds projection
/// `j * 8 + i`.
pub(crate) fn sign_quantize(projections: &[f64]) -> Vec<u8> {
    projections
        .chunks(8)
        .map(|c| {
            c.iter()
                .enumerate()
                .filter_map(|(i, d)| if *d > 0.0 { Some(1u8 << i) } else { None })
                .fold(0, |a, b| a | b)
        })
        .collect()
}

/// A Gaussian random projection from `dimensions` to `bits` values.
#[derive(Debug, Clone)]
pub(crate) struct Projection {
    dimensions: usize,
    bits: usize,
    // bits rows of dimensions columns, row-major.
    matrix: Vec<f64>,
}

impl Projection {
    pub fn new(dimensions: usize, bits: usize, seed: u64) -> Self {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let matrix = (0..dimensions * bits)
            .map(|_| rng.sample::<f64, _>(StandardNormal))
            .collect();
        Self {
            dimensions,
            bits,
            matrix,
        }
    }

    pub fn signature_bytes(&self) -> usize {
        self.bits.div_ceil(8)
    }

    /// Compute the signature of `vector`, which must have `dimensions` values.
    pub fn signature(&self, vector: &[f64]) -> Vec<u8> {
        debug_assert_eq!(vector.len(), self.dimensions);
        let projections = self
            .matrix
            .chunks(self.dimensions)
            .map(|row| distance::dot(row, vector))
            .collect::<Vec<_>>();
        sign_quantize(&projections)
    }
}

/// Signatures for a list of points, stored end-to-end.
#[derive(Debug, Clone, Default)]
pub(crate) struct SignatureTable {
    stride: usize,
    signatures: Vec<u8>,
}

impl SignatureTable {
    pub fn build<'a>(projection: &Projection, points: impl Iterator<Item = &'a [f64]>) -> Self {
        let stride = projection.signature_bytes();
        let mut signatures = Vec::new();
        for p in points {
            signatures.extend_from_slice(&projection.signature(p));
        }
        Self { stride, signatures }
    }

    pub fn len(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.signatures.len() / self.stride
        }
    }

    /// Return the indices of the `limit` signatures closest to `query` by hamming distance.
    ///
    /// Uses a bounded max-heap rather than sorting every candidate. Ties are broken in favor of
    /// the lower index. The returned indices are in no particular order.
    pub fn shortlist(&self, query: &[u8], limit: usize) -> Vec<usize> {
        if limit >= self.len() {
            return (0..self.len()).collect();
        }
        let mut heap: BinaryHeap<(u32, usize)> = BinaryHeap::with_capacity(limit + 1);
        for (i, s) in self.signatures.chunks(self.stride).enumerate() {
            let h = distance::hamming(query, s);
            if heap.len() < limit {
                heap.push((h, i));
            } else if heap.peek().is_some_and(|top| (h, i) < *top) {
                heap.pop();
                heap.push((h, i));
            }
        }
        heap.into_iter().map(|(_, i)| i).collect()
    }
}
