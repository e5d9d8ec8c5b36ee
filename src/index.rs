//! Nearest-center index over candidate centers for several clusterings at once.
//!
//! The index stores, for each clustering, a growable list of candidate points along with their
//! squared lengths so exact distance computation only needs a dot product per candidate.
//!
//! Approximate queries are served by a random hyperplane signature per candidate. Signatures are
//! built lazily on the first approximate query after any mutation and rebuilt in full whenever a
//! candidate is added; rebuilding costs O(candidates * bits * dimensions), which bounds how many
//! candidates an index should reasonably hold. The index is only mutated between passes, so a
//! single built instance can be shared by every worker of a pass.

use std::{ops::Index, sync::OnceLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    distance,
    signature::{Projection, SignatureTable},
    Centers, ClusteringId, Error, FeatureVector, Neighbor, Result, SearchMode,
};

/// Parameters for approximate search.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    /// Number of random hyperplanes, i.e. bits per signature.
    pub signature_bits: usize,
    /// Number of candidates per clustering that are re-ranked with exact distances after
    /// shortlisting by signature.
    pub projection_samples: usize,
    /// Seed for the projection matrix.
    pub seed: u64,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            signature_bits: 128,
            projection_samples: 32,
            seed: 1729,
        }
    }
}

impl IndexParams {
    pub fn validate(&self) -> Result<()> {
        if self.signature_bits == 0 {
            return Err(Error::InvalidConfig("signature_bits must be > 0".into()));
        }
        if self.projection_samples == 0 {
            return Err(Error::InvalidConfig(
                "projection_samples must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    vector: FeatureVector,
    squared_norm: f64,
}

impl Candidate {
    fn new(vector: FeatureVector) -> Self {
        let squared_norm = vector.squared_norm();
        Self {
            vector,
            squared_norm,
        }
    }
}

#[derive(Debug, Clone)]
struct ApproxIndex {
    projection: Projection,
    tables: Vec<SignatureTable>,
}

/// Candidate centers for a fixed number of clusterings with nearest-center queries.
#[derive(Debug, Clone)]
pub struct CentersIndex {
    dimensions: usize,
    params: IndexParams,
    clusterings: Vec<Vec<Candidate>>,
    approx: OnceLock<ApproxIndex>,
}

impl CentersIndex {
    /// Create an index with no candidates for `num_clusterings` clusterings of
    /// `dimensions`-dimensional points.
    pub fn new(num_clusterings: usize, dimensions: usize, params: IndexParams) -> Result<Self> {
        if num_clusterings == 0 {
            return Err(Error::InvalidConfig("num_clusterings must be > 0".into()));
        }
        if dimensions == 0 {
            return Err(Error::InvalidConfig("dimensions must be > 0".into()));
        }
        params.validate()?;
        Ok(Self {
            dimensions,
            params,
            clusterings: vec![vec![]; num_clusterings],
            approx: OnceLock::new(),
        })
    }

    /// Create an index with one clustering per entry in `centers`.
    pub fn from_centers(centers: &[Centers], params: IndexParams) -> Result<Self> {
        let dimensions = centers.first().ok_or(Error::EmptyCenters)?.dimensions();
        let mut index = Self::new(centers.len(), dimensions, params)?;
        for (clustering, c) in centers.iter().enumerate() {
            for p in c.iter() {
                index.add(p.clone(), clustering)?;
            }
        }
        Ok(index)
    }

    /// Create an index for `num_clusterings` clusterings where every clustering starts with all
    /// of `seeds`.
    pub fn with_seeds(
        num_clusterings: usize,
        seeds: &[FeatureVector],
        params: IndexParams,
    ) -> Result<Self> {
        let dimensions = seeds.first().ok_or(Error::EmptyCenters)?.dimensions();
        let mut index = Self::new(num_clusterings, dimensions, params)?;
        for clustering in 0..num_clusterings {
            for s in seeds {
                index.add(s.clone(), clustering)?;
            }
        }
        Ok(index)
    }

    pub fn num_clusterings(&self) -> usize {
        self.clusterings.len()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn params(&self) -> &IndexParams {
        &self.params
    }

    /// Number of candidates in `clustering`.
    pub fn len(&self, clustering: ClusteringId) -> Result<usize> {
        Ok(self.clustering(clustering)?.len())
    }

    /// Total number of candidates across all clusterings.
    pub fn total_len(&self) -> usize {
        self.clusterings.iter().map(Vec::len).sum()
    }

    /// Candidates of `clustering` in insertion order; position is the candidate id.
    pub fn points(
        &self,
        clustering: ClusteringId,
    ) -> Result<impl ExactSizeIterator<Item = &FeatureVector>> {
        Ok(self.clustering(clustering)?.iter().map(|c| &c.vector))
    }

    /// Append `point` to the candidates of `clustering`.
    ///
    /// Invalidates any approximate search structure; it will be rebuilt on the next approximate
    /// query or call to [`CentersIndex::prepare`].
    pub fn add(&mut self, point: FeatureVector, clustering: ClusteringId) -> Result<()> {
        self.check_point(&point)?;
        let len = self.clusterings.len();
        self.clusterings
            .get_mut(clustering)
            .ok_or(Error::ClusteringOutOfRange { clustering, len })?
            .push(Candidate::new(point));
        self.approx = OnceLock::new();
        Ok(())
    }

    /// Build the approximate search structure if it is not current.
    ///
    /// Call once before a pass to avoid having the first approximate query pay for the build.
    pub fn prepare(&self) {
        self.approx();
    }

    /// Return the closest candidate in every clustering to `point`.
    pub fn distances(&self, point: &FeatureVector, mode: SearchMode) -> Result<Distances> {
        self.check_point(point)?;
        let norm = point.squared_norm();
        match mode {
            SearchMode::Exact => (0..self.clusterings.len())
                .map(|c| self.nearest_exact(c, point, norm))
                .collect::<Result<Vec<_>>>()
                .map(Distances),
            SearchMode::Approximate => {
                let approx = self.approx();
                let signature = approx.projection.signature(point);
                (0..self.clusterings.len())
                    .map(|c| self.nearest_approx(approx, c, point, norm, &signature))
                    .collect::<Result<Vec<_>>>()
                    .map(Distances)
            }
        }
    }

    /// Return the closest candidate in `clustering` to `point`.
    pub fn nearest(
        &self,
        point: &FeatureVector,
        clustering: ClusteringId,
        mode: SearchMode,
    ) -> Result<Neighbor> {
        self.check_point(point)?;
        self.clustering(clustering)?;
        let norm = point.squared_norm();
        match mode {
            SearchMode::Exact => self.nearest_exact(clustering, point, norm),
            SearchMode::Approximate => {
                let approx = self.approx();
                let signature = approx.projection.signature(point);
                self.nearest_approx(approx, clustering, point, norm, &signature)
            }
        }
    }

    fn approx(&self) -> &ApproxIndex {
        self.approx.get_or_init(|| {
            debug!(
                "building signatures for {} candidates in {} clusterings",
                self.total_len(),
                self.clusterings.len()
            );
            let projection = Projection::new(
                self.dimensions,
                self.params.signature_bits,
                self.params.seed,
            );
            let tables = self
                .clusterings
                .iter()
                .map(|c| SignatureTable::build(&projection, c.iter().map(|c| c.vector.as_slice())))
                .collect();
            ApproxIndex { projection, tables }
        })
    }

    fn clustering(&self, clustering: ClusteringId) -> Result<&[Candidate]> {
        self.clusterings
            .get(clustering)
            .map(Vec::as_slice)
            .ok_or(Error::ClusteringOutOfRange {
                clustering,
                len: self.clusterings.len(),
            })
    }

    fn check_point(&self, point: &FeatureVector) -> Result<()> {
        if point.dimensions() == self.dimensions {
            Ok(())
        } else {
            Err(Error::DimensionMismatch {
                expected: self.dimensions,
                actual: point.dimensions(),
            })
        }
    }

    fn nearest_exact(&self, clustering: ClusteringId, point: &[f64], norm: f64) -> Result<Neighbor> {
        Self::nearest_of(
            self.clustering(clustering)?.iter().enumerate(),
            point,
            norm,
        )
    }

    fn nearest_approx(
        &self,
        approx: &ApproxIndex,
        clustering: ClusteringId,
        point: &[f64],
        norm: f64,
        signature: &[u8],
    ) -> Result<Neighbor> {
        let candidates = self.clustering(clustering)?;
        let shortlist =
            approx.tables[clustering].shortlist(signature, self.params.projection_samples);
        Self::nearest_of(
            shortlist.into_iter().map(|i| (i, &candidates[i])),
            point,
            norm,
        )
    }

    /// Lowest-distance candidate; on equal distance the lowest id wins.
    fn nearest_of<'a>(
        candidates: impl Iterator<Item = (usize, &'a Candidate)>,
        point: &[f64],
        norm: f64,
    ) -> Result<Neighbor> {
        candidates
            .map(|(i, c)| {
                Neighbor::new(
                    i,
                    distance::l2sq_from_norms(point, norm, &c.vector, c.squared_norm),
                )
            })
            .min()
            .ok_or(Error::EmptyCenters)
    }
}

/// The closest candidate for each clustering, indexed by clustering id.
#[derive(Debug, Clone, PartialEq)]
pub struct Distances(Vec<Neighbor>);

impl Distances {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Neighbor> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<Neighbor> {
        self.0
    }
}

impl Index<ClusteringId> for Distances {
    type Output = Neighbor;

    fn index(&self, index: ClusteringId) -> &Self::Output {
        &self.0[index]
    }
}
