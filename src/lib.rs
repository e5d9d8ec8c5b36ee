//! kmeans_scale clusters large partitioned datasets with k-means||.
//!
//! Clustering proceeds in passes over a [`input::Partitioned`] dataset. Each pass is a pure
//! function of a partition plus an associative merge of partial results, so partitions may be
//! processed in parallel and the outcome does not depend on how records were partitioned.
//!
//! The usual flow is:
//! 1. [`init::oversample`] builds a weighted pool of candidate centers for each clustering.
//! 2. [`kmeans::reduce_candidates`] shrinks each pool to exactly `k` centers locally.
//! 3. [`lloyd::refine`] polishes the centers against the full dataset.
//! 4. [`scoring`], [`covariance`] and [`mahalanobis`] label, cost and audit the clusters.
//!
//! [`pipeline::train`] runs steps 1-3 from a [`Config`].

pub mod centers;
pub mod config;
pub mod covariance;
mod distance;
pub mod index;
pub mod init;
pub mod input;
pub mod kmeans;
pub mod lloyd;
pub mod mahalanobis;
pub mod pass;
pub mod pipeline;
pub mod reservoir;
pub mod scoring;
pub mod seed;
mod signature;
mod sum;
#[cfg(test)]
mod test;
pub mod vector;

use std::{cmp::Ordering, io};

use serde::{Deserialize, Serialize};

pub use centers::Centers;
pub use config::{Config, SearchMode};
pub use index::{CentersIndex, Distances};
pub use vector::{FeatureVector, Weighted};

/// Identifies one of several clusterings tracked in the same pass.
pub type ClusteringId = usize;

/// A single cluster within a single clustering.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterKey {
    pub clustering: ClusteringId,
    pub center: usize,
}

impl ClusterKey {
    pub fn new(clustering: ClusteringId, center: usize) -> Self {
        Self { clustering, center }
    }
}

/// `Neighbor` is a center id and the squared distance from some query point to that center.
///
/// When compared `Neighbor`s are ordered first by distance then by center id, so the minimum
/// over a set of neighbors breaks ties toward the lowest center id.
#[derive(Debug, Copy, Clone)]
pub struct Neighbor {
    center: usize,
    distance: f64,
}

impl Neighbor {
    pub fn new(center: usize, distance: f64) -> Self {
        Self { center, distance }
    }

    pub fn center(&self) -> usize {
        self.center
    }

    /// Squared euclidean distance to the center.
    pub fn distance(&self) -> f64 {
        self.distance
    }
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.center == other.center && self.distance.total_cmp(&other.distance).is_eq()
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.center.cmp(&other.center))
    }
}

/// Errors produced by clustering operations.
///
/// All variants describe configuration or data/model mismatches; they are returned as soon as
/// they are detected and are never coerced into a default.
#[derive(Clone, PartialEq, Debug)]
pub enum Error {
    /// A set of centers or an index clustering had no points.
    EmptyCenters,
    /// A vector did not have the dimensionality of the index or centers it was used with.
    DimensionMismatch { expected: usize, actual: usize },
    /// A clustering id was not tracked by the index.
    ClusteringOutOfRange { clustering: ClusteringId, len: usize },
    /// Outlier models do not match the centers or data they are applied to.
    ModelMismatch(String),
    /// A configuration value was rejected.
    InvalidConfig(String),
    /// A numerical routine failed.
    Numerical(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyCenters => write!(f, "centers must contain at least one point"),
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "dimension mismatch: expected {expected} actual {actual}")
            }
            Self::ClusteringOutOfRange { clustering, len } => {
                write!(f, "clustering {clustering} out of range for {len} clusterings")
            }
            Self::ModelMismatch(m) => write!(f, "model mismatch: {m}"),
            Self::InvalidConfig(m) => write!(f, "invalid config: {m}"),
            Self::Numerical(m) => write!(f, "numerical error: {m}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        let kind = match &value {
            Error::Numerical(_) => io::ErrorKind::Other,
            _ => io::ErrorKind::InvalidInput,
        };
        io::Error::new(kind, value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
