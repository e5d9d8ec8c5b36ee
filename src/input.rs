//! Records and partitioned datasets consumed by clustering passes.

use std::ops::Index;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{seed, ClusteringId, FeatureVector};

/// External identifier carried by a record so results can be joined back to the source data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RecordId {
    #[default]
    None,
    Long(i64),
    Text(String),
}

/// A feature vector with an optional external identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub vector: FeatureVector,
}

impl Record {
    pub fn new(id: RecordId, vector: impl Into<FeatureVector>) -> Self {
        Self {
            id,
            vector: vector.into(),
        }
    }

    /// A record without an external identifier.
    pub fn anonymous(vector: impl Into<FeatureVector>) -> Self {
        Self::new(RecordId::None, vector)
    }

    /// Stable key used to seed random draws for this record.
    ///
    /// Derived from the external id when present, otherwise from the bits of the vector. Records
    /// with identical vectors and no id share a key and therefore share random draws.
    pub fn seed_key(&self) -> u64 {
        match &self.id {
            RecordId::Long(v) => seed::stable_key(&v.to_le_bytes()),
            RecordId::Text(s) => seed::stable_key(s.as_bytes()),
            RecordId::None => seed::stable_key(bytemuck::cast_slice(self.vector.as_slice())),
        }
    }
}

impl From<FeatureVector> for Record {
    fn from(value: FeatureVector) -> Self {
        Self::anonymous(value)
    }
}

/// A record assigned to a single clustering (a fold, or one of several candidate k values).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldedRecord {
    pub fold: ClusteringId,
    pub record: Record,
}

/// A dataset split into partitions that may be processed independently.
///
/// Partitions model the shards of a distributed dataset. No operation in this crate depends on
/// how records are spread across partitions, only on the records themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct Partitioned<T>(Vec<Vec<T>>);

impl<T> Partitioned<T> {
    pub fn new(partitions: Vec<Vec<T>>) -> Self {
        Self(partitions)
    }

    /// Deal `items` round-robin into `num_partitions` partitions.
    pub fn round_robin(items: impl IntoIterator<Item = T>, num_partitions: usize) -> Self {
        let num_partitions = num_partitions.max(1);
        let mut partitions = (0..num_partitions).map(|_| Vec::new()).collect::<Vec<_>>();
        for (i, item) in items.into_iter().enumerate() {
            partitions[i % num_partitions].push(item);
        }
        Self(partitions)
    }

    /// Split `items` into contiguous partitions of at most `chunk_size` items.
    pub fn chunked(items: Vec<T>, chunk_size: usize) -> Self
    where
        T: Clone,
    {
        Self(
            items
                .chunks(chunk_size.max(1))
                .map(|c| c.to_vec())
                .collect(),
        )
    }

    pub fn num_partitions(&self) -> usize {
        self.0.len()
    }

    /// Total number of items across all partitions.
    pub fn len(&self) -> usize {
        self.0.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Vec::is_empty)
    }

    pub fn partitions(&self) -> &[Vec<T>] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.iter().flatten()
    }

    /// Apply `f` to every item, preserving partitioning.
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Partitioned<U> {
        Partitioned(
            self.0
                .iter()
                .map(|p| p.iter().map(&mut f).collect())
                .collect(),
        )
    }

    /// Apply `f` to every item, emitting any number of outputs per item.
    pub fn flat_map<U, I>(&self, mut f: impl FnMut(&T) -> I) -> Partitioned<U>
    where
        I: IntoIterator<Item = U>,
    {
        Partitioned(
            self.0
                .iter()
                .map(|p| p.iter().flat_map(&mut f).collect())
                .collect(),
        )
    }
}

impl<T> Index<usize> for Partitioned<T> {
    type Output = [T];

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl<T> FromIterator<Vec<T>> for Partitioned<T> {
    fn from_iter<I: IntoIterator<Item = Vec<T>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Salt distinguishing fold assignment draws from other per-record draws.
const FOLD_SALT: u64 = 0x666f_6c64;

/// Assign every record to one of `num_folds` folds uniformly at random.
///
/// The fold of a record depends only on `seed` and the record's [`Record::seed_key`], so the
/// assignment is the same however the dataset is partitioned.
pub fn assign_folds(
    dataset: &Partitioned<Record>,
    num_folds: usize,
    seed: u64,
) -> Partitioned<FoldedRecord> {
    let num_folds = num_folds.max(1);
    dataset.map(|r| FoldedRecord {
        fold: seed::record_rng(seed, &[FOLD_SALT], r.seed_key()).random_range(0..num_folds),
        record: r.clone(),
    })
}

/// Tag every record with every clustering id in `0..num_clusterings`.
///
/// Used when several clusterings (e.g. different k values) are trained over the same data.
/// Vectors are shared, not copied.
pub fn tag_all(dataset: &Partitioned<Record>, num_clusterings: usize) -> Partitioned<FoldedRecord> {
    dataset.flat_map(|r| {
        (0..num_clusterings)
            .map(|fold| FoldedRecord {
                fold,
                record: r.clone(),
            })
            .collect::<Vec<_>>()
    })
}
