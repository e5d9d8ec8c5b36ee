//! Run configuration for clustering jobs.

use std::{fs::File, io, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{index::IndexParams, init::InitParams, lloyd::LloydParams, Error, Result};

/// How a consuming operation queries a [`crate::CentersIndex`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Linear scan over every candidate.
    Exact,
    /// Shortlist candidates by signature hamming distance before computing exact distances.
    /// May report a candidate that is not the closest.
    Approximate,
}

impl Default for SearchMode {
    fn default() -> Self {
        Self::Exact
    }
}

impl FromStr for SearchMode {
    type Err = io::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "exact" => Ok(Self::Exact),
            "approximate" | "approx" => Ok(Self::Approximate),
            x => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unknown search mode {x}"),
            )),
        }
    }
}

/// All recognized options for a clustering job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of clusterings (folds or candidate k values) tracked in parallel.
    pub num_clusterings: usize,
    /// Base seed for every random draw made by the job.
    pub seed: u64,
    /// Worker threads used for passes. `None` uses one thread per core.
    pub num_threads: Option<usize>,
    pub index: IndexParams,
    pub init: InitParams,
    pub lloyd: LloydParams,
    /// Mode used when labeling records with their nearest center.
    pub assignment_mode: SearchMode,
    /// Mode used when computing clustering costs.
    pub cost_mode: SearchMode,
    /// Mode used when assigning records for covariance estimation.
    pub covariance_mode: SearchMode,
    /// Mode used when assigning records for outlier scoring.
    pub outlier_mode: SearchMode,
    /// Fail outlier scoring when cluster sizes differ from the sizes the models were built from.
    pub validate_outlier_counts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_clusterings: 1,
            seed: 42,
            num_threads: None,
            index: IndexParams::default(),
            init: InitParams::default(),
            lloyd: LloydParams::default(),
            assignment_mode: SearchMode::Exact,
            cost_mode: SearchMode::Exact,
            covariance_mode: SearchMode::Exact,
            outlier_mode: SearchMode::Exact,
            validate_outlier_counts: true,
        }
    }
}

impl Config {
    /// Parse and validate a JSON configuration. Missing fields take default values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let config: Self = serde_json::from_reader(io::BufReader::new(File::open(path)?))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("config is always serializable")
    }

    /// Check that every option is usable.
    pub fn validate(&self) -> Result<()> {
        let invalid = |m: &str| Err(Error::InvalidConfig(m.to_string()));
        if self.num_clusterings == 0 {
            return invalid("num_clusterings must be > 0");
        }
        if self.num_threads == Some(0) {
            return invalid("num_threads must be > 0 when set");
        }
        self.index.validate()?;
        self.init.validate()?;
        Ok(())
    }

    /// Build a rayon pool with the configured number of threads. Run passes inside
    /// [`rayon::ThreadPool::install`] to use it.
    pub fn thread_pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads.unwrap_or(0))
            .thread_name(|i| format!("kmeans-worker-{i}"))
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use crate::Error;

    use super::{Config, SearchMode};

    #[test]
    fn search_mode_from_str() {
        assert_eq!("exact".parse::<SearchMode>().unwrap(), SearchMode::Exact);
        assert_eq!(
            "approximate".parse::<SearchMode>().unwrap(),
            SearchMode::Approximate
        );
        assert!("fuzzy".parse::<SearchMode>().is_err());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config = Config::from_json(
            r#"{"num_clusterings": 3, "init": {"iterations": 2, "samples_per_iteration": 7},
                "lloyd": {"iterations": 4, "mode": "approximate"}}"#,
        )
        .unwrap();
        assert_eq!(config.num_clusterings, 3);
        assert_eq!(config.init.iterations, 2);
        assert_eq!(config.init.samples_per_iteration, 7);
        assert_eq!(config.lloyd.mode, SearchMode::Approximate);
        assert_eq!(config.index, Config::default().index);
        assert_eq!(config.assignment_mode, SearchMode::Exact);
        assert!(config.validate_outlier_counts);
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(matches!(
            Config::from_json(r#"{"num_clusterings": 0}"#),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_json(r#"{"index": {"signature_bits": 0}}"#),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_json("not json"),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn round_trip_through_file() {
        let config = Config {
            num_clusterings: 2,
            num_threads: Some(2),
            ..Config::default()
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_json().as_bytes()).unwrap();
        assert_eq!(Config::from_path(file.path()).unwrap(), config);
        assert_eq!(config.thread_pool().unwrap().current_num_threads(), 2);
    }
}
