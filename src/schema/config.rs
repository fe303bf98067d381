//! Configuration types for descriptor-subset search runs.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default column-name pad width of the evaluator matrix format.
pub const DEFAULT_TAG_WIDTH: usize = 14;

/// Default marker that prefixes the evaluator's fit-quality summary line.
pub const DEFAULT_MARKER: &str = "Max ";

fn default_jobs() -> usize {
    1
}

fn default_delimiter() -> char {
    ','
}

/// Top-level search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Number of descriptors per sampled subset.
    pub subset_size: usize,
    /// Number of accepted trials to produce.
    pub trials: usize,
    /// Seed for the subset sampler.
    pub seed: u64,
    /// Maximum allowed absolute pairwise correlation inside a subset.
    /// `None` disables the collinearity filter.
    #[serde(default)]
    pub max_pairwise_correlation: Option<f64>,
    /// Optional cap on attempts (rejected and failed draws included).
    /// `None` keeps sampling until the trial target is met.
    #[serde(default)]
    pub max_attempts: Option<u64>,
    /// Number of candidates evaluated concurrently.
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    /// Field delimiter of the dataset file.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// External evaluator invocation.
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    /// Matrix artifact layout.
    #[serde(default)]
    pub artifact: ArtifactConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            subset_size: 4,
            trials: 100,
            seed: 0,
            max_pairwise_correlation: None,
            max_attempts: None,
            jobs: default_jobs(),
            delimiter: default_delimiter(),
            evaluator: EvaluatorConfig::default(),
            artifact: ArtifactConfig::default(),
        }
    }
}

/// How to invoke the external regression evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Path (or bare name on `PATH`) of the evaluator executable.
    pub program: PathBuf,
    /// Arguments placed before the artifact path.
    #[serde(default)]
    pub args: Vec<String>,
    /// Prefix of the summary line in the evaluator's stdout.
    #[serde(default = "default_marker")]
    pub marker: String,
    /// Wall-clock limit per invocation, in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_marker() -> String {
    DEFAULT_MARKER.to_string()
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("MLR.x"),
            args: Vec::new(),
            marker: default_marker(),
            timeout_secs: None,
        }
    }
}

/// Matrix artifact layout and boilerplate sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// File prepended verbatim to every artifact.
    pub header_path: PathBuf,
    /// File appended verbatim to every artifact.
    pub trailer_path: PathBuf,
    /// Minimum width the column name is padded to.
    #[serde(default = "default_tag_width")]
    pub tag_width: usize,
}

fn default_tag_width() -> usize {
    DEFAULT_TAG_WIDTH
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            header_path: PathBuf::from("matrix.head"),
            trailer_path: PathBuf::from("sterics.dat"),
            tag_width: DEFAULT_TAG_WIDTH,
        }
    }
}

impl SearchConfig {
    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subset_size == 0 {
            return Err(ConfigError::InvalidSubsetSize);
        }
        if self.trials == 0 {
            return Err(ConfigError::InvalidTrialCount);
        }
        if self.jobs == 0 {
            return Err(ConfigError::InvalidJobs);
        }
        if let Some(threshold) = self.max_pairwise_correlation
            && !(0.0..=1.0).contains(&threshold)
        {
            return Err(ConfigError::InvalidThreshold(threshold));
        }
        if let Some(max_attempts) = self.max_attempts
            && max_attempts < self.trials as u64
        {
            return Err(ConfigError::AttemptCapBelowTrials {
                max_attempts,
                trials: self.trials,
            });
        }
        if self.artifact.tag_width == 0 {
            return Err(ConfigError::InvalidTagWidth);
        }
        if self.evaluator.marker.is_empty() {
            return Err(ConfigError::EmptyMarker);
        }
        if self.evaluator.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Subset size must be non-zero")]
    InvalidSubsetSize,
    #[error("Trial count must be non-zero")]
    InvalidTrialCount,
    #[error("Job count must be non-zero")]
    InvalidJobs,
    #[error("Max pairwise correlation must lie in [0, 1], got {0}")]
    InvalidThreshold(f64),
    #[error("Attempt cap {max_attempts} is below the requested {trials} trials")]
    AttemptCapBelowTrials { max_attempts: u64, trials: usize },
    #[error("Tag width must be non-zero")]
    InvalidTagWidth,
    #[error("Summary marker must not be empty")]
    EmptyMarker,
    #[error("Evaluator timeout must be positive")]
    InvalidTimeout,
    #[error("Cannot read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}
