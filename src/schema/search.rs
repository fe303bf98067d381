//! Search bookkeeping types: subsets, trial records and run state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A canonical (lexicographically sorted, duplicate-free) set of descriptor names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescriptorSubset(Vec<String>);

impl DescriptorSubset {
    /// Build a subset from names in any order. Returns `None` if a name repeats.
    pub fn new(mut names: Vec<String>) -> Option<Self> {
        names.sort();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return None;
        }
        Some(Self(names))
    }

    /// Wrap names the caller has already sorted and deduplicated.
    pub(crate) fn from_sorted_unique(names: Vec<String>) -> Self {
        debug_assert!(names.windows(2).all(|w| w[0] < w[1]));
        Self(names)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.binary_search_by(|n| n.as_str().cmp(name)).is_ok()
    }
}

/// Renders as a bracketed, quoted list: `['A', 'B']`.
///
/// Names are quoted like Python string literals, so a name containing `'`
/// but no `"` is wrapped in double quotes.
impl fmt::Display for DescriptorSubset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, name) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write_quoted(f, name)?;
        }
        f.write_str("]")
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    let quote = if name.contains('\'') && !name.contains('"') {
        '"'
    } else {
        '\''
    };
    write!(f, "{quote}")?;
    for c in name.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if c == quote => write!(f, "\\{c}")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "{quote}")
}

/// Counters for a search run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchState {
    /// Sampler seed.
    pub seed: u64,
    /// Accepted trials requested.
    pub requested: usize,
    /// Accepted trials so far.
    pub accepted: usize,
    /// Subsets drawn so far, whatever their fate.
    pub attempts: u64,
    /// Draws discarded by the correlation filter.
    pub rejected: u64,
    /// Draws whose evaluation failed.
    pub failed: u64,
}

impl SearchState {
    pub fn new(seed: u64, requested: usize) -> Self {
        Self {
            seed,
            requested,
            ..Default::default()
        }
    }

    /// Whether the requested number of trials has been accepted.
    pub fn is_complete(&self) -> bool {
        self.accepted >= self.requested
    }

    pub fn remaining(&self) -> usize {
        self.requested.saturating_sub(self.accepted)
    }
}

impl fmt::Display for SearchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} trials accepted after {} attempts ({} rejected, {} failed)",
            self.accepted, self.requested, self.attempts, self.rejected, self.failed
        )
    }
}

/// One accepted trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// 0-based accepted index.
    pub index: usize,
    /// 1-based attempt number that produced this trial.
    pub attempt: u64,
    /// Canonical descriptor subset.
    pub descriptors: DescriptorSubset,
    /// Evaluator summary line, empty when the evaluator printed none.
    pub summary: String,
}

impl fmt::Display for TrialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Step {}: {} | {}",
            self.index, self.descriptors, self.summary
        )
    }
}

/// Why a search run ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// All requested trials were accepted.
    TargetReached,
    /// Cancelled through the cancellation handle.
    Cancelled,
}

/// Outcome of a completed search run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub records: Vec<TrialRecord>,
    pub state: SearchState,
    pub stop_reason: StopReason,
    pub elapsed_seconds: f64,
}
