//! Pairwise collinearity filter.
//!
//! Undefined coefficients (constant columns, non-finite cells, fewer than two
//! rows) are treated as infinite correlation so they never pass a threshold.

use crate::schema::{Dataset, DescriptorSubset};

/// Pearson correlation coefficient between two equal-length sequences.
///
/// Returns `None` when the coefficient is undefined.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len();
    if n != b.len() || n < 2 {
        return None;
    }
    if a.iter().chain(b).any(|v| !v.is_finite()) {
        return None;
    }
    if is_constant(a) || is_constant(b) {
        return None;
    }

    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let denom = (var_a * var_b).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return None;
    }
    Some((cov / denom).clamp(-1.0, 1.0))
}

fn is_constant(values: &[f64]) -> bool {
    values.iter().all(|&v| v == values[0])
}

/// Absolute Pearson correlations among the descriptors of one subset.
#[derive(Debug, Clone)]
pub struct CorrelationMatrix {
    size: usize,
    values: Vec<f64>,
}

impl CorrelationMatrix {
    /// Compute over all dataset rows. Undefined pairs are stored as infinity.
    pub fn compute(dataset: &Dataset, subset: &DescriptorSubset) -> Self {
        let columns: Vec<Option<&[f64]>> = subset
            .iter()
            .map(|name| dataset.descriptor(name).map(|c| c.values()))
            .collect();

        let size = columns.len();
        let mut values = vec![0.0; size * size];

        for i in 0..size {
            values[i * size + i] = 1.0;
            for j in (i + 1)..size {
                let r = match (columns[i], columns[j]) {
                    (Some(a), Some(b)) => pearson(a, b).map_or(f64::INFINITY, f64::abs),
                    _ => f64::INFINITY,
                };
                values[i * size + j] = r;
                values[j * size + i] = r;
            }
        }

        Self { size, values }
    }

    /// Number of descriptors.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Coefficient for the pair `(i, j)`.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.size + j]
    }

    /// Strictly upper-triangular entries as `(i, j, |r|)`.
    pub fn upper_pairs(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.size)
            .flat_map(move |i| ((i + 1)..self.size).map(move |j| (i, j, self.get(i, j))))
    }

    /// Largest off-diagonal coefficient, `None` for fewer than two descriptors.
    pub fn max_pairwise(&self) -> Option<f64> {
        self.upper_pairs().map(|(_, _, r)| r).reduce(f64::max)
    }
}

/// Whether every pairwise absolute correlation in `subset` is `<= threshold`.
///
/// With no threshold the filter is disabled and nothing is computed.
pub fn passes(dataset: &Dataset, subset: &DescriptorSubset, threshold: Option<f64>) -> bool {
    let Some(threshold) = threshold else {
        return true;
    };
    CorrelationMatrix::compute(dataset, subset)
        .max_pairwise()
        .is_none_or(|max| max <= threshold)
}
