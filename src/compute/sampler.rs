//! Seeded random sampling of descriptor subsets.

use rand::prelude::*;
use rand::seq::index;

use crate::schema::DescriptorSubset;

/// Draw `k` distinct names uniformly without replacement, in canonical order.
///
/// Each draw consumes the random source through `rand::seq::index::sample`,
/// so a fixed seed yields a fixed sequence of subsets.
pub fn sample<R: Rng + ?Sized>(
    names: &[String],
    k: usize,
    rng: &mut R,
) -> Result<DescriptorSubset, SampleError> {
    check_population(names, k)?;
    Ok(draw(names, k, rng))
}

fn check_population(names: &[String], k: usize) -> Result<(), SampleError> {
    if k == 0 {
        return Err(SampleError::EmptySubset);
    }
    if names.len() < k {
        return Err(SampleError::InsufficientDescriptors {
            available: names.len(),
            requested: k,
        });
    }
    Ok(())
}

fn draw<R: Rng + ?Sized>(names: &[String], k: usize, rng: &mut R) -> DescriptorSubset {
    let mut picked: Vec<String> = index::sample(rng, names.len(), k)
        .into_iter()
        .map(|i| names[i].clone())
        .collect();
    picked.sort();
    DescriptorSubset::from_sorted_unique(picked)
}

/// Subset sampler over a fixed descriptor population.
///
/// The population check happens once, at construction.
pub struct SubsetSampler {
    rng: StdRng,
    population: Vec<String>,
    size: usize,
}

impl SubsetSampler {
    /// Create from seed.
    pub fn new(population: &[String], size: usize, seed: u64) -> Result<Self, SampleError> {
        Self::with_rng(population, size, StdRng::seed_from_u64(seed))
    }

    /// Create with an explicit random source.
    pub fn with_rng(population: &[String], size: usize, rng: StdRng) -> Result<Self, SampleError> {
        check_population(population, size)?;
        let mut seen: Vec<&String> = population.iter().collect();
        seen.sort();
        seen.dedup();
        if seen.len() != population.len() {
            return Err(SampleError::DuplicateNames);
        }

        Ok(Self {
            rng,
            population: population.to_vec(),
            size,
        })
    }

    /// Subset size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Draw the next subset.
    pub fn sample(&mut self) -> DescriptorSubset {
        draw(&self.population, self.size, &mut self.rng)
    }
}

/// Sampling errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SampleError {
    #[error("Dataset contains only {available} descriptors, but {requested} are requested")]
    InsufficientDescriptors { available: usize, requested: usize },
    #[error("Subset size must be at least 1")]
    EmptySubset,
    #[error("Descriptor population contains duplicate names")]
    DuplicateNames,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("d{i:03}")).collect()
    }

    #[test]
    fn test_sample_is_canonical() {
        let population = names(20);
        let mut rng = StdRng::seed_from_u64(42);
        let subset = sample(&population, 5, &mut rng).unwrap();

        assert_eq!(subset.len(), 5);
        let mut sorted = subset.names().to_vec();
        sorted.sort();
        assert_eq!(subset.names(), sorted.as_slice());
    }

    #[test]
    fn test_insufficient_descriptors() {
        let population = names(3);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            sample(&population, 4, &mut rng),
            Err(SampleError::InsufficientDescriptors {
                available: 3,
                requested: 4
            })
        );
        assert!(SubsetSampler::new(&population, 4, 0).is_err());
    }

    #[test]
    fn test_zero_size_rejected() {
        assert_eq!(
            SubsetSampler::new(&names(3), 0, 0).err(),
            Some(SampleError::EmptySubset)
        );
    }

    #[test]
    fn test_duplicate_population_rejected() {
        let population = vec!["A".to_string(), "B".to_string(), "A".to_string()];
        assert_eq!(
            SubsetSampler::new(&population, 2, 0).err(),
            Some(SampleError::DuplicateNames)
        );
    }

    #[test]
    fn test_full_population_draw() {
        let population = vec!["C".to_string(), "A".to_string(), "B".to_string()];
        let mut sampler = SubsetSampler::new(&population, 3, 9).unwrap();
        assert_eq!(sampler.sample().names(), ["A", "B", "C"]);
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let population = names(30);
        let mut a = SubsetSampler::new(&population, 4, 1234).unwrap();
        let mut b = SubsetSampler::new(&population, 4, 1234).unwrap();

        let run_a: Vec<_> = (0..50).map(|_| a.sample()).collect();
        let run_b: Vec<_> = (0..50).map(|_| b.sample()).collect();
        assert_eq!(run_a, run_b);
    }

    #[test]
    fn test_different_seeds_differ() {
        let population = names(30);
        let mut a = SubsetSampler::new(&population, 4, 1).unwrap();
        let mut b = SubsetSampler::new(&population, 4, 2).unwrap();

        let run_a: Vec<_> = (0..20).map(|_| a.sample()).collect();
        let run_b: Vec<_> = (0..20).map(|_| b.sample()).collect();
        assert_ne!(run_a, run_b);
    }

    proptest! {
        #[test]
        fn prop_subsets_are_valid(seed in any::<u64>(), n in 1usize..40, k_frac in 0.0f64..1.0) {
            let population = names(n);
            let k = ((n as f64 * k_frac) as usize).max(1);
            let mut sampler = SubsetSampler::new(&population, k, seed).unwrap();

            for _ in 0..10 {
                let subset = sampler.sample();
                prop_assert_eq!(subset.len(), k);
                prop_assert!(subset.names().windows(2).all(|w| w[0] < w[1]));
                prop_assert!(subset.iter().all(|name| population.iter().any(|p| p == name)));
            }
        }
    }
}
