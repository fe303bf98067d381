//! Monte Carlo subset search controller.
//!
//! Each attempt samples a subset, filters it for collinearity, renders the
//! matrix artifact and scores it with the evaluator. Filter rejections and
//! evaluator failures consume an attempt but not a trial; the run ends once
//! the requested number of trials has been accepted.
//!
//! Without an attempt cap a filter that rejects everything, or an evaluator
//! that always fails, keeps the loop running until cancelled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;

use crate::schema::{
    ConfigError, Dataset, DescriptorSubset, SearchConfig, SearchResult, SearchState, StopReason,
    TrialRecord,
};

use super::artifact::ArtifactAssembler;
use super::correlation;
use super::evaluator::{EvaluationResult, Evaluator, EvaluatorError};
use super::sampler::{SampleError, SubsetSampler};

/// Drives the sample / filter / evaluate loop.
pub struct SearchController<E> {
    config: SearchConfig,
    dataset: Dataset,
    sampler: SubsetSampler,
    assembler: ArtifactAssembler,
    evaluator: E,
    state: SearchState,
    records: Vec<TrialRecord>,
    cancelled: Arc<AtomicBool>,
}

impl<E: Evaluator> SearchController<E> {
    /// Validate the configuration and check the descriptor population.
    pub fn new(
        config: SearchConfig,
        dataset: Dataset,
        assembler: ArtifactAssembler,
        evaluator: E,
    ) -> Result<Self, SearchError> {
        config.validate()?;
        let sampler =
            SubsetSampler::new(dataset.descriptor_names(), config.subset_size, config.seed)?;
        let state = SearchState::new(config.seed, config.trials);

        Ok(Self {
            config,
            dataset,
            sampler,
            assembler,
            evaluator,
            state,
            records: Vec::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Current counters.
    pub fn state(&self) -> SearchState {
        self.state
    }

    /// Trials accepted so far.
    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Run the search, calling `on_trial` once per accepted trial in order.
    pub fn run_with_callback<F>(&mut self, mut on_trial: F) -> Result<SearchResult, SearchError>
    where
        F: FnMut(&TrialRecord),
    {
        let start_time = Instant::now();
        log::info!(
            "Searching {} subsets of {} from {} descriptors (seed {}, max pairwise correlation {:?})",
            self.config.trials,
            self.config.subset_size,
            self.dataset.descriptor_names().len(),
            self.config.seed,
            self.config.max_pairwise_correlation
        );

        let stop_reason = loop {
            if let Some(reason) = self.should_stop()? {
                break reason;
            }

            if self.config.jobs > 1 {
                self.step_batch(&mut on_trial)?;
            } else {
                self.step(&mut on_trial)?;
            }
        };

        let elapsed = start_time.elapsed().as_secs_f64();
        log::info!(
            "Search finished ({:?}): {} accepted, {} attempts, {} rejected, {} failed in {:.2}s",
            stop_reason,
            self.state.accepted,
            self.state.attempts,
            self.state.rejected,
            self.state.failed,
            elapsed
        );

        Ok(SearchResult {
            records: self.records.clone(),
            state: self.state,
            stop_reason,
            elapsed_seconds: elapsed,
        })
    }

    /// Run the search (blocking).
    pub fn run(&mut self) -> Result<SearchResult, SearchError> {
        self.run_with_callback(|_| {})
    }

    fn should_stop(&self) -> Result<Option<StopReason>, SearchError> {
        if self.state.is_complete() {
            return Ok(Some(StopReason::TargetReached));
        }
        if self.cancelled.load(Ordering::Relaxed) {
            return Ok(Some(StopReason::Cancelled));
        }
        if self.attempts_exhausted() {
            return Err(SearchError::Exhausted { state: self.state });
        }
        Ok(None)
    }

    fn attempts_exhausted(&self) -> bool {
        self.config
            .max_attempts
            .is_some_and(|cap| self.state.attempts >= cap)
    }

    /// Sample one subset and apply the filter. Returns the attempt number and
    /// the subset if it passed.
    fn draw_candidate(&mut self) -> Option<(u64, DescriptorSubset)> {
        self.state.attempts += 1;
        let attempt = self.state.attempts;
        let subset = self.sampler.sample();

        if correlation::passes(
            &self.dataset,
            &subset,
            self.config.max_pairwise_correlation,
        ) {
            Some((attempt, subset))
        } else {
            self.state.rejected += 1;
            log::debug!("Attempt {attempt}: {subset} rejected by correlation filter");
            None
        }
    }

    /// One sequential attempt.
    fn step<F>(&mut self, on_trial: &mut F) -> Result<(), SearchError>
    where
        F: FnMut(&TrialRecord),
    {
        let Some((attempt, subset)) = self.draw_candidate() else {
            return Ok(());
        };
        let outcome = score(&self.assembler, &self.evaluator, &self.dataset, &subset);
        self.record(attempt, subset, outcome, on_trial)
    }

    /// Draw up to `jobs` filter-passing candidates in sampler order, evaluate
    /// them in parallel and record the outcomes in attempt order.
    fn step_batch<F>(&mut self, on_trial: &mut F) -> Result<(), SearchError>
    where
        F: FnMut(&TrialRecord),
    {
        let mut batch = Vec::with_capacity(self.config.jobs);
        while batch.len() < self.config.jobs
            && !self.attempts_exhausted()
            && !self.cancelled.load(Ordering::Relaxed)
        {
            if let Some(candidate) = self.draw_candidate() {
                batch.push(candidate);
            }
        }

        let assembler = &self.assembler;
        let evaluator = &self.evaluator;
        let dataset = &self.dataset;
        let outcomes: Vec<_> = batch
            .par_iter()
            .map(|(_, subset)| score(assembler, evaluator, dataset, subset))
            .collect();

        for ((attempt, subset), outcome) in batch.into_iter().zip(outcomes) {
            if self.state.is_complete() {
                break;
            }
            self.record(attempt, subset, outcome, on_trial)?;
        }
        Ok(())
    }

    fn record<F>(
        &mut self,
        attempt: u64,
        subset: DescriptorSubset,
        outcome: Result<EvaluationResult, EvaluatorError>,
        on_trial: &mut F,
    ) -> Result<(), SearchError>
    where
        F: FnMut(&TrialRecord),
    {
        match outcome {
            Ok(result) => {
                if !result.stderr.trim().is_empty() {
                    log::warn!("Attempt {attempt}: evaluator stderr: {}", result.stderr.trim());
                }
                let record = TrialRecord {
                    index: self.state.accepted,
                    attempt,
                    descriptors: subset,
                    summary: result.summary.unwrap_or_default(),
                };
                self.state.accepted += 1;
                on_trial(&record);
                self.records.push(record);
                Ok(())
            }
            Err(err) if err.is_fatal() => Err(SearchError::Evaluator(err)),
            Err(err) => {
                self.state.failed += 1;
                log::warn!("Attempt {attempt}: evaluation of {subset} failed: {err}");
                if let Some(stderr) = err.stderr() {
                    log::warn!("Attempt {attempt}: evaluator stderr: {}", stderr.trim());
                }
                Ok(())
            }
        }
    }
}

/// Render and evaluate one subset.
fn score<E: Evaluator>(
    assembler: &ArtifactAssembler,
    evaluator: &E,
    dataset: &Dataset,
    subset: &DescriptorSubset,
) -> Result<EvaluationResult, EvaluatorError> {
    let artifact = assembler.assemble(dataset, subset);
    evaluator.evaluate(&artifact)
}

/// Search errors.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Invalid search configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sample(#[from] SampleError),
    #[error(transparent)]
    Evaluator(#[from] EvaluatorError),
    #[error("Search exhausted: {state}")]
    Exhausted { state: SearchState },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::MatrixArtifact;
    use rand::prelude::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Always succeeds, echoing the descriptor lines it was given.
    struct EchoEvaluator {
        calls: AtomicUsize,
    }

    impl EchoEvaluator {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Evaluator for EchoEvaluator {
        fn evaluate(&self, artifact: &MatrixArtifact) -> Result<EvaluationResult, EvaluatorError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let lines = artifact.as_str().lines().count();
            Ok(EvaluationResult::from_output(
                format!("fit\nMax R2 = 0.{lines}\n"),
                String::new(),
                "Max ",
            ))
        }
    }

    /// Never produces usable output.
    struct FailingEvaluator;

    impl Evaluator for FailingEvaluator {
        fn evaluate(&self, _: &MatrixArtifact) -> Result<EvaluationResult, EvaluatorError> {
            Err(EvaluatorError::NoOutput {
                status: "exit status: 1".into(),
                stderr: String::new(),
            })
        }
    }

    /// Fails every subset containing the given descriptor.
    struct Picky {
        reject: &'static str,
        seen: Mutex<Vec<String>>,
    }

    impl Evaluator for Picky {
        fn evaluate(&self, artifact: &MatrixArtifact) -> Result<EvaluationResult, EvaluatorError> {
            self.seen.lock().unwrap().push(artifact.as_str().to_string());
            if artifact.column(self.reject).is_some() {
                return Err(EvaluatorError::NoOutput {
                    status: "exit status: 2".into(),
                    stderr: "singular matrix".into(),
                });
            }
            Ok(EvaluationResult::from_output(
                "Max R2 = 0.5\n".into(),
                String::new(),
                "Max ",
            ))
        }
    }

    struct Unavailable;

    impl Evaluator for Unavailable {
        fn evaluate(&self, _: &MatrixArtifact) -> Result<EvaluationResult, EvaluatorError> {
            Err(EvaluatorError::Unavailable {
                path: "MLR.x".into(),
            })
        }
    }

    // Five systems, A and B perfectly correlated.
    fn small_dataset() -> Dataset {
        let text = "\
system,yield,A,B,C,D
s1,1.0,1,2,0.5,9
s2,2.0,2,4,0.1,3
s3,3.0,3,6,0.9,4
s4,4.0,4,8,0.3,8
s5,5.0,5,10,0.7,1
";
        Dataset::from_reader(text.as_bytes(), ',').unwrap()
    }

    fn wide_dataset(descriptors: usize) -> Dataset {
        let mut rng = StdRng::seed_from_u64(17);
        let mut text = String::from("system,yield");
        for d in 0..descriptors {
            text.push_str(&format!(",x{d:02}"));
        }
        text.push('\n');
        for row in 0..12 {
            text.push_str(&format!("r{row},{row}"));
            for _ in 0..descriptors {
                let v: f64 = rng.gen_range(0.0..10.0);
                text.push_str(&format!(",{v}"));
            }
            text.push('\n');
        }
        Dataset::from_reader(text.as_bytes(), ',').unwrap()
    }

    fn assembler() -> ArtifactAssembler {
        ArtifactAssembler::new(Some("HEAD\n".into()), Some("TAIL\n".into()))
    }

    fn config(subset_size: usize, trials: usize, seed: u64) -> SearchConfig {
        SearchConfig {
            subset_size,
            trials,
            seed,
            ..Default::default()
        }
    }

    #[test]
    fn test_accepts_requested_trials() {
        let mut controller = SearchController::new(
            config(2, 3, 11),
            small_dataset(),
            assembler(),
            EchoEvaluator::new(),
        )
        .unwrap();

        let mut lines = Vec::new();
        let result = controller
            .run_with_callback(|record| lines.push(record.to_string()))
            .unwrap();

        assert_eq!(result.stop_reason, StopReason::TargetReached);
        assert_eq!(result.records.len(), 3);
        assert_eq!(lines.len(), 3);
        assert_eq!(result.state.accepted, 3);
        assert_eq!(result.state.attempts, 3);

        let schema: HashSet<&str> = ["A", "B", "C", "D"].into_iter().collect();
        for (i, record) in result.records.iter().enumerate() {
            assert_eq!(record.index, i);
            assert_eq!(record.descriptors.len(), 2);
            let names = record.descriptors.names();
            assert!(names[0] < names[1]);
            assert!(names.iter().all(|n| schema.contains(n.as_str())));
            // header + tag + target + 2 descriptors + trailer
            assert_eq!(record.summary, "Max R2 = 0.6");
            assert!(lines[i].starts_with(&format!("Step {i}: ['")));
        }
    }

    #[test]
    fn test_correlated_pair_never_accepted() {
        static NAMES: [&str; 4] = ["A", "B", "C", "D"];
        let dataset = small_dataset();

        // Every pair other than {A, B} sits below the threshold.
        let mut max_other: f64 = 0.0;
        for (i, a) in NAMES.iter().enumerate() {
            for b in &NAMES[i + 1..] {
                if (*a, *b) == ("A", "B") {
                    continue;
                }
                let s = DescriptorSubset::new(vec![a.to_string(), b.to_string()]).unwrap();
                let r = correlation::CorrelationMatrix::compute(&dataset, &s)
                    .max_pairwise()
                    .unwrap();
                max_other = max_other.max(r);
            }
        }
        assert!(max_other < 1.0);

        let mut search = config(2, 10, 5);
        search.max_pairwise_correlation = Some(max_other);
        search.max_attempts = Some(10_000);

        let mut controller =
            SearchController::new(search, dataset, assembler(), EchoEvaluator::new()).unwrap();
        let result = controller.run().unwrap();

        assert_eq!(result.records.len(), 10);
        assert!(result.state.attempts >= 10);
        for record in &result.records {
            assert!(!(record.descriptors.contains("A") && record.descriptors.contains("B")));
        }
    }

    #[test]
    fn test_accepted_subsets_respect_threshold() {
        let threshold = 0.6;
        let mut search = config(3, 15, 77);
        search.max_pairwise_correlation = Some(threshold);
        search.max_attempts = Some(100_000);
        let dataset = wide_dataset(12);

        let mut controller =
            SearchController::new(search, dataset.clone(), assembler(), EchoEvaluator::new())
                .unwrap();
        let result = controller.run().unwrap();

        assert_eq!(result.records.len(), 15);
        assert_eq!(
            result.state.attempts,
            result.state.accepted as u64 + result.state.rejected
        );
        for record in &result.records {
            let matrix = correlation::CorrelationMatrix::compute(&dataset, &record.descriptors);
            assert!(matrix.upper_pairs().all(|(_, _, r)| r <= threshold));
        }
    }

    #[test]
    fn test_zero_threshold_rejects_all_pairs_until_cap() {
        let mut search = config(2, 3, 1);
        search.max_pairwise_correlation = Some(0.0);
        search.max_attempts = Some(50);
        let evaluator = EchoEvaluator::new();

        let mut controller =
            SearchController::new(search, small_dataset(), assembler(), evaluator).unwrap();
        match controller.run() {
            Err(SearchError::Exhausted { state }) => {
                assert_eq!(state.attempts, 50);
                assert_eq!(state.rejected, 50);
                assert_eq!(state.accepted, 0);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(controller.evaluator.calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_always_failing_evaluator_never_accepts() {
        let mut search = config(2, 3, 9);
        search.max_attempts = Some(200);

        let mut controller =
            SearchController::new(search, small_dataset(), assembler(), FailingEvaluator).unwrap();
        let err = controller.run().unwrap_err();

        let SearchError::Exhausted { state } = err else {
            panic!("expected exhaustion, got {err:?}");
        };
        assert_eq!(state.accepted, 0);
        assert_eq!(state.failed, 200);
        assert!(controller.records().is_empty());
    }

    #[test]
    fn test_failed_evaluations_are_resampled() {
        let evaluator = Picky {
            reject: "C",
            seen: Mutex::new(Vec::new()),
        };
        let mut search = config(2, 4, 3);
        search.max_attempts = Some(10_000);

        let mut controller =
            SearchController::new(search, small_dataset(), assembler(), evaluator).unwrap();
        let result = controller.run().unwrap();

        assert_eq!(result.records.len(), 4);
        assert!(result.records.iter().all(|r| !r.descriptors.contains("C")));
        assert_eq!(
            result.state.attempts,
            result.state.accepted as u64 + result.state.failed
        );
        let seen = controller.evaluator.seen.lock().unwrap().len() as u64;
        assert_eq!(seen, result.state.attempts);
    }

    #[test]
    fn test_unavailable_evaluator_aborts() {
        let mut controller =
            SearchController::new(config(2, 3, 0), small_dataset(), assembler(), Unavailable)
                .unwrap();
        let err = controller.run().unwrap_err();

        assert!(matches!(err, SearchError::Evaluator(EvaluatorError::Unavailable { .. })));
        assert!(err.to_string().contains("MLR.x"));
        assert_eq!(controller.state().accepted, 0);
        assert_eq!(controller.state().attempts, 1);
    }

    #[test]
    fn test_subset_larger_than_population() {
        let result =
            SearchController::new(config(5, 1, 0), small_dataset(), assembler(), FailingEvaluator);
        assert!(matches!(
            result,
            Err(SearchError::Sample(SampleError::InsufficientDescriptors {
                available: 4,
                requested: 5
            }))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result =
            SearchController::new(config(2, 0, 0), small_dataset(), assembler(), FailingEvaluator);
        assert!(matches!(result, Err(SearchError::Config(_))));
    }

    #[test]
    fn test_same_seed_same_records() {
        let run = |seed| {
            let mut controller = SearchController::new(
                config(3, 20, seed),
                wide_dataset(10),
                assembler(),
                EchoEvaluator::new(),
            )
            .unwrap();
            controller.run().unwrap().records
        };
        assert_eq!(run(2024), run(2024));
        assert_ne!(run(2024), run(2025));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let make = |jobs| {
            let mut search = config(3, 25, 99);
            search.jobs = jobs;
            search.max_pairwise_correlation = Some(0.7);
            search.max_attempts = Some(100_000);
            let evaluator = Picky {
                reject: "x03",
                seen: Mutex::new(Vec::new()),
            };
            SearchController::new(search, wide_dataset(12), assembler(), evaluator).unwrap()
        };

        let sequential = make(1).run().unwrap();
        let parallel = make(4).run().unwrap();

        assert_eq!(parallel.records.len(), 25);
        assert_eq!(sequential.records, parallel.records);
        assert!(parallel.state.attempts >= sequential.state.attempts);
    }

    #[test]
    fn test_parallel_output_in_attempt_order() {
        let mut search = config(2, 12, 8);
        search.jobs = 3;
        let mut controller =
            SearchController::new(search, wide_dataset(8), assembler(), EchoEvaluator::new())
                .unwrap();

        let mut order = Vec::new();
        let result = controller
            .run_with_callback(|record| order.push((record.index, record.attempt)))
            .unwrap();

        assert_eq!(result.records.len(), 12);
        assert!(order.windows(2).all(|w| w[0].0 + 1 == w[1].0 && w[0].1 < w[1].1));
    }

    #[test]
    fn test_cancellation() {
        let mut controller = SearchController::new(
            config(2, 1_000, 0),
            small_dataset(),
            assembler(),
            EchoEvaluator::new(),
        )
        .unwrap();
        let cancel = controller.cancel_handle();

        // Cancel immediately
        cancel.store(true, Ordering::Relaxed);

        let result = controller.run().unwrap();
        assert_eq!(result.stop_reason, StopReason::Cancelled);
        assert!(result.records.is_empty());
    }

    #[test]
    fn test_cancel_from_callback() {
        let mut controller = SearchController::new(
            config(2, 1_000, 0),
            small_dataset(),
            assembler(),
            EchoEvaluator::new(),
        )
        .unwrap();
        let cancel = controller.cancel_handle();

        let result = controller
            .run_with_callback(|record| {
                if record.index == 4 {
                    cancel.store(true, Ordering::Relaxed);
                }
            })
            .unwrap();
        assert_eq!(result.stop_reason, StopReason::Cancelled);
        assert_eq!(result.records.len(), 5);
    }
}
