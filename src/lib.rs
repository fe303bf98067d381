//! Monte Carlo descriptor-subset search.
//!
//! Given a table of systems (tag, target value and many candidate numeric
//! descriptors), this crate repeatedly samples fixed-size descriptor subsets,
//! rejects collinear ones, renders the survivors into the matrix format of an
//! external regression evaluator, runs the evaluator and records the fit
//! summary it reports.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration, dataset loading and search bookkeeping types
//! - `compute`: Sampling, correlation filter, artifact assembly, evaluator
//!   gateway and the search controller
//!
//! # Example
//!
//! ```rust,no_run
//! use mc_descriptors::{
//!     compute::{ArtifactAssembler, ProcessEvaluator, SearchController},
//!     schema::{Dataset, SearchConfig},
//! };
//!
//! let config = SearchConfig {
//!     subset_size: 3,
//!     trials: 10,
//!     seed: 42,
//!     max_pairwise_correlation: Some(0.8),
//!     ..Default::default()
//! };
//!
//! let dataset = Dataset::load("descriptors.csv", config.delimiter).unwrap();
//! let assembler = ArtifactAssembler::from_config(&config.artifact).unwrap();
//! let evaluator = ProcessEvaluator::from_config(&config.evaluator).unwrap();
//!
//! let mut controller = SearchController::new(config, dataset, assembler, evaluator).unwrap();
//! let result = controller
//!     .run_with_callback(|trial| println!("{trial}"))
//!     .unwrap();
//!
//! println!("{}", result.state);
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::{ProcessEvaluator, SearchController, SearchError};
pub use schema::{Dataset, DescriptorSubset, SearchConfig, TrialRecord};
