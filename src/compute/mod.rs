//! Compute module - Sampling, filtering, artifact rendering and evaluation.

mod artifact;
mod correlation;
mod evaluator;
mod sampler;
mod search;

pub use artifact::*;
pub use correlation::*;
pub use evaluator::*;
pub use sampler::*;
pub use search::*;
