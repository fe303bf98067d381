//! Schema module - Configuration, dataset and bookkeeping types for subset searches.

mod config;
mod dataset;
mod search;

pub use config::*;
pub use dataset::*;
pub use search::*;
