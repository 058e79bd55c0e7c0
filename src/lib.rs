//! Self-organizing taxonomy of failure modes.
//!
//! The pipeline works over JSONL evaluation records:
//! 1. [`analysis`] fills in missing failure analyses
//! 2. [`builder`] grows a mode taxonomy one report at a time
//! 3. [`merger`] consolidates semantically similar modes
//! 4. [`pruner`] removes statistically rare modes
//! 5. [`assignment`] classifies records against the frozen taxonomy
//! 6. [`metrics`] scores the taxonomy over the assigned records
//!
//! All LLM and embedding access goes through the traits in [`api`], so the
//! whole pipeline is testable without a network.

pub mod analysis;
pub mod api;
pub mod arena;
pub mod assignment;
pub mod builder;
pub mod cli;
pub mod config;
pub mod errors;
pub mod grammar;
pub mod merger;
pub mod metrics;
pub mod pruner;
pub mod records;
pub mod util;

pub use arena::{ModeData, ModeNode, TaxonomyTree};
pub use errors::{TaxonomyError, TaxonomyResult};
