//! Mondo pipeline - aggregation pipeline validation, rewriting, and
//! in-memory evaluation
//!
//! Three layers, applied in order on the read path:
//!
//! - `validate` - schema-level checks of user-supplied pipeline JSON with
//!   per-stage contracts, coercions, and advisory warnings
//! - `optimize` - equivalence-preserving rewrites (predicate pushdown,
//!   adjacent-stage merging, redundant-stage elimination)
//! - `interpret` - stage evaluation over a materialized document stream
//!   for engines that cannot run pipelines natively

mod filter;
mod interpret;
mod optimize;
mod validate;

#[cfg(test)]
mod filter_tests;
#[cfg(test)]
mod interpret_tests;
#[cfg(test)]
mod optimize_tests;

pub use filter::{compare_values, matches_filter, values_equal};
pub use interpret::{
    PipelineContext, apply_projection, eval_expression, remove_path, run_pipeline, set_path,
};
pub use optimize::optimize;
pub use validate::{PipelineValidation, ValidationError, ValidationWarning, validate_pipeline};
