//! Mondo router - per-query OLTP/OLAP dispatch
//!
//! Analyzes each read for id lookups, time-range predicates, heavy
//! aggregation stages, and estimated result size, then dispatches to the
//! transactional or analytical engine. Writes, DDL, and index operations
//! are never analyzed and always run on OLTP.

mod analysis;
mod router;

#[cfg(test)]
mod router_tests;

pub use analysis::{HEAVY_STAGES, QueryCharacteristics, analyze_find, analyze_pipeline};
pub use router::{QueryRouter, RouterConfig, RoutingDecision};
