//! Query characteristic extraction
//!
//! Pure functions that derive the features routing decides on: id
//! lookups, time-range predicates on recognized timestamp fields, heavy
//! aggregation stages, and a row-count estimate.

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::RouterConfig;

/// Stages whose evaluation cost suggests columnar execution.
pub const HEAVY_STAGES: &[&str] = &[
    "$group",
    "$bucket",
    "$bucketAuto",
    "$facet",
    "$graphLookup",
    "$sortByCount",
    "$densify",
    "$fill",
];

/// `$sample` sizes above this suggest the columnar engine.
const LARGE_SAMPLE: i64 = 1_000;

/// Derived view of one read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryCharacteristics {
    pub has_id_lookup: bool,
    pub is_time_range_query: bool,
    pub has_heavy_aggregation: bool,
    pub estimated_rows: u64,
    /// Stages that argue for OLAP execution, in pipeline order.
    pub olap_stages: Vec<String>,
}

/// Analyze a `find`-shaped read.
pub fn analyze_find(
    filter: Option<&Document>,
    limit: Option<i64>,
    config: &RouterConfig,
) -> QueryCharacteristics {
    let has_id_lookup = filter.is_some_and(|f| has_id_lookup(f, config.id_in_max));
    let is_time_range_query =
        filter.is_some_and(|f| has_time_range(f, &config.timestamp_fields));
    QueryCharacteristics {
        has_id_lookup,
        is_time_range_query,
        has_heavy_aggregation: false,
        estimated_rows: estimate_rows(filter, limit, has_id_lookup, config),
        olap_stages: Vec::new(),
    }
}

/// Analyze an aggregation pipeline stage by stage.
pub fn analyze_pipeline(pipeline: &[Document], config: &RouterConfig) -> QueryCharacteristics {
    let mut characteristics = QueryCharacteristics {
        estimated_rows: config.row_threshold + 1,
        ..Default::default()
    };
    let mut match_estimate: Option<u64> = None;
    let mut smallest_limit: Option<u64> = None;

    for stage in pipeline {
        let Some((operator, spec)) = stage.iter().next() else {
            continue;
        };
        if HEAVY_STAGES.contains(&operator.as_str()) {
            characteristics.has_heavy_aggregation = true;
            characteristics.olap_stages.push(operator.clone());
        }
        match operator.as_str() {
            "$match" => {
                if let Bson::Document(filter) = spec {
                    let nested = analyze_find(Some(filter), None, config);
                    characteristics.has_id_lookup |= nested.has_id_lookup;
                    characteristics.is_time_range_query |= nested.is_time_range_query;
                    match_estimate = Some(
                        match_estimate
                            .map_or(nested.estimated_rows, |e| e.min(nested.estimated_rows)),
                    );
                }
            }
            "$limit" => {
                if let Some(n) = integer(spec) {
                    let n = n.max(0) as u64;
                    smallest_limit = Some(smallest_limit.map_or(n, |s| s.min(n)));
                }
            }
            "$sample" => {
                if let Bson::Document(opts) = spec {
                    if opts.get("size").and_then(integer).unwrap_or(0) > LARGE_SAMPLE {
                        characteristics.olap_stages.push("$sample".to_string());
                    }
                }
            }
            "$lookup" | "$graphLookup" => {
                if !characteristics.olap_stages.contains(operator) {
                    characteristics.olap_stages.push(operator.clone());
                }
            }
            _ => {}
        }
    }

    if let Some(estimate) = match_estimate {
        characteristics.estimated_rows = estimate;
    }
    if let Some(limit) = smallest_limit {
        characteristics.estimated_rows = characteristics.estimated_rows.min(limit);
    }
    characteristics
}

/// Filter-present heuristic used when nothing sharper applies.
const FILTERED_ESTIMATE: u64 = 1_000;

fn estimate_rows(
    filter: Option<&Document>,
    limit: Option<i64>,
    has_id_lookup: bool,
    config: &RouterConfig,
) -> u64 {
    if has_id_lookup {
        return 1;
    }
    if let Some(limit) = limit {
        return limit.max(0) as u64;
    }
    match filter {
        Some(f) if !f.is_empty() => FILTERED_ESTIMATE,
        // No filter signals a full scan.
        _ => config.row_threshold + 1,
    }
}

/// An `_id` lookup: direct equality, `$eq`, or a bounded `$in`.
fn has_id_lookup(filter: &Document, id_in_max: usize) -> bool {
    match filter.get("_id") {
        Some(Bson::Document(ops)) => {
            if ops.get("$eq").is_some() {
                return true;
            }
            match ops.get("$in") {
                Some(Bson::Array(candidates)) => candidates.len() <= id_in_max,
                _ => !ops.keys().any(|k| k.starts_with('$')),
            }
        }
        Some(_) => true,
        None => false,
    }
}

const RANGE_OPERATORS: &[&str] = &["$gt", "$gte", "$lt", "$lte"];

/// Whether any recognized timestamp field carries a range operator,
/// looking through `$and`/`$or`.
fn has_time_range(filter: &Document, timestamp_fields: &[String]) -> bool {
    for (key, condition) in filter {
        if key == "$and" || key == "$or" {
            if let Bson::Array(clauses) = condition {
                for clause in clauses {
                    if let Bson::Document(sub) = clause {
                        if has_time_range(sub, timestamp_fields) {
                            return true;
                        }
                    }
                }
            }
            continue;
        }
        if !timestamp_fields.iter().any(|f| f == key) {
            continue;
        }
        if let Bson::Document(ops) = condition {
            if ops.keys().any(|op| RANGE_OPERATORS.contains(&op.as_str())) {
                return true;
            }
        }
    }
    false
}

fn integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) if n.fract() == 0.0 => Some(*n as i64),
        _ => None,
    }
}
