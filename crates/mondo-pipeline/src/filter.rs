//! Document filter evaluation
//!
//! In-memory counterpart of the SQL filter translation: `$and`/`$or`
//! recurse, comparison operators use the cross-type total order below, and
//! missing fields behave like null. Both the `$match` stage and the
//! single-document update paths go through [`matches_filter`].

use std::cmp::Ordering;

use bson::{Bson, Document};
use mondo_core::{MondoError, Result, resolve_path};

/// Rank in the cross-type total order. Missing and null sort below
/// everything; numeric kinds collapse into one rank so `Int32(5)`,
/// `Int64(5)`, and `Double(5.0)` compare equal.
fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => 0,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)) => 1,
        Some(Bson::String(_) | Bson::Symbol(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::Binary(_)) => 5,
        Some(Bson::ObjectId(_)) => 6,
        Some(Bson::Boolean(_)) => 7,
        Some(Bson::DateTime(_)) => 8,
        Some(Bson::Timestamp(_)) => 9,
        Some(_) => 10,
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        Bson::Decimal128(d) => d.to_string().parse::<f64>().ok(),
        _ => None,
    }
}

/// Total order over document values, `None` standing in for a missing
/// field. Unlike kinds order by [`type_rank`]; like kinds compare by
/// value.
pub fn compare_values(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    let (Some(a), Some(b)) = (a, b) else {
        // Both missing or null.
        return Ordering::Equal;
    };
    match (a, b) {
        (Bson::Null | Bson::Undefined, _) => Ordering::Equal,
        _ if ra == 1 => {
            let (x, y) = (as_number(a), as_number(b));
            match (x, y) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => a.to_string().cmp(&b.to_string()),
            }
        }
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Symbol(x), Bson::Symbol(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            x.timestamp_millis().cmp(&y.timestamp_millis())
        }
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::Binary(x), Bson::Binary(y)) => x.bytes.cmp(&y.bytes),
        (Bson::Timestamp(x), Bson::Timestamp(y)) => {
            (x.time, x.increment).cmp(&(y.time, y.increment))
        }
        (Bson::Array(x), Bson::Array(y)) => {
            for (ex, ey) in x.iter().zip(y.iter()) {
                let ord = compare_values(Some(ex), Some(ey));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Bson::Document(x), Bson::Document(y)) => {
            for ((kx, vx), (ky, vy)) in x.iter().zip(y.iter()) {
                let ord = kx.cmp(ky);
                if ord != Ordering::Equal {
                    return ord;
                }
                let ord = compare_values(Some(vx), Some(vy));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

/// Value equality under the total order.
pub fn values_equal(a: Option<&Bson>, b: &Bson) -> bool {
    compare_values(a, Some(b)) == Ordering::Equal
}

fn is_operator_document(doc: &Document) -> bool {
    !doc.is_empty() && doc.keys().all(|k| k.starts_with('$'))
}

/// Evaluate a filter document against a document.
pub fn matches_filter(doc: &Document, filter: &Document) -> Result<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let clauses = expect_clause_array(key, condition)?;
                let mut all = true;
                for clause in clauses {
                    if !matches_filter(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let clauses = expect_clause_array(key, condition)?;
                let mut any = false;
                for clause in clauses {
                    if matches_filter(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            _ if key.starts_with('$') => {
                return Err(MondoError::BadValue(format!(
                    "unknown top-level filter operator '{}'",
                    key
                )));
            }
            path => matches_condition(doc, path, condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn expect_clause_array<'a>(op: &str, value: &'a Bson) -> Result<Vec<&'a Document>> {
    let Bson::Array(items) = value else {
        return Err(MondoError::BadValue(format!("{} requires an array", op)));
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(doc) => Ok(doc),
            _ => Err(MondoError::BadValue(format!(
                "{} clauses must be documents",
                op
            ))),
        })
        .collect()
}

fn matches_condition(doc: &Document, path: &str, condition: &Bson) -> Result<bool> {
    let value = resolve_path(doc, path);
    if let Bson::Document(ops) = condition {
        if is_operator_document(ops) {
            for (op, operand) in ops {
                if !apply_operator(value, op, operand, path)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
    }
    Ok(values_equal(value, condition))
}

fn apply_operator(value: Option<&Bson>, op: &str, operand: &Bson, path: &str) -> Result<bool> {
    let ord = || compare_values(value, Some(operand));
    let matched = match op {
        "$eq" => ord() == Ordering::Equal,
        "$ne" => ord() != Ordering::Equal,
        "$gt" => ord() == Ordering::Greater,
        "$gte" => ord() != Ordering::Less,
        "$lt" => ord() == Ordering::Less,
        "$lte" => ord() != Ordering::Greater,
        "$in" => {
            let Bson::Array(candidates) = operand else {
                return Err(MondoError::BadValue("$in requires an array".into()));
            };
            candidates.iter().any(|c| values_equal(value, c))
        }
        "$exists" => {
            let wanted = matches!(
                operand,
                Bson::Boolean(true) | Bson::Int32(1) | Bson::Int64(1)
            );
            value.is_some() == wanted
        }
        other => {
            return Err(MondoError::BadValue(format!(
                "unsupported operator '{}' on field '{}'",
                other, path
            )));
        }
    };
    Ok(matched)
}
