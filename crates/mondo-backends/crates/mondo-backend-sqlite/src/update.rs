//! Update document application
//!
//! An update document either carries `$`-operators (`$set`, `$unset`,
//! `$inc`, `$push`) that merge into the existing document, or is a plain
//! replacement document that swaps everything except `_id`. Upserts
//! synthesize their base document from the filter's equality conditions
//! before the operators run.

use bson::{Bson, Document};
use mondo_core::{MondoError, Result};
use mondo_pipeline::{remove_path, set_path};

/// Whether the update document is operator-form.
pub fn is_operator_update(update: &Document) -> bool {
    update.keys().any(|k| k.starts_with('$'))
}

/// Apply an update to a document. Replacement form preserves the original
/// `_id`; operator form merges field by field. Returns the updated
/// document.
pub fn apply_update(original: &Document, update: &Document) -> Result<Document> {
    if !is_operator_update(update) {
        // Replacement: keep the original identifier.
        let mut replaced = Document::new();
        if let Some(id) = original.get("_id") {
            replaced.insert("_id", id.clone());
        }
        for (key, value) in update {
            if key == "_id" {
                if original.get("_id").is_some_and(|orig| orig != value) {
                    return Err(MondoError::BadValue(
                        "a replacement document cannot change _id".into(),
                    ));
                }
                continue;
            }
            replaced.insert(key.clone(), value.clone());
        }
        return Ok(replaced);
    }

    let mut doc = original.clone();
    for (op, spec) in update {
        let Bson::Document(fields) = spec else {
            return Err(MondoError::BadValue(format!(
                "{} requires a document of field assignments",
                op
            )));
        };
        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    if path == "_id" {
                        return Err(MondoError::BadValue("_id cannot be updated".into()));
                    }
                    set_path(&mut doc, path, value.clone());
                }
            }
            "$unset" => {
                for (path, _) in fields {
                    if path == "_id" {
                        return Err(MondoError::BadValue("_id cannot be updated".into()));
                    }
                    remove_path(&mut doc, path);
                }
            }
            "$inc" => {
                for (path, amount) in fields {
                    apply_inc(&mut doc, path, amount)?;
                }
            }
            "$push" => {
                for (path, value) in fields {
                    apply_push(&mut doc, path, value)?;
                }
            }
            other if other.starts_with('$') => {
                return Err(MondoError::BadValue(format!(
                    "unsupported update operator '{}'",
                    other
                )));
            }
            _ => {
                return Err(MondoError::BadValue(
                    "update cannot mix operators and plain fields".into(),
                ));
            }
        }
    }
    Ok(doc)
}

fn apply_inc(doc: &mut Document, path: &str, amount: &Bson) -> Result<()> {
    let delta = numeric(amount).ok_or_else(|| {
        MondoError::BadValue(format!("$inc amount for '{}' must be numeric", path))
    })?;
    let current = mondo_core::resolve_path(doc, path).cloned();
    let next = match current {
        None | Some(Bson::Null) => amount.clone(),
        Some(existing) => {
            let base = numeric(&existing).ok_or_else(|| {
                MondoError::BadValue(format!("$inc target '{}' is not numeric", path))
            })?;
            render_number(base + delta, &existing, amount)
        }
    };
    set_path(doc, path, next);
    Ok(())
}

/// Keep integer representation when both sides are integers.
fn render_number(total: f64, existing: &Bson, amount: &Bson) -> Bson {
    let integral = matches!(existing, Bson::Int32(_) | Bson::Int64(_))
        && matches!(amount, Bson::Int32(_) | Bson::Int64(_));
    if integral {
        Bson::Int64(total as i64)
    } else {
        Bson::Double(total)
    }
}

fn numeric(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn apply_push(doc: &mut Document, path: &str, value: &Bson) -> Result<()> {
    let additions: Vec<Bson> = match value {
        Bson::Document(spec) if spec.get("$each").is_some() => {
            match spec.get("$each") {
                Some(Bson::Array(items)) => items.clone(),
                _ => {
                    return Err(MondoError::BadValue("$each requires an array".into()));
                }
            }
        }
        other => vec![other.clone()],
    };
    let mut array = match mondo_core::resolve_path(doc, path) {
        None | Some(Bson::Null) => Vec::new(),
        Some(Bson::Array(existing)) => existing.clone(),
        Some(_) => {
            return Err(MondoError::BadValue(format!(
                "$push target '{}' is not an array",
                path
            )));
        }
    };
    array.extend(additions);
    set_path(doc, path, Bson::Array(array));
    Ok(())
}

/// Build the base document an upsert inserts when the filter matched
/// nothing: the filter's direct equality fields and `$eq` conditions fold
/// into a document, operator conditions are dropped.
pub fn document_from_filter(filter: &Document) -> Document {
    let mut doc = Document::new();
    for (key, condition) in filter {
        if key.starts_with('$') {
            continue;
        }
        match condition {
            Bson::Document(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                if let Some(eq) = ops.get("$eq") {
                    set_path(&mut doc, key, eq.clone());
                }
            }
            value => set_path(&mut doc, key, value.clone()),
        }
    }
    doc
}
