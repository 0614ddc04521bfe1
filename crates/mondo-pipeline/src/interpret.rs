//! In-memory pipeline interpretation
//!
//! Evaluates aggregation stages over a fully materialized document
//! stream. The embedded SQL backend reaches for this after loading a
//! collection; the proxy backend never does (its engine evaluates
//! pipelines itself). Stages this module does not recognize pass through
//! unchanged: the wire layer has already validated the pipeline, so an
//! unknown stage here is a defensive no-op, not an error.

use std::collections::HashMap;

use bson::{Bson, Document};
use mondo_core::{MondoError, Result, resolve_path};
use rand::Rng;

use crate::filter::{compare_values, matches_filter};

/// Collateral inputs for stages that read outside the main stream.
/// `$lookup` joins against the pre-materialized collections in `lookup`;
/// a `from` collection absent from the map behaves as empty, matching a
/// lookup against a collection that does not exist.
#[derive(Debug, Default)]
pub struct PipelineContext {
    pub lookup: HashMap<String, Vec<Document>>,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lookup(mut self, collection: impl Into<String>, docs: Vec<Document>) -> Self {
        self.lookup.insert(collection.into(), docs);
        self
    }
}

/// Run a pipeline over materialized input.
pub fn run_pipeline(
    input: Vec<Document>,
    pipeline: &[Document],
    ctx: &PipelineContext,
) -> Result<Vec<Document>> {
    let mut docs = input;
    for stage in pipeline {
        let mut entries = stage.iter();
        let Some((operator, spec)) = entries.next() else {
            continue;
        };
        docs = apply_stage(docs, operator, spec, ctx)?;
    }
    Ok(docs)
}

fn apply_stage(
    docs: Vec<Document>,
    operator: &str,
    spec: &Bson,
    ctx: &PipelineContext,
) -> Result<Vec<Document>> {
    match operator {
        "$match" => stage_match(docs, spec),
        "$project" => stage_project(docs, spec),
        "$addFields" | "$set" => stage_add_fields(docs, spec),
        "$unwind" => stage_unwind(docs, spec),
        "$sort" => stage_sort(docs, spec),
        "$limit" => stage_limit(docs, spec),
        "$skip" => stage_skip(docs, spec),
        "$count" => stage_count(docs, spec),
        "$sample" => stage_sample(docs, spec),
        "$group" => stage_group(docs, spec),
        "$lookup" => stage_lookup(docs, spec, ctx),
        "$facet" => stage_facet(docs, spec, ctx),
        _ => {
            tracing::debug!(stage = operator, "passing through unrecognized stage");
            Ok(docs)
        }
    }
}

fn expect_document<'a>(operator: &str, spec: &'a Bson) -> Result<&'a Document> {
    match spec {
        Bson::Document(doc) => Ok(doc),
        _ => Err(MondoError::BadValue(format!(
            "{} requires a document",
            operator
        ))),
    }
}

fn expect_integer(operator: &str, spec: &Bson) -> Result<i64> {
    match spec {
        Bson::Int32(n) => Ok(*n as i64),
        Bson::Int64(n) => Ok(*n),
        Bson::Double(n) if n.fract() == 0.0 => Ok(*n as i64),
        _ => Err(MondoError::BadValue(format!(
            "{} requires an integer",
            operator
        ))),
    }
}

fn stage_match(docs: Vec<Document>, spec: &Bson) -> Result<Vec<Document>> {
    let filter = expect_document("$match", spec)?;
    let mut kept = Vec::with_capacity(docs.len());
    for doc in docs {
        if matches_filter(&doc, filter)? {
            kept.push(doc);
        }
    }
    Ok(kept)
}

fn stage_project(docs: Vec<Document>, spec: &Bson) -> Result<Vec<Document>> {
    let projection = expect_document("$project", spec)?;
    docs.iter().map(|d| apply_projection(d, projection)).collect()
}

fn stage_add_fields(docs: Vec<Document>, spec: &Bson) -> Result<Vec<Document>> {
    let assignments = expect_document("$addFields", spec)?;
    let mut out = Vec::with_capacity(docs.len());
    for mut doc in docs {
        for (field, expr) in assignments {
            let value = eval_expression(&doc, expr).unwrap_or(Bson::Null);
            set_path(&mut doc, field, value);
        }
        out.push(doc);
    }
    Ok(out)
}

fn stage_unwind(docs: Vec<Document>, spec: &Bson) -> Result<Vec<Document>> {
    let (path, preserve_empty) = match spec {
        Bson::String(path) => (path.as_str(), false),
        Bson::Document(opts) => {
            let path = opts.get_str("path").map_err(|_| {
                MondoError::BadValue("$unwind requires a string path".into())
            })?;
            let preserve = opts
                .get_bool("preserveNullAndEmptyArrays")
                .unwrap_or(false);
            (path, preserve)
        }
        _ => {
            return Err(MondoError::BadValue(
                "$unwind requires a path string or an options document".into(),
            ));
        }
    };
    let Some(path) = path.strip_prefix('$') else {
        return Err(MondoError::BadValue(
            "$unwind path must start with '$'".into(),
        ));
    };

    let mut out = Vec::new();
    for doc in docs {
        match resolve_path(&doc, path) {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for item in items.clone() {
                    let mut unwound = doc.clone();
                    set_path(&mut unwound, path, item);
                    out.push(unwound);
                }
            }
            Some(Bson::Array(_)) => {
                // Empty array: kept without the field when preserving.
                if preserve_empty {
                    let mut kept = doc.clone();
                    remove_path(&mut kept, path);
                    out.push(kept);
                }
            }
            Some(Bson::Null) | None => {
                if preserve_empty {
                    out.push(doc.clone());
                }
            }
            // A non-array value unwinds to itself.
            Some(_) => out.push(doc),
        }
    }
    Ok(out)
}

fn stage_sort(docs: Vec<Document>, spec: &Bson) -> Result<Vec<Document>> {
    let keys = expect_document("$sort", spec)?;
    let mut fields: Vec<(String, i64)> = Vec::with_capacity(keys.len());
    for (field, dir) in keys {
        let dir = expect_integer("$sort direction", dir)?;
        if dir != 1 && dir != -1 {
            return Err(MondoError::BadValue(format!(
                "$sort direction for '{}' must be 1 or -1",
                field
            )));
        }
        fields.push((field.clone(), dir));
    }
    let mut sorted = docs;
    sorted.sort_by(|a, b| {
        for (field, dir) in &fields {
            let ord = compare_values(resolve_path(a, field), resolve_path(b, field));
            let ord = if *dir < 0 { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
    Ok(sorted)
}

fn stage_limit(docs: Vec<Document>, spec: &Bson) -> Result<Vec<Document>> {
    let n = expect_integer("$limit", spec)?;
    if n < 0 {
        return Err(MondoError::BadValue("$limit must be non-negative".into()));
    }
    let mut docs = docs;
    docs.truncate(n as usize);
    Ok(docs)
}

fn stage_skip(docs: Vec<Document>, spec: &Bson) -> Result<Vec<Document>> {
    let n = expect_integer("$skip", spec)?;
    if n < 0 {
        return Err(MondoError::BadValue("$skip must be non-negative".into()));
    }
    Ok(docs.into_iter().skip(n as usize).collect())
}

fn stage_count(docs: Vec<Document>, spec: &Bson) -> Result<Vec<Document>> {
    let Bson::String(name) = spec else {
        return Err(MondoError::BadValue(
            "$count requires a field name string".into(),
        ));
    };
    if name.is_empty() {
        return Err(MondoError::BadValue("$count field name is empty".into()));
    }
    let mut doc = Document::new();
    doc.insert(name.clone(), docs.len() as i64);
    Ok(vec![doc])
}

fn stage_sample(docs: Vec<Document>, spec: &Bson) -> Result<Vec<Document>> {
    let opts = expect_document("$sample", spec)?;
    let size = match opts.get("size") {
        Some(v) => expect_integer("$sample size", v)?,
        None => return Err(MondoError::BadValue("$sample requires a size".into())),
    };
    if size <= 0 {
        return Err(MondoError::BadValue("$sample size must be positive".into()));
    }

    // Fisher-Yates over a copy, then truncate.
    let mut shuffled = docs;
    let mut rng = rand::thread_rng();
    for i in (1..shuffled.len()).rev() {
        let j = rng.gen_range(0..=i);
        shuffled.swap(i, j);
    }
    shuffled.truncate(size as usize);
    Ok(shuffled)
}

fn stage_lookup(docs: Vec<Document>, spec: &Bson, ctx: &PipelineContext) -> Result<Vec<Document>> {
    let opts = expect_document("$lookup", spec)?;
    let from = opts
        .get_str("from")
        .map_err(|_| MondoError::BadValue("$lookup requires 'from'".into()))?;
    let as_field = opts
        .get_str("as")
        .map_err(|_| MondoError::BadValue("$lookup requires 'as'".into()))?;
    let local_field = opts.get_str("localField").map_err(|_| {
        MondoError::BadValue("$lookup without a pipeline requires 'localField'".into())
    })?;
    let foreign_field = opts.get_str("foreignField").map_err(|_| {
        MondoError::BadValue("$lookup without a pipeline requires 'foreignField'".into())
    })?;

    let empty = Vec::new();
    let foreign = ctx.lookup.get(from).unwrap_or(&empty);
    let mut out = Vec::with_capacity(docs.len());
    for mut doc in docs {
        let local = resolve_path(&doc, local_field);
        let matches: Vec<Bson> = foreign
            .iter()
            .filter(|f| {
                compare_values(local, resolve_path(f, foreign_field))
                    == std::cmp::Ordering::Equal
            })
            .map(|f| Bson::Document(f.clone()))
            .collect();
        set_path(&mut doc, as_field, Bson::Array(matches));
        out.push(doc);
    }
    Ok(out)
}

fn stage_facet(docs: Vec<Document>, spec: &Bson, ctx: &PipelineContext) -> Result<Vec<Document>> {
    let facets = expect_document("$facet", spec)?;
    let mut out = Document::new();
    for (name, sub) in facets {
        let Bson::Array(stages) = sub else {
            return Err(MondoError::BadValue(format!(
                "$facet field '{}' must be a pipeline array",
                name
            )));
        };
        let sub_pipeline: Vec<Document> = stages
            .iter()
            .map(|s| match s {
                Bson::Document(d) => Ok(d.clone()),
                _ => Err(MondoError::BadValue(format!(
                    "$facet field '{}' contains a non-document stage",
                    name
                ))),
            })
            .collect::<Result<_>>()?;
        let results = run_pipeline(docs.clone(), &sub_pipeline, ctx)?;
        out.insert(
            name.clone(),
            Bson::Array(results.into_iter().map(Bson::Document).collect()),
        );
    }
    Ok(vec![out])
}

fn stage_group(docs: Vec<Document>, spec: &Bson) -> Result<Vec<Document>> {
    let spec = expect_document("$group", spec)?;
    let id_expr = spec
        .get("_id")
        .ok_or_else(|| MondoError::BadValue("$group requires an _id expression".into()))?;

    // Group membership is keyed by the canonical rendering of the
    // evaluated _id, which gives structural equality for compound keys.
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (Bson, Vec<Document>)> = HashMap::new();
    for doc in docs {
        let key = eval_expression(&doc, id_expr).unwrap_or(Bson::Null);
        let rendered = key.clone().into_canonical_extjson().to_string();
        groups
            .entry(rendered.clone())
            .or_insert_with(|| {
                order.push(rendered);
                (key, Vec::new())
            })
            .1
            .push(doc);
    }

    let mut out = Vec::with_capacity(order.len());
    for rendered in order {
        let (key, members) = groups.remove(&rendered).expect("group recorded in order");
        let mut result = Document::new();
        result.insert("_id", key);
        for (field, accumulator) in spec {
            if field == "_id" {
                continue;
            }
            let Bson::Document(acc) = accumulator else {
                return Err(MondoError::BadValue(format!(
                    "$group field '{}' must be an accumulator document",
                    field
                )));
            };
            let Some((op, operand)) = acc.iter().next() else {
                return Err(MondoError::BadValue(format!(
                    "$group field '{}' has an empty accumulator",
                    field
                )));
            };
            result.insert(field.clone(), evaluate_accumulator(op, operand, &members)?);
        }
        out.push(result);
    }
    Ok(out)
}

fn evaluate_accumulator(op: &str, operand: &Bson, members: &[Document]) -> Result<Bson> {
    let values = || {
        members
            .iter()
            .filter_map(|doc| eval_expression(doc, operand))
    };
    let value = match op {
        "$sum" => {
            let total: f64 = values().filter_map(|v| numeric_value(&v)).sum();
            render_number(total)
        }
        "$avg" => {
            let numbers: Vec<f64> = values().filter_map(|v| numeric_value(&v)).collect();
            if numbers.is_empty() {
                Bson::Null
            } else {
                Bson::Double(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        "$first" => members
            .first()
            .and_then(|doc| eval_expression(doc, operand))
            .unwrap_or(Bson::Null),
        "$last" => members
            .last()
            .and_then(|doc| eval_expression(doc, operand))
            .unwrap_or(Bson::Null),
        "$min" => values()
            .filter(|v| !matches!(v, Bson::Null))
            .min_by(|a, b| compare_values(Some(a), Some(b)))
            .unwrap_or(Bson::Null),
        "$max" => values()
            .filter(|v| !matches!(v, Bson::Null))
            .max_by(|a, b| compare_values(Some(a), Some(b)))
            .unwrap_or(Bson::Null),
        "$push" => Bson::Array(values().collect()),
        "$addToSet" => {
            let mut seen = Vec::new();
            let mut set = Vec::new();
            for v in values() {
                let rendered = v.clone().into_canonical_extjson().to_string();
                if !seen.contains(&rendered) {
                    seen.push(rendered);
                    set.push(v);
                }
            }
            Bson::Array(set)
        }
        other => {
            return Err(MondoError::BadValue(format!(
                "unknown accumulator '{}'",
                other
            )));
        }
    };
    Ok(value)
}

fn numeric_value(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        Bson::Decimal128(d) => d.to_string().parse().ok(),
        _ => None,
    }
}

/// Render a sum/average back into the narrowest integer form when exact.
fn render_number(n: f64) -> Bson {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Bson::Int64(n as i64)
    } else {
        Bson::Double(n)
    }
}

/// Evaluate a pipeline expression against one document: `"$path"` field
/// references resolve into the document, nested documents of expressions
/// evaluate field-wise, everything else is a literal. `None` means the
/// referenced field is missing.
pub fn eval_expression(doc: &Document, expr: &Bson) -> Option<Bson> {
    match expr {
        Bson::String(s) => match s.strip_prefix('$') {
            Some(path) => resolve_path(doc, path).cloned(),
            None => Some(expr.clone()),
        },
        Bson::Document(fields) => {
            let mut out = Document::new();
            for (k, v) in fields {
                out.insert(k.clone(), eval_expression(doc, v).unwrap_or(Bson::Null));
            }
            Some(Bson::Document(out))
        }
        other => Some(other.clone()),
    }
}

/// Apply a `$project`-style projection document. Inclusion keeps the named
/// paths (`_id` stays unless excluded); exclusion strips the named paths
/// from a copy. Mixing the two outside `_id` is an error.
pub fn apply_projection(doc: &Document, projection: &Document) -> Result<Document> {
    if projection.is_empty() {
        return Ok(doc.clone());
    }

    let mut includes = false;
    let mut excludes = false;
    for (field, value) in projection {
        let truthy = projection_flag(value)?;
        if field == "_id" {
            continue;
        }
        if truthy {
            includes = true;
        } else {
            excludes = true;
        }
    }
    if includes && excludes {
        return Err(MondoError::BadValue(
            "projection cannot mix inclusion and exclusion".into(),
        ));
    }

    // An `_id`-only projection takes its polarity from the `_id` flag.
    let id_only_inclusion = !includes
        && !excludes
        && projection.get("_id").map(projection_flag).transpose()? == Some(true);
    if excludes || (!includes && !id_only_inclusion) {
        // Exclusion form: copy and strip.
        let mut out = doc.clone();
        for (field, value) in projection {
            if !projection_flag(value)? {
                remove_path(&mut out, field);
            }
        }
        return Ok(out);
    }

    // Inclusion form.
    let mut out = Document::new();
    let id_excluded = projection
        .get("_id")
        .map(projection_flag)
        .transpose()?
        .map(|flag| !flag)
        .unwrap_or(false);
    if !id_excluded {
        if let Some(id) = doc.get("_id") {
            out.insert("_id", id.clone());
        }
    }
    for (field, value) in projection {
        if field == "_id" || !projection_flag(value)? {
            continue;
        }
        if let Some(v) = resolve_path(doc, field) {
            set_path(&mut out, field, v.clone());
        }
    }
    Ok(out)
}

fn projection_flag(value: &Bson) -> Result<bool> {
    match value {
        Bson::Boolean(b) => Ok(*b),
        Bson::Int32(n) => Ok(*n != 0),
        Bson::Int64(n) => Ok(*n != 0),
        Bson::Double(n) => Ok(*n != 0.0),
        _ => Err(MondoError::BadValue(
            "projection values must be 0, 1, true, or false".into(),
        )),
    }
}

/// Set a (possibly dotted) path, creating intermediate documents.
pub fn set_path(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(doc.get(head), Some(Bson::Document(_))) {
                doc.insert(head, Document::new());
            }
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                set_path(inner, rest, value);
            }
        }
    }
}

/// Remove a (possibly dotted) path if present.
pub fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}
