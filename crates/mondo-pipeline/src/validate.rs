//! Pipeline JSON validation
//!
//! Schema-level validation of user-supplied aggregation pipelines before
//! they reach the interpreter. The input is plain JSON (the studio seam),
//! each stage is checked against its operator contract, benign mistakes
//! are coerced (`"10"` to `10`), and advisory warnings are collected
//! alongside hard errors. Every independent error across the pipeline
//! surfaces in a single call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A hard validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Location such as `[1].$group`; empty for pipeline-level failures.
    pub path: String,
    pub message: String,
    /// Machine-readable failure kind.
    pub code: String,
}

/// An advisory finding that does not fail validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
    pub code: String,
}

/// Outcome of validating one pipeline. `data` carries the coerced
/// pipeline when validation succeeded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineValidation {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Value>>,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

const KNOWN_STAGES: &[&str] = &[
    "$match",
    "$project",
    "$addFields",
    "$set",
    "$unset",
    "$sort",
    "$limit",
    "$skip",
    "$count",
    "$sample",
    "$group",
    "$unwind",
    "$lookup",
    "$graphLookup",
    "$facet",
    "$bucket",
    "$bucketAuto",
    "$sortByCount",
    "$densify",
    "$fill",
    "$replaceRoot",
    "$vectorSearch",
];

const KNOWN_ACCUMULATORS: &[&str] = &[
    "$sum",
    "$avg",
    "$first",
    "$last",
    "$min",
    "$max",
    "$push",
    "$addToSet",
    "$count",
    "$stdDevPop",
    "$stdDevSamp",
    "$mergeObjects",
];

/// Pipelines at or above this `$limit` draw a performance warning.
const LARGE_LIMIT: i64 = 100_000;

struct Ctx {
    errors: Vec<ValidationError>,
    warnings: Vec<ValidationWarning>,
}

impl Ctx {
    fn error(&mut self, path: impl Into<String>, code: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            path: path.into(),
            message: message.into(),
            code: code.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, code: &str, message: impl Into<String>) {
        self.warnings.push(ValidationWarning {
            path: path.into(),
            message: message.into(),
            code: code.into(),
        });
    }
}

/// Validate a user-supplied pipeline.
pub fn validate_pipeline(input: &Value) -> PipelineValidation {
    let mut ctx = Ctx {
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    let Value::Array(stages) = input else {
        ctx.error("", "invalid_type", "pipeline must be an array of stages");
        return finish(ctx, None);
    };

    let mut coerced: Vec<Value> = Vec::with_capacity(stages.len());
    for (index, stage) in stages.iter().enumerate() {
        match validate_stage(&mut ctx, index, stage) {
            Some(stage) => coerced.push(stage),
            None => coerced.push(stage.clone()),
        }
    }

    if stages.len() >= 2 {
        if let Some(last) = stages.last().and_then(Value::as_object) {
            if last.keys().any(|k| k == "$match") {
                ctx.warn(
                    format!("[{}].$match", stages.len() - 1),
                    "trailing_match",
                    "a trailing $match usually belongs earlier in the pipeline",
                );
            }
        }
    }

    finish(ctx, Some(coerced))
}

fn finish(ctx: Ctx, data: Option<Vec<Value>>) -> PipelineValidation {
    let success = ctx.errors.is_empty();
    PipelineValidation {
        success,
        data: if success { data } else { None },
        errors: ctx.errors,
        warnings: ctx.warnings,
    }
}

/// Validate one stage; returns the coerced stage on success.
fn validate_stage(ctx: &mut Ctx, index: usize, stage: &Value) -> Option<Value> {
    let at = |suffix: &str| format!("[{}]{}", index, suffix);

    let obj = match stage {
        Value::Object(obj) => obj,
        Value::Null => {
            ctx.error(at(""), "invalid_type", "stage must be an object, got null");
            return None;
        }
        Value::Array(_) => {
            ctx.error(at(""), "invalid_type", "stage must be an object, got an array");
            return None;
        }
        _ => {
            ctx.error(at(""), "invalid_type", "stage must be an object");
            return None;
        }
    };

    if obj.is_empty() {
        ctx.error(at(""), "invalid_stage", "stage object is empty");
        return None;
    }
    let operator_keys: Vec<&String> = obj.keys().filter(|k| k.starts_with('$')).collect();
    if operator_keys.len() > 1 {
        ctx.error(
            at(""),
            "multiple_operators",
            format!("stage has multiple operators: {:?}", operator_keys),
        );
        return None;
    }
    if operator_keys.is_empty() {
        ctx.error(at(""), "missing_operator", "stage has no $-operator key");
        return None;
    }
    if obj.len() > 1 {
        ctx.error(
            at(""),
            "invalid_stage",
            "stage must have exactly one operator key",
        );
        return None;
    }
    let operator = operator_keys[0].clone();
    if !KNOWN_STAGES.contains(&operator.as_str()) {
        ctx.error(
            at(""),
            "unknown_operator",
            format!("unknown stage operator '{}'", operator),
        );
        return None;
    }

    let spec = &obj[&operator];
    let path = at(&format!(".{}", operator));
    let coerced_spec = match operator.as_str() {
        "$group" => validate_group(ctx, &path, spec),
        "$lookup" => validate_lookup(ctx, &path, spec),
        "$unwind" => validate_unwind(ctx, &path, spec),
        "$sort" => validate_sort(ctx, &path, spec),
        "$limit" => validate_limit(ctx, &path, spec),
        "$skip" => validate_skip(ctx, &path, spec),
        "$count" => validate_count(ctx, &path, spec),
        "$sample" => validate_sample(ctx, &path, spec),
        "$vectorSearch" => validate_vector_search(ctx, &path, spec),
        "$match" | "$project" | "$addFields" | "$set" | "$facet" => {
            validate_object_spec(ctx, &path, &operator, spec)
        }
        _ => Some(spec.clone()),
    }?;

    let mut out = serde_json::Map::new();
    out.insert(operator, coerced_spec);
    Some(Value::Object(out))
}

fn validate_object_spec(ctx: &mut Ctx, path: &str, operator: &str, spec: &Value) -> Option<Value> {
    let Value::Object(fields) = spec else {
        ctx.error(
            path,
            "invalid_type",
            format!("{} requires an object", operator),
        );
        return None;
    };
    if operator == "$project" {
        let mut includes = false;
        let mut excludes = false;
        for (field, value) in fields {
            if field == "_id" {
                continue;
            }
            match value {
                Value::Bool(true) => includes = true,
                Value::Bool(false) => excludes = true,
                Value::Number(n) => {
                    if n.as_f64() == Some(0.0) {
                        excludes = true;
                    } else {
                        includes = true;
                    }
                }
                _ => {}
            }
        }
        if includes && excludes {
            ctx.error(
                path,
                "mixed_projection",
                "$project cannot mix inclusion and exclusion outside _id",
            );
            return None;
        }
    }
    Some(spec.clone())
}

fn validate_group(ctx: &mut Ctx, path: &str, spec: &Value) -> Option<Value> {
    let Value::Object(fields) = spec else {
        ctx.error(path, "invalid_type", "$group requires an object");
        return None;
    };
    let mut ok = true;
    if !fields.contains_key("_id") {
        ctx.error(path, "missing_field", "$group requires an _id expression");
        ok = false;
    }
    for (field, value) in fields {
        if field == "_id" {
            continue;
        }
        let field_path = format!("{}.{}", path, field);
        let Value::Object(acc) = value else {
            ctx.error(
                field_path,
                "invalid_accumulator",
                format!("$group field '{}' must be an accumulator object", field),
            );
            ok = false;
            continue;
        };
        if acc.len() != 1 {
            ctx.error(
                field_path,
                "invalid_accumulator",
                format!(
                    "$group field '{}' must have exactly one accumulator operator",
                    field
                ),
            );
            ok = false;
            continue;
        }
        let op = acc.keys().next().unwrap();
        if !KNOWN_ACCUMULATORS.contains(&op.as_str()) {
            ctx.error(
                field_path,
                "unknown_accumulator",
                format!("unknown accumulator '{}'", op),
            );
            ok = false;
        }
    }
    ok.then(|| spec.clone())
}

fn validate_lookup(ctx: &mut Ctx, path: &str, spec: &Value) -> Option<Value> {
    let Value::Object(fields) = spec else {
        ctx.error(path, "invalid_type", "$lookup requires an object");
        return None;
    };
    let mut ok = true;
    match fields.get("from").and_then(Value::as_str) {
        Some(from) if !from.is_empty() => {}
        _ => {
            ctx.error(path, "missing_field", "$lookup requires a non-empty 'from'");
            ok = false;
        }
    }
    if fields.get("as").and_then(Value::as_str).is_none() {
        ctx.error(path, "missing_field", "$lookup requires 'as'");
        ok = false;
    }
    let has_local = fields.get("localField").and_then(Value::as_str).is_some();
    let has_foreign = fields.get("foreignField").and_then(Value::as_str).is_some();
    let has_pipeline = matches!(fields.get("pipeline"), Some(Value::Array(_)));
    if !(has_local && has_foreign) && !has_pipeline {
        ctx.error(
            path,
            "missing_field",
            "$lookup requires localField+foreignField or a pipeline",
        );
        ok = false;
    }
    ok.then(|| spec.clone())
}

fn validate_unwind(ctx: &mut Ctx, path: &str, spec: &Value) -> Option<Value> {
    match spec {
        Value::String(s) => {
            if !s.starts_with('$') {
                ctx.error(path, "invalid_value", "$unwind path must start with '$'");
                return None;
            }
            ctx.warn(
                path,
                "missing_preserve_option",
                "preserveNullAndEmptyArrays is absent; documents without the path are dropped",
            );
            Some(spec.clone())
        }
        Value::Object(fields) => {
            match fields.get("path").and_then(Value::as_str) {
                Some(p) if p.starts_with('$') => {}
                Some(_) => {
                    ctx.error(path, "invalid_value", "$unwind path must start with '$'");
                    return None;
                }
                None => {
                    ctx.error(path, "missing_field", "$unwind requires a string 'path'");
                    return None;
                }
            }
            if !fields.contains_key("preserveNullAndEmptyArrays") {
                ctx.warn(
                    path,
                    "missing_preserve_option",
                    "preserveNullAndEmptyArrays is absent; documents without the path are dropped",
                );
            }
            Some(spec.clone())
        }
        _ => {
            ctx.error(
                path,
                "invalid_type",
                "$unwind requires a path string or an options object",
            );
            None
        }
    }
}

fn validate_sort(ctx: &mut Ctx, path: &str, spec: &Value) -> Option<Value> {
    let Value::Object(fields) = spec else {
        ctx.error(path, "invalid_type", "$sort requires an object");
        return None;
    };
    if fields.is_empty() {
        ctx.error(path, "invalid_value", "$sort requires at least one field");
        return None;
    }
    let mut coerced = serde_json::Map::new();
    let mut ok = true;
    for (field, direction) in fields {
        let value = match direction {
            Value::String(s) => match s.as_str() {
                "1" => Value::from(1),
                "-1" => Value::from(-1),
                _ => {
                    ctx.error(
                        format!("{}.{}", path, field),
                        "invalid_direction",
                        format!("invalid sort direction '{}'", s),
                    );
                    ok = false;
                    continue;
                }
            },
            Value::Number(n) if n.as_i64() == Some(1) || n.as_i64() == Some(-1) => {
                direction.clone()
            }
            Value::Object(meta)
                if meta.len() == 1
                    && meta.get("$meta").and_then(Value::as_str) == Some("textScore") =>
            {
                direction.clone()
            }
            _ => {
                ctx.error(
                    format!("{}.{}", path, field),
                    "invalid_direction",
                    "sort direction must be 1, -1, or {$meta: \"textScore\"}",
                );
                ok = false;
                continue;
            }
        };
        coerced.insert(field.clone(), value);
    }
    ok.then_some(Value::Object(coerced))
}

fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            let f = n.as_f64()?;
            (f.fract() == 0.0).then_some(f as i64)
        }
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn validate_limit(ctx: &mut Ctx, path: &str, spec: &Value) -> Option<Value> {
    let Some(n) = coerce_integer(spec) else {
        ctx.error(path, "invalid_type", "$limit requires a positive integer");
        return None;
    };
    if n <= 0 {
        ctx.error(path, "invalid_value", "$limit must be a positive integer");
        return None;
    }
    if n >= LARGE_LIMIT {
        ctx.warn(
            path,
            "performance",
            format!("$limit of {} may be expensive to materialize", n),
        );
    }
    Some(Value::from(n))
}

fn validate_skip(ctx: &mut Ctx, path: &str, spec: &Value) -> Option<Value> {
    let Some(n) = coerce_integer(spec) else {
        ctx.error(path, "invalid_type", "$skip requires a non-negative integer");
        return None;
    };
    if n < 0 {
        ctx.error(path, "invalid_value", "$skip must be non-negative");
        return None;
    }
    Some(Value::from(n))
}

fn validate_count(ctx: &mut Ctx, path: &str, spec: &Value) -> Option<Value> {
    match spec.as_str() {
        Some(name) if !name.is_empty() => Some(spec.clone()),
        _ => {
            ctx.error(path, "invalid_value", "$count requires a non-empty string");
            None
        }
    }
}

fn validate_sample(ctx: &mut Ctx, path: &str, spec: &Value) -> Option<Value> {
    let Value::Object(fields) = spec else {
        ctx.error(path, "invalid_type", "$sample requires {size: <n>}");
        return None;
    };
    match fields.get("size").and_then(coerce_integer) {
        Some(n) if n > 0 => {
            let mut out = serde_json::Map::new();
            out.insert("size".into(), Value::from(n));
            Some(Value::Object(out))
        }
        _ => {
            ctx.error(path, "invalid_value", "$sample size must be a positive integer");
            None
        }
    }
}

fn validate_vector_search(ctx: &mut Ctx, path: &str, spec: &Value) -> Option<Value> {
    let Value::Object(fields) = spec else {
        ctx.error(path, "invalid_type", "$vectorSearch requires an object");
        return None;
    };
    let mut ok = true;
    if fields.get("path").and_then(Value::as_str).is_none() {
        ctx.error(path, "missing_field", "$vectorSearch requires 'path'");
        ok = false;
    }
    match fields.get("queryVector") {
        Some(Value::Array(items)) if items.iter().all(Value::is_number) => {}
        _ => {
            ctx.error(
                path,
                "invalid_value",
                "$vectorSearch queryVector must be an array of numbers",
            );
            ok = false;
        }
    }
    for field in ["numCandidates", "limit"] {
        match fields.get(field).and_then(coerce_integer) {
            Some(n) if n > 0 => {}
            _ => {
                ctx.error(
                    path,
                    "invalid_value",
                    format!("$vectorSearch {} must be a positive integer", field),
                );
                ok = false;
            }
        }
    }
    ok.then(|| spec.clone())
}
