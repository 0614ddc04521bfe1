//! Document filter and sort translation into SQL
//!
//! A document filter becomes a conjunction of predicates over the
//! `documents` table: `_id` keys hit the `_id` column directly, everything
//! else goes through `json_extract` on the stored payload. Field paths are
//! validated before they are rendered into a JSON-path literal, and every
//! value is supplied as a bound parameter, so no caller-supplied character
//! reaches the statement text.

use bson::{Bson, Document};
use mondo_core::{MondoError, Result, id_to_string, validate_field_path};
use rusqlite::types::Value as SqlValue;

/// A rendered WHERE fragment plus its bound parameters.
#[derive(Debug, Default)]
pub struct SqlFilter {
    pub clause: String,
    pub params: Vec<SqlValue>,
}

impl SqlFilter {
    /// A clause that matches every row.
    pub fn match_all() -> Self {
        Self {
            clause: "1 = 1".to_string(),
            params: Vec::new(),
        }
    }
}

/// Translate a filter document. An empty filter matches everything.
pub fn filter_to_sql(filter: &Document) -> Result<SqlFilter> {
    if filter.is_empty() {
        return Ok(SqlFilter::match_all());
    }
    let mut parts = Vec::with_capacity(filter.len());
    let mut params = Vec::new();
    for (key, condition) in filter {
        match key.as_str() {
            "$and" => parts.push(render_connective(condition, " AND ", &mut params)?),
            "$or" => parts.push(render_connective(condition, " OR ", &mut params)?),
            _ if key.starts_with('$') => {
                return Err(MondoError::BadValue(format!(
                    "unknown top-level filter operator '{}'",
                    key
                )));
            }
            field => parts.push(render_field(field, condition, &mut params)?),
        }
    }
    Ok(SqlFilter {
        clause: parts.join(" AND "),
        params,
    })
}

fn render_connective(
    clauses: &Bson,
    joiner: &str,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let Bson::Array(items) = clauses else {
        return Err(MondoError::BadValue(
            "$and/$or requires an array of filters".into(),
        ));
    };
    if items.is_empty() {
        return Ok("1 = 1".to_string());
    }
    let mut rendered = Vec::with_capacity(items.len());
    for item in items {
        let Bson::Document(sub) = item else {
            return Err(MondoError::BadValue(
                "$and/$or clauses must be documents".into(),
            ));
        };
        let sub_sql = filter_to_sql(sub)?;
        params.extend(sub_sql.params);
        rendered.push(format!("({})", sub_sql.clause));
    }
    Ok(format!("({})", rendered.join(joiner)))
}

fn is_operator_document(doc: &Document) -> bool {
    !doc.is_empty() && doc.keys().all(|k| k.starts_with('$'))
}

fn render_field(field: &str, condition: &Bson, params: &mut Vec<SqlValue>) -> Result<String> {
    if let Bson::Document(ops) = condition {
        if is_operator_document(ops) {
            let mut parts = Vec::with_capacity(ops.len());
            for (op, operand) in ops {
                parts.push(render_operator(field, op, operand, params)?);
            }
            return Ok(parts.join(" AND "));
        }
    }
    render_operator(field, "$eq", condition, params)
}

/// Comparable SQL expression for a field, specialized to the concrete
/// value kind: rich scalar types compare through their Extended-JSON
/// leaves, `_id` compares on its column.
fn field_expr(field: &str, value: &Bson) -> Result<String> {
    if field == "_id" {
        return Ok("_id".to_string());
    }
    validate_field_path(field)?;
    let leaf = match value {
        Bson::ObjectId(_) => ".\"$oid\"",
        Bson::DateTime(_) => ".\"$date\"",
        Bson::Decimal128(_) => ".\"$numberDecimal\"",
        _ => "",
    };
    Ok(format!("json_extract(data, '$.{}{}')", field, leaf))
}

/// Presence expression: distinguishes a JSON null (present) from a
/// missing path.
fn presence_expr(field: &str) -> Result<String> {
    if field == "_id" {
        return Ok("_id".to_string());
    }
    validate_field_path(field)?;
    Ok(format!("json_type(data, '$.{}')", field))
}

fn render_operator(
    field: &str,
    op: &str,
    operand: &Bson,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let rendered = match op {
        "$eq" => {
            if matches!(operand, Bson::Null) {
                format!("{} IS NULL", field_expr(field, operand)?)
            } else {
                let expr = field_expr(field, operand)?;
                params.push(bind_value(field, operand)?);
                format!("{} = ?", expr)
            }
        }
        "$ne" => {
            if matches!(operand, Bson::Null) {
                format!("{} IS NOT NULL", field_expr(field, operand)?)
            } else {
                let expr = field_expr(field, operand)?;
                params.push(bind_value(field, operand)?);
                // A missing field satisfies the inequality.
                format!("({expr} != ? OR {expr} IS NULL)", expr = expr)
            }
        }
        "$gt" | "$gte" | "$lt" | "$lte" => {
            let sql_op = match op {
                "$gt" => ">",
                "$gte" => ">=",
                "$lt" => "<",
                _ => "<=",
            };
            let expr = field_expr(field, operand)?;
            params.push(bind_value(field, operand)?);
            format!("{} {} ?", expr, sql_op)
        }
        "$in" => {
            let Bson::Array(candidates) = operand else {
                return Err(MondoError::BadValue("$in requires an array".into()));
            };
            if candidates.is_empty() {
                return Ok("1 = 0".to_string());
            }
            let expr = field_expr(field, candidates.first().unwrap_or(&Bson::Null))?;
            let mut placeholders = Vec::with_capacity(candidates.len());
            let mut has_null = false;
            for candidate in candidates {
                if matches!(candidate, Bson::Null) {
                    has_null = true;
                    continue;
                }
                params.push(bind_value(field, candidate)?);
                placeholders.push("?");
            }
            let base = if placeholders.is_empty() {
                "1 = 0".to_string()
            } else {
                format!("{} IN ({})", expr, placeholders.join(", "))
            };
            if has_null {
                format!("({} OR {} IS NULL)", base, expr)
            } else {
                base
            }
        }
        "$exists" => {
            let wanted = matches!(
                operand,
                Bson::Boolean(true) | Bson::Int32(1) | Bson::Int64(1)
            );
            let expr = presence_expr(field)?;
            if wanted {
                format!("{} IS NOT NULL", expr)
            } else {
                format!("{} IS NULL", expr)
            }
        }
        other => {
            return Err(MondoError::BadValue(format!(
                "unsupported filter operator '{}' on field '{}'",
                other, field
            )));
        }
    };
    Ok(rendered)
}

/// Bind a filter value. Booleans coerce to 0/1 the way they are stored;
/// rich scalar types bind the string leaf their Extended-JSON form keeps.
fn bind_value(field: &str, value: &Bson) -> Result<SqlValue> {
    let bound = match value {
        Bson::String(s) => SqlValue::Text(s.clone()),
        Bson::Int32(n) => SqlValue::Integer(*n as i64),
        Bson::Int64(n) => SqlValue::Integer(*n),
        Bson::Double(n) => SqlValue::Real(*n),
        Bson::Boolean(b) => SqlValue::Integer(if *b { 1 } else { 0 }),
        Bson::ObjectId(_) | Bson::DateTime(_) | Bson::Decimal128(_) => {
            if field == "_id" {
                SqlValue::Text(id_to_string(value))
            } else {
                match value {
                    Bson::ObjectId(oid) => SqlValue::Text(oid.to_hex()),
                    Bson::DateTime(dt) => SqlValue::Text(
                        dt.try_to_rfc3339_string().map_err(|e| {
                            MondoError::BadValue(format!("unrepresentable datetime: {}", e))
                        })?,
                    ),
                    Bson::Decimal128(d) => SqlValue::Text(d.to_string()),
                    _ => unreachable!(),
                }
            }
        }
        other => {
            return Err(MondoError::BadValue(format!(
                "cannot compare field '{}' against a {} value in SQL",
                field,
                mondo_core::bson_type_name(other)
            )));
        }
    };
    // `_id` values always compare against the text column.
    if field == "_id" && !matches!(bound, SqlValue::Text(_)) {
        return Ok(SqlValue::Text(id_to_string(value)));
    }
    Ok(bound)
}

/// Translate a sort specification into an ORDER BY list. The trailing
/// `id` column keeps the order deterministic across equal keys, which is
/// also the insertion order used when no sort is given.
pub fn sort_to_sql(sort: Option<&Document>) -> Result<String> {
    let mut terms = Vec::new();
    if let Some(sort) = sort {
        for (field, direction) in sort {
            let numeric = match direction {
                Bson::Int32(n) => Some(*n as i64),
                Bson::Int64(n) => Some(*n),
                Bson::Double(n) => Some(*n as i64),
                _ => None,
            };
            let dir = match numeric {
                Some(1) => "ASC",
                Some(-1) => "DESC",
                _ => {
                    return Err(MondoError::BadValue(format!(
                        "sort direction for '{}' must be 1 or -1",
                        field
                    )));
                }
            };
            if field == "_id" {
                terms.push(format!("_id {}", dir));
            } else {
                validate_field_path(field)?;
                terms.push(format!("json_extract(data, '$.{}') {}", field, dir));
            }
        }
    }
    terms.push("id ASC".to_string());
    Ok(format!("ORDER BY {}", terms.join(", ")))
}
