//! Columnar row <-> document conversion
//!
//! The analytical engine answers queries as JSON rows plus column
//! metadata (`[{name, type}]`). This module converts those rows into
//! documents, honoring the declared type of every column, and renders
//! documents back into the engine's JSON shape for inserts.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bson::spec::BinarySubtype;
use bson::{Bson, Document};
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use mondo_core::{MondoError, Result, is_object_id_hex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ColumnType, parse_column_type};

/// One column of result metadata, as sent by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
        }
    }
}

/// Custom per-field conversion override.
pub type FieldMapper = Arc<dyn Fn(&Value) -> Bson + Send + Sync>;

/// Conversion options.
#[derive(Clone, Default)]
pub struct MapperOptions {
    /// Re-lift 24-hex strings into object-ids, recursively.
    pub preserve_object_id: bool,
    /// Opt-in: lift base64-shaped strings into binary. Ambiguous for
    /// callers that legitimately store base64 text, hence off by default;
    /// the heuristic additionally requires length >= 16, a length
    /// divisible by 4, and at least one non-alphanumeric base64
    /// character.
    pub preserve_binary: bool,
    /// Map `UInt8` columns to booleans.
    pub treat_uint8_as_bool: bool,
    /// Map integer values that look like unix epoch seconds to dates.
    pub treat_timestamp_as_date: bool,
    /// Output name overrides, keyed by the column's original name.
    pub renames: HashMap<String, String>,
    /// When set, only these columns are mapped.
    pub include: Option<Vec<String>>,
    /// Columns dropped from the output.
    pub exclude: Vec<String>,
    /// Per-column conversion overrides, keyed by original name.
    pub field_mappers: HashMap<String, FieldMapper>,
}

impl std::fmt::Debug for MapperOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapperOptions")
            .field("preserve_object_id", &self.preserve_object_id)
            .field("preserve_binary", &self.preserve_binary)
            .field("treat_uint8_as_bool", &self.treat_uint8_as_bool)
            .field("treat_timestamp_as_date", &self.treat_timestamp_as_date)
            .field("renames", &self.renames)
            .field("include", &self.include)
            .field("exclude", &self.exclude)
            .field(
                "field_mappers",
                &self.field_mappers.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Convert one columnar row (a JSON object) into a document. Columns keep
/// the metadata order; fields absent from the row map to null.
pub fn row_to_document(
    row: &Value,
    meta: &[ColumnMeta],
    options: &MapperOptions,
) -> Result<Document> {
    let Value::Object(fields) = row else {
        return Err(MondoError::BadValue("row must be a JSON object".into()));
    };

    let mut doc = Document::new();
    for column in meta {
        if let Some(include) = &options.include {
            if !include.contains(&column.name) {
                continue;
            }
        }
        if options.exclude.contains(&column.name) {
            continue;
        }
        let raw = fields.get(&column.name).unwrap_or(&Value::Null);
        let value = match options.field_mappers.get(&column.name) {
            Some(mapper) => mapper(raw),
            None => {
                let ty = parse_column_type(&column.column_type);
                convert_value(raw, &ty, options)?
            }
        };
        let value = if options.preserve_object_id {
            lift_object_ids(value)
        } else {
            value
        };
        let name = options
            .renames
            .get(&column.name)
            .unwrap_or(&column.name)
            .clone();
        doc.insert(name, value);
    }
    Ok(doc)
}

/// Convert a batch of rows.
pub fn rows_to_documents(
    rows: &[Value],
    meta: &[ColumnMeta],
    options: &MapperOptions,
) -> Result<Vec<Document>> {
    rows.iter()
        .map(|row| row_to_document(row, meta, options))
        .collect()
}

fn convert_value(value: &Value, ty: &ColumnType, options: &MapperOptions) -> Result<Bson> {
    if value.is_null() {
        return Ok(Bson::Null);
    }
    match ty {
        ColumnType::Nullable(inner) | ColumnType::LowCardinality(inner) => {
            convert_value(value, inner, options)
        }
        ColumnType::Int => convert_int(value, options),
        ColumnType::UInt8 => {
            if options.treat_uint8_as_bool {
                convert_bool(value)
            } else {
                convert_int(value, options)
            }
        }
        ColumnType::Float => Ok(match value {
            Value::Number(n) => Bson::Double(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Bson::Double(s.trim().parse().unwrap_or(f64::NAN)),
            _ => Bson::Double(f64::NAN),
        }),
        ColumnType::Bool => convert_bool(value),
        ColumnType::Date => convert_date(value),
        ColumnType::DateTime => convert_datetime(value),
        ColumnType::DateTime64(_) => convert_datetime(value),
        ColumnType::Uuid => convert_uuid(value),
        ColumnType::Decimal => Ok(convert_decimal(value)),
        ColumnType::Enum => Ok(match value {
            Value::String(s) => Bson::String(s.clone()),
            other => Bson::String(other.to_string()),
        }),
        ColumnType::StringLike => Ok(convert_string(value, options)),
        ColumnType::Json => convert_json(value),
        ColumnType::Array(element) => match value {
            Value::Array(items) => {
                let mapped: Result<Vec<Bson>> = items
                    .iter()
                    .map(|item| convert_value(item, element, options))
                    .collect();
                Ok(Bson::Array(mapped?))
            }
            other => Err(MondoError::BadValue(format!(
                "expected an array, got {}",
                other
            ))),
        },
        ColumnType::Tuple(elements) => convert_tuple(value, elements, options),
        ColumnType::Other => Ok(match value {
            Value::String(s) => Bson::String(s.clone()),
            other => Bson::String(other.to_string()),
        }),
    }
}

fn convert_int(value: &Value, options: &MapperOptions) -> Result<Bson> {
    let n = match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i
            } else if let Some(u) = n.as_u64() {
                // Above i64 range; surface as a double rather than wrap.
                return Ok(Bson::Double(u as f64));
            } else {
                return Err(MondoError::BadValue(format!(
                    "non-integer value {} in integer column",
                    n
                )));
            }
        }
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| {
            MondoError::BadValue(format!("cannot parse '{}' as a base-10 integer", s))
        })?,
        other => {
            return Err(MondoError::BadValue(format!(
                "expected an integer, got {}",
                other
            )));
        }
    };
    if options.treat_timestamp_as_date && looks_like_epoch_seconds(n) {
        return Ok(Bson::DateTime(bson::DateTime::from_millis(n * 1000)));
    }
    Ok(Bson::Int64(n))
}

/// Plausible unix-seconds range: 2001-09-09 through 5138-11-16.
fn looks_like_epoch_seconds(n: i64) -> bool {
    (1_000_000_000..100_000_000_000).contains(&n)
}

fn convert_bool(value: &Value) -> Result<Bson> {
    match value {
        Value::Bool(b) => Ok(Bson::Boolean(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(Bson::Boolean(false)),
            Some(1) => Ok(Bson::Boolean(true)),
            _ => Err(MondoError::BadValue(format!(
                "numeric bool must be 0 or 1, got {}",
                n
            ))),
        },
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Bson::Boolean(true)),
            "false" | "0" => Ok(Bson::Boolean(false)),
            _ => Err(MondoError::BadValue(format!(
                "cannot parse '{}' as a bool",
                s
            ))),
        },
        other => Err(MondoError::BadValue(format!(
            "expected a bool, got {}",
            other
        ))),
    }
}

fn convert_date(value: &Value) -> Result<Bson> {
    match value {
        Value::String(s) => {
            let date = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|e| MondoError::BadValue(format!("invalid date '{}': {}", s, e)))?;
            let midnight = date.and_hms_opt(0, 0, 0).expect("midnight exists");
            Ok(Bson::DateTime(bson::DateTime::from_millis(
                Utc.from_utc_datetime(&midnight).timestamp_millis(),
            )))
        }
        Value::Number(n) => {
            // Days since epoch, the engine's numeric Date form.
            let days = n.as_i64().ok_or_else(|| {
                MondoError::BadValue(format!("invalid numeric date {}", n))
            })?;
            Ok(Bson::DateTime(bson::DateTime::from_millis(
                days * 86_400_000,
            )))
        }
        other => Err(MondoError::BadValue(format!(
            "expected a date, got {}",
            other
        ))),
    }
}

/// Parse "YYYY-MM-DD HH:MM:SS[.sss]" as UTC (Z appended when absent),
/// or accept unix seconds as a number. Sub-millisecond digits truncate.
fn convert_datetime(value: &Value) -> Result<Bson> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            let millis = if s.contains('T') {
                chrono::DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.timestamp_millis())
                    .map_err(|e| {
                        MondoError::BadValue(format!("invalid datetime '{}': {}", s, e))
                    })?
            } else {
                let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                    .map_err(|e| {
                        MondoError::BadValue(format!("invalid datetime '{}': {}", s, e))
                    })?;
                Utc.from_utc_datetime(&naive).timestamp_millis()
            };
            Ok(Bson::DateTime(bson::DateTime::from_millis(millis)))
        }
        Value::Number(n) => {
            let millis = if let Some(i) = n.as_i64() {
                i * 1000
            } else if let Some(f) = n.as_f64() {
                (f * 1000.0) as i64
            } else {
                return Err(MondoError::BadValue(format!(
                    "invalid numeric datetime {}",
                    n
                )));
            };
            Ok(Bson::DateTime(bson::DateTime::from_millis(millis)))
        }
        other => Err(MondoError::BadValue(format!(
            "expected a datetime, got {}",
            other
        ))),
    }
}

fn convert_uuid(value: &Value) -> Result<Bson> {
    let Value::String(s) = value else {
        return Err(MondoError::BadValue(format!(
            "expected a UUID string, got {}",
            value
        )));
    };
    let parsed = uuid::Uuid::parse_str(s.trim())
        .map_err(|e| MondoError::BadValue(format!("invalid UUID '{}': {}", s, e)))?;
    Ok(Bson::Binary(bson::Binary {
        subtype: BinarySubtype::Uuid,
        bytes: parsed.as_bytes().to_vec(),
    }))
}

fn convert_decimal(value: &Value) -> Bson {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match text.parse::<bson::Decimal128>() {
        Ok(decimal) => Bson::Decimal128(decimal),
        // Out-of-range or malformed decimals keep their string form.
        Err(_) => Bson::String(text),
    }
}

fn convert_string(value: &Value, options: &MapperOptions) -> Bson {
    let Value::String(s) = value else {
        return Bson::String(value.to_string());
    };
    if options.preserve_object_id && is_object_id_hex(s) {
        if let Ok(oid) = bson::oid::ObjectId::parse_str(s) {
            return Bson::ObjectId(oid);
        }
    }
    if options.preserve_binary && looks_like_base64(s) {
        if let Ok(bytes) = BASE64.decode(s) {
            return Bson::Binary(bson::Binary {
                subtype: BinarySubtype::Generic,
                bytes,
            });
        }
    }
    if looks_like_json(s) {
        if let Ok(parsed) = serde_json::from_str::<Value>(s) {
            if let Ok(bson) = structural_json_to_bson(&parsed) {
                return bson;
            }
        }
    }
    Bson::String(s.clone())
}

fn looks_like_base64(s: &str) -> bool {
    s.len() >= 16
        && s.len() % 4 == 0
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
        && s.bytes()
            .any(|b| !b.is_ascii_alphanumeric())
}

fn looks_like_json(s: &str) -> bool {
    let t = s.trim_start();
    t.starts_with('{') || t.starts_with('[')
}

fn convert_json(value: &Value) -> Result<Bson> {
    match value {
        Value::String(s) => {
            let parsed: Value = serde_json::from_str(s)
                .map_err(|e| MondoError::BadValue(format!("invalid JSON column: {}", e)))?;
            structural_json_to_bson(&parsed)
        }
        other => structural_json_to_bson(other),
    }
}

fn convert_tuple(value: &Value, elements: &[ColumnType], options: &MapperOptions) -> Result<Bson> {
    match value {
        Value::Object(fields) => {
            let mut doc = Document::new();
            for (i, (name, field)) in fields.iter().enumerate() {
                let ty = elements.get(i).unwrap_or(&ColumnType::Other);
                let converted = match ty {
                    ColumnType::Other => structural_json_to_bson(field)?,
                    _ => convert_value(field, ty, options)?,
                };
                doc.insert(name.clone(), converted);
            }
            Ok(Bson::Document(doc))
        }
        Value::Array(items) => {
            // Unnamed tuples become documents keyed by position.
            let mut doc = Document::new();
            for (i, item) in items.iter().enumerate() {
                let ty = elements.get(i).unwrap_or(&ColumnType::Other);
                let converted = match ty {
                    ColumnType::Other => structural_json_to_bson(item)?,
                    _ => convert_value(item, ty, options)?,
                };
                doc.insert(i.to_string(), converted);
            }
            Ok(Bson::Document(doc))
        }
        other => Err(MondoError::BadValue(format!(
            "expected a tuple value, got {}",
            other
        ))),
    }
}

/// Structural JSON to document-model conversion, with no Extended JSON
/// interpretation: objects become documents, numbers stay numbers.
fn structural_json_to_bson(value: &Value) -> Result<Bson> {
    Ok(match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Bson::Int64(i)
            } else {
                Bson::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(
            items
                .iter()
                .map(structural_json_to_bson)
                .collect::<Result<_>>()?,
        ),
        Value::Object(fields) => {
            let mut doc = Document::new();
            for (k, v) in fields {
                doc.insert(k.clone(), structural_json_to_bson(v)?);
            }
            Bson::Document(doc)
        }
    })
}

/// Recursively rewrite 24-hex strings into object-ids.
pub fn lift_object_ids(value: Bson) -> Bson {
    match value {
        Bson::String(s) if is_object_id_hex(&s) => match bson::oid::ObjectId::parse_str(&s) {
            Ok(oid) => Bson::ObjectId(oid),
            Err(_) => Bson::String(s),
        },
        Bson::Array(items) => Bson::Array(items.into_iter().map(lift_object_ids).collect()),
        Bson::Document(doc) => {
            let mut out = Document::new();
            for (k, v) in doc {
                out.insert(k, lift_object_ids(v));
            }
            Bson::Document(out)
        }
        other => other,
    }
}

/// Render a document into the engine's JSON row shape: object-ids as hex
/// strings, dates as ISO-8601, decimal/UUID/binary as canonical strings.
/// `undefined` fields are omitted.
pub fn document_to_row(doc: &Document) -> Value {
    let mut out = serde_json::Map::new();
    for (key, value) in doc {
        if matches!(value, Bson::Undefined) {
            continue;
        }
        out.insert(key.clone(), bson_to_columnar(value));
    }
    Value::Object(out)
}

fn bson_to_columnar(value: &Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(n) => Value::from(*n),
        Bson::Int64(n) => Value::from(*n),
        Bson::Double(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Bson::String(s) => Value::String(s.clone()),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => Value::String(
            dt.try_to_rfc3339_string()
                .unwrap_or_else(|_| dt.timestamp_millis().to_string()),
        ),
        Bson::Decimal128(d) => Value::String(d.to_string()),
        Bson::Binary(bin) if bin.subtype == BinarySubtype::Uuid => {
            match uuid::Uuid::from_slice(&bin.bytes) {
                Ok(u) => Value::String(u.to_string()),
                Err(_) => Value::String(BASE64.encode(&bin.bytes)),
            }
        }
        Bson::Binary(bin) => Value::String(BASE64.encode(&bin.bytes)),
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_columnar).collect()),
        Bson::Document(doc) => document_to_row(doc),
        Bson::Timestamp(ts) => Value::from(((ts.time as u64) << 32) | ts.increment as u64),
        other => Value::String(other.to_string()),
    }
}
