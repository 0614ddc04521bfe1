//! Document model glue
//!
//! The document model is `bson::Document` / `bson::Bson`: an ordered
//! string-keyed map over a tagged value union (null, boolean, integers,
//! doubles, strings, datetimes, decimal-128, binary, object-id, UUID,
//! arrays, nested documents). This module carries the conversions used at
//! the JSON seams: the proxy RPC envelope and the pipeline validator both
//! speak relaxed Extended JSON.

use bson::oid::ObjectId;
use bson::{Bson, Document};

use crate::{MondoError, Result};

/// True when `s` is a 24-character hex string, i.e. the wire rendering of
/// an object-id.
pub fn is_object_id_hex(s: &str) -> bool {
    s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Render a value as relaxed Extended JSON.
pub fn bson_to_json(value: &Bson) -> serde_json::Value {
    value.clone().into_relaxed_extjson()
}

/// Render a document as relaxed Extended JSON.
pub fn document_to_json(doc: &Document) -> serde_json::Value {
    Bson::Document(doc.clone()).into_relaxed_extjson()
}

/// Lift an Extended JSON value back into the document model. Integers
/// canonicalize to the model's 64-bit form.
pub fn json_to_bson(value: serde_json::Value) -> Result<Bson> {
    Bson::try_from(value)
        .map(canonicalize)
        .map_err(|e| MondoError::BadValue(format!("invalid extended JSON: {}", e)))
}

/// Lift an Extended JSON object back into a document.
pub fn json_to_document(value: serde_json::Value) -> Result<Document> {
    match json_to_bson(value)? {
        Bson::Document(doc) => Ok(doc),
        other => Err(MondoError::BadValue(format!(
            "expected a document, got {}",
            bson_type_name(&other)
        ))),
    }
}

/// Canonicalize a value into the document model's closed sum type: the
/// model carries one integer width, so 32-bit integers widen to 64 bits.
/// Applied at every parse site rather than inferred structurally later.
pub fn canonicalize(value: Bson) -> Bson {
    match value {
        Bson::Int32(n) => Bson::Int64(n as i64),
        Bson::Array(items) => Bson::Array(items.into_iter().map(canonicalize).collect()),
        Bson::Document(doc) => Bson::Document(canonicalize_document(doc)),
        other => other,
    }
}

/// [`canonicalize`] over a whole document.
pub fn canonicalize_document(doc: Document) -> Document {
    let mut out = Document::new();
    for (key, value) in doc {
        out.insert(key, canonicalize(value));
    }
    out
}

/// Identifier for a freshly inserted document.
pub fn fresh_document_id() -> Bson {
    Bson::ObjectId(ObjectId::new())
}

/// Return the document with a guaranteed `_id`, plus that id.
///
/// When the caller did not supply one, a new object-id is generated and
/// placed first, the position the wire layer renders it in.
pub fn ensure_document_id(doc: Document) -> (Document, Bson) {
    if let Some(id) = doc.get("_id") {
        let id = id.clone();
        return (doc, id);
    }
    let id = fresh_document_id();
    let mut with_id = Document::new();
    with_id.insert("_id", id.clone());
    for (key, value) in doc {
        with_id.insert(key, value);
    }
    (with_id, id)
}

/// Canonical string form of an identifier, used for the `_id` storage
/// column. Object-ids render as 24-hex; caller-supplied strings pass
/// through unchanged.
pub fn id_to_string(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => bson_to_json(other).to_string(),
    }
}

/// Human-readable type name for error messages.
pub fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Null => "null",
        Bson::Boolean(_) => "bool",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::DateTime(_) => "date",
        Bson::Decimal128(_) => "decimal",
        Bson::Binary(_) => "binData",
        Bson::ObjectId(_) => "objectId",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::Timestamp(_) => "timestamp",
        Bson::RegularExpression(_) => "regex",
        _ => "value",
    }
}

/// Look up a (possibly dotted) field path inside a document.
pub fn resolve_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut current: Option<&Bson> = None;
    let mut node = doc;
    for (i, segment) in path.split('.').enumerate() {
        if i > 0 {
            node = match current {
                Some(Bson::Document(d)) => d,
                _ => return None,
            };
        }
        current = node.get(segment);
        current?;
    }
    current
}
