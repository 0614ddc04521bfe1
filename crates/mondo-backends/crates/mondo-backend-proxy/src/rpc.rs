//! Proxy RPC envelope
//!
//! Every backend operation crosses the wire as one JSON request
//! `{method, db?, collection?, filter?, update?, document?, documents?,
//! pipeline?, options?, field?, query?}` and one JSON response
//! `{ok: 1, result}` or `{ok: 0, error, code, codeName?}`. Documents
//! travel as relaxed Extended JSON; cursor identifiers travel as decimal
//! strings and are lifted to 64-bit integers on receipt.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One remote call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn update(mut self, update: Value) -> Self {
        self.update = Some(update);
        self
    }

    pub fn document(mut self, document: Value) -> Self {
        self.document = Some(document);
        self
    }

    pub fn documents(mut self, documents: Vec<Value>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn pipeline(mut self, pipeline: Vec<Value>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn query(mut self, query: Value) -> Self {
        self.query = Some(query);
        self
    }
}

/// The remote's reply envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub ok: f64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub code: Option<i32>,
    #[serde(default, rename = "codeName")]
    pub code_name: Option<String>,
}

impl RpcResponse {
    pub fn is_ok(&self) -> bool {
        self.ok == 1.0
    }
}

/// Error codes the proxy never retries, regardless of HTTP status:
/// bad value, unauthorized, namespace not found, command not found,
/// duplicate key.
pub const NON_RETRYABLE_CODES: &[i32] = &[2, 13, 26, 59, 11000];

/// Transient HTTP statuses worth another attempt.
pub const RETRYABLE_STATUS: &[u16] = &[408, 429, 500, 502, 503, 504];

pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS.contains(&status)
}

pub fn is_non_retryable_code(code: i32) -> bool {
    NON_RETRYABLE_CODES.contains(&code)
}

/// Lift a cursor identifier that crossed the wire as a decimal string
/// (or a plain number) into an `i64`.
pub fn lift_cursor_id(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}
