//! Backend contract types
//!
//! Option and result records for the uniform operation surface every
//! backend exposes: database and collection management, CRUD, scalar
//! reads, aggregation, indexes, and cursors. The concrete backends and
//! the sum type that closes over them live in the backends crate.

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

/// Default number of documents delivered in the first batch of a read.
pub const DEFAULT_BATCH_SIZE: usize = 101;

/// The two engines a read can be dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Transactional key-document store (embedded SQL engine).
    Oltp,
    /// Analytical columnar engine behind the proxy.
    Olap,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Oltp => write!(f, "oltp"),
            EngineKind::Olap => write!(f, "olap"),
        }
    }
}

/// A `db.collection` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    pub db: String,
    pub coll: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

/// Options accepted by `find`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// Explicit engine override; honored by the router only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<EngineKind>,
}

/// Options accepted by `aggregate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_disk_use: Option<bool>,
    /// Explicit engine override; honored by the router only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<EngineKind>,
}

/// A batched read result. `cursor_id == 0` means the documents field holds
/// the entire result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindResult {
    pub documents: Vec<Document>,
    pub cursor_id: i64,
    pub has_more: bool,
}

impl FindResult {
    /// A result that fits entirely in its first batch.
    pub fn complete(documents: Vec<Document>) -> Self {
        Self {
            documents,
            cursor_id: 0,
            has_more: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertOneResult {
    pub acknowledged: bool,
    pub inserted_id: Bson,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertManyResult {
    pub acknowledged: bool,
    pub inserted_ids: Vec<Bson>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResult {
    pub acknowledged: bool,
    pub matched_count: u64,
    pub modified_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upserted_id: Option<Bson>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResult {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

/// One entry of `listDatabases`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_on_disk: Option<u64>,
    pub empty: bool,
}

impl DatabaseSummary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size_on_disk: None,
            empty: false,
        }
    }
}

/// One entry of `listCollections`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub name: String,
    /// Creation options as supplied to `create`.
    pub options: Document,
}

/// Output of `collStats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionStats {
    pub ns: String,
    pub count: u64,
    /// Total byte size of the stored document payloads.
    pub size: u64,
    /// Zero when the collection is empty.
    pub avg_obj_size: u64,
    pub storage_size: u64,
    pub n_indexes: u64,
}

/// Output of `dbStats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub db: String,
    pub collections: u64,
    pub objects: u64,
    pub data_size: u64,
    pub indexes: u64,
}

/// An index specification: field paths mapped to a direction (`1`/`-1`)
/// or a special kind (`"text"`, `"2dsphere"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSpec {
    pub keys: Document,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub sparse: bool,
}

impl IndexSpec {
    pub fn new(keys: Document) -> Self {
        Self {
            keys,
            name: None,
            unique: false,
            sparse: false,
        }
    }

    /// The index name, synthesized from the key pattern when absent
    /// (`{a: 1, b: -1}` becomes `a_1_b_-1`).
    pub fn effective_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let parts: Vec<String> = self
            .keys
            .iter()
            .map(|(field, dir)| match dir {
                Bson::String(kind) => format!("{}_{}", field, kind),
                Bson::Int32(n) => format!("{}_{}", field, n),
                Bson::Int64(n) => format!("{}_{}", field, n),
                Bson::Double(n) => format!("{}_{}", field, *n as i64),
                other => format!("{}_{}", field, other),
            })
            .collect();
        parts.join("_")
    }
}
