//! Mondo backends - concrete engine implementations and the closed sum
//! type over them
//!
//! The uniform operation surface is realized as [`Backend`], a closed sum
//! over the embedded SQL engine (OLTP) and the HTTP proxy to the
//! analytical engine (OLAP). Every operation is an inherent `async fn`
//! dispatching by match, so the full capability set stays visible in one
//! place and no boxed trait objects cross the router.

use bson::{Bson, Document};
use mondo_core::{
    AggregateOptions, CollectionStats, CollectionSummary, CursorInfo, DatabaseStats,
    DatabaseSummary, DeleteResult, EngineKind, FindOptions, FindResult, IndexSpec,
    InsertManyResult, InsertOneResult, Result, UpdateResult,
};

pub use mondo_backend_proxy as proxy;
pub use mondo_backend_proxy::{ProxyBackend, ProxyConfig};
pub use mondo_backend_sqlite as sqlite;
pub use mondo_backend_sqlite::{SqliteBackend, SqliteBackendConfig};

/// A concrete engine, either the transactional store or the analytical
/// proxy.
pub enum Backend {
    Sqlite(SqliteBackend),
    Proxy(ProxyBackend),
}

impl Backend {
    /// Which engine this is, for routing decisions and logs.
    pub fn kind(&self) -> EngineKind {
        match self {
            Backend::Sqlite(_) => EngineKind::Oltp,
            Backend::Proxy(_) => EngineKind::Olap,
        }
    }

    // ---- databases ----

    pub async fn list_databases(&self) -> Result<Vec<DatabaseSummary>> {
        match self {
            Backend::Sqlite(b) => b.list_databases().await,
            Backend::Proxy(b) => b.list_databases().await,
        }
    }

    pub async fn create_database(&self, db: &str) -> Result<()> {
        match self {
            Backend::Sqlite(b) => b.create_database(db).await,
            Backend::Proxy(b) => b.create_database(db).await,
        }
    }

    pub async fn drop_database(&self, db: &str) -> Result<()> {
        match self {
            Backend::Sqlite(b) => b.drop_database(db).await,
            Backend::Proxy(b) => b.drop_database(db).await,
        }
    }

    pub async fn database_exists(&self, db: &str) -> Result<bool> {
        match self {
            Backend::Sqlite(b) => b.database_exists(db).await,
            Backend::Proxy(b) => b.database_exists(db).await,
        }
    }

    // ---- collections ----

    pub async fn list_collections(
        &self,
        db: &str,
        name_filter: Option<&str>,
    ) -> Result<Vec<CollectionSummary>> {
        match self {
            Backend::Sqlite(b) => b.list_collections(db, name_filter).await,
            Backend::Proxy(b) => b.list_collections(db, name_filter).await,
        }
    }

    pub async fn create_collection(
        &self,
        db: &str,
        collection: &str,
        options: Document,
    ) -> Result<()> {
        match self {
            Backend::Sqlite(b) => b.create_collection(db, collection, options).await,
            Backend::Proxy(b) => b.create_collection(db, collection, options).await,
        }
    }

    pub async fn drop_collection(&self, db: &str, collection: &str) -> Result<()> {
        match self {
            Backend::Sqlite(b) => b.drop_collection(db, collection).await,
            Backend::Proxy(b) => b.drop_collection(db, collection).await,
        }
    }

    pub async fn collection_exists(&self, db: &str, collection: &str) -> Result<bool> {
        match self {
            Backend::Sqlite(b) => b.collection_exists(db, collection).await,
            Backend::Proxy(b) => b.collection_exists(db, collection).await,
        }
    }

    pub async fn collection_stats(&self, db: &str, collection: &str) -> Result<CollectionStats> {
        match self {
            Backend::Sqlite(b) => b.collection_stats(db, collection).await,
            Backend::Proxy(b) => b.collection_stats(db, collection).await,
        }
    }

    pub async fn database_stats(&self, db: &str) -> Result<DatabaseStats> {
        match self {
            Backend::Sqlite(b) => b.database_stats(db).await,
            Backend::Proxy(b) => b.database_stats(db).await,
        }
    }

    // ---- reads ----

    pub async fn find(
        &self,
        db: &str,
        collection: &str,
        options: FindOptions,
    ) -> Result<FindResult> {
        match self {
            Backend::Sqlite(b) => b.find(db, collection, options).await,
            Backend::Proxy(b) => b.find(db, collection, options).await,
        }
    }

    pub async fn count(
        &self,
        db: &str,
        collection: &str,
        filter: Option<Document>,
    ) -> Result<u64> {
        match self {
            Backend::Sqlite(b) => b.count(db, collection, filter).await,
            Backend::Proxy(b) => b.count(db, collection, filter).await,
        }
    }

    pub async fn distinct(
        &self,
        db: &str,
        collection: &str,
        field: &str,
        filter: Option<Document>,
    ) -> Result<Vec<Bson>> {
        match self {
            Backend::Sqlite(b) => b.distinct(db, collection, field, filter).await,
            Backend::Proxy(b) => b.distinct(db, collection, field, filter).await,
        }
    }

    pub async fn aggregate(
        &self,
        db: &str,
        collection: &str,
        pipeline: Vec<Document>,
        options: AggregateOptions,
    ) -> Result<FindResult> {
        match self {
            Backend::Sqlite(b) => b.aggregate(db, collection, pipeline, options).await,
            Backend::Proxy(b) => b.aggregate(db, collection, pipeline, options).await,
        }
    }

    // ---- writes ----

    pub async fn insert_one(
        &self,
        db: &str,
        collection: &str,
        document: Document,
    ) -> Result<InsertOneResult> {
        match self {
            Backend::Sqlite(b) => b.insert_one(db, collection, document).await,
            Backend::Proxy(b) => b.insert_one(db, collection, document).await,
        }
    }

    pub async fn insert_many(
        &self,
        db: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertManyResult> {
        match self {
            Backend::Sqlite(b) => b.insert_many(db, collection, documents).await,
            Backend::Proxy(b) => b.insert_many(db, collection, documents).await,
        }
    }

    pub async fn update_one(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateResult> {
        match self {
            Backend::Sqlite(b) => b.update_one(db, collection, filter, update, upsert).await,
            Backend::Proxy(b) => b.update_one(db, collection, filter, update, upsert).await,
        }
    }

    pub async fn update_many(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateResult> {
        match self {
            Backend::Sqlite(b) => b.update_many(db, collection, filter, update, upsert).await,
            Backend::Proxy(b) => b.update_many(db, collection, filter, update, upsert).await,
        }
    }

    pub async fn delete_one(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
    ) -> Result<DeleteResult> {
        match self {
            Backend::Sqlite(b) => b.delete_one(db, collection, filter).await,
            Backend::Proxy(b) => b.delete_one(db, collection, filter).await,
        }
    }

    pub async fn delete_many(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
    ) -> Result<DeleteResult> {
        match self {
            Backend::Sqlite(b) => b.delete_many(db, collection, filter).await,
            Backend::Proxy(b) => b.delete_many(db, collection, filter).await,
        }
    }

    // ---- indexes ----

    pub async fn list_indexes(&self, db: &str, collection: &str) -> Result<Vec<IndexSpec>> {
        match self {
            Backend::Sqlite(b) => b.list_indexes(db, collection).await,
            Backend::Proxy(b) => b.list_indexes(db, collection).await,
        }
    }

    pub async fn create_indexes(
        &self,
        db: &str,
        collection: &str,
        specs: Vec<IndexSpec>,
    ) -> Result<u64> {
        match self {
            Backend::Sqlite(b) => b.create_indexes(db, collection, specs).await,
            Backend::Proxy(b) => b.create_indexes(db, collection, specs).await,
        }
    }

    pub async fn drop_index(&self, db: &str, collection: &str, name: &str) -> Result<()> {
        match self {
            Backend::Sqlite(b) => b.drop_index(db, collection, name).await,
            Backend::Proxy(b) => b.drop_index(db, collection, name).await,
        }
    }

    pub async fn drop_indexes(&self, db: &str, collection: &str) -> Result<u64> {
        match self {
            Backend::Sqlite(b) => b.drop_indexes(db, collection).await,
            Backend::Proxy(b) => b.drop_indexes(db, collection).await,
        }
    }

    // ---- cursors ----

    pub async fn create_cursor(
        &self,
        namespace: &str,
        documents: Vec<Document>,
        batch_size: usize,
    ) -> Result<FindResult> {
        match self {
            Backend::Sqlite(b) => b.create_cursor(namespace, documents, batch_size).await,
            Backend::Proxy(b) => b.create_cursor(namespace, documents, batch_size).await,
        }
    }

    pub async fn get_cursor(&self, id: i64) -> Option<CursorInfo> {
        match self {
            Backend::Sqlite(b) => b.get_cursor(id).await,
            Backend::Proxy(b) => b.get_cursor(id).await,
        }
    }

    pub async fn advance_cursor(&self, id: i64, batch_size: usize) -> Vec<Document> {
        match self {
            Backend::Sqlite(b) => b.advance_cursor(id, batch_size).await,
            Backend::Proxy(b) => b.advance_cursor(id, batch_size).await,
        }
    }

    pub async fn close_cursor(&self, id: i64) -> bool {
        match self {
            Backend::Sqlite(b) => b.close_cursor(id).await,
            Backend::Proxy(b) => b.close_cursor(id).await,
        }
    }

    pub async fn cleanup_expired_cursors(&self) -> usize {
        match self {
            Backend::Sqlite(b) => b.cleanup_expired_cursors().await,
            Backend::Proxy(b) => b.cleanup_expired_cursors().await,
        }
    }
}

impl From<SqliteBackend> for Backend {
    fn from(backend: SqliteBackend) -> Self {
        Backend::Sqlite(backend)
    }
}

impl From<ProxyBackend> for Backend {
    fn from(backend: ProxyBackend) -> Self {
        Backend::Proxy(backend)
    }
}
