//! Embedded SQL backend
//!
//! Implements the full backend contract over per-database sqlite files:
//! filters and sorts translate to SQL, projections and pipelines evaluate
//! in memory, writes run in short transactions, and oversized reads spill
//! into the embedded cursor manager.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bson::{Bson, Document};
use parking_lot::RwLock;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;

use mondo_core::{
    CollectionStats, CollectionSummary, CursorInfo, CursorManager, DEFAULT_BATCH_SIZE,
    DatabaseStats, DatabaseSummary, DeleteResult, FindOptions, FindResult, IndexSpec,
    InsertManyResult, InsertOneResult, MondoError, Result, UpdateResult,
    canonicalize_document, document_to_json, ensure_document_id, id_to_string, json_to_document,
    resolve_path, validate_collection_name, validate_database_name, validate_field_path,
};
use mondo_pipeline::{PipelineContext, apply_projection, optimize, run_pipeline};

use crate::db::{DatabaseHandle, insert_err, storage_err};
use crate::sql::{SqlFilter, filter_to_sql, sort_to_sql};
use crate::update::{apply_update, document_from_filter, is_operator_update};

/// Interval of the background cursor sweep.
const CURSOR_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Construction options.
#[derive(Debug, Clone)]
pub struct SqliteBackendConfig {
    /// Directory holding one `<name>.sqlite` file per database.
    pub data_dir: PathBuf,
}

/// The transactional key-document store.
pub struct SqliteBackend {
    data_dir: PathBuf,
    databases: RwLock<HashMap<String, Arc<DatabaseHandle>>>,
    cursors: Arc<CursorManager>,
}

impl SqliteBackend {
    /// Create a backend rooted at the configured data directory,
    /// creating the directory on first use.
    pub fn new(config: SqliteBackendConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        tracing::info!(data_dir = %config.data_dir.display(), "sqlite backend ready");
        Ok(Self {
            data_dir: config.data_dir,
            databases: RwLock::new(HashMap::new()),
            cursors: Arc::new(CursorManager::new()),
        })
    }

    /// Spawn the once-a-minute cursor TTL sweep.
    pub fn start_cursor_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let cursors = Arc::clone(&self.cursors);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(CURSOR_SWEEP_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                cursors.cleanup_expired();
            }
        })
    }

    /// Get or open the handle for a database, creating its file.
    fn open_handle(&self, db: &str) -> Result<Arc<DatabaseHandle>> {
        validate_database_name(db)?;
        if let Some(handle) = self.databases.read().get(db) {
            return Ok(Arc::clone(handle));
        }
        let mut databases = self.databases.write();
        // Re-check under the write lock.
        if let Some(handle) = databases.get(db) {
            return Ok(Arc::clone(handle));
        }
        let handle = Arc::new(DatabaseHandle::open(&self.data_dir, db)?);
        databases.insert(db.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Handle for an existing database; `None` when neither a live handle
    /// nor a file exists.
    fn existing_handle(&self, db: &str) -> Result<Option<Arc<DatabaseHandle>>> {
        validate_database_name(db)?;
        if let Some(handle) = self.databases.read().get(db) {
            return Ok(Some(Arc::clone(handle)));
        }
        if self.data_dir.join(format!("{}.sqlite", db)).exists() {
            return Ok(Some(self.open_handle(db)?));
        }
        Ok(None)
    }

    // ---- databases ----

    #[tracing::instrument(skip(self))]
    pub async fn list_databases(&self) -> Result<Vec<DatabaseSummary>> {
        let mut summaries = vec![DatabaseSummary {
            name: "admin".to_string(),
            size_on_disk: Some(0),
            empty: true,
        }];
        let entries = std::fs::read_dir(&self.data_dir)?;
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().and_then(|f| f.strip_suffix(".sqlite")) else {
                continue;
            };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            summaries.push(DatabaseSummary {
                name: name.to_string(),
                size_on_disk: Some(size),
                empty: size == 0,
            });
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_database(&self, db: &str) -> Result<()> {
        self.open_handle(db)?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn drop_database(&self, db: &str) -> Result<()> {
        validate_database_name(db)?;
        self.databases.write().remove(db);
        let path = self.data_dir.join(format!("{}.sqlite", db));
        if path.exists() {
            std::fs::remove_file(&path)?;
            // WAL sidecar files go with the database.
            let _ = std::fs::remove_file(self.data_dir.join(format!("{}.sqlite-wal", db)));
            let _ = std::fs::remove_file(self.data_dir.join(format!("{}.sqlite-shm", db)));
            tracing::info!(db = %db, "database dropped");
        }
        Ok(())
    }

    pub async fn database_exists(&self, db: &str) -> Result<bool> {
        validate_database_name(db)?;
        Ok(self.databases.read().contains_key(db)
            || self.data_dir.join(format!("{}.sqlite", db)).exists())
    }

    // ---- collections ----

    #[tracing::instrument(skip(self))]
    pub async fn list_collections(
        &self,
        db: &str,
        name_filter: Option<&str>,
    ) -> Result<Vec<CollectionSummary>> {
        let Some(handle) = self.existing_handle(db)? else {
            return Ok(Vec::new());
        };
        let conn = handle.conn().lock();
        let mut stmt = conn
            .prepare("SELECT name, options FROM collections ORDER BY name")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(storage_err)?;

        let mut collections = Vec::new();
        for row in rows {
            let (name, options) = row.map_err(storage_err)?;
            if let Some(wanted) = name_filter {
                if name != wanted {
                    continue;
                }
            }
            let options = serde_json::from_str::<serde_json::Value>(&options)
                .ok()
                .and_then(|v| json_to_document(v).ok())
                .unwrap_or_default();
            collections.push(CollectionSummary { name, options });
        }
        Ok(collections)
    }

    #[tracing::instrument(skip(self, options))]
    pub async fn create_collection(
        &self,
        db: &str,
        collection: &str,
        options: Document,
    ) -> Result<()> {
        validate_collection_name(collection)?;
        let handle = self.open_handle(db)?;
        if handle.collection_id(collection)?.is_some() {
            return Err(MondoError::BadValue(format!(
                "collection '{}.{}' already exists",
                db, collection
            )));
        }
        let rendered = document_to_json(&options).to_string();
        handle.collection_id_or_create(collection, &rendered)?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn drop_collection(&self, db: &str, collection: &str) -> Result<()> {
        validate_collection_name(collection)?;
        let Some(handle) = self.existing_handle(db)? else {
            return Err(MondoError::NamespaceNotFound(format!("{}.{}", db, collection)));
        };
        let Some(_) = handle.collection_id(collection)? else {
            return Err(MondoError::NamespaceNotFound(format!("{}.{}", db, collection)));
        };
        let conn = handle.conn().lock();
        conn.execute("DELETE FROM collections WHERE name = ?1", [collection])
            .map_err(storage_err)?;
        tracing::info!(db = %db, collection = %collection, "collection dropped");
        Ok(())
    }

    pub async fn collection_exists(&self, db: &str, collection: &str) -> Result<bool> {
        validate_collection_name(collection)?;
        match self.existing_handle(db)? {
            Some(handle) => Ok(handle.collection_id(collection)?.is_some()),
            None => Ok(false),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn collection_stats(&self, db: &str, collection: &str) -> Result<CollectionStats> {
        let ns = format!("{}.{}", db, collection);
        validate_collection_name(collection)?;
        let handle = self
            .existing_handle(db)?
            .ok_or_else(|| MondoError::NamespaceNotFound(ns.clone()))?;
        let coll_id = handle
            .collection_id(collection)?
            .ok_or_else(|| MondoError::NamespaceNotFound(ns.clone()))?;

        let conn = handle.conn().lock();
        let (count, size): (u64, u64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(data)), 0) FROM documents WHERE collection_id = ?1",
                [coll_id],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
            )
            .map_err(storage_err)?;
        let index_count: u64 = conn
            .query_row(
                "SELECT COUNT(*) FROM indexes WHERE collection_id = ?1",
                [coll_id],
                |row| row.get::<_, i64>(0),
            )
            .map_err(storage_err)? as u64;

        Ok(CollectionStats {
            ns,
            count,
            size,
            avg_obj_size: if count == 0 { 0 } else { size / count },
            storage_size: size,
            n_indexes: index_count + 1,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn database_stats(&self, db: &str) -> Result<DatabaseStats> {
        let Some(handle) = self.existing_handle(db)? else {
            return Ok(DatabaseStats {
                db: db.to_string(),
                collections: 0,
                objects: 0,
                data_size: 0,
                indexes: 0,
            });
        };
        let conn = handle.conn().lock();
        let collections: i64 = conn
            .query_row("SELECT COUNT(*) FROM collections", [], |row| row.get(0))
            .map_err(storage_err)?;
        let (objects, data_size): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(data)), 0) FROM documents",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(storage_err)?;
        let stored_indexes: i64 = conn
            .query_row("SELECT COUNT(*) FROM indexes", [], |row| row.get(0))
            .map_err(storage_err)?;
        Ok(DatabaseStats {
            db: db.to_string(),
            collections: collections as u64,
            objects: objects as u64,
            data_size: data_size as u64,
            indexes: (stored_indexes + collections) as u64,
        })
    }

    // ---- reads ----

    /// Fetch matching documents in deterministic order.
    fn select_documents(
        &self,
        handle: &DatabaseHandle,
        coll_id: i64,
        filter: Option<&Document>,
        sort: Option<&Document>,
        limit: Option<i64>,
        skip: Option<u64>,
    ) -> Result<Vec<Document>> {
        let sql_filter = match filter {
            Some(f) => filter_to_sql(f)?,
            None => SqlFilter::match_all(),
        };
        let order = sort_to_sql(sort)?;
        let sql = format!(
            "SELECT data FROM documents WHERE collection_id = ? AND ({}) {} LIMIT ? OFFSET ?",
            sql_filter.clause, order
        );

        let mut params: Vec<SqlValue> = Vec::with_capacity(sql_filter.params.len() + 3);
        params.push(SqlValue::Integer(coll_id));
        params.extend(sql_filter.params);
        params.push(SqlValue::Integer(limit.unwrap_or(-1)));
        params.push(SqlValue::Integer(skip.unwrap_or(0) as i64));

        let conn = handle.conn().lock();
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                row.get::<_, String>(0)
            })
            .map_err(storage_err)?;

        let mut documents = Vec::new();
        for row in rows {
            let payload = row.map_err(storage_err)?;
            let value: serde_json::Value = serde_json::from_str(&payload)?;
            documents.push(json_to_document(value)?);
        }
        Ok(documents)
    }

    #[tracing::instrument(skip(self, options), fields(db = %db, collection = %collection))]
    pub async fn find(
        &self,
        db: &str,
        collection: &str,
        options: FindOptions,
    ) -> Result<FindResult> {
        validate_collection_name(collection)?;
        let Some(handle) = self.existing_handle(db)? else {
            return Ok(FindResult::complete(Vec::new()));
        };
        let Some(coll_id) = handle.collection_id(collection)? else {
            return Ok(FindResult::complete(Vec::new()));
        };

        let mut documents = self.select_documents(
            &handle,
            coll_id,
            options.filter.as_ref(),
            options.sort.as_ref(),
            options.limit,
            options.skip,
        )?;

        if let Some(projection) = &options.projection {
            documents = documents
                .iter()
                .map(|doc| apply_projection(doc, projection))
                .collect::<Result<_>>()?;
        }

        let batch_size = options.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        let namespace = format!("{}.{}", db, collection);
        tracing::debug!(total = documents.len(), "find materialized");
        Ok(self.cursors.register(namespace, documents, batch_size))
    }

    #[tracing::instrument(skip(self, filter))]
    pub async fn count(
        &self,
        db: &str,
        collection: &str,
        filter: Option<Document>,
    ) -> Result<u64> {
        validate_collection_name(collection)?;
        let Some(handle) = self.existing_handle(db)? else {
            return Ok(0);
        };
        let Some(coll_id) = handle.collection_id(collection)? else {
            return Ok(0);
        };
        let sql_filter = match &filter {
            Some(f) => filter_to_sql(f)?,
            None => SqlFilter::match_all(),
        };
        let sql = format!(
            "SELECT COUNT(*) FROM documents WHERE collection_id = ? AND ({})",
            sql_filter.clause
        );
        let mut params = vec![SqlValue::Integer(coll_id)];
        params.extend(sql_filter.params);
        let conn = handle.conn().lock();
        let count: i64 = conn
            .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))
            .map_err(storage_err)?;
        Ok(count as u64)
    }

    #[tracing::instrument(skip(self, filter))]
    pub async fn distinct(
        &self,
        db: &str,
        collection: &str,
        field: &str,
        filter: Option<Document>,
    ) -> Result<Vec<Bson>> {
        validate_collection_name(collection)?;
        if field != "_id" {
            validate_field_path(field)?;
        }
        let Some(handle) = self.existing_handle(db)? else {
            return Ok(Vec::new());
        };
        let Some(coll_id) = handle.collection_id(collection)? else {
            return Ok(Vec::new());
        };
        let documents =
            self.select_documents(&handle, coll_id, filter.as_ref(), None, None, None)?;

        let mut seen = Vec::new();
        let mut values = Vec::new();
        let mut push_unique = |value: &Bson| {
            let rendered = value.clone().into_canonical_extjson().to_string();
            if !seen.contains(&rendered) {
                seen.push(rendered);
                values.push(value.clone());
            }
        };
        for doc in &documents {
            match resolve_path(doc, field) {
                // Array values contribute each element, as `distinct` does.
                Some(Bson::Array(items)) => items.iter().for_each(&mut push_unique),
                Some(value) => push_unique(value),
                None => {}
            }
        }
        Ok(values)
    }

    #[tracing::instrument(skip(self, pipeline, options), fields(db = %db, collection = %collection, stages = pipeline.len()))]
    pub async fn aggregate(
        &self,
        db: &str,
        collection: &str,
        pipeline: Vec<Document>,
        options: mondo_core::AggregateOptions,
    ) -> Result<FindResult> {
        validate_collection_name(collection)?;
        let namespace = format!("{}.{}", db, collection);
        let Some(handle) = self.existing_handle(db)? else {
            return Ok(FindResult::complete(Vec::new()));
        };
        let input = match handle.collection_id(collection)? {
            Some(coll_id) => self.select_documents(&handle, coll_id, None, None, None, None)?,
            None => Vec::new(),
        };

        // Pre-materialize every collection the pipeline joins against.
        let mut ctx = PipelineContext::new();
        for from in lookup_sources(&pipeline) {
            if validate_collection_name(&from).is_err() {
                continue;
            }
            let docs = match handle.collection_id(&from)? {
                Some(id) => self.select_documents(&handle, id, None, None, None, None)?,
                None => Vec::new(),
            };
            ctx = ctx.with_lookup(from, docs);
        }

        let pipeline = optimize(pipeline);
        let output = run_pipeline(input, &pipeline, &ctx)?;

        let batch_size = options.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        tracing::debug!(results = output.len(), "aggregation evaluated");
        Ok(self.cursors.register(namespace, output, batch_size))
    }

    // ---- writes ----

    #[tracing::instrument(skip(self, document))]
    pub async fn insert_one(
        &self,
        db: &str,
        collection: &str,
        document: Document,
    ) -> Result<InsertOneResult> {
        validate_collection_name(collection)?;
        let handle = self.open_handle(db)?;
        let coll_id = handle.collection_id_or_create(collection, "{}")?;

        let (document, id) = ensure_document_id(canonicalize_document(document));
        let id_text = id_to_string(&id);
        let payload = document_to_json(&document).to_string();

        let conn = handle.conn().lock();
        conn.execute(
            "INSERT INTO documents (collection_id, _id, data) VALUES (?1, ?2, ?3)",
            (coll_id, &id_text, &payload),
        )
        .map_err(|e| insert_err(&id_text, e))?;

        Ok(InsertOneResult {
            acknowledged: true,
            inserted_id: id,
        })
    }

    #[tracing::instrument(skip(self, documents), fields(count = documents.len()))]
    pub async fn insert_many(
        &self,
        db: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertManyResult> {
        validate_collection_name(collection)?;
        let handle = self.open_handle(db)?;
        let coll_id = handle.collection_id_or_create(collection, "{}")?;

        let mut conn = handle.conn().lock();
        let tx = conn.transaction().map_err(storage_err)?;
        let mut inserted_ids = Vec::with_capacity(documents.len());
        for document in documents {
            let (document, id) = ensure_document_id(canonicalize_document(document));
            let id_text = id_to_string(&id);
            let payload = document_to_json(&document).to_string();
            tx.execute(
                "INSERT INTO documents (collection_id, _id, data) VALUES (?1, ?2, ?3)",
                (coll_id, &id_text, &payload),
            )
            .map_err(|e| insert_err(&id_text, e))?;
            inserted_ids.push(id);
        }
        tx.commit().map_err(storage_err)?;

        Ok(InsertManyResult {
            acknowledged: true,
            inserted_ids,
        })
    }

    /// Rows matching a filter, in the deterministic delete/update order.
    fn matching_rows(
        &self,
        handle: &DatabaseHandle,
        coll_id: i64,
        filter: &Document,
        limit: Option<i64>,
    ) -> Result<Vec<(i64, Document)>> {
        let sql_filter = filter_to_sql(filter)?;
        let sql = format!(
            "SELECT id, data FROM documents WHERE collection_id = ? AND ({}) ORDER BY id ASC LIMIT ?",
            sql_filter.clause
        );
        let mut params = vec![SqlValue::Integer(coll_id)];
        params.extend(sql_filter.params);
        params.push(SqlValue::Integer(limit.unwrap_or(-1)));

        let conn = handle.conn().lock();
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(storage_err)?;
        let mut matched = Vec::new();
        for row in rows {
            let (rowid, payload) = row.map_err(storage_err)?;
            let value: serde_json::Value = serde_json::from_str(&payload)?;
            matched.push((rowid, json_to_document(value)?));
        }
        Ok(matched)
    }

    fn upsert_from_filter(
        &self,
        handle: &DatabaseHandle,
        coll_id: i64,
        filter: &Document,
        update: &Document,
    ) -> Result<UpdateResult> {
        let base = if is_operator_update(update) {
            apply_update(&document_from_filter(filter), update)?
        } else {
            // A replacement upsert inserts the replacement itself, keeping
            // the filter's _id when the replacement does not carry one.
            let mut replacement = update.clone();
            if replacement.get("_id").is_none() {
                if let Some(id) = document_from_filter(filter).get("_id") {
                    let mut with_id = Document::new();
                    with_id.insert("_id", id.clone());
                    for (k, v) in replacement {
                        with_id.insert(k, v);
                    }
                    replacement = with_id;
                }
            }
            replacement
        };
        let (document, id) = ensure_document_id(canonicalize_document(base));
        let id_text = id_to_string(&id);
        let payload = document_to_json(&document).to_string();
        let conn = handle.conn().lock();
        conn.execute(
            "INSERT INTO documents (collection_id, _id, data) VALUES (?1, ?2, ?3)",
            (coll_id, &id_text, &payload),
        )
        .map_err(|e| insert_err(&id_text, e))?;
        tracing::debug!(id = %id_text, "upsert inserted a new document");
        Ok(UpdateResult {
            acknowledged: true,
            matched_count: 0,
            modified_count: 0,
            upserted_id: Some(id),
        })
    }

    fn write_updates(
        &self,
        handle: &DatabaseHandle,
        rows: Vec<(i64, Document)>,
        update: &Document,
    ) -> Result<UpdateResult> {
        let matched = rows.len() as u64;
        let mut conn = handle.conn().lock();
        let tx = conn.transaction().map_err(storage_err)?;
        let mut modified = 0_u64;
        for (rowid, original) in rows {
            let updated = canonicalize_document(apply_update(&original, update)?);
            if updated == original {
                continue;
            }
            let payload = document_to_json(&updated).to_string();
            tx.execute(
                "UPDATE documents SET data = ?1 WHERE id = ?2",
                (&payload, rowid),
            )
            .map_err(storage_err)?;
            modified += 1;
        }
        tx.commit().map_err(storage_err)?;
        Ok(UpdateResult {
            acknowledged: true,
            matched_count: matched,
            modified_count: modified,
            upserted_id: None,
        })
    }

    #[tracing::instrument(skip(self, filter, update))]
    pub async fn update_one(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateResult> {
        validate_collection_name(collection)?;
        let handle = self.open_handle(db)?;
        let coll_id = if upsert {
            handle.collection_id_or_create(collection, "{}")?
        } else {
            match handle.collection_id(collection)? {
                Some(id) => id,
                None => {
                    return Ok(UpdateResult {
                        acknowledged: true,
                        matched_count: 0,
                        modified_count: 0,
                        upserted_id: None,
                    });
                }
            }
        };

        let rows = self.matching_rows(&handle, coll_id, &filter, Some(1))?;
        if rows.is_empty() {
            if upsert {
                return self.upsert_from_filter(&handle, coll_id, &filter, &update);
            }
            return Ok(UpdateResult {
                acknowledged: true,
                matched_count: 0,
                modified_count: 0,
                upserted_id: None,
            });
        }
        self.write_updates(&handle, rows, &update)
    }

    #[tracing::instrument(skip(self, filter, update))]
    pub async fn update_many(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateResult> {
        validate_collection_name(collection)?;
        let handle = self.open_handle(db)?;
        let coll_id = if upsert {
            handle.collection_id_or_create(collection, "{}")?
        } else {
            match handle.collection_id(collection)? {
                Some(id) => id,
                None => {
                    return Ok(UpdateResult {
                        acknowledged: true,
                        matched_count: 0,
                        modified_count: 0,
                        upserted_id: None,
                    });
                }
            }
        };

        let rows = self.matching_rows(&handle, coll_id, &filter, None)?;
        if rows.is_empty() {
            if upsert {
                // Zero matches fold into the single-document upsert path;
                // exactly one document is synthesized from the filter.
                return self.upsert_from_filter(&handle, coll_id, &filter, &update);
            }
            return Ok(UpdateResult {
                acknowledged: true,
                matched_count: 0,
                modified_count: 0,
                upserted_id: None,
            });
        }
        self.write_updates(&handle, rows, &update)
    }

    #[tracing::instrument(skip(self, filter))]
    pub async fn delete_one(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
    ) -> Result<DeleteResult> {
        validate_collection_name(collection)?;
        let Some(handle) = self.existing_handle(db)? else {
            return Ok(DeleteResult {
                acknowledged: true,
                deleted_count: 0,
            });
        };
        let Some(coll_id) = handle.collection_id(collection)? else {
            return Ok(DeleteResult {
                acknowledged: true,
                deleted_count: 0,
            });
        };
        let rows = self.matching_rows(&handle, coll_id, &filter, Some(1))?;
        let Some((rowid, _)) = rows.first() else {
            return Ok(DeleteResult {
                acknowledged: true,
                deleted_count: 0,
            });
        };
        let conn = handle.conn().lock();
        let deleted = conn
            .execute("DELETE FROM documents WHERE id = ?1", [rowid])
            .map_err(storage_err)?;
        Ok(DeleteResult {
            acknowledged: true,
            deleted_count: deleted as u64,
        })
    }

    #[tracing::instrument(skip(self, filter))]
    pub async fn delete_many(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
    ) -> Result<DeleteResult> {
        validate_collection_name(collection)?;
        let Some(handle) = self.existing_handle(db)? else {
            return Ok(DeleteResult {
                acknowledged: true,
                deleted_count: 0,
            });
        };
        let Some(coll_id) = handle.collection_id(collection)? else {
            return Ok(DeleteResult {
                acknowledged: true,
                deleted_count: 0,
            });
        };
        let sql_filter = filter_to_sql(&filter)?;
        let sql = format!(
            "DELETE FROM documents WHERE collection_id = ? AND ({})",
            sql_filter.clause
        );
        let mut params = vec![SqlValue::Integer(coll_id)];
        params.extend(sql_filter.params);
        let conn = handle.conn().lock();
        let deleted = conn
            .execute(&sql, params_from_iter(params.iter()))
            .map_err(storage_err)?;
        tracing::debug!(deleted, "documents deleted");
        Ok(DeleteResult {
            acknowledged: true,
            deleted_count: deleted as u64,
        })
    }

    // ---- indexes ----

    #[tracing::instrument(skip(self))]
    pub async fn list_indexes(&self, db: &str, collection: &str) -> Result<Vec<IndexSpec>> {
        validate_collection_name(collection)?;
        let mut specs = vec![IndexSpec {
            keys: bson::doc! { "_id": 1 },
            name: Some("_id_".to_string()),
            unique: true,
            sparse: false,
        }];
        let Some(handle) = self.existing_handle(db)? else {
            return Ok(specs);
        };
        let Some(coll_id) = handle.collection_id(collection)? else {
            return Ok(specs);
        };
        let conn = handle.conn().lock();
        let mut stmt = conn
            .prepare("SELECT name, key, options FROM indexes WHERE collection_id = ?1 ORDER BY name")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([coll_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(storage_err)?;
        for row in rows {
            let (name, key, options) = row.map_err(storage_err)?;
            let keys = serde_json::from_str::<serde_json::Value>(&key)
                .ok()
                .and_then(|v| json_to_document(v).ok())
                .unwrap_or_default();
            let options = serde_json::from_str::<serde_json::Value>(&options)
                .ok()
                .and_then(|v| json_to_document(v).ok())
                .unwrap_or_default();
            specs.push(IndexSpec {
                keys,
                name: Some(name),
                unique: options.get_bool("unique").unwrap_or(false),
                sparse: options.get_bool("sparse").unwrap_or(false),
            });
        }
        Ok(specs)
    }

    #[tracing::instrument(skip(self, specs), fields(count = specs.len()))]
    pub async fn create_indexes(
        &self,
        db: &str,
        collection: &str,
        specs: Vec<IndexSpec>,
    ) -> Result<u64> {
        validate_collection_name(collection)?;
        let handle = self.open_handle(db)?;
        let coll_id = handle.collection_id_or_create(collection, "{}")?;

        let mut created = 0_u64;
        for spec in specs {
            for (field, _) in &spec.keys {
                if field != "_id" {
                    validate_field_path(field)?;
                }
            }
            let name = spec.effective_name();
            if name == "_id_" {
                continue;
            }
            let keys = document_to_json(&spec.keys).to_string();
            let options = document_to_json(&bson::doc! {
                "unique": spec.unique,
                "sparse": spec.sparse,
            })
            .to_string();

            let conn = handle.conn().lock();
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO indexes (collection_id, name, key, options) VALUES (?1, ?2, ?3, ?4)",
                    (coll_id, &name, &keys, &options),
                )
                .map_err(storage_err)?;
            if inserted == 0 {
                continue;
            }
            created += 1;

            // Back simple single-field indexes with a real expression
            // index; special kinds (text, 2dsphere) stay metadata-only.
            // The name gates on the same character set drop_index uses
            // before it reaches the quoted identifier.
            if let Some((field, direction)) = single_numeric_key(&spec.keys) {
                if field != "_id" && name.chars().all(index_name_char) {
                    let sql = format!(
                        "CREATE INDEX IF NOT EXISTS \"ix_{coll_id}_{name}\" ON documents (json_extract(data, '$.{field}') {dir}) WHERE collection_id = {coll_id}",
                        coll_id = coll_id,
                        name = name,
                        field = field,
                        dir = if direction >= 0 { "ASC" } else { "DESC" },
                    );
                    conn.execute_batch(&sql).map_err(storage_err)?;
                }
            }
        }
        tracing::debug!(created, "indexes created");
        Ok(created)
    }

    #[tracing::instrument(skip(self))]
    pub async fn drop_index(&self, db: &str, collection: &str, name: &str) -> Result<()> {
        validate_collection_name(collection)?;
        if name == "_id_" {
            return Err(MondoError::BadValue("cannot drop the _id index".into()));
        }
        let ns = format!("{}.{}", db, collection);
        let handle = self
            .existing_handle(db)?
            .ok_or_else(|| MondoError::NamespaceNotFound(ns.clone()))?;
        let coll_id = handle
            .collection_id(collection)?
            .ok_or_else(|| MondoError::NamespaceNotFound(ns))?;

        let conn = handle.conn().lock();
        let removed = conn
            .execute(
                "DELETE FROM indexes WHERE collection_id = ?1 AND name = ?2",
                (coll_id, name),
            )
            .map_err(storage_err)?;
        if removed == 0 {
            return Err(MondoError::BadValue(format!("index '{}' not found", name)));
        }
        if name.chars().all(index_name_char) {
            let sql = format!("DROP INDEX IF EXISTS \"ix_{}_{}\"", coll_id, name);
            conn.execute_batch(&sql).map_err(storage_err)?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn drop_indexes(&self, db: &str, collection: &str) -> Result<u64> {
        validate_collection_name(collection)?;
        let Some(handle) = self.existing_handle(db)? else {
            return Ok(0);
        };
        let Some(coll_id) = handle.collection_id(collection)? else {
            return Ok(0);
        };
        let conn = handle.conn().lock();
        let names: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM indexes WHERE collection_id = ?1")
                .map_err(storage_err)?;
            let rows = stmt
                .query_map([coll_id], |row| row.get::<_, String>(0))
                .map_err(storage_err)?;
            rows.collect::<std::result::Result<_, _>>().map_err(storage_err)?
        };
        let dropped = conn
            .execute("DELETE FROM indexes WHERE collection_id = ?1", [coll_id])
            .map_err(storage_err)?;
        for name in names {
            if name.chars().all(index_name_char) {
                let sql = format!("DROP INDEX IF EXISTS \"ix_{}_{}\"", coll_id, name);
                conn.execute_batch(&sql).map_err(storage_err)?;
            }
        }
        Ok(dropped as u64)
    }

    // ---- cursors ----

    pub fn cursor_manager(&self) -> &Arc<CursorManager> {
        &self.cursors
    }

    pub async fn create_cursor(
        &self,
        namespace: &str,
        documents: Vec<Document>,
        batch_size: usize,
    ) -> Result<FindResult> {
        Ok(self.cursors.register(namespace, documents, batch_size))
    }

    pub async fn get_cursor(&self, id: i64) -> Option<CursorInfo> {
        self.cursors.get(id)
    }

    pub async fn advance_cursor(&self, id: i64, batch_size: usize) -> Vec<Document> {
        self.cursors.advance(id, batch_size)
    }

    pub async fn close_cursor(&self, id: i64) -> bool {
        self.cursors.close(id)
    }

    pub async fn cleanup_expired_cursors(&self) -> usize {
        self.cursors.cleanup_expired()
    }
}

fn index_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'
}

/// The single `(field, direction)` of a one-field numeric index, if that
/// is what the key pattern is.
fn single_numeric_key(keys: &Document) -> Option<(&str, i64)> {
    if keys.len() != 1 {
        return None;
    }
    let (field, direction) = keys.iter().next()?;
    let direction = match direction {
        Bson::Int32(n) => *n as i64,
        Bson::Int64(n) => *n,
        Bson::Double(n) => *n as i64,
        _ => return None,
    };
    Some((field.as_str(), direction))
}

/// Collection names the pipeline's `$lookup`/`$graphLookup` stages join
/// against, including inside `$facet` sub-pipelines.
fn lookup_sources(pipeline: &[Document]) -> Vec<String> {
    let mut sources = Vec::new();
    collect_lookup_sources(pipeline, &mut sources);
    sources.sort();
    sources.dedup();
    sources
}

fn collect_lookup_sources(pipeline: &[Document], out: &mut Vec<String>) {
    for stage in pipeline {
        if let Ok(spec) = stage.get_document("$lookup") {
            if let Ok(from) = spec.get_str("from") {
                out.push(from.to_string());
            }
        }
        if let Ok(spec) = stage.get_document("$graphLookup") {
            if let Ok(from) = spec.get_str("from") {
                out.push(from.to_string());
            }
        }
        if let Ok(facets) = stage.get_document("$facet") {
            for (_, sub) in facets {
                if let Bson::Array(stages) = sub {
                    let nested: Vec<Document> = stages
                        .iter()
                        .filter_map(|s| s.as_document().cloned())
                        .collect();
                    collect_lookup_sources(&nested, out);
                }
            }
        }
    }
}
