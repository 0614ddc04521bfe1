//! Proxy backend
//!
//! Implements the backend contract by forwarding each operation as a
//! JSON-over-HTTP call to a remote analytical worker, with bounded
//! fixed-delay retries on transient failures and strict preservation of
//! the remote's error codes. Results arrive either as Extended JSON
//! documents or as columnar `{rows, meta}` pairs that go through the
//! mapper.

use std::sync::Arc;
use std::time::Duration;

use bson::{Bson, Document};
use serde_json::{Value, json};
use url::Url;

use mondo_core::{
    CollectionStats, CollectionSummary, CursorInfo, CursorManager, DEFAULT_BATCH_SIZE,
    DatabaseStats, DatabaseSummary, DeleteResult, FindOptions, FindResult, IndexSpec,
    InsertManyResult, InsertOneResult, MondoError, Result, UpdateResult, document_to_json,
    json_to_bson, json_to_document,
};
use mondo_mapper::{ColumnMeta, MapperOptions, rows_to_documents};

use crate::rpc::{
    RpcRequest, RpcResponse, is_non_retryable_code, is_retryable_status, lift_cursor_id,
};

/// Construction options for the proxy backend.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Remote worker endpoint; must be a syntactically valid URL.
    pub endpoint: String,
    /// Optional bearer token sent as `Authorization: Bearer <token>`.
    pub auth_token: Option<String>,
    /// Per-call timeout.
    pub timeout: Duration,
    /// Total attempts per call (first try included).
    pub retry_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            auth_token: None,
            timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// The analytical (OLAP) backend, spoken to over HTTP.
#[derive(Debug)]
pub struct ProxyBackend {
    endpoint: Url,
    auth_token: Option<String>,
    client: reqwest::Client,
    retry_attempts: u32,
    retry_delay: Duration,
    mapper_options: MapperOptions,
    cursors: Arc<CursorManager>,
}

impl ProxyBackend {
    /// Build a proxy backend. Fails fast on a malformed endpoint.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            MondoError::BadValue(format!("invalid proxy endpoint '{}': {}", config.endpoint, e))
        })?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MondoError::Internal(format!("failed to build HTTP client: {}", e)))?;
        tracing::info!(endpoint = %endpoint, "proxy backend ready");
        Ok(Self {
            endpoint,
            auth_token: config.auth_token,
            client,
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: config.retry_delay,
            mapper_options: MapperOptions {
                preserve_object_id: true,
                ..Default::default()
            },
            cursors: Arc::new(CursorManager::new()),
        })
    }

    /// Issue one RPC with retry on transient statuses and network
    /// errors. Errors declared by the body are surfaced verbatim and
    /// never retried once recognized as non-retryable.
    async fn call(&self, request: RpcRequest) -> Result<Value> {
        let method = request.method.clone();
        let mut last_failure = String::new();

        for attempt in 1..=self.retry_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.retry_delay).await;
                tracing::debug!(method = %method, attempt, "retrying proxy call");
            }

            let mut builder = self
                .client
                .post(self.endpoint.clone())
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .json(&request);
            if let Some(token) = &self.auth_token {
                builder = builder.bearer_auth(token);
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    return Err(MondoError::Timeout(format!(
                        "proxy call '{}' timed out: {}",
                        method, e
                    )));
                }
                Err(e) => {
                    last_failure = e.to_string();
                    continue;
                }
            };

            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let envelope: Option<RpcResponse> = serde_json::from_str(&body).ok();

            if is_retryable_status(status) {
                // A body-declared non-retryable error overrides the status.
                if let Some(envelope) = &envelope {
                    if let Some(code) = envelope.code {
                        if !envelope.is_ok() && is_non_retryable_code(code) {
                            return Err(remote_error(envelope));
                        }
                    }
                }
                last_failure = format!("HTTP {}", status);
                continue;
            }

            let Some(envelope) = envelope else {
                return Err(MondoError::Internal(format!(
                    "proxy call '{}' returned an unreadable body (HTTP {})",
                    method, status
                )));
            };
            if envelope.is_ok() {
                return Ok(envelope.result.unwrap_or(Value::Null));
            }
            return Err(remote_error(&envelope));
        }

        Err(MondoError::Transient(format!(
            "proxy call '{}' failed after {} attempts: {}",
            method, self.retry_attempts, last_failure
        )))
    }

    /// Lift a result that is either `{documents: [...]}` Extended JSON or
    /// columnar `{rows, meta}` into documents.
    fn result_documents(&self, result: &Value) -> Result<Vec<Document>> {
        if let Some(rows) = result.get("rows").and_then(Value::as_array) {
            let meta: Vec<ColumnMeta> = result
                .get("meta")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default();
            return rows_to_documents(rows, &meta, &self.mapper_options);
        }
        let documents = result
            .get("documents")
            .and_then(Value::as_array)
            .cloned()
            .or_else(|| result.as_array().cloned())
            .unwrap_or_default();
        documents
            .into_iter()
            .map(json_to_document)
            .collect::<Result<Vec<_>>>()
    }

    /// Shape a read result: remote cursors pass through, everything else
    /// batches through the local cursor map.
    fn shape_read(
        &self,
        result: Value,
        namespace: String,
        batch_size: usize,
    ) -> Result<FindResult> {
        let documents = self.result_documents(&result)?;
        if let Some(remote_id) = result.get("cursorId").and_then(lift_cursor_id) {
            if remote_id != 0 {
                return Ok(FindResult {
                    documents,
                    cursor_id: remote_id,
                    has_more: true,
                });
            }
        }
        Ok(self.cursors.register(namespace, documents, batch_size))
    }

    // ---- databases ----

    #[tracing::instrument(skip(self))]
    pub async fn list_databases(&self) -> Result<Vec<DatabaseSummary>> {
        let result = self.call(RpcRequest::new("listDatabases")).await?;
        let entries = result
            .get("databases")
            .and_then(Value::as_array)
            .cloned()
            .or_else(|| result.as_array().cloned())
            .unwrap_or_default();
        Ok(entries
            .iter()
            .map(|entry| DatabaseSummary {
                name: entry
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                size_on_disk: entry.get("sizeOnDisk").and_then(Value::as_u64),
                empty: entry.get("empty").and_then(Value::as_bool).unwrap_or(false),
            })
            .collect())
    }

    pub async fn create_database(&self, db: &str) -> Result<()> {
        self.call(RpcRequest::new("createDatabase").db(db)).await?;
        Ok(())
    }

    pub async fn drop_database(&self, db: &str) -> Result<()> {
        self.call(RpcRequest::new("dropDatabase").db(db)).await?;
        Ok(())
    }

    pub async fn database_exists(&self, db: &str) -> Result<bool> {
        let result = self.call(RpcRequest::new("databaseExists").db(db)).await?;
        Ok(lift_bool(&result))
    }

    // ---- collections ----

    #[tracing::instrument(skip(self))]
    pub async fn list_collections(
        &self,
        db: &str,
        name_filter: Option<&str>,
    ) -> Result<Vec<CollectionSummary>> {
        let mut request = RpcRequest::new("listCollections").db(db);
        if let Some(name) = name_filter {
            request = request.filter(json!({ "name": name }));
        }
        let result = self.call(request).await?;
        let entries = result
            .get("collections")
            .and_then(Value::as_array)
            .cloned()
            .or_else(|| result.as_array().cloned())
            .unwrap_or_default();
        entries
            .iter()
            .map(|entry| {
                let name = entry
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let options = match entry.get("options") {
                    Some(options) => json_to_document(options.clone())?,
                    None => Document::new(),
                };
                Ok(CollectionSummary { name, options })
            })
            .collect()
    }

    pub async fn create_collection(
        &self,
        db: &str,
        collection: &str,
        options: Document,
    ) -> Result<()> {
        self.call(
            RpcRequest::new("createCollection")
                .db(db)
                .collection(collection)
                .options(document_to_json(&options)),
        )
        .await?;
        Ok(())
    }

    pub async fn drop_collection(&self, db: &str, collection: &str) -> Result<()> {
        self.call(
            RpcRequest::new("dropCollection")
                .db(db)
                .collection(collection),
        )
        .await?;
        Ok(())
    }

    pub async fn collection_exists(&self, db: &str, collection: &str) -> Result<bool> {
        let result = self
            .call(
                RpcRequest::new("collectionExists")
                    .db(db)
                    .collection(collection),
            )
            .await?;
        Ok(lift_bool(&result))
    }

    pub async fn collection_stats(&self, db: &str, collection: &str) -> Result<CollectionStats> {
        let result = self
            .call(RpcRequest::new("collStats").db(db).collection(collection))
            .await?;
        Ok(CollectionStats {
            ns: result
                .get("ns")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}.{}", db, collection)),
            count: result.get("count").and_then(Value::as_u64).unwrap_or(0),
            size: result.get("size").and_then(Value::as_u64).unwrap_or(0),
            avg_obj_size: result
                .get("avgObjSize")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            storage_size: result
                .get("storageSize")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            n_indexes: result.get("nindexes").and_then(Value::as_u64).unwrap_or(0),
        })
    }

    pub async fn database_stats(&self, db: &str) -> Result<DatabaseStats> {
        let result = self.call(RpcRequest::new("dbStats").db(db)).await?;
        Ok(DatabaseStats {
            db: db.to_string(),
            collections: result
                .get("collections")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            objects: result.get("objects").and_then(Value::as_u64).unwrap_or(0),
            data_size: result.get("dataSize").and_then(Value::as_u64).unwrap_or(0),
            indexes: result.get("indexes").and_then(Value::as_u64).unwrap_or(0),
        })
    }

    // ---- reads ----

    #[tracing::instrument(skip(self, options), fields(db = %db, collection = %collection))]
    pub async fn find(
        &self,
        db: &str,
        collection: &str,
        options: FindOptions,
    ) -> Result<FindResult> {
        let batch_size = options.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        let mut request = RpcRequest::new("find").db(db).collection(collection);
        if let Some(filter) = &options.filter {
            request = request.filter(document_to_json(filter));
        }
        let mut extra = serde_json::Map::new();
        if let Some(projection) = &options.projection {
            extra.insert("projection".into(), document_to_json(projection));
        }
        if let Some(sort) = &options.sort {
            extra.insert("sort".into(), document_to_json(sort));
        }
        if let Some(limit) = options.limit {
            extra.insert("limit".into(), json!(limit));
        }
        if let Some(skip) = options.skip {
            extra.insert("skip".into(), json!(skip));
        }
        extra.insert("batchSize".into(), json!(batch_size));
        request = request.options(Value::Object(extra));

        let result = self.call(request).await?;
        self.shape_read(result, format!("{}.{}", db, collection), batch_size)
    }

    pub async fn count(
        &self,
        db: &str,
        collection: &str,
        filter: Option<Document>,
    ) -> Result<u64> {
        let mut request = RpcRequest::new("count").db(db).collection(collection);
        if let Some(filter) = &filter {
            request = request.query(document_to_json(filter));
        }
        let result = self.call(request).await?;
        Ok(result
            .get("n")
            .and_then(Value::as_u64)
            .or_else(|| result.as_u64())
            .unwrap_or(0))
    }

    pub async fn distinct(
        &self,
        db: &str,
        collection: &str,
        field: &str,
        filter: Option<Document>,
    ) -> Result<Vec<Bson>> {
        let mut request = RpcRequest::new("distinct")
            .db(db)
            .collection(collection)
            .field(field);
        if let Some(filter) = &filter {
            request = request.query(document_to_json(filter));
        }
        let result = self.call(request).await?;
        let values = result
            .get("values")
            .and_then(Value::as_array)
            .cloned()
            .or_else(|| result.as_array().cloned())
            .unwrap_or_default();
        values.into_iter().map(json_to_bson).collect()
    }

    #[tracing::instrument(skip(self, pipeline, options), fields(db = %db, collection = %collection, stages = pipeline.len()))]
    pub async fn aggregate(
        &self,
        db: &str,
        collection: &str,
        pipeline: Vec<Document>,
        options: mondo_core::AggregateOptions,
    ) -> Result<FindResult> {
        let batch_size = options.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        let stages: Vec<Value> = pipeline.iter().map(document_to_json).collect();
        let mut request = RpcRequest::new("aggregate")
            .db(db)
            .collection(collection)
            .pipeline(stages);
        let mut extra = serde_json::Map::new();
        extra.insert("batchSize".into(), json!(batch_size));
        if let Some(allow) = options.allow_disk_use {
            extra.insert("allowDiskUse".into(), json!(allow));
        }
        request = request.options(Value::Object(extra));

        let result = self.call(request).await?;
        self.shape_read(result, format!("{}.{}", db, collection), batch_size)
    }

    // ---- writes ----

    pub async fn insert_one(
        &self,
        db: &str,
        collection: &str,
        document: Document,
    ) -> Result<InsertOneResult> {
        let result = self
            .call(
                RpcRequest::new("insertOne")
                    .db(db)
                    .collection(collection)
                    .document(document_to_json(&document)),
            )
            .await?;
        let inserted_id = match result.get("insertedId") {
            Some(id) => json_to_bson(id.clone())?,
            None => Bson::Null,
        };
        Ok(InsertOneResult {
            acknowledged: true,
            inserted_id,
        })
    }

    pub async fn insert_many(
        &self,
        db: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertManyResult> {
        let payloads: Vec<Value> = documents.iter().map(document_to_json).collect();
        let result = self
            .call(
                RpcRequest::new("insertMany")
                    .db(db)
                    .collection(collection)
                    .documents(payloads),
            )
            .await?;
        let inserted_ids = result
            .get("insertedIds")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(json_to_bson)
            .collect::<Result<Vec<_>>>()?;
        Ok(InsertManyResult {
            acknowledged: true,
            inserted_ids,
        })
    }

    async fn update_call(
        &self,
        method: &str,
        db: &str,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateResult> {
        let result = self
            .call(
                RpcRequest::new(method)
                    .db(db)
                    .collection(collection)
                    .filter(document_to_json(&filter))
                    .update(document_to_json(&update))
                    .options(json!({ "upsert": upsert })),
            )
            .await?;
        let upserted_id = match result.get("upsertedId") {
            Some(Value::Null) | None => None,
            Some(id) => Some(json_to_bson(id.clone())?),
        };
        Ok(UpdateResult {
            acknowledged: true,
            matched_count: result
                .get("matchedCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            modified_count: result
                .get("modifiedCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            upserted_id,
        })
    }

    pub async fn update_one(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateResult> {
        self.update_call("updateOne", db, collection, filter, update, upsert)
            .await
    }

    pub async fn update_many(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateResult> {
        self.update_call("updateMany", db, collection, filter, update, upsert)
            .await
    }

    async fn delete_call(
        &self,
        method: &str,
        db: &str,
        collection: &str,
        filter: Document,
    ) -> Result<DeleteResult> {
        let result = self
            .call(
                RpcRequest::new(method)
                    .db(db)
                    .collection(collection)
                    .filter(document_to_json(&filter)),
            )
            .await?;
        Ok(DeleteResult {
            acknowledged: true,
            deleted_count: result
                .get("deletedCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        })
    }

    pub async fn delete_one(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
    ) -> Result<DeleteResult> {
        self.delete_call("deleteOne", db, collection, filter).await
    }

    pub async fn delete_many(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
    ) -> Result<DeleteResult> {
        self.delete_call("deleteMany", db, collection, filter).await
    }

    // ---- indexes ----

    pub async fn list_indexes(&self, db: &str, collection: &str) -> Result<Vec<IndexSpec>> {
        let result = self
            .call(RpcRequest::new("listIndexes").db(db).collection(collection))
            .await?;
        let entries = result
            .get("indexes")
            .and_then(Value::as_array)
            .cloned()
            .or_else(|| result.as_array().cloned())
            .unwrap_or_default();
        entries
            .iter()
            .map(|entry| {
                let keys = match entry.get("key") {
                    Some(keys) => json_to_document(keys.clone())?,
                    None => Document::new(),
                };
                Ok(IndexSpec {
                    keys,
                    name: entry
                        .get("name")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    unique: entry.get("unique").and_then(Value::as_bool).unwrap_or(false),
                    sparse: entry.get("sparse").and_then(Value::as_bool).unwrap_or(false),
                })
            })
            .collect()
    }

    pub async fn create_indexes(
        &self,
        db: &str,
        collection: &str,
        specs: Vec<IndexSpec>,
    ) -> Result<u64> {
        let rendered: Vec<Value> = specs
            .iter()
            .map(|spec| {
                json!({
                    "key": document_to_json(&spec.keys),
                    "name": spec.effective_name(),
                    "unique": spec.unique,
                    "sparse": spec.sparse,
                })
            })
            .collect();
        let result = self
            .call(
                RpcRequest::new("createIndexes")
                    .db(db)
                    .collection(collection)
                    .options(json!({ "indexes": rendered })),
            )
            .await?;
        Ok(result
            .get("createdIndexes")
            .and_then(Value::as_u64)
            .unwrap_or(specs_len(&rendered)))
    }

    pub async fn drop_index(&self, db: &str, collection: &str, name: &str) -> Result<()> {
        self.call(
            RpcRequest::new("dropIndex")
                .db(db)
                .collection(collection)
                .options(json!({ "name": name })),
        )
        .await?;
        Ok(())
    }

    pub async fn drop_indexes(&self, db: &str, collection: &str) -> Result<u64> {
        let result = self
            .call(RpcRequest::new("dropIndexes").db(db).collection(collection))
            .await?;
        Ok(result
            .get("droppedIndexes")
            .and_then(Value::as_u64)
            .unwrap_or(0))
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

    /// Advance a cursor: locally held result sets first, then the remote
    /// worker's own cursor by the same identifier.
    pub async fn advance_cursor(&self, id: i64, batch_size: usize) -> Vec<Document> {
        if self.cursors.get(id).is_some() {
            return self.cursors.advance(id, batch_size);
        }
        let request = RpcRequest::new("advanceCursor").options(json!({
            "cursorId": id.to_string(),
            "batchSize": batch_size,
        }));
        match self.call(request).await {
            Ok(result) => self.result_documents(&result).unwrap_or_default(),
            Err(e) => {
                tracing::debug!(cursor_id = id, error = %e, "remote cursor advance failed");
                Vec::new()
            }
        }
    }

    pub async fn close_cursor(&self, id: i64) -> bool {
        if self.cursors.close(id) {
            return true;
        }
        let request =
            RpcRequest::new("closeCursor").options(json!({ "cursorId": id.to_string() }));
        match self.call(request).await {
            Ok(result) => lift_bool(&result),
            Err(_) => false,
        }
    }

    pub async fn cleanup_expired_cursors(&self) -> usize {
        self.cursors.cleanup_expired()
    }
}

fn remote_error(envelope: &RpcResponse) -> MondoError {
    MondoError::Remote {
        code: envelope.code.unwrap_or(1),
        code_name: envelope.code_name.clone(),
        message: envelope
            .error
            .clone()
            .unwrap_or_else(|| "remote backend error".to_string()),
    }
}

fn lift_bool(result: &Value) -> bool {
    match result {
        Value::Bool(b) => *b,
        Value::Object(map) => map
            .get("exists")
            .or_else(|| map.get("ok"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
        _ => false,
    }
}

fn specs_len(rendered: &[Value]) -> u64 {
    rendered.len() as u64
}
