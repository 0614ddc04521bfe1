//! Command dispatch
//!
//! Takes the command document extracted from a wire frame, runs it
//! against the router, and shapes the MongoDB-compatible reply. Errors
//! fold into `{ok: 0, errmsg, code, codeName}`; cursor-bearing reads
//! reply with the standard `{cursor: {id, ns, firstBatch}}` shape.

use bson::{Bson, Document, doc};
use serde_json::Value;

use mondo_core::{
    AggregateOptions, DEFAULT_BATCH_SIZE, FindOptions, IndexSpec, MondoError, Result,
    bson_to_json, canonicalize_document, json_to_document,
};
use mondo_pipeline::validate_pipeline;
use mondo_router::QueryRouter;

/// Connection-scoped facts some commands reply with.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    pub peer: Option<String>,
}

/// Wire protocol version range advertised in the handshake.
const MIN_WIRE_VERSION: i32 = 0;
const MAX_WIRE_VERSION: i32 = 17;

const SERVER_VERSION: &str = "7.0.0";

/// Dispatch one command document and produce the reply document.
pub async fn dispatch(
    router: &QueryRouter,
    command: Document,
    ctx: &CommandContext,
) -> Document {
    let Some(name) = command.keys().next().cloned() else {
        return error_reply(&MondoError::BadValue("empty command document".into()));
    };
    let db = command
        .get_str("$db")
        .unwrap_or("admin")
        .to_string();

    tracing::debug!(command = %name, db = %db, "dispatching command");
    let result = run_command(router, &name, &db, &command, ctx).await;
    match result {
        Ok(reply) => reply,
        Err(e) => {
            tracing::debug!(command = %name, error = %e, "command failed");
            error_reply(&e)
        }
    }
}

async fn run_command(
    router: &QueryRouter,
    name: &str,
    db: &str,
    command: &Document,
    ctx: &CommandContext,
) -> Result<Document> {
    match name {
        "hello" | "isMaster" | "ismaster" => Ok(hello_reply()),
        "ping" => Ok(doc! { "ok": 1.0 }),
        "buildInfo" | "buildinfo" => Ok(doc! {
            "version": SERVER_VERSION,
            "gitVersion": "unknown",
            "modules": Bson::Array(vec![]),
            "sysInfo": "deprecated",
            "versionArray": [7, 0, 0, 0],
            "maxBsonObjectSize": 16 * 1024 * 1024,
            "ok": 1.0,
        }),
        "whatsmyuri" => Ok(doc! {
            "you": ctx.peer.clone().unwrap_or_else(|| "127.0.0.1:0".to_string()),
            "ok": 1.0,
        }),
        "getParameter" => Ok(doc! {
            "featureCompatibilityVersion": { "version": "7.0" },
            "ok": 1.0,
        }),
        "listDatabases" => list_databases(router).await,
        "listCollections" => list_collections(router, db, command).await,
        "find" => find(router, db, command).await,
        "getMore" => get_more(router, db, command).await,
        "killCursors" => kill_cursors(router, command).await,
        "insert" => insert(router, db, command).await,
        "update" => update(router, db, command).await,
        "delete" => delete(router, db, command).await,
        "count" => count(router, db, command).await,
        "distinct" => distinct(router, db, command).await,
        "aggregate" => aggregate(router, db, command).await,
        "createIndexes" => create_indexes(router, db, command).await,
        "listIndexes" => list_indexes(router, db, command).await,
        "dropIndexes" => drop_indexes(router, db, command).await,
        "drop" => drop_collection(router, db, command).await,
        "dropDatabase" => drop_database(router, db).await,
        "create" => create_collection(router, db, command).await,
        "collStats" => coll_stats(router, db, command).await,
        "dbStats" => db_stats(router, db).await,
        other => Err(MondoError::CommandNotFound(other.to_string())),
    }
}

fn hello_reply() -> Document {
    doc! {
        "isWritablePrimary": true,
        "ismaster": true,
        "maxBsonObjectSize": 16 * 1024 * 1024,
        "maxMessageSizeBytes": 48 * 1024 * 1024,
        "maxWriteBatchSize": 100_000,
        "localTime": bson::DateTime::now(),
        "logicalSessionTimeoutMinutes": 30,
        "connectionId": 1,
        "minWireVersion": MIN_WIRE_VERSION,
        "maxWireVersion": MAX_WIRE_VERSION,
        "readOnly": false,
        "ok": 1.0,
    }
}

fn error_reply(error: &MondoError) -> Document {
    doc! {
        "ok": 0.0,
        "errmsg": error.to_string(),
        "code": error.code(),
        "codeName": error.code_name(),
    }
}

fn cursor_reply(ns: &str, cursor_id: i64, batch: Vec<Document>, first: bool) -> Document {
    let mut cursor = doc! { "id": cursor_id, "ns": ns };
    cursor.insert(
        if first { "firstBatch" } else { "nextBatch" },
        Bson::Array(batch.into_iter().map(Bson::Document).collect()),
    );
    doc! { "cursor": cursor, "ok": 1.0 }
}

// ---- field extraction helpers ----

fn target_collection(command: &Document, name: &str) -> Result<String> {
    match command.get(name) {
        Some(Bson::String(collection)) => Ok(collection.clone()),
        _ => Err(MondoError::BadValue(format!(
            "{} requires a collection name string",
            name
        ))),
    }
}

fn int_field(command: &Document, name: &str) -> Option<i64> {
    match command.get(name) {
        Some(Bson::Int32(n)) => Some(*n as i64),
        Some(Bson::Int64(n)) => Some(*n),
        Some(Bson::Double(n)) => Some(*n as i64),
        _ => None,
    }
}

fn doc_field(command: &Document, name: &str) -> Option<Document> {
    match command.get(name) {
        Some(Bson::Document(d)) => Some(d.clone()),
        _ => None,
    }
}

fn doc_array(command: &Document, name: &str) -> Result<Vec<Document>> {
    match command.get(name) {
        Some(Bson::Array(items)) => items
            .iter()
            .map(|item| match item {
                Bson::Document(d) => Ok(d.clone()),
                _ => Err(MondoError::BadValue(format!(
                    "{} entries must be documents",
                    name
                ))),
            })
            .collect(),
        _ => Err(MondoError::BadValue(format!("{} requires an array", name))),
    }
}

fn batch_size(command: &Document) -> usize {
    doc_field(command, "cursor")
        .and_then(|c| int_field(&c, "batchSize"))
        .or_else(|| int_field(command, "batchSize"))
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_BATCH_SIZE)
}

// ---- commands ----

async fn list_databases(router: &QueryRouter) -> Result<Document> {
    let summaries = router.list_databases().await?;
    let mut total: u64 = 0;
    let databases: Vec<Bson> = summaries
        .iter()
        .map(|summary| {
            let size = summary.size_on_disk.unwrap_or(0);
            total += size;
            Bson::Document(doc! {
                "name": summary.name.clone(),
                "sizeOnDisk": size as i64,
                "empty": summary.empty,
            })
        })
        .collect();
    Ok(doc! {
        "databases": Bson::Array(databases),
        "totalSize": total as i64,
        "ok": 1.0,
    })
}

async fn list_collections(
    router: &QueryRouter,
    db: &str,
    command: &Document,
) -> Result<Document> {
    let name_filter = doc_field(command, "filter")
        .and_then(|f| f.get_str("name").map(str::to_string).ok());
    let collections = router.list_collections(db, name_filter.as_deref()).await?;
    let batch: Vec<Document> = collections
        .into_iter()
        .map(|summary| {
            doc! {
                "name": summary.name,
                "type": "collection",
                "options": summary.options,
                "info": { "readOnly": false },
            }
        })
        .collect();
    Ok(cursor_reply(
        &format!("{}.$cmd.listCollections", db),
        0,
        batch,
        true,
    ))
}

async fn find(router: &QueryRouter, db: &str, command: &Document) -> Result<Document> {
    let collection = target_collection(command, "find")?;
    let options = FindOptions {
        filter: doc_field(command, "filter").map(canonicalize_document),
        projection: doc_field(command, "projection"),
        sort: doc_field(command, "sort"),
        limit: int_field(command, "limit").filter(|n| *n > 0),
        skip: int_field(command, "skip").filter(|n| *n > 0).map(|n| n as u64),
        batch_size: int_field(command, "batchSize")
            .filter(|n| *n > 0)
            .map(|n| n as usize),
        backend: None,
    };
    let ns = format!("{}.{}", db, collection);
    let result = router.find(db, &collection, options).await?;
    Ok(cursor_reply(&ns, result.cursor_id, result.documents, true))
}

async fn get_more(router: &QueryRouter, db: &str, command: &Document) -> Result<Document> {
    let cursor_id = int_field(command, "getMore")
        .ok_or_else(|| MondoError::BadValue("getMore requires a cursor id".into()))?;
    let collection = target_collection(command, "collection")?;
    let ns = format!("{}.{}", db, collection);
    let requested = int_field(command, "batchSize")
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .unwrap_or(0);

    // An evicted or unknown cursor answers with an empty batch and the
    // closed-cursor signal rather than an error.
    let batch = router.advance_cursor(cursor_id, requested).await;
    let remaining = router
        .get_cursor(cursor_id)
        .await
        .map(|info| info.remaining)
        .unwrap_or(0);
    let next_id = if remaining == 0 {
        router.close_cursor(cursor_id).await;
        0
    } else {
        cursor_id
    };
    Ok(cursor_reply(&ns, next_id, batch, false))
}

async fn kill_cursors(router: &QueryRouter, command: &Document) -> Result<Document> {
    let ids: Vec<i64> = match command.get("cursors") {
        Some(Bson::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Bson::Int64(id) => Some(*id),
                Bson::Int32(id) => Some(*id as i64),
                _ => None,
            })
            .collect(),
        _ => {
            return Err(MondoError::BadValue(
                "killCursors requires a cursors array".into(),
            ));
        }
    };
    let mut killed = Vec::new();
    let mut not_found = Vec::new();
    for id in ids {
        if router.close_cursor(id).await {
            killed.push(Bson::Int64(id));
        } else {
            not_found.push(Bson::Int64(id));
        }
    }
    Ok(doc! {
        "cursorsKilled": Bson::Array(killed),
        "cursorsNotFound": Bson::Array(not_found),
        "cursorsAlive": Bson::Array(vec![]),
        "ok": 1.0,
    })
}

async fn insert(router: &QueryRouter, db: &str, command: &Document) -> Result<Document> {
    let collection = target_collection(command, "insert")?;
    let documents = doc_array(command, "documents")?;
    match router.insert_many(db, &collection, documents).await {
        Ok(result) => Ok(doc! { "n": result.inserted_ids.len() as i64, "ok": 1.0 }),
        Err(e @ MondoError::DuplicateKey(_)) => Ok(doc! {
            "n": 0_i64,
            "writeErrors": [ {
                "index": 0,
                "code": e.code(),
                "errmsg": e.to_string(),
            } ],
            "ok": 1.0,
        }),
        Err(other) => Err(other),
    }
}

async fn update(router: &QueryRouter, db: &str, command: &Document) -> Result<Document> {
    let collection = target_collection(command, "update")?;
    let updates = doc_array(command, "updates")?;
    let mut matched: i64 = 0;
    let mut modified: i64 = 0;
    let mut upserted: Vec<Bson> = Vec::new();
    for (index, entry) in updates.iter().enumerate() {
        let filter = doc_field(entry, "q").unwrap_or_default();
        let update_doc = doc_field(entry, "u").ok_or_else(|| {
            MondoError::BadValue("update entries require a 'u' document".into())
        })?;
        let multi = entry.get_bool("multi").unwrap_or(false);
        let upsert = entry.get_bool("upsert").unwrap_or(false);
        let result = if multi {
            router
                .update_many(db, &collection, filter, update_doc, upsert)
                .await?
        } else {
            router
                .update_one(db, &collection, filter, update_doc, upsert)
                .await?
        };
        matched += result.matched_count as i64;
        modified += result.modified_count as i64;
        if let Some(id) = result.upserted_id {
            matched += 1;
            upserted.push(Bson::Document(doc! {
                "index": index as i64,
                "_id": id,
            }));
        }
    }
    let mut reply = doc! { "n": matched, "nModified": modified, "ok": 1.0 };
    if !upserted.is_empty() {
        reply.insert("upserted", Bson::Array(upserted));
    }
    Ok(reply)
}

async fn delete(router: &QueryRouter, db: &str, command: &Document) -> Result<Document> {
    let collection = target_collection(command, "delete")?;
    let deletes = doc_array(command, "deletes")?;
    let mut deleted: i64 = 0;
    for entry in deletes {
        let filter = doc_field(&entry, "q").unwrap_or_default();
        let limit = int_field(&entry, "limit").unwrap_or(0);
        let result = if limit == 1 {
            router.delete_one(db, &collection, filter).await?
        } else {
            router.delete_many(db, &collection, filter).await?
        };
        deleted += result.deleted_count as i64;
    }
    Ok(doc! { "n": deleted, "ok": 1.0 })
}

async fn count(router: &QueryRouter, db: &str, command: &Document) -> Result<Document> {
    let collection = target_collection(command, "count")?;
    let filter = doc_field(command, "query").map(canonicalize_document);
    let n = router.count(db, &collection, filter).await?;
    Ok(doc! { "n": n as i64, "ok": 1.0 })
}

async fn distinct(router: &QueryRouter, db: &str, command: &Document) -> Result<Document> {
    let collection = target_collection(command, "distinct")?;
    let field = command
        .get_str("key")
        .map_err(|_| MondoError::BadValue("distinct requires a string key".into()))?;
    let filter = doc_field(command, "query").map(canonicalize_document);
    let values = router.distinct(db, &collection, field, filter).await?;
    Ok(doc! { "values": Bson::Array(values), "ok": 1.0 })
}

async fn aggregate(router: &QueryRouter, db: &str, command: &Document) -> Result<Document> {
    let collection = target_collection(command, "aggregate")?;
    let pipeline = doc_array(command, "pipeline")?;
    let pipeline = validated_pipeline(pipeline)?;
    let options = AggregateOptions {
        batch_size: Some(batch_size(command)),
        allow_disk_use: command.get_bool("allowDiskUse").ok(),
        backend: None,
    };
    let ns = format!("{}.{}", db, collection);
    let result = router.aggregate(db, &collection, pipeline, options).await?;
    Ok(cursor_reply(&ns, result.cursor_id, result.documents, true))
}

/// Run the pipeline JSON validator over the wire pipeline; hard errors
/// reject the command, coercions flow into execution.
fn validated_pipeline(pipeline: Vec<Document>) -> Result<Vec<Document>> {
    let as_json = Value::Array(
        pipeline
            .iter()
            .map(|stage| bson_to_json(&Bson::Document(stage.clone())))
            .collect(),
    );
    let outcome = validate_pipeline(&as_json);
    if !outcome.success {
        let detail = outcome
            .errors
            .first()
            .map(|e| format!("{}: {}", e.path, e.message))
            .unwrap_or_else(|| "invalid pipeline".to_string());
        return Err(MondoError::BadValue(detail));
    }
    for warning in &outcome.warnings {
        tracing::debug!(path = %warning.path, code = %warning.code, "pipeline warning");
    }
    outcome
        .data
        .unwrap_or_default()
        .into_iter()
        .map(json_to_document)
        .collect()
}

async fn create_indexes(router: &QueryRouter, db: &str, command: &Document) -> Result<Document> {
    let collection = target_collection(command, "createIndexes")?;
    let entries = doc_array(command, "indexes")?;
    let before = router.list_indexes(db, &collection).await?.len() as i64;
    let specs: Vec<IndexSpec> = entries
        .into_iter()
        .map(|entry| {
            let keys = doc_field(&entry, "key").ok_or_else(|| {
                MondoError::BadValue("index specifications require a key pattern".into())
            })?;
            Ok(IndexSpec {
                keys,
                name: entry.get_str("name").map(str::to_string).ok(),
                unique: entry.get_bool("unique").unwrap_or(false),
                sparse: entry.get_bool("sparse").unwrap_or(false),
            })
        })
        .collect::<Result<_>>()?;
    let created = router.create_indexes(db, &collection, specs).await? as i64;
    Ok(doc! {
        "numIndexesBefore": before,
        "numIndexesAfter": before + created,
        "createdIndexes": created,
        "ok": 1.0,
    })
}

async fn list_indexes(router: &QueryRouter, db: &str, command: &Document) -> Result<Document> {
    let collection = target_collection(command, "listIndexes")?;
    if !router.collection_exists(db, &collection).await? {
        return Err(MondoError::NamespaceNotFound(format!(
            "{}.{}",
            db, collection
        )));
    }
    let specs = router.list_indexes(db, &collection).await?;
    let batch: Vec<Document> = specs
        .into_iter()
        .map(|spec| {
            doc! {
                "v": 2,
                "key": spec.keys.clone(),
                "name": spec.effective_name(),
                "unique": spec.unique,
            }
        })
        .collect();
    Ok(cursor_reply(
        &format!("{}.{}", db, collection),
        0,
        batch,
        true,
    ))
}

async fn drop_indexes(router: &QueryRouter, db: &str, command: &Document) -> Result<Document> {
    let collection = target_collection(command, "dropIndexes")?;
    let index = command.get_str("index").unwrap_or("*");
    if index == "*" {
        let dropped = router.drop_indexes(db, &collection).await?;
        return Ok(doc! { "nIndexesWas": dropped as i64 + 1, "ok": 1.0 });
    }
    let before = router.list_indexes(db, &collection).await?.len() as i64;
    router.drop_index(db, &collection, index).await?;
    Ok(doc! { "nIndexesWas": before, "ok": 1.0 })
}

async fn drop_collection(router: &QueryRouter, db: &str, command: &Document) -> Result<Document> {
    let collection = target_collection(command, "drop")?;
    router.drop_collection(db, &collection).await?;
    Ok(doc! { "ns": format!("{}.{}", db, collection), "ok": 1.0 })
}

async fn drop_database(router: &QueryRouter, db: &str) -> Result<Document> {
    router.drop_database(db).await?;
    Ok(doc! { "dropped": db, "ok": 1.0 })
}

async fn create_collection(
    router: &QueryRouter,
    db: &str,
    command: &Document,
) -> Result<Document> {
    let collection = target_collection(command, "create")?;
    let mut options = Document::new();
    for (key, value) in command {
        if key == "create" || key == "$db" || key.starts_with('$') {
            continue;
        }
        options.insert(key.clone(), value.clone());
    }
    router.create_collection(db, &collection, options).await?;
    Ok(doc! { "ok": 1.0 })
}

async fn coll_stats(router: &QueryRouter, db: &str, command: &Document) -> Result<Document> {
    let collection = target_collection(command, "collStats")?;
    let stats = router.collection_stats(db, &collection).await?;
    Ok(doc! {
        "ns": stats.ns,
        "count": stats.count as i64,
        "size": stats.size as i64,
        "avgObjSize": stats.avg_obj_size as i64,
        "storageSize": stats.storage_size as i64,
        "nindexes": stats.n_indexes as i64,
        "ok": 1.0,
    })
}

async fn db_stats(router: &QueryRouter, db: &str) -> Result<Document> {
    let stats = router.database_stats(db).await?;
    Ok(doc! {
        "db": stats.db,
        "collections": stats.collections as i64,
        "objects": stats.objects as i64,
        "dataSize": stats.data_size as i64,
        "indexes": stats.indexes as i64,
        "ok": 1.0,
    })
}
