//! OLTP/OLAP query routing
//!
//! The router owns the required OLTP backend and an optional OLAP
//! backend, derives characteristics per read, and applies a fixed
//! precedence ladder: explicit override, availability, auto-routing
//! toggle, then per-operation analysis. Writes, DDL, and index
//! operations always run on OLTP and are never analyzed. The router
//! itself holds no mutable state.

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use mondo_backends::Backend;
use mondo_core::{
    AggregateOptions, CollectionStats, CollectionSummary, CursorInfo, DatabaseStats,
    DatabaseSummary, DeleteResult, EngineKind, FindOptions, FindResult, IndexSpec,
    InsertManyResult, InsertOneResult, Result, UpdateResult,
};

use crate::analysis::{QueryCharacteristics, analyze_find, analyze_pipeline};

/// Routing configuration, immutable after construction.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Reads estimated above this row count go to OLAP.
    pub row_threshold: u64,
    /// Field names recognized as timestamps for time-range detection.
    pub timestamp_fields: Vec<String>,
    /// When off, every operation runs on OLTP.
    pub auto_routing: bool,
    /// Send any pipeline with OLAP-suggesting stages to OLAP.
    pub prefer_olap_for_aggregations: bool,
    /// Largest `$in` list on `_id` still treated as an id lookup.
    pub id_in_max: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            row_threshold: 10_000,
            timestamp_fields: vec![
                "_cdc_timestamp".to_string(),
                "created_at".to_string(),
                "updated_at".to_string(),
                "timestamp".to_string(),
            ],
            auto_routing: true,
            prefer_olap_for_aggregations: false,
            id_in_max: 100,
        }
    }
}

/// Outcome of routing one read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub backend: EngineKind,
    pub reason: String,
    pub characteristics: QueryCharacteristics,
    pub warnings: Vec<String>,
}

impl RoutingDecision {
    fn oltp(reason: impl Into<String>, characteristics: QueryCharacteristics) -> Self {
        Self {
            backend: EngineKind::Oltp,
            reason: reason.into(),
            characteristics,
            warnings: Vec::new(),
        }
    }

    fn olap(reason: impl Into<String>, characteristics: QueryCharacteristics) -> Self {
        Self {
            backend: EngineKind::Olap,
            reason: reason.into(),
            characteristics,
            warnings: Vec::new(),
        }
    }
}

/// Dispatches every operation to the right engine.
pub struct QueryRouter {
    oltp: Backend,
    olap: Option<Backend>,
    config: RouterConfig,
}

impl QueryRouter {
    pub fn new(oltp: Backend, olap: Option<Backend>, config: RouterConfig) -> Self {
        Self { oltp, olap, config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn has_olap(&self) -> bool {
        self.olap.is_some()
    }

    fn engine(&self, kind: EngineKind) -> &Backend {
        match kind {
            EngineKind::Oltp => &self.oltp,
            EngineKind::Olap => self.olap.as_ref().unwrap_or(&self.oltp),
        }
    }

    /// Apply the override / availability / toggle ladder common to every
    /// read. Returns the decision when one of those rules settles it.
    fn preamble(
        &self,
        requested: Option<EngineKind>,
        characteristics: &QueryCharacteristics,
    ) -> Option<RoutingDecision> {
        if let Some(requested) = requested {
            if requested == EngineKind::Olap && self.olap.is_none() {
                let mut decision = RoutingDecision::oltp(
                    "Explicit OLAP request without an OLAP backend",
                    characteristics.clone(),
                );
                decision
                    .warnings
                    .push("OLAP backend not configured; fell back to OLTP".to_string());
                return Some(decision);
            }
            let decision = RoutingDecision {
                backend: requested,
                reason: "Explicit backend override".to_string(),
                characteristics: characteristics.clone(),
                warnings: Vec::new(),
            };
            return Some(decision);
        }
        if self.olap.is_none() {
            return Some(RoutingDecision::oltp(
                "No OLAP backend configured",
                characteristics.clone(),
            ));
        }
        if !self.config.auto_routing {
            return Some(RoutingDecision::oltp(
                "Auto-routing disabled",
                characteristics.clone(),
            ));
        }
        None
    }

    /// Decide where a `find` runs.
    pub fn route_find(&self, options: &FindOptions) -> RoutingDecision {
        let characteristics =
            analyze_find(options.filter.as_ref(), options.limit, &self.config);
        if let Some(decision) = self.preamble(options.backend, &characteristics) {
            return decision;
        }
        if characteristics.has_id_lookup {
            return RoutingDecision::oltp("Simple _id lookup", characteristics);
        }
        if characteristics.is_time_range_query {
            return RoutingDecision::olap("Time-range query on a timestamp field", characteristics);
        }
        if characteristics.estimated_rows > self.config.row_threshold {
            let reason = format!(
                "Estimated {} rows exceeds threshold {}",
                characteristics.estimated_rows, self.config.row_threshold
            );
            return RoutingDecision::olap(reason, characteristics);
        }
        RoutingDecision::oltp("Selective read fits OLTP", characteristics)
    }

    /// Decide where an aggregation runs.
    pub fn route_aggregate(
        &self,
        pipeline: &[Document],
        options: &AggregateOptions,
    ) -> RoutingDecision {
        let characteristics = analyze_pipeline(pipeline, &self.config);
        if let Some(decision) = self.preamble(options.backend, &characteristics) {
            return decision;
        }
        if characteristics.has_heavy_aggregation {
            return RoutingDecision::olap("Heavy aggregation stage present", characteristics);
        }
        if characteristics.has_id_lookup && characteristics.estimated_rows <= 1 {
            return RoutingDecision::oltp("Simple _id lookup", characteristics);
        }
        if characteristics.is_time_range_query {
            return RoutingDecision::olap("Time-range match stage", characteristics);
        }
        if characteristics.estimated_rows > self.config.row_threshold {
            let reason = format!(
                "Estimated {} rows exceeds threshold {}",
                characteristics.estimated_rows, self.config.row_threshold
            );
            return RoutingDecision::olap(reason, characteristics);
        }
        if self.config.prefer_olap_for_aggregations && !characteristics.olap_stages.is_empty() {
            return RoutingDecision::olap("Aggregations preferred on OLAP", characteristics);
        }
        RoutingDecision::oltp("Selective pipeline fits OLTP", characteristics)
    }

    /// Decide where `count`/`distinct` run: the find analysis, sent to
    /// OLAP only for large scans.
    pub fn route_scalar(
        &self,
        filter: Option<&Document>,
        requested: Option<EngineKind>,
    ) -> RoutingDecision {
        let characteristics = analyze_find(filter, None, &self.config);
        if let Some(decision) = self.preamble(requested, &characteristics) {
            return decision;
        }
        if characteristics.estimated_rows > self.config.row_threshold {
            let reason = format!(
                "Estimated {} rows exceeds threshold {}",
                characteristics.estimated_rows, self.config.row_threshold
            );
            return RoutingDecision::olap(reason, characteristics);
        }
        RoutingDecision::oltp("Selective scalar read fits OLTP", characteristics)
    }

    // ---- routed reads ----

    #[tracing::instrument(skip(self, options), fields(db = %db, collection = %collection))]
    pub async fn find(
        &self,
        db: &str,
        collection: &str,
        options: FindOptions,
    ) -> Result<FindResult> {
        let decision = self.route_find(&options);
        tracing::debug!(backend = %decision.backend, reason = %decision.reason, "routed find");
        self.engine(decision.backend).find(db, collection, options).await
    }

    #[tracing::instrument(skip(self, pipeline, options), fields(db = %db, collection = %collection))]
    pub async fn aggregate(
        &self,
        db: &str,
        collection: &str,
        pipeline: Vec<Document>,
        options: AggregateOptions,
    ) -> Result<FindResult> {
        let decision = self.route_aggregate(&pipeline, &options);
        tracing::debug!(backend = %decision.backend, reason = %decision.reason, "routed aggregate");
        self.engine(decision.backend)
            .aggregate(db, collection, pipeline, options)
            .await
    }

    pub async fn count(
        &self,
        db: &str,
        collection: &str,
        filter: Option<Document>,
    ) -> Result<u64> {
        let decision = self.route_scalar(filter.as_ref(), None);
        self.engine(decision.backend).count(db, collection, filter).await
    }

    pub async fn distinct(
        &self,
        db: &str,
        collection: &str,
        field: &str,
        filter: Option<Document>,
    ) -> Result<Vec<Bson>> {
        let decision = self.route_scalar(filter.as_ref(), None);
        self.engine(decision.backend)
            .distinct(db, collection, field, filter)
            .await
    }

    // ---- writes and DDL: always OLTP, never analyzed ----

    pub async fn insert_one(
        &self,
        db: &str,
        collection: &str,
        document: Document,
    ) -> Result<InsertOneResult> {
        self.oltp.insert_one(db, collection, document).await
    }

    pub async fn insert_many(
        &self,
        db: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertManyResult> {
        self.oltp.insert_many(db, collection, documents).await
    }

    pub async fn update_one(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateResult> {
        self.oltp
            .update_one(db, collection, filter, update, upsert)
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
        self.oltp
            .update_many(db, collection, filter, update, upsert)
            .await
    }

    pub async fn delete_one(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
    ) -> Result<DeleteResult> {
        self.oltp.delete_one(db, collection, filter).await
    }

    pub async fn delete_many(
        &self,
        db: &str,
        collection: &str,
        filter: Document,
    ) -> Result<DeleteResult> {
        self.oltp.delete_many(db, collection, filter).await
    }

    pub async fn list_databases(&self) -> Result<Vec<DatabaseSummary>> {
        self.oltp.list_databases().await
    }

    pub async fn create_database(&self, db: &str) -> Result<()> {
        self.oltp.create_database(db).await
    }

    pub async fn drop_database(&self, db: &str) -> Result<()> {
        self.oltp.drop_database(db).await
    }

    pub async fn database_exists(&self, db: &str) -> Result<bool> {
        self.oltp.database_exists(db).await
    }

    pub async fn list_collections(
        &self,
        db: &str,
        name_filter: Option<&str>,
    ) -> Result<Vec<CollectionSummary>> {
        self.oltp.list_collections(db, name_filter).await
    }

    pub async fn create_collection(
        &self,
        db: &str,
        collection: &str,
        options: Document,
    ) -> Result<()> {
        self.oltp.create_collection(db, collection, options).await
    }

    pub async fn drop_collection(&self, db: &str, collection: &str) -> Result<()> {
        self.oltp.drop_collection(db, collection).await
    }

    pub async fn collection_exists(&self, db: &str, collection: &str) -> Result<bool> {
        self.oltp.collection_exists(db, collection).await
    }

    pub async fn collection_stats(&self, db: &str, collection: &str) -> Result<CollectionStats> {
        self.oltp.collection_stats(db, collection).await
    }

    pub async fn database_stats(&self, db: &str) -> Result<DatabaseStats> {
        self.oltp.database_stats(db).await
    }

    pub async fn list_indexes(&self, db: &str, collection: &str) -> Result<Vec<IndexSpec>> {
        self.oltp.list_indexes(db, collection).await
    }

    pub async fn create_indexes(
        &self,
        db: &str,
        collection: &str,
        specs: Vec<IndexSpec>,
    ) -> Result<u64> {
        self.oltp.create_indexes(db, collection, specs).await
    }

    pub async fn drop_index(&self, db: &str, collection: &str, name: &str) -> Result<()> {
        self.oltp.drop_index(db, collection, name).await
    }

    pub async fn drop_indexes(&self, db: &str, collection: &str) -> Result<u64> {
        self.oltp.drop_indexes(db, collection).await
    }

    // ---- cursor delegation: the router holds no cursors of its own ----

    pub async fn create_cursor(
        &self,
        namespace: &str,
        documents: Vec<Document>,
        batch_size: usize,
    ) -> Result<FindResult> {
        self.oltp.create_cursor(namespace, documents, batch_size).await
    }

    pub async fn get_cursor(&self, id: i64) -> Option<CursorInfo> {
        if let Some(info) = self.oltp.get_cursor(id).await {
            return Some(info);
        }
        match &self.olap {
            Some(olap) => olap.get_cursor(id).await,
            None => None,
        }
    }

    pub async fn advance_cursor(&self, id: i64, batch_size: usize) -> Vec<Document> {
        if self.oltp.get_cursor(id).await.is_some() {
            return self.oltp.advance_cursor(id, batch_size).await;
        }
        match &self.olap {
            Some(olap) => olap.advance_cursor(id, batch_size).await,
            None => Vec::new(),
        }
    }

    pub async fn close_cursor(&self, id: i64) -> bool {
        let closed_oltp = self.oltp.close_cursor(id).await;
        let closed_olap = match &self.olap {
            Some(olap) => olap.close_cursor(id).await,
            None => false,
        };
        closed_oltp || closed_olap
    }

    pub async fn cleanup_expired_cursors(&self) -> usize {
        let mut evicted = self.oltp.cleanup_expired_cursors().await;
        if let Some(olap) = &self.olap {
            evicted += olap.cleanup_expired_cursors().await;
        }
        evicted
    }
}
