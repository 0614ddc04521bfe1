//! Server-side cursor management
//!
//! Each backend embeds one `CursorManager`. Identifiers are minted from a
//! monotonically increasing 64-bit counter starting at 1; id 0 is reserved
//! to mean "no further batches". Entries hold the fully materialized
//! result set and age out after ten minutes of wall-clock time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use bson::Document;
use parking_lot::Mutex;

use crate::FindResult;

/// Wall-clock lifetime of an open cursor.
pub const CURSOR_TTL: Duration = Duration::from_secs(600);

#[derive(Debug)]
struct CursorEntry {
    namespace: String,
    documents: Vec<Document>,
    position: usize,
    batch_size: usize,
    created_at: Instant,
}

/// Read-only view of a live cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorInfo {
    pub id: i64,
    pub namespace: String,
    pub remaining: usize,
    pub batch_size: usize,
}

/// Shared table of open cursors. All mutations happen under one mutex;
/// batch delivery copies the slice before the lock is released.
#[derive(Debug)]
pub struct CursorManager {
    next_id: AtomicI64,
    cursors: Mutex<HashMap<i64, CursorEntry>>,
}

impl CursorManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Register a pre-materialized result set and hand back the first
    /// batch. A cursor is only minted when the result overflows one batch.
    pub fn register(
        &self,
        namespace: impl Into<String>,
        documents: Vec<Document>,
        batch_size: usize,
    ) -> FindResult {
        let batch_size = batch_size.max(1);
        if documents.len() <= batch_size {
            return FindResult::complete(documents);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let first_batch: Vec<Document> = documents[..batch_size].to_vec();
        let namespace = namespace.into();
        tracing::debug!(
            cursor_id = id,
            namespace = %namespace,
            total = documents.len(),
            batch_size,
            "cursor opened"
        );
        self.cursors.lock().insert(
            id,
            CursorEntry {
                namespace,
                documents,
                position: batch_size,
                batch_size,
                created_at: Instant::now(),
            },
        );
        FindResult {
            documents: first_batch,
            cursor_id: id,
            has_more: true,
        }
    }

    /// Look up a live cursor.
    pub fn get(&self, id: i64) -> Option<CursorInfo> {
        let cursors = self.cursors.lock();
        cursors.get(&id).map(|entry| CursorInfo {
            id,
            namespace: entry.namespace.clone(),
            remaining: entry.documents.len() - entry.position,
            batch_size: entry.batch_size,
        })
    }

    /// Deliver the next batch of up to `n` documents (the cursor's own
    /// batch size when `n` is 0) and advance the read position. Unknown
    /// ids yield an empty batch.
    pub fn advance(&self, id: i64, n: usize) -> Vec<Document> {
        let mut cursors = self.cursors.lock();
        let Some(entry) = cursors.get_mut(&id) else {
            return Vec::new();
        };
        let step = if n == 0 { entry.batch_size } else { n };
        let end = (entry.position + step).min(entry.documents.len());
        let batch = entry.documents[entry.position..end].to_vec();
        entry.position = end;
        batch
    }

    /// Close a cursor; reports whether it existed.
    pub fn close(&self, id: i64) -> bool {
        let existed = self.cursors.lock().remove(&id).is_some();
        if existed {
            tracing::debug!(cursor_id = id, "cursor closed");
        }
        existed
    }

    /// Drop every cursor older than [`CURSOR_TTL`]; returns how many were
    /// evicted.
    pub fn cleanup_expired(&self) -> usize {
        let mut cursors = self.cursors.lock();
        let before = cursors.len();
        cursors.retain(|_, entry| entry.created_at.elapsed() <= CURSOR_TTL);
        let evicted = before - cursors.len();
        if evicted > 0 {
            tracing::debug!(evicted, "expired cursors evicted");
        }
        evicted
    }

    /// Number of live cursors.
    pub fn len(&self) -> usize {
        self.cursors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.lock().is_empty()
    }

    /// Rewind a cursor's creation time, for TTL tests.
    #[doc(hidden)]
    pub fn backdate(&self, id: i64, age: Duration) {
        if let Some(entry) = self.cursors.lock().get_mut(&id) {
            entry.created_at = Instant::now() - age;
        }
    }
}

impl Default for CursorManager {
    fn default() -> Self {
        Self::new()
    }
}
