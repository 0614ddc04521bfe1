//! Embedded SQL backend for mondo
//!
//! The transactional (OLTP) half of the dual-engine store: one sqlite
//! file per database, documents stored as Extended JSON rows keyed by
//! `(collection_id, _id)`, filters and sorts translated into SQL over
//! `json_extract`, aggregation pipelines evaluated in memory, and
//! cursors served from the embedded cursor manager with a background
//! TTL sweep.

mod backend;
mod db;
mod sql;
mod update;

#[cfg(test)]
mod backend_tests;
#[cfg(test)]
mod sql_tests;
#[cfg(test)]
mod update_tests;

pub use backend::{SqliteBackend, SqliteBackendConfig};
