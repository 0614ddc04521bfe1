//! Mondo core - shared abstractions for the document database front-end
//!
//! This crate provides the fundamental types every other mondo crate
//! depends on:
//!
//! - The backend contract records (`FindOptions`, `FindResult`, write
//!   results, statistics, `IndexSpec`, …)
//! - `MondoError` and the MongoDB-compatible error codes
//! - Identifier validation for database names, collection names, and
//!   field paths
//! - The shared `CursorManager` each backend embeds
//! - Document model glue over `bson`

mod backend;
mod cursor;
mod document;
mod error;
mod names;

#[cfg(test)]
mod cursor_tests;

pub use backend::*;
pub use cursor::*;
pub use document::*;
pub use error::*;
pub use names::*;
