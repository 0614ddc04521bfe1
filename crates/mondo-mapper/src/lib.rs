//! Mondo mapper - columnar result translation
//!
//! Faithful round-tripping of the document model through the analytical
//! engine's relational columnar types. Declared-type strings parse into a
//! recursive [`ColumnType`]; rows convert per column with opt-in lifting
//! of object-ids and binary values; documents render back into the
//! engine's JSON row shape.

mod mapper;
mod types;

#[cfg(test)]
mod mapper_tests;

pub use mapper::{
    ColumnMeta, FieldMapper, MapperOptions, document_to_row, lift_object_ids, row_to_document,
    rows_to_documents,
};
pub use types::{ColumnType, parse_column_type};
