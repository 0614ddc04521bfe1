//! Identifier validation
//!
//! Every caller-supplied database name, collection name, and field path is
//! validated here before it reaches a filesystem path or a generated SQL
//! statement. Failures are fatal to the current call and never retried.

use crate::{MondoError, Result};

/// Maximum length accepted for database and collection names.
const MAX_NAME_LEN: usize = 255;

/// Collection names under the `system.` prefix that remain addressable.
const SYSTEM_ALLOW_LIST: &[&str] = &["system.users", "system.indexes", "system.namespaces"];

/// Validate a database name before it is used as a filename.
///
/// The name must match `^[A-Za-z0-9_-]+$`; path traversal characters,
/// leading dots, and NUL bytes are rejected outright.
pub fn validate_database_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MondoError::IllegalName("database name is empty".into()));
    }
    if name.contains('\0') {
        return Err(MondoError::IllegalName(
            "database name contains a NUL byte".into(),
        ));
    }
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(MondoError::IllegalName(format!(
            "database name '{}' contains path traversal characters",
            name
        )));
    }
    if name.starts_with('.') {
        return Err(MondoError::IllegalName(format!(
            "database name '{}' starts with a dot",
            name
        )));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(MondoError::IllegalName(format!(
            "database name exceeds {} bytes",
            MAX_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(MondoError::IllegalName(format!(
            "database name '{}' contains characters outside [A-Za-z0-9_-]",
            name
        )));
    }
    Ok(())
}

/// Validate a collection name.
///
/// The name must match `^[A-Za-z_][A-Za-z0-9_.-]*$` and must not claim the
/// reserved `system.` prefix unless it is on the exact allow-list.
pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MondoError::IllegalName("collection name is empty".into()));
    }
    if name.contains('\0') {
        return Err(MondoError::IllegalName(
            "collection name contains a NUL byte".into(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(MondoError::IllegalName(format!(
            "collection name exceeds {} bytes",
            MAX_NAME_LEN
        )));
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap();
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(MondoError::IllegalName(format!(
            "collection name '{}' must start with a letter or underscore",
            name
        )));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-') {
        return Err(MondoError::IllegalName(format!(
            "collection name '{}' contains characters outside [A-Za-z0-9_.-]",
            name
        )));
    }
    if name.starts_with("system.") && !SYSTEM_ALLOW_LIST.contains(&name) {
        return Err(MondoError::IllegalName(format!(
            "collection name '{}' uses the reserved system prefix",
            name
        )));
    }
    Ok(())
}

/// Validate a document field path before it is rendered into a JSON-path
/// literal inside generated SQL.
///
/// Only letters, digits, underscores, and single internal dots are allowed,
/// so no caller-supplied character ever reaches SQL unescaped.
pub fn validate_field_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(MondoError::BadValue("field path is empty".into()));
    }
    if path.starts_with('.') || path.ends_with('.') || path.contains("..") {
        return Err(MondoError::BadValue(format!(
            "field path '{}' has a leading, trailing, or doubled dot",
            path
        )));
    }
    if !path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Err(MondoError::BadValue(format!(
            "field path '{}' contains characters outside [A-Za-z0-9_.]",
            path
        )));
    }
    Ok(())
}
