//! ClickHouse declared-type parsing
//!
//! Column metadata arrives as declared-type strings (`Nullable(String)`,
//! `DateTime64(3)`, `Array(UInt32)`, …). This module parses them into a
//! recursive [`ColumnType`] so conversion logic can dispatch on structure
//! instead of re-matching prefixes at every call site.

/// Parsed form of a ClickHouse column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// Any integer kind except `UInt8` (`Int8`..`Int256`, `UInt16`..).
    Int,
    /// `UInt8`, kept distinct for the bool-coercion option.
    UInt8,
    /// `Float32` / `Float64`.
    Float,
    Bool,
    /// `Date` / `Date32`.
    Date,
    /// `DateTime` (second precision).
    DateTime,
    /// `DateTime64(p)` with its precision digit.
    DateTime64(u8),
    Uuid,
    /// Any `Decimal` kind; the value keeps its string form.
    Decimal,
    /// `Enum8` / `Enum16`; values surface as strings.
    Enum,
    /// `String` / `FixedString(n)`.
    StringLike,
    /// `Object('JSON')` / `JSON`.
    Json,
    Nullable(Box<ColumnType>),
    LowCardinality(Box<ColumnType>),
    Array(Box<ColumnType>),
    Tuple(Vec<ColumnType>),
    /// Anything unrecognized; values pass through as strings.
    Other,
}

/// Parse a declared type string. Unknown types map to [`ColumnType::Other`]
/// rather than failing: the mapper degrades to string passthrough.
pub fn parse_column_type(decl: &str) -> ColumnType {
    let decl = decl.trim();

    if let Some(inner) = wrapped(decl, "Nullable") {
        return ColumnType::Nullable(Box::new(parse_column_type(inner)));
    }
    if let Some(inner) = wrapped(decl, "LowCardinality") {
        return ColumnType::LowCardinality(Box::new(parse_column_type(inner)));
    }
    if let Some(inner) = wrapped(decl, "Array") {
        return ColumnType::Array(Box::new(parse_column_type(inner)));
    }
    if let Some(inner) = wrapped(decl, "Tuple") {
        let elements = split_top_level(inner)
            .into_iter()
            .map(|part| {
                let part = part.trim();
                let parsed = parse_column_type(part);
                if parsed != ColumnType::Other {
                    return parsed;
                }
                // Named tuple elements read as "name Type".
                match part.split_once(' ') {
                    Some((_, ty)) => parse_column_type(ty),
                    None => ColumnType::Other,
                }
            })
            .collect();
        return ColumnType::Tuple(elements);
    }
    if let Some(precision) = wrapped(decl, "DateTime64") {
        let digits = precision
            .split(',')
            .next()
            .unwrap_or("3")
            .trim()
            .parse::<u8>()
            .unwrap_or(3);
        return ColumnType::DateTime64(digits);
    }

    if decl == "UInt8" {
        return ColumnType::UInt8;
    }
    if decl.starts_with("UInt") || decl.starts_with("Int") {
        return ColumnType::Int;
    }
    if decl.starts_with("Float") {
        return ColumnType::Float;
    }
    if decl == "Bool" || decl == "Boolean" {
        return ColumnType::Bool;
    }
    if decl == "Date" || decl == "Date32" {
        return ColumnType::Date;
    }
    if decl.starts_with("DateTime") {
        return ColumnType::DateTime;
    }
    if decl == "UUID" {
        return ColumnType::Uuid;
    }
    if decl.starts_with("Decimal") {
        return ColumnType::Decimal;
    }
    if decl.starts_with("Enum8") || decl.starts_with("Enum16") {
        return ColumnType::Enum;
    }
    if decl == "String" || decl.starts_with("FixedString") {
        return ColumnType::StringLike;
    }
    if decl == "JSON" || decl.starts_with("Object") {
        return ColumnType::Json;
    }
    ColumnType::Other
}

/// `wrapped("Nullable(String)", "Nullable")` yields `Some("String")`.
fn wrapped<'a>(decl: &'a str, outer: &str) -> Option<&'a str> {
    decl.strip_prefix(outer)?
        .strip_prefix('(')?
        .strip_suffix(')')
}

/// Split a type argument list on commas that are not nested in
/// parentheses or quotes.
fn split_top_level(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut start = 0usize;
    for (i, c) in args.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth = depth.saturating_sub(1),
            ',' if !in_quote && depth == 0 => {
                parts.push(&args[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&args[start..]);
    parts
}
