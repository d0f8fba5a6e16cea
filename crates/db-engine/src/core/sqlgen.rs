//! SQL text generation for the statements this layer issues itself.
//!
//! Dialect differences are driven by the backend's `SqlCapabilities`:
//! placeholder style, type precision and conflict-resolution phrasing.

use crate::backend::{PlaceholderStyle, SqlCapabilities};
use crate::core::buffer::{PropertyDataType, PropertyList};
use crate::core::table_info::{ColumnDef, IndexDef};

/// Minimal safe subset: [A-Za-z_][A-Za-z0-9_]*
pub fn is_safe_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Keeps only identifier-safe characters, prefixing an underscore if the
/// result would start with a digit.
pub fn sanitize_identifier(s: &str) -> String {
    let mut out: String = s
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if out.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

pub fn quote_identifier(s: &str) -> String {
    format!("\"{s}\"")
}

/// The n-th (1-based) bind placeholder in the dialect's style.
pub fn placeholder(style: PlaceholderStyle, n: usize) -> String {
    match style {
        PlaceholderStyle::QuestionMark => format!("?{n}"),
        PlaceholderStyle::Positional => format!("${n}"),
    }
}

/// Backend-native column type name for a value kind.
pub fn db_type_name(capabilities: &SqlCapabilities, data_type: PropertyDataType) -> &'static str {
    if capabilities.precise_types {
        match data_type {
            PropertyDataType::Bool => "BOOLEAN",
            PropertyDataType::Char => "TINYINT",
            PropertyDataType::UChar => "UTINYINT",
            PropertyDataType::Int => "INTEGER",
            PropertyDataType::UInt => "UINTEGER",
            PropertyDataType::Long => "BIGINT",
            PropertyDataType::ULong => "UBIGINT",
            PropertyDataType::Float => "FLOAT",
            PropertyDataType::Double => "DOUBLE",
            PropertyDataType::String => "VARCHAR",
            PropertyDataType::Json => "VARCHAR",
            PropertyDataType::Timestamp => "TIMESTAMP",
        }
    } else {
        // loose storage classes: integers, reals and text
        match data_type {
            PropertyDataType::Bool
            | PropertyDataType::Char
            | PropertyDataType::UChar
            | PropertyDataType::Int
            | PropertyDataType::UInt
            | PropertyDataType::Long
            | PropertyDataType::ULong
            | PropertyDataType::Timestamp => "INTEGER",
            PropertyDataType::Float | PropertyDataType::Double => "REAL",
            PropertyDataType::String | PropertyDataType::Json => "TEXT",
        }
    }
}

pub fn create_table_statement(
    capabilities: &SqlCapabilities,
    table: &str,
    columns: &[ColumnDef],
) -> String {
    let mut parts = Vec::with_capacity(columns.len());
    for column in columns {
        let mut part = format!(
            "{} {}",
            quote_identifier(&column.name),
            db_type_name(capabilities, column.data_type)
        );
        if column.key {
            part.push_str(" PRIMARY KEY NOT NULL");
        }
        parts.push(part);
    }
    format!(
        "CREATE TABLE {} ({});",
        quote_identifier(table),
        parts.join(", ")
    )
}

pub fn create_index_statement(table: &str, index: &IndexDef) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({});",
        quote_identifier(&index.name),
        quote_identifier(table),
        quote_identifier(&index.column)
    )
}

pub fn drop_table_statement(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {};", quote_identifier(table))
}

pub fn clear_table_statement(table: &str) -> String {
    format!("DELETE FROM {};", quote_identifier(table))
}

/// INSERT template with one placeholder per buffer property, numbered by
/// property position. Conflict resolution is phrased per dialect.
pub fn insert_statement(
    capabilities: &SqlCapabilities,
    table: &str,
    properties: &PropertyList,
) -> String {
    let columns: Vec<String> = properties
        .iter()
        .map(|p| quote_identifier(p.name()))
        .collect();
    let values: Vec<String> = (1..=properties.len())
        .map(|n| placeholder(capabilities.placeholder, n))
        .collect();

    let verb = if capabilities.conflict_resolution {
        "INSERT OR REPLACE INTO"
    } else {
        "INSERT INTO"
    };

    format!(
        "{} {} ({}) VALUES ({});",
        verb,
        quote_identifier(table),
        columns.join(", "),
        values.join(", ")
    )
}

/// UPDATE template keyed on `key_column`. Placeholders are numbered by the
/// property's position in the buffer schema, so buffer-driven execution can
/// bind every column at its own index regardless of where the key sits.
pub fn update_statement(
    capabilities: &SqlCapabilities,
    table: &str,
    properties: &PropertyList,
    key_column: &str,
) -> String {
    let mut assignments = Vec::with_capacity(properties.len().saturating_sub(1));
    let mut key_placeholder = None;
    for (idx, property) in properties.iter().enumerate() {
        let ph = placeholder(capabilities.placeholder, idx + 1);
        if property.name() == key_column {
            key_placeholder = Some(ph);
        } else {
            assignments.push(format!("{} = {}", quote_identifier(property.name()), ph));
        }
    }

    format!(
        "UPDATE {} SET {} WHERE {} = {};",
        quote_identifier(table),
        assignments.join(", "),
        quote_identifier(key_column),
        key_placeholder.expect("key column not part of properties")
    )
}

/// Assigns staged rows of `source_table` to `target_table`, matching on the
/// key column.
pub fn update_from_table_statement(
    source_table: &str,
    target_table: &str,
    update_columns: &[String],
    key_column: &str,
) -> String {
    let assignments: Vec<String> = update_columns
        .iter()
        .map(|c| {
            format!(
                "{col} = {src}.{col}",
                col = quote_identifier(c),
                src = quote_identifier(source_table)
            )
        })
        .collect();

    format!(
        "UPDATE {target} SET {assignments} FROM {source} WHERE {target}.{key} = {source}.{key};",
        target = quote_identifier(target_table),
        source = quote_identifier(source_table),
        assignments = assignments.join(", "),
        key = quote_identifier(key_column)
    )
}

/// Wraps a SELECT so its total row count can be fetched without
/// materializing the result.
pub fn count_statement(select_sql: &str) -> String {
    format!(
        "SELECT COUNT(*) AS row_count FROM ({})",
        strip_trailing_semicolon(select_sql)
    )
}

/// Wraps a SELECT into a bounded window, preserving the inner ordering.
pub fn chunk_statement(select_sql: &str, offset: usize, limit: usize) -> String {
    format!(
        "SELECT * FROM ({}) LIMIT {} OFFSET {}",
        strip_trailing_semicolon(select_sql),
        limit,
        offset
    )
}

pub fn strip_trailing_semicolon(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}
