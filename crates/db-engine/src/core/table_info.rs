use serde::{Deserialize, Serialize};

use crate::core::buffer::{PropertyDataType, PropertyList};

/// Metadata of one live table column, built by schema introspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(default)]
    pub property_type: Option<PropertyDataType>,
    #[serde(default)]
    pub db_type: Option<String>,
    #[serde(default)]
    pub key: bool,
    #[serde(default)]
    pub null_allowed: bool,
    #[serde(default)]
    pub comment: String,
}

impl ColumnInfo {
    pub fn new(
        name: impl Into<String>,
        db_type: impl Into<String>,
        key: bool,
        null_allowed: bool,
    ) -> Self {
        let db_type = db_type.into();
        let property_type = property_type_from_db_type(&db_type);
        Self {
            name: name.into(),
            property_type,
            db_type: Some(db_type),
            key,
            null_allowed,
            comment: String::new(),
        }
    }
}

/// Metadata of one live table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn add_column(&mut self, column: ColumnInfo) {
        self.columns.push(column);
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The table schema as buffer properties, if every column maps to a
    /// known value kind.
    pub fn properties(&self) -> Option<PropertyList> {
        let mut list = PropertyList::new();
        for column in &self.columns {
            list.add(column.name.clone(), column.property_type?);
        }
        Some(list)
    }
}

/// Column definition handed to table creation.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: PropertyDataType,
    pub key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: PropertyDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            key: false,
        }
    }

    pub fn key(name: impl Into<String>, data_type: PropertyDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            key: true,
        }
    }
}

/// Secondary index definition applied at table creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub column: String,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
        }
    }
}

/// Maps a backend-native type name to the value kind it round-trips as.
/// Unknown names yield `None`; the db type string is kept alongside either
/// way.
pub fn property_type_from_db_type(db_type: &str) -> Option<PropertyDataType> {
    let upper = db_type.trim().to_ascii_uppercase();
    // strip length suffixes like VARCHAR(255)
    let base = upper.split('(').next().unwrap_or("").trim();
    match base {
        "BOOL" | "BOOLEAN" => Some(PropertyDataType::Bool),
        "TINYINT" => Some(PropertyDataType::Char),
        "UTINYINT" => Some(PropertyDataType::UChar),
        "INT" | "INT4" | "SMALLINT" => Some(PropertyDataType::Int),
        "UINTEGER" => Some(PropertyDataType::UInt),
        "INTEGER" | "BIGINT" | "INT8" | "HUGEINT" => Some(PropertyDataType::Long),
        "UBIGINT" => Some(PropertyDataType::ULong),
        "FLOAT" | "FLOAT4" => Some(PropertyDataType::Float),
        "DOUBLE" | "REAL" | "FLOAT8" => Some(PropertyDataType::Double),
        "VARCHAR" | "TEXT" | "STRING" | "CHAR" => Some(PropertyDataType::String),
        "TIMESTAMP" | "DATETIME" => Some(PropertyDataType::Timestamp),
        _ => None,
    }
}
