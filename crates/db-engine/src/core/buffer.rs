use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};

/// Value kinds a buffer column (and therefore a bind slot or result cell)
/// can carry. Bind and read dispatch pattern-matches on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyDataType {
    Bool,
    Char,
    UChar,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
    String,
    Json,
    Timestamp,
}

impl PropertyDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyDataType::Bool => "bool",
            PropertyDataType::Char => "char",
            PropertyDataType::UChar => "uchar",
            PropertyDataType::Int => "int",
            PropertyDataType::UInt => "uint",
            PropertyDataType::Long => "long",
            PropertyDataType::ULong => "ulong",
            PropertyDataType::Float => "float",
            PropertyDataType::Double => "double",
            PropertyDataType::String => "string",
            PropertyDataType::Json => "json",
            PropertyDataType::Timestamp => "timestamp",
        }
    }
}

impl std::fmt::Display for PropertyDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named, typed column slot of a buffer schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    name: String,
    data_type: PropertyDataType,
}

impl Property {
    pub fn new(name: impl Into<String>, data_type: PropertyDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> PropertyDataType {
        self.data_type
    }
}

/// Ordered buffer schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyList {
    properties: Vec<Property>,
}

impl PropertyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, data_type: PropertyDataType) -> &mut Self {
        self.properties.push(Property::new(name.into(), data_type));
        self
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn at(&self, index: usize) -> &Property {
        &self.properties[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name() == name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }
}

/// One owned cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Char(i8),
    UChar(u8),
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    Float(f32),
    Double(f64),
    String(String),
    Json(serde_json::Value),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn data_type(&self) -> PropertyDataType {
        match self {
            Value::Bool(_) => PropertyDataType::Bool,
            Value::Char(_) => PropertyDataType::Char,
            Value::UChar(_) => PropertyDataType::UChar,
            Value::Int(_) => PropertyDataType::Int,
            Value::UInt(_) => PropertyDataType::UInt,
            Value::Long(_) => PropertyDataType::Long,
            Value::ULong(_) => PropertyDataType::ULong,
            Value::Float(_) => PropertyDataType::Float,
            Value::Double(_) => PropertyDataType::Double,
            Value::String(_) => PropertyDataType::String,
            Value::Json(_) => PropertyDataType::Json,
            Value::Timestamp(_) => PropertyDataType::Timestamp,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(v) => serde_json::Value::from(*v),
            Value::Char(v) => serde_json::Value::from(*v),
            Value::UChar(v) => serde_json::Value::from(*v),
            Value::Int(v) => serde_json::Value::from(*v),
            Value::UInt(v) => serde_json::Value::from(*v),
            Value::Long(v) => serde_json::Value::from(*v),
            Value::ULong(v) => serde_json::Value::from(*v),
            Value::Float(v) => serde_json::Value::from(*v),
            Value::Double(v) => serde_json::Value::from(*v),
            Value::String(v) => serde_json::Value::from(v.clone()),
            Value::Json(v) => v.clone(),
            Value::Timestamp(v) => serde_json::Value::from(v.to_rfc3339()),
        }
    }
}

/// Borrowed cell value handed to a backend bind slot.
#[derive(Debug, Clone, Copy)]
pub enum BindValue<'a> {
    Null,
    Bool(bool),
    Char(i8),
    UChar(u8),
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    Float(f32),
    Double(f64),
    String(&'a str),
    Json(&'a serde_json::Value),
    Timestamp(DateTime<Utc>),
}

/// Columnar storage for one buffer column; one vector variant per value kind.
#[derive(Debug, Clone)]
enum ColumnData {
    Bool(Vec<Option<bool>>),
    Char(Vec<Option<i8>>),
    UChar(Vec<Option<u8>>),
    Int(Vec<Option<i32>>),
    UInt(Vec<Option<u32>>),
    Long(Vec<Option<i64>>),
    ULong(Vec<Option<u64>>),
    Float(Vec<Option<f32>>),
    Double(Vec<Option<f64>>),
    String(Vec<Option<String>>),
    Json(Vec<Option<serde_json::Value>>),
    Timestamp(Vec<Option<DateTime<Utc>>>),
}

impl ColumnData {
    fn with_type(data_type: PropertyDataType) -> Self {
        match data_type {
            PropertyDataType::Bool => ColumnData::Bool(Vec::new()),
            PropertyDataType::Char => ColumnData::Char(Vec::new()),
            PropertyDataType::UChar => ColumnData::UChar(Vec::new()),
            PropertyDataType::Int => ColumnData::Int(Vec::new()),
            PropertyDataType::UInt => ColumnData::UInt(Vec::new()),
            PropertyDataType::Long => ColumnData::Long(Vec::new()),
            PropertyDataType::ULong => ColumnData::ULong(Vec::new()),
            PropertyDataType::Float => ColumnData::Float(Vec::new()),
            PropertyDataType::Double => ColumnData::Double(Vec::new()),
            PropertyDataType::String => ColumnData::String(Vec::new()),
            PropertyDataType::Json => ColumnData::Json(Vec::new()),
            PropertyDataType::Timestamp => ColumnData::Timestamp(Vec::new()),
        }
    }

    fn resize(&mut self, len: usize) {
        match self {
            ColumnData::Bool(v) => v.resize(len, None),
            ColumnData::Char(v) => v.resize(len, None),
            ColumnData::UChar(v) => v.resize(len, None),
            ColumnData::Int(v) => v.resize(len, None),
            ColumnData::UInt(v) => v.resize(len, None),
            ColumnData::Long(v) => v.resize(len, None),
            ColumnData::ULong(v) => v.resize(len, None),
            ColumnData::Float(v) => v.resize(len, None),
            ColumnData::Double(v) => v.resize(len, None),
            ColumnData::String(v) => v.resize(len, None),
            ColumnData::Json(v) => v.resize(len, None),
            ColumnData::Timestamp(v) => v.resize(len, None),
        }
    }

    fn is_null(&self, row: usize) -> bool {
        match self {
            ColumnData::Bool(v) => v[row].is_none(),
            ColumnData::Char(v) => v[row].is_none(),
            ColumnData::UChar(v) => v[row].is_none(),
            ColumnData::Int(v) => v[row].is_none(),
            ColumnData::UInt(v) => v[row].is_none(),
            ColumnData::Long(v) => v[row].is_none(),
            ColumnData::ULong(v) => v[row].is_none(),
            ColumnData::Float(v) => v[row].is_none(),
            ColumnData::Double(v) => v[row].is_none(),
            ColumnData::String(v) => v[row].is_none(),
            ColumnData::Json(v) => v[row].is_none(),
            ColumnData::Timestamp(v) => v[row].is_none(),
        }
    }

    fn value(&self, row: usize) -> Option<Value> {
        match self {
            ColumnData::Bool(v) => v[row].map(Value::Bool),
            ColumnData::Char(v) => v[row].map(Value::Char),
            ColumnData::UChar(v) => v[row].map(Value::UChar),
            ColumnData::Int(v) => v[row].map(Value::Int),
            ColumnData::UInt(v) => v[row].map(Value::UInt),
            ColumnData::Long(v) => v[row].map(Value::Long),
            ColumnData::ULong(v) => v[row].map(Value::ULong),
            ColumnData::Float(v) => v[row].map(Value::Float),
            ColumnData::Double(v) => v[row].map(Value::Double),
            ColumnData::String(v) => v[row].clone().map(Value::String),
            ColumnData::Json(v) => v[row].clone().map(Value::Json),
            ColumnData::Timestamp(v) => v[row].map(Value::Timestamp),
        }
    }

    fn bind_value(&self, row: usize) -> BindValue<'_> {
        match self {
            ColumnData::Bool(v) => v[row].map_or(BindValue::Null, BindValue::Bool),
            ColumnData::Char(v) => v[row].map_or(BindValue::Null, BindValue::Char),
            ColumnData::UChar(v) => v[row].map_or(BindValue::Null, BindValue::UChar),
            ColumnData::Int(v) => v[row].map_or(BindValue::Null, BindValue::Int),
            ColumnData::UInt(v) => v[row].map_or(BindValue::Null, BindValue::UInt),
            ColumnData::Long(v) => v[row].map_or(BindValue::Null, BindValue::Long),
            ColumnData::ULong(v) => v[row].map_or(BindValue::Null, BindValue::ULong),
            ColumnData::Float(v) => v[row].map_or(BindValue::Null, BindValue::Float),
            ColumnData::Double(v) => v[row].map_or(BindValue::Null, BindValue::Double),
            ColumnData::String(v) => v[row]
                .as_deref()
                .map_or(BindValue::Null, BindValue::String),
            ColumnData::Json(v) => v[row].as_ref().map_or(BindValue::Null, BindValue::Json),
            ColumnData::Timestamp(v) => v[row].map_or(BindValue::Null, BindValue::Timestamp),
        }
    }

    fn set(&mut self, row: usize, value: Option<Value>) -> DbResult<()> {
        let Some(value) = value else {
            self.set_null(row);
            return Ok(());
        };
        match (self, value) {
            (ColumnData::Bool(v), Value::Bool(x)) => v[row] = Some(x),
            (ColumnData::Char(v), Value::Char(x)) => v[row] = Some(x),
            (ColumnData::UChar(v), Value::UChar(x)) => v[row] = Some(x),
            (ColumnData::Int(v), Value::Int(x)) => v[row] = Some(x),
            (ColumnData::UInt(v), Value::UInt(x)) => v[row] = Some(x),
            (ColumnData::Long(v), Value::Long(x)) => v[row] = Some(x),
            (ColumnData::ULong(v), Value::ULong(x)) => v[row] = Some(x),
            (ColumnData::Float(v), Value::Float(x)) => v[row] = Some(x),
            (ColumnData::Double(v), Value::Double(x)) => v[row] = Some(x),
            (ColumnData::String(v), Value::String(x)) => v[row] = Some(x),
            (ColumnData::Json(v), Value::Json(x)) => v[row] = Some(x),
            (ColumnData::Timestamp(v), Value::Timestamp(x)) => v[row] = Some(x),
            (col, value) => {
                return Err(DbError::BufferMismatch(format!(
                    "cannot store {} value in {} column",
                    value.data_type(),
                    col.data_type()
                )))
            }
        }
        Ok(())
    }

    fn set_null(&mut self, row: usize) {
        match self {
            ColumnData::Bool(v) => v[row] = None,
            ColumnData::Char(v) => v[row] = None,
            ColumnData::UChar(v) => v[row] = None,
            ColumnData::Int(v) => v[row] = None,
            ColumnData::UInt(v) => v[row] = None,
            ColumnData::Long(v) => v[row] = None,
            ColumnData::ULong(v) => v[row] = None,
            ColumnData::Float(v) => v[row] = None,
            ColumnData::Double(v) => v[row] = None,
            ColumnData::String(v) => v[row] = None,
            ColumnData::Json(v) => v[row] = None,
            ColumnData::Timestamp(v) => v[row] = None,
        }
    }

    fn data_type(&self) -> PropertyDataType {
        match self {
            ColumnData::Bool(_) => PropertyDataType::Bool,
            ColumnData::Char(_) => PropertyDataType::Char,
            ColumnData::UChar(_) => PropertyDataType::UChar,
            ColumnData::Int(_) => PropertyDataType::Int,
            ColumnData::UInt(_) => PropertyDataType::UInt,
            ColumnData::Long(_) => PropertyDataType::Long,
            ColumnData::ULong(_) => PropertyDataType::ULong,
            ColumnData::Float(_) => PropertyDataType::Float,
            ColumnData::Double(_) => PropertyDataType::Double,
            ColumnData::String(_) => PropertyDataType::String,
            ColumnData::Json(_) => PropertyDataType::Json,
            ColumnData::Timestamp(_) => PropertyDataType::Timestamp,
        }
    }
}

/// Columnar, nullable, named-and-typed container exchanged between the
/// database layer and its callers. Rows are addressed by index, columns by
/// schema position or name; every cell tracks its own null state.
#[derive(Debug, Clone)]
pub struct Buffer {
    properties: PropertyList,
    columns: Vec<ColumnData>,
    num_rows: usize,
}

impl Buffer {
    pub fn new(properties: PropertyList) -> Self {
        let columns = properties
            .iter()
            .map(|p| ColumnData::with_type(p.data_type()))
            .collect();
        Self {
            properties,
            columns,
            num_rows: 0,
        }
    }

    pub fn properties(&self) -> &PropertyList {
        &self.properties
    }

    pub fn len(&self) -> usize {
        self.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.properties.has(name)
    }

    /// Grows (or shrinks) the buffer to `len` rows; new cells are null.
    pub fn resize(&mut self, len: usize) {
        for col in &mut self.columns {
            col.resize(len);
        }
        self.num_rows = len;
    }

    /// Appends one row given in schema order; `None` entries stay null.
    pub fn push_row(&mut self, values: Vec<Option<Value>>) -> DbResult<()> {
        if values.len() != self.columns.len() {
            return Err(DbError::BufferMismatch(format!(
                "row has {} values, buffer has {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        let row = self.num_rows;
        self.resize(row + 1);
        for (col, value) in self.columns.iter_mut().zip(values) {
            col.set(row, value)?;
        }
        Ok(())
    }

    pub fn is_null(&self, row: usize, column: usize) -> bool {
        self.columns[column].is_null(row)
    }

    /// Owned cell value; `None` means null.
    pub fn value(&self, row: usize, column: usize) -> Option<Value> {
        self.columns[column].value(row)
    }

    pub fn value_by_name(&self, row: usize, name: &str) -> Option<Value> {
        let idx = self.properties.index_of(name)?;
        self.columns[idx].value(row)
    }

    /// Borrowed cell value for binding; null cells yield `BindValue::Null`.
    pub fn bind_value(&self, row: usize, column: usize) -> BindValue<'_> {
        self.columns[column].bind_value(row)
    }

    pub fn set(&mut self, row: usize, column: usize, value: Option<Value>) -> DbResult<()> {
        self.columns[column].set(row, value)
    }

    pub fn set_by_name(&mut self, row: usize, name: &str, value: Option<Value>) -> DbResult<()> {
        let idx = self
            .properties
            .index_of(name)
            .ok_or_else(|| DbError::BufferMismatch(format!("no column named '{name}'")))?;
        self.columns[idx].set(row, value)
    }

    /// Seizes all rows of `other` into this buffer. Schemas must match.
    pub fn append(&mut self, other: Buffer) -> DbResult<()> {
        if self.properties != other.properties {
            return Err(DbError::BufferMismatch(
                "cannot append buffer with different schema".into(),
            ));
        }
        let old_len = self.num_rows;
        self.resize(old_len + other.num_rows);
        for row in 0..other.num_rows {
            for col in 0..other.columns.len() {
                self.columns[col].set(old_len + row, other.columns[col].value(row))?;
            }
        }
        Ok(())
    }

    /// Copies rows `[from, to)` into a fresh buffer with the same schema.
    pub fn copy_range(&self, from: usize, to: usize) -> Buffer {
        let to = to.min(self.num_rows);
        let from = from.min(to);
        let mut out = Buffer::new(self.properties.clone());
        out.resize(to - from);
        for row in from..to {
            for col in 0..self.columns.len() {
                // same schema, cannot mismatch
                let _ = out.columns[col].set(row - from, self.columns[col].value(row));
            }
        }
        out
    }

    /// One row as a JSON object keyed by column name; nulls become JSON null.
    pub fn row_to_json(&self, row: usize) -> serde_json::Value {
        let mut map = serde_json::Map::with_capacity(self.columns.len());
        for (idx, property) in self.properties.iter().enumerate() {
            let v = self.columns[idx]
                .value(row)
                .map_or(serde_json::Value::Null, |v| v.to_json());
            map.insert(property.name().to_string(), v);
        }
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> PropertyList {
        let mut list = PropertyList::new();
        list.add("id", PropertyDataType::Int)
            .add("name", PropertyDataType::String);
        list
    }

    #[test]
    fn push_and_read_rows() {
        let mut buffer = Buffer::new(schema());
        buffer
            .push_row(vec![Some(Value::Int(1)), Some(Value::String("a".into()))])
            .unwrap();
        buffer.push_row(vec![Some(Value::Int(2)), None]).unwrap();

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.value(0, 0), Some(Value::Int(1)));
        assert_eq!(buffer.value(0, 1), Some(Value::String("a".into())));
        assert!(buffer.is_null(1, 1));
        assert_eq!(buffer.value_by_name(1, "id"), Some(Value::Int(2)));
    }

    #[test]
    fn type_mismatch_is_reported() {
        let mut buffer = Buffer::new(schema());
        let res = buffer.push_row(vec![Some(Value::String("oops".into())), None]);
        assert!(matches!(res, Err(DbError::BufferMismatch(_))));
    }

    #[test]
    fn append_seizes_rows() {
        let mut a = Buffer::new(schema());
        a.push_row(vec![Some(Value::Int(1)), Some(Value::String("a".into()))])
            .unwrap();
        let mut b = Buffer::new(schema());
        b.push_row(vec![Some(Value::Int(2)), None]).unwrap();

        a.append(b).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a.value(1, 0), Some(Value::Int(2)));
        assert!(a.is_null(1, 1));
    }

    #[test]
    fn copy_range_clamps_bounds() {
        let mut buffer = Buffer::new(schema());
        for i in 0..5 {
            buffer
                .push_row(vec![Some(Value::Int(i)), Some(Value::String(i.to_string()))])
                .unwrap();
        }
        let chunk = buffer.copy_range(3, 10);
        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk.value(0, 0), Some(Value::Int(3)));
        assert_eq!(chunk.value(1, 0), Some(Value::Int(4)));
    }
}
