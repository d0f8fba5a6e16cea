//! DuckDB backend, built on the duckdb crate.
//!
//! Columnar engine: precise types, positional placeholders, multiple
//! connections per database (cloned handles), appender bulk-insert fast
//! path. Streaming reads materialize the result once and index into it.

use std::path::Path;

use duckdb::types::{TimeUnit, ValueRef as DuckValueRef};
use duckdb::{appender_params_from_iter, params_from_iter};

use crate::backend::{
    BackendKind, DatabaseEngine, EngineConnection, EngineStatement, OpenTarget, Pragma,
    RowRange, SqlCapabilities, DUCKDB_CAPABILITIES,
};
use crate::core::buffer::{BindValue, Buffer, PropertyDataType, PropertyList, Value};
use crate::core::sqlgen;
use crate::core::table_info::{property_type_from_db_type, ColumnInfo, TableInfo};
use crate::error::{DbError, DbResult};

pub struct DuckDbEngine {
    db: Option<duckdb::Connection>,
}

impl DuckDbEngine {
    pub fn new() -> Self {
        Self { db: None }
    }
}

impl Default for DuckDbEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseEngine for DuckDbEngine {
    fn kind(&self) -> BackendKind {
        BackendKind::DuckDb
    }

    fn capabilities(&self) -> &'static SqlCapabilities {
        &DUCKDB_CAPABILITIES
    }

    fn pragmas(&self) -> Vec<Pragma> {
        vec![Pragma::new("threads", "4")]
    }

    fn open(&mut self, target: &OpenTarget) -> DbResult<()> {
        let db = match target {
            OpenTarget::File(path) => duckdb::Connection::open(path)
                .map_err(|e| DbError::ConnectFailed(e.to_string()))?,
            OpenTarget::InMemory => duckdb::Connection::open_in_memory()
                .map_err(|e| DbError::ConnectFailed(e.to_string()))?,
        };
        self.db = Some(db);
        Ok(())
    }

    fn close(&mut self) {
        self.db = None;
    }

    fn is_open(&self) -> bool {
        self.db.is_some()
    }

    fn connect(&self) -> DbResult<Box<dyn EngineConnection>> {
        let db = self.db.as_ref().ok_or(DbError::NotOpen)?;
        let conn = db
            .try_clone()
            .map_err(|e| DbError::ConnectFailed(e.to_string()))?;
        Ok(Box::new(DuckDbConnection { conn }))
    }

    /// Checkpoints the write-ahead log into the database file.
    fn compact(&self, path: &Path) -> DbResult<()> {
        let conn = duckdb::Connection::open(path)
            .map_err(|e| DbError::CleanupFailed(format!("could not open database: {e}")))?;
        conn.execute_batch("CHECKPOINT;")
            .map_err(|e| DbError::CleanupFailed(format!("checkpoint failed: {e}")))?;
        tracing::info!(path = %path.display(), "database checkpointed");
        Ok(())
    }
}

pub struct DuckDbConnection {
    conn: duckdb::Connection,
}

impl DuckDbConnection {
    /// Result schema of a query via DESCRIBE; unknown type names fall back
    /// to string.
    fn infer_schema(&self, sql: &str) -> DbResult<PropertyList> {
        let describe = format!("DESCRIBE {}", sqlgen::strip_trailing_semicolon(sql));
        let mut stmt = self
            .conn
            .prepare(&describe)
            .map_err(|e| DbError::PrepareFailed(e.to_string()))?;

        let mut schema = PropertyList::new();
        let rows = stmt
            .query_map([], |row| {
                let name: String = row.get(0)?;
                let db_type: String = row.get(1)?;
                Ok((name, db_type))
            })
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| DbError::ExecuteFailed(e.to_string()))?;

        for (name, db_type) in rows {
            let dtype = property_type_from_db_type(&db_type).unwrap_or(PropertyDataType::String);
            schema.add(name, dtype);
        }
        Ok(schema)
    }

    fn fill_buffer(
        rows: &mut duckdb::Rows<'_>,
        schema: &PropertyList,
    ) -> DbResult<Buffer> {
        let mut buffer = Buffer::new(schema.clone());
        let mut idx = 0usize;
        loop {
            let row = match rows.next() {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => return Err(DbError::ExecuteFailed(e.to_string())),
            };
            buffer.resize(idx + 1);
            for (c, property) in schema.iter().enumerate() {
                let vref = match row.get_ref(c) {
                    Ok(vref) => vref,
                    Err(duckdb::Error::InvalidColumnIndex(_)) => {
                        return Err(DbError::BufferMismatch(format!(
                            "query returns fewer columns than the {} declared",
                            schema.len()
                        )))
                    }
                    Err(e) => return Err(DbError::ExecuteFailed(e.to_string())),
                };
                buffer.set(idx, c, value_from_duckdb(vref, property.data_type())?)?;
            }
            if idx == 0 && row.get_ref(schema.len()).is_ok() {
                return Err(DbError::BufferMismatch(format!(
                    "query returns more columns than the {} declared",
                    schema.len()
                )));
            }
            idx += 1;
        }
        Ok(buffer)
    }
}

impl EngineConnection for DuckDbConnection {
    fn capabilities(&self) -> &'static SqlCapabilities {
        &DUCKDB_CAPABILITIES
    }

    fn execute_batch(&mut self, sql: &str) -> DbResult<()> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| DbError::ExecuteFailed(e.to_string()))
    }

    fn query(&mut self, sql: &str, schema: Option<&PropertyList>) -> DbResult<Buffer> {
        let schema = match schema {
            Some(schema) => schema.clone(),
            None => self.infer_schema(sql)?,
        };

        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| DbError::PrepareFailed(e.to_string()))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| DbError::ExecuteFailed(e.to_string()))?;
        Self::fill_buffer(&mut rows, &schema)
    }

    fn query_range(
        &mut self,
        sql: &str,
        schema: &PropertyList,
        offset: usize,
        limit: usize,
    ) -> DbResult<Buffer> {
        let windowed = sqlgen::chunk_statement(sql, offset, limit);
        self.query(&windowed, Some(schema))
    }

    fn prepare<'c>(&'c mut self, sql: &str) -> DbResult<Box<dyn EngineStatement + 'c>> {
        let conn: &'c duckdb::Connection = &self.conn;
        let stmt = conn
            .prepare(sql)
            .map_err(|e| DbError::PrepareFailed(e.to_string()))?;
        Ok(Box::new(DuckDbStatement {
            conn,
            stmt,
            binds: Vec::new(),
        }))
    }

    fn table_names(&mut self) -> DbResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT table_name FROM duckdb_tables() ORDER BY table_name")
            .map_err(|e| DbError::PrepareFailed(e.to_string()))?;
        let names = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| DbError::ExecuteFailed(e.to_string()))?;
        Ok(names)
    }

    fn table_columns(&mut self, table: &str) -> DbResult<TableInfo> {
        if !sqlgen::is_safe_identifier(table) {
            return Err(DbError::ExecuteFailed(format!(
                "invalid table identifier: {table}"
            )));
        }

        let sql = format!("PRAGMA table_info('{table}')");
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| DbError::PrepareFailed(e.to_string()))?;

        let mut info = TableInfo::new(table);
        let columns = stmt
            .query_map([], |row| {
                let name: String = row.get("name")?;
                let db_type: String = row.get("type")?;
                let not_null: bool = row.get("notnull")?;
                let pk: bool = row.get("pk")?;
                Ok(ColumnInfo::new(name, db_type, pk, !not_null))
            })
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| DbError::ExecuteFailed(e.to_string()))?;

        for column in columns {
            info.add_column(column);
        }
        Ok(info)
    }

    fn supports_bulk_append(&self) -> bool {
        true
    }

    fn append_buffer(
        &mut self,
        table: &str,
        buffer: &Buffer,
        range: RowRange,
        table_properties: Option<&PropertyList>,
    ) -> DbResult<()> {
        let buffer_properties = buffer.properties();
        let properties = table_properties.unwrap_or(buffer_properties);

        // buffer column feeding each table column; missing columns append null
        let sources: Vec<Option<usize>> = properties
            .iter()
            .map(|p| buffer_properties.index_of(p.name()))
            .collect();

        let mut appender = self
            .conn
            .appender(table)
            .map_err(|e| DbError::ExecuteFailed(format!("creating appender failed: {e}")))?;

        for r in range.first..=range.last {
            let mut row: Vec<duckdb::types::Value> = Vec::with_capacity(sources.len());
            for source in &sources {
                match source {
                    Some(c) => row.push(duckdb_bind_value(buffer.bind_value(r, *c))?),
                    None => row.push(duckdb::types::Value::Null),
                }
            }
            appender
                .append_row(appender_params_from_iter(row))
                .map_err(|e| DbError::ExecuteFailed(format!("appending row {r} failed: {e}")))?;
        }

        appender
            .flush()
            .map_err(|e| DbError::ExecuteFailed(format!("appender flush failed: {e}")))?;

        Ok(())
    }

    fn materializes_reads(&self) -> bool {
        true
    }

    /// Full copy through ATTACH + COPY FROM DATABASE. The source database is
    /// only read; a failed copy leaves it untouched.
    fn export_file(&mut self, path: &Path) -> DbResult<()> {
        if path.exists() {
            return Err(DbError::ExecuteFailed(format!(
                "export target '{}' already exists",
                path.display()
            )));
        }

        let alias: String = self
            .conn
            .query_row("SELECT current_database()", [], |row| row.get(0))
            .map_err(|e| DbError::ExecuteFailed(e.to_string()))?;

        let attach = format!(
            "ATTACH '{}' AS export_target;",
            path.to_string_lossy().replace('\'', "''")
        );
        self.conn
            .execute_batch(&attach)
            .map_err(|e| DbError::ExecuteFailed(format!("export attach failed: {e}")))?;

        let copy = format!("COPY FROM DATABASE \"{alias}\" TO export_target;");
        let copy_result = self.conn.execute_batch(&copy);

        // detach in any case, otherwise the target file stays locked
        if let Err(e) = self.conn.execute_batch("DETACH export_target;") {
            tracing::warn!(error = %e, "could not detach export target");
        }

        copy_result.map_err(|e| DbError::ExecuteFailed(format!("export copy failed: {e}")))
    }
}

struct DuckDbStatement<'c> {
    conn: &'c duckdb::Connection,
    stmt: duckdb::Statement<'c>,
    binds: Vec<duckdb::types::Value>,
}

impl EngineStatement for DuckDbStatement<'_> {
    fn bind(&mut self, index: usize, value: BindValue<'_>) -> DbResult<()> {
        if self.binds.len() <= index {
            self.binds.resize(index + 1, duckdb::types::Value::Null);
        }
        self.binds[index] = duckdb_bind_value(value)?;
        Ok(())
    }

    fn clear_bindings(&mut self) {
        self.binds.clear();
    }

    fn execute(&mut self) -> DbResult<()> {
        self.stmt
            .execute(params_from_iter(self.binds.iter().cloned()))
            .map(|_| ())
            .map_err(|e| DbError::ExecuteFailed(e.to_string()))
    }

    fn query_into(&mut self, schema: &PropertyList) -> DbResult<Buffer> {
        let mut rows = self
            .stmt
            .query(params_from_iter(self.binds.iter().cloned()))
            .map_err(|e| DbError::ExecuteFailed(e.to_string()))?;
        DuckDbConnection::fill_buffer(&mut rows, schema)
    }

    fn begin_transaction(&mut self) -> DbResult<()> {
        self.conn
            .execute_batch("BEGIN TRANSACTION;")
            .map_err(|e| DbError::ExecuteFailed(e.to_string()))
    }

    fn commit(&mut self) -> DbResult<()> {
        self.conn
            .execute_batch("COMMIT;")
            .map_err(|e| DbError::ExecuteFailed(e.to_string()))
    }

    fn rollback(&mut self) -> DbResult<()> {
        self.conn
            .execute_batch("ROLLBACK;")
            .map_err(|e| DbError::ExecuteFailed(e.to_string()))
    }
}

fn duckdb_bind_value(value: BindValue<'_>) -> DbResult<duckdb::types::Value> {
    use duckdb::types::Value as Dk;
    let v = match value {
        BindValue::Null => Dk::Null,
        BindValue::Bool(v) => Dk::Boolean(v),
        BindValue::Char(v) => Dk::TinyInt(v),
        BindValue::UChar(v) => Dk::UTinyInt(v),
        BindValue::Int(v) => Dk::Int(v),
        BindValue::UInt(v) => Dk::UInt(v),
        BindValue::Long(v) => Dk::BigInt(v),
        BindValue::ULong(v) => Dk::UBigInt(v),
        BindValue::Float(v) => Dk::Float(v),
        BindValue::Double(v) => Dk::Double(v),
        BindValue::String(v) => Dk::Text(v.to_string()),
        BindValue::Json(v) => Dk::Text(
            serde_json::to_string(v).map_err(|e| DbError::BindFailed(e.to_string()))?,
        ),
        BindValue::Timestamp(v) => Dk::Timestamp(TimeUnit::Microsecond, v.timestamp_micros()),
    };
    Ok(v)
}

fn integer_of(vref: &DuckValueRef<'_>) -> Option<i128> {
    match vref {
        DuckValueRef::TinyInt(v) => Some(*v as i128),
        DuckValueRef::SmallInt(v) => Some(*v as i128),
        DuckValueRef::Int(v) => Some(*v as i128),
        DuckValueRef::BigInt(v) => Some(*v as i128),
        DuckValueRef::HugeInt(v) => Some(*v),
        DuckValueRef::UTinyInt(v) => Some(*v as i128),
        DuckValueRef::USmallInt(v) => Some(*v as i128),
        DuckValueRef::UInt(v) => Some(*v as i128),
        DuckValueRef::UBigInt(v) => Some(*v as i128),
        _ => None,
    }
}

fn timestamp_micros(unit: TimeUnit, v: i64) -> i64 {
    match unit {
        TimeUnit::Second => v * 1_000_000,
        TimeUnit::Millisecond => v * 1_000,
        TimeUnit::Microsecond => v,
        TimeUnit::Nanosecond => v / 1_000,
    }
}

fn value_from_duckdb(
    vref: DuckValueRef<'_>,
    data_type: PropertyDataType,
) -> DbResult<Option<Value>> {
    if matches!(vref, DuckValueRef::Null) {
        return Ok(None);
    }

    let mismatch = |vref: &DuckValueRef<'_>| {
        DbError::ExecuteFailed(format!(
            "unexpected {:?} value for {} column",
            vref.data_type(),
            data_type
        ))
    };

    let value = match data_type {
        PropertyDataType::Bool => match vref {
            DuckValueRef::Boolean(v) => Value::Bool(v),
            other => return Err(mismatch(&other)),
        },
        PropertyDataType::Char => {
            Value::Char(integer_of(&vref).ok_or_else(|| mismatch(&vref))? as i8)
        }
        PropertyDataType::UChar => {
            Value::UChar(integer_of(&vref).ok_or_else(|| mismatch(&vref))? as u8)
        }
        PropertyDataType::Int => {
            Value::Int(integer_of(&vref).ok_or_else(|| mismatch(&vref))? as i32)
        }
        PropertyDataType::UInt => {
            Value::UInt(integer_of(&vref).ok_or_else(|| mismatch(&vref))? as u32)
        }
        PropertyDataType::Long => {
            Value::Long(integer_of(&vref).ok_or_else(|| mismatch(&vref))? as i64)
        }
        PropertyDataType::ULong => {
            Value::ULong(integer_of(&vref).ok_or_else(|| mismatch(&vref))? as u64)
        }
        PropertyDataType::Float => match vref {
            DuckValueRef::Float(v) => Value::Float(v),
            DuckValueRef::Double(v) => Value::Float(v as f32),
            other => match integer_of(&other) {
                Some(v) => Value::Float(v as f32),
                None => return Err(mismatch(&other)),
            },
        },
        PropertyDataType::Double => match vref {
            DuckValueRef::Double(v) => Value::Double(v),
            DuckValueRef::Float(v) => Value::Double(v as f64),
            other => match integer_of(&other) {
                Some(v) => Value::Double(v as f64),
                None => return Err(mismatch(&other)),
            },
        },
        PropertyDataType::String => match vref {
            DuckValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
            other => return Err(mismatch(&other)),
        },
        PropertyDataType::Json => match vref {
            DuckValueRef::Text(t) => Value::Json(
                serde_json::from_slice(t)
                    .map_err(|e| DbError::ExecuteFailed(format!("invalid json in result: {e}")))?,
            ),
            other => return Err(mismatch(&other)),
        },
        PropertyDataType::Timestamp => match vref {
            DuckValueRef::Timestamp(unit, v) => Value::Timestamp(
                chrono::DateTime::from_timestamp_micros(timestamp_micros(unit, v)).ok_or_else(
                    || DbError::ExecuteFailed(format!("timestamp value {v} out of range")),
                )?,
            ),
            other => return Err(mismatch(&other)),
        },
    };

    Ok(Some(value))
}
