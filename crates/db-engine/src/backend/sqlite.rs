//! SQLite backend, built on rusqlite.
//!
//! Row-oriented engine: loose storage classes, question-mark placeholders,
//! `INSERT OR REPLACE` conflict resolution, one connection per database.
//! Chunked reads re-query a LIMIT/OFFSET window of the unmodified SELECT.

use std::path::{Path, PathBuf};

use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, OpenFlags};

use crate::backend::{
    BackendKind, DatabaseEngine, EngineConnection, EngineStatement, OpenTarget, Pragma,
    SqlCapabilities, SQLITE_CAPABILITIES,
};
use crate::core::buffer::{BindValue, Buffer, PropertyDataType, PropertyList, Value};
use crate::core::table_info::{property_type_from_db_type, ColumnInfo, TableInfo};
use crate::core::sqlgen;
use crate::error::{DbError, DbResult};

const BUSY_TIMEOUT_MS: u64 = 2_000;

pub struct SqliteEngine {
    target: Option<OpenTarget>,
}

impl SqliteEngine {
    pub fn new() -> Self {
        Self { target: None }
    }
}

impl Default for SqliteEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseEngine for SqliteEngine {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn capabilities(&self) -> &'static SqlCapabilities {
        &SQLITE_CAPABILITIES
    }

    fn pragmas(&self) -> Vec<Pragma> {
        vec![
            Pragma::new("synchronous", "OFF"),
            Pragma::new("temp_store", "MEMORY"),
        ]
    }

    fn open(&mut self, target: &OpenTarget) -> DbResult<()> {
        self.target = Some(target.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.target = None;
    }

    fn is_open(&self) -> bool {
        self.target.is_some()
    }

    fn connect(&self) -> DbResult<Box<dyn EngineConnection>> {
        let target = self.target.as_ref().ok_or(DbError::NotOpen)?;

        let conn = match target {
            OpenTarget::File(path) => {
                let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
                rusqlite::Connection::open_with_flags(path, flags)
                    .map_err(|e| DbError::ConnectFailed(e.to_string()))?
            }
            OpenTarget::InMemory => rusqlite::Connection::open_in_memory()
                .map_err(|e| DbError::ConnectFailed(e.to_string()))?,
        };
        let _ = conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS));

        Ok(Box::new(SqliteConnection { conn }))
    }

    /// Copy-compacts the closed database file: VACUUM INTO a sibling temp
    /// file, then swap it in with a backup to revert to if any step fails.
    fn compact(&self, path: &Path) -> DbResult<()> {
        let tmp = sibling_path(path, "compact_tmp");
        let backup = sibling_path(path, "compact_bak");

        if tmp.exists() {
            return Err(DbError::CleanupFailed(format!(
                "temporary file '{}' already exists",
                tmp.display()
            )));
        }

        {
            let conn = rusqlite::Connection::open(path)
                .map_err(|e| DbError::CleanupFailed(format!("could not open database: {e}")))?;
            let sql = format!("VACUUM INTO '{}';", escape_sql_string(&tmp));
            if let Err(e) = conn.execute_batch(&sql) {
                let _ = std::fs::remove_file(&tmp);
                return Err(DbError::CleanupFailed(format!("vacuum failed: {e}")));
            }
        }

        if let Err(e) = std::fs::rename(path, &backup) {
            let _ = std::fs::remove_file(&tmp);
            return Err(DbError::CleanupFailed(format!(
                "could not move database aside: {e}"
            )));
        }

        if let Err(e) = std::fs::rename(&tmp, path) {
            // revert: put the original back
            if let Err(restore_err) = std::fs::rename(&backup, path) {
                tracing::error!(error = %restore_err, "could not restore database after failed compaction");
            }
            let _ = std::fs::remove_file(&tmp);
            return Err(DbError::CleanupFailed(format!(
                "could not move compacted file into place: {e}"
            )));
        }

        if let Err(e) = std::fs::remove_file(&backup) {
            tracing::warn!(error = %e, "could not remove compaction backup file");
        }

        tracing::info!(path = %path.display(), "database compacted");

        Ok(())
    }
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

fn escape_sql_string(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "''")
}

pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl EngineConnection for SqliteConnection {
    fn capabilities(&self) -> &'static SqlCapabilities {
        &SQLITE_CAPABILITIES
    }

    fn execute_batch(&mut self, sql: &str) -> DbResult<()> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| DbError::ExecuteFailed(e.to_string()))
    }

    fn query(&mut self, sql: &str, schema: Option<&PropertyList>) -> DbResult<Buffer> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| DbError::PrepareFailed(e.to_string()))?;

        match schema {
            Some(schema) => {
                if stmt.column_count() != schema.len() {
                    return Err(DbError::BufferMismatch(format!(
                        "query returns {} column(s), schema declares {}",
                        stmt.column_count(),
                        schema.len()
                    )));
                }

                let mut buffer = Buffer::new(schema.clone());
                let mut rows = stmt
                    .query([])
                    .map_err(|e| DbError::ExecuteFailed(e.to_string()))?;
                let mut idx = 0usize;
                while let Some(row) = rows
                    .next()
                    .map_err(|e| DbError::ExecuteFailed(e.to_string()))?
                {
                    buffer.resize(idx + 1);
                    for (c, property) in schema.iter().enumerate() {
                        let vref = row
                            .get_ref(c)
                            .map_err(|e| DbError::ExecuteFailed(e.to_string()))?;
                        let value = value_from_sqlite(vref, property.data_type())?;
                        buffer.set(idx, c, value)?;
                    }
                    idx += 1;
                }
                Ok(buffer)
            }
            None => {
                // schema inference: declared column types where present,
                // otherwise the first row decides, with string as fallback
                let names: Vec<String> =
                    stmt.column_names().iter().map(|s| s.to_string()).collect();
                let mut types: Vec<Option<PropertyDataType>> = stmt
                    .columns()
                    .iter()
                    .map(|col| col.decl_type().and_then(property_type_from_db_type))
                    .collect();

                let mut raw_rows: Vec<Vec<rusqlite::types::Value>> = Vec::new();
                let mut rows = stmt
                    .query([])
                    .map_err(|e| DbError::ExecuteFailed(e.to_string()))?;
                while let Some(row) = rows
                    .next()
                    .map_err(|e| DbError::ExecuteFailed(e.to_string()))?
                {
                    let mut values = Vec::with_capacity(names.len());
                    for (c, slot) in types.iter_mut().enumerate() {
                        let vref = row
                            .get_ref(c)
                            .map_err(|e| DbError::ExecuteFailed(e.to_string()))?;
                        if slot.is_none() {
                            *slot = infer_type(vref);
                        }
                        values.push(rusqlite::types::Value::from(vref));
                    }
                    raw_rows.push(values);
                }

                let mut schema = PropertyList::new();
                for (name, dtype) in names.iter().zip(&types) {
                    schema.add(name.clone(), dtype.unwrap_or(PropertyDataType::String));
                }

                let mut buffer = Buffer::new(schema.clone());
                buffer.resize(raw_rows.len());
                for (r, values) in raw_rows.into_iter().enumerate() {
                    for (c, value) in values.into_iter().enumerate() {
                        let vref = ValueRef::from(&value);
                        let converted = value_from_sqlite(vref, schema.at(c).data_type())?;
                        buffer.set(r, c, converted)?;
                    }
                }
                Ok(buffer)
            }
        }
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
        let conn: &'c rusqlite::Connection = &self.conn;
        let stmt = conn
            .prepare(sql)
            .map_err(|e| DbError::PrepareFailed(e.to_string()))?;
        Ok(Box::new(SqliteStatement {
            conn,
            stmt,
            binds: Vec::new(),
        }))
    }

    fn table_names(&mut self) -> DbResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
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
                let not_null: i64 = row.get("notnull")?;
                let pk: i64 = row.get("pk")?;
                Ok(ColumnInfo::new(name, db_type, pk != 0, not_null == 0))
            })
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| DbError::ExecuteFailed(e.to_string()))?;

        for column in columns {
            info.add_column(column);
        }
        Ok(info)
    }

    fn materializes_reads(&self) -> bool {
        false
    }

    fn export_file(&mut self, path: &Path) -> DbResult<()> {
        let sql = format!("VACUUM INTO '{}';", escape_sql_string(path));
        self.conn
            .execute_batch(&sql)
            .map_err(|e| DbError::ExecuteFailed(format!("export failed: {e}")))
    }
}

struct SqliteStatement<'c> {
    conn: &'c rusqlite::Connection,
    stmt: rusqlite::Statement<'c>,
    binds: Vec<rusqlite::types::Value>,
}

impl EngineStatement for SqliteStatement<'_> {
    fn bind(&mut self, index: usize, value: BindValue<'_>) -> DbResult<()> {
        if self.binds.len() <= index {
            self.binds.resize(index + 1, rusqlite::types::Value::Null);
        }
        self.binds[index] = sqlite_bind_value(value)?;
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
        if self.stmt.column_count() != schema.len() {
            return Err(DbError::BufferMismatch(format!(
                "statement returns {} column(s), schema declares {}",
                self.stmt.column_count(),
                schema.len()
            )));
        }

        let mut buffer = Buffer::new(schema.clone());
        let mut rows = self
            .stmt
            .query(params_from_iter(self.binds.iter().cloned()))
            .map_err(|e| DbError::ExecuteFailed(e.to_string()))?;
        let mut idx = 0usize;
        while let Some(row) = rows
            .next()
            .map_err(|e| DbError::ExecuteFailed(e.to_string()))?
        {
            buffer.resize(idx + 1);
            for (c, property) in schema.iter().enumerate() {
                let vref = row
                    .get_ref(c)
                    .map_err(|e| DbError::ExecuteFailed(e.to_string()))?;
                buffer.set(idx, c, value_from_sqlite(vref, property.data_type())?)?;
            }
            idx += 1;
        }
        Ok(buffer)
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

/// SQLite stores everything as integers, reals and text; unsigned 64-bit
/// values keep their bit pattern, timestamps their epoch microseconds.
fn sqlite_bind_value(value: BindValue<'_>) -> DbResult<rusqlite::types::Value> {
    use rusqlite::types::Value as Sq;
    let v = match value {
        BindValue::Null => Sq::Null,
        BindValue::Bool(v) => Sq::Integer(v as i64),
        BindValue::Char(v) => Sq::Integer(v as i64),
        BindValue::UChar(v) => Sq::Integer(v as i64),
        BindValue::Int(v) => Sq::Integer(v as i64),
        BindValue::UInt(v) => Sq::Integer(v as i64),
        BindValue::Long(v) => Sq::Integer(v),
        BindValue::ULong(v) => Sq::Integer(v as i64),
        BindValue::Float(v) => Sq::Real(v as f64),
        BindValue::Double(v) => Sq::Real(v),
        BindValue::String(v) => Sq::Text(v.to_string()),
        BindValue::Json(v) => Sq::Text(
            serde_json::to_string(v).map_err(|e| DbError::BindFailed(e.to_string()))?,
        ),
        BindValue::Timestamp(v) => Sq::Integer(v.timestamp_micros()),
    };
    Ok(v)
}

fn infer_type(vref: ValueRef<'_>) -> Option<PropertyDataType> {
    match vref {
        ValueRef::Null => None,
        ValueRef::Integer(_) => Some(PropertyDataType::Long),
        ValueRef::Real(_) => Some(PropertyDataType::Double),
        ValueRef::Text(_) | ValueRef::Blob(_) => Some(PropertyDataType::String),
    }
}

fn value_from_sqlite(vref: ValueRef<'_>, data_type: PropertyDataType) -> DbResult<Option<Value>> {
    let value = match (vref, data_type) {
        (ValueRef::Null, _) => return Ok(None),
        (ValueRef::Integer(v), PropertyDataType::Bool) => Value::Bool(v != 0),
        (ValueRef::Integer(v), PropertyDataType::Char) => Value::Char(v as i8),
        (ValueRef::Integer(v), PropertyDataType::UChar) => Value::UChar(v as u8),
        (ValueRef::Integer(v), PropertyDataType::Int) => Value::Int(v as i32),
        (ValueRef::Integer(v), PropertyDataType::UInt) => Value::UInt(v as u32),
        (ValueRef::Integer(v), PropertyDataType::Long) => Value::Long(v),
        (ValueRef::Integer(v), PropertyDataType::ULong) => Value::ULong(v as u64),
        (ValueRef::Integer(v), PropertyDataType::Float) => Value::Float(v as f32),
        (ValueRef::Integer(v), PropertyDataType::Double) => Value::Double(v as f64),
        (ValueRef::Real(v), PropertyDataType::Float) => Value::Float(v as f32),
        (ValueRef::Real(v), PropertyDataType::Double) => Value::Double(v),
        (ValueRef::Integer(v), PropertyDataType::Timestamp) => Value::Timestamp(
            chrono::DateTime::from_timestamp_micros(v).ok_or_else(|| {
                DbError::ExecuteFailed(format!("timestamp value {v} out of range"))
            })?,
        ),
        (ValueRef::Text(t), PropertyDataType::String) => {
            Value::String(String::from_utf8_lossy(t).into_owned())
        }
        (ValueRef::Text(t), PropertyDataType::Json) => Value::Json(
            serde_json::from_slice(t)
                .map_err(|e| DbError::ExecuteFailed(format!("invalid json in result: {e}")))?,
        ),
        (ValueRef::Blob(b), PropertyDataType::String) => {
            Value::String(String::from_utf8_lossy(b).into_owned())
        }
        (vref, data_type) => {
            return Err(DbError::ExecuteFailed(format!(
                "unexpected {:?} value for {} column",
                vref.data_type(),
                data_type
            )))
        }
    };
    Ok(Some(value))
}
