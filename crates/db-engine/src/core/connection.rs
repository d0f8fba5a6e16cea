//! One logical database connection: ad-hoc SQL, command execution, buffer
//! insert/update, streaming reads and table metadata.

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use crate::backend::{EngineConnection, RowRange, SqlCapabilities};
use crate::core::buffer::{Buffer, PropertyDataType, PropertyList, Value};
use crate::core::command::{Command, CommandList};
use crate::core::cursor::{ReadChunk, ResultCursor};
use crate::core::metrics::PerformanceMetrics;
use crate::core::prepare::PreparedStatement;
use crate::core::sqlgen;
use crate::core::table_info::{ColumnDef, IndexDef, TableInfo};
use crate::core::temp_table::with_temporary_table;
use crate::error::{DbError, DbResult};

/// A connection borrowed from the owning instance's engine handle.
///
/// A connection owns at most one active streaming read at a time and caches
/// the schema of the live database. Calls perform no internal locking; a
/// caller sharing a connection across threads owns exclusivity for the
/// duration of a call sequence.
pub struct Connection {
    backend: Option<Box<dyn EngineConnection>>,
    table_info: HashMap<String, TableInfo>,
    cursor: Option<ResultCursor>,
    metrics: Option<PerformanceMetrics>,
}

impl Connection {
    pub(crate) fn new(backend: Box<dyn EngineConnection>) -> Self {
        Self {
            backend: Some(backend),
            table_info: HashMap::new(),
            cursor: None,
            metrics: None,
        }
    }

    /// Releases the physical connection. Every subsequent operation reports
    /// `NotOpen`.
    pub(crate) fn disconnect(&mut self) {
        if self.backend.is_some() {
            tracing::debug!("disconnecting");
        }
        self.cursor = None;
        self.table_info.clear();
        self.backend = None;
    }

    pub fn is_connected(&self) -> bool {
        self.backend.is_some()
    }

    fn backend_mut(&mut self) -> DbResult<&mut (dyn EngineConnection + 'static)> {
        self.backend
            .as_mut()
            .map(|b| b.as_mut())
            .ok_or(DbError::NotOpen)
    }

    pub fn capabilities(&self) -> DbResult<&'static SqlCapabilities> {
        self.backend
            .as_ref()
            .map(|b| b.capabilities())
            .ok_or(DbError::NotOpen)
    }

    /// Runs one or more SQL statements without fetching data.
    pub fn execute(&mut self, sql: &str) -> DbResult<()> {
        tracing::debug!(sql, "execute");
        self.backend_mut()?.execute_batch(sql)
    }

    /// Runs a query and materializes its result; the schema is taken from
    /// the statement itself.
    pub fn execute_fetch(&mut self, sql: &str) -> DbResult<Buffer> {
        tracing::debug!(sql, "execute with fetch");
        self.backend_mut()?.query(sql, None)
    }

    /// Executes one command, materializing the result when the command
    /// declares a result schema.
    pub fn execute_command(&mut self, command: &Command) -> DbResult<Option<Buffer>> {
        let backend = self.backend_mut()?;
        if command.expects_result() {
            let buffer = backend.query(command.sql(), command.result_schema())?;
            Ok(Some(buffer))
        } else {
            backend.execute_batch(command.sql())?;
            Ok(None)
        }
    }

    /// Executes all commands of the list, accumulating produced buffers into
    /// one. Stops at the first error without running later commands.
    pub fn execute_command_list(&mut self, list: &CommandList) -> DbResult<Option<Buffer>> {
        let mut accumulated = list.result_schema().map(|s| Buffer::new(s.clone()));

        for command in list.commands() {
            match self.execute_command(&command) {
                Ok(Some(buffer)) => {
                    if let Some(acc) = accumulated.as_mut() {
                        acc.append(buffer)?;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, sql = command.sql(), "command failed, aborting list");
                    return Err(e);
                }
            }
        }

        Ok(accumulated)
    }

    /// Creates a table. If a table of that name already exists the call
    /// succeeds without re-validating its schema; callers own schema
    /// versioning.
    pub fn create_table(
        &mut self,
        table: &str,
        columns: &[ColumnDef],
        indices: &[IndexDef],
    ) -> DbResult<()> {
        if self.table_info.contains_key(table) {
            tracing::debug!(table, "table already exists");
            return Ok(());
        }

        {
            let backend = self.backend_mut()?;
            let capabilities = backend.capabilities();
            let sql = sqlgen::create_table_statement(capabilities, table, columns);
            tracing::info!(table, "creating table");
            backend.execute_batch(&sql)?;

            if capabilities.prefer_indexing {
                for index in indices {
                    backend.execute_batch(&sqlgen::create_index_statement(table, index))?;
                }
            }
        }

        self.update_table_info()
    }

    pub fn drop_table(&mut self, table: &str) -> DbResult<()> {
        tracing::info!(table, "dropping table");
        self.backend_mut()?
            .execute_batch(&sqlgen::drop_table_statement(table))?;
        self.update_table_info()
    }

    /// Deletes all rows of the table, keeping its schema.
    pub fn clear_table(&mut self, table: &str) -> DbResult<()> {
        self.backend_mut()?
            .execute_batch(&sqlgen::clear_table_statement(table))
    }

    pub fn row_count(&mut self, table: &str) -> DbResult<u64> {
        if !sqlgen::is_safe_identifier(table) {
            return Err(DbError::ExecuteFailed(format!(
                "invalid table identifier: {table}"
            )));
        }
        let mut schema = PropertyList::new();
        schema.add("row_count", PropertyDataType::Long);
        let sql = format!(
            "SELECT COUNT(*) AS row_count FROM {}",
            sqlgen::quote_identifier(table)
        );
        let buffer = self.backend_mut()?.query(&sql, Some(&schema))?;
        match buffer.value(0, 0) {
            Some(Value::Long(n)) if n >= 0 => Ok(n as u64),
            other => Err(DbError::ExecuteFailed(format!(
                "row count query returned unexpected value: {other:?}"
            ))),
        }
    }

    /// Inserts the given rows of the buffer into the table, in ascending
    /// index order. Bounds are inclusive and default to the whole buffer.
    /// Either every row of the range is committed or the operation fails
    /// with the first bind/commit error.
    pub fn insert_buffer(
        &mut self,
        table: &str,
        buffer: &Buffer,
        idx_from: Option<usize>,
        idx_to: Option<usize>,
    ) -> DbResult<()> {
        let range = RowRange::resolve(idx_from, idx_to, buffer.len())?;
        let table_properties = self.table_info.get(table).and_then(|t| t.properties());
        let started = Instant::now();

        let result = {
            let backend = self.backend_mut()?;
            if backend.supports_bulk_append() {
                backend.append_buffer(table, buffer, range, table_properties.as_ref())
            } else {
                let sql = sqlgen::insert_statement(
                    backend.capabilities(),
                    table,
                    buffer.properties(),
                );
                let mut stmt = PreparedStatement::with_transaction(backend.prepare(&sql)?)?;
                match stmt.execute_buffer(buffer, range) {
                    Ok(()) => stmt.commit(),
                    Err(e) => {
                        if let Err(rollback_err) = stmt.rollback() {
                            tracing::error!(error = %rollback_err, "rollback failed");
                        }
                        Err(e)
                    }
                }
            }
        };

        match &result {
            Ok(()) => {
                if let Some(metrics) = self.metrics.as_mut() {
                    metrics.record_insert(started.elapsed(), range.len() as u64);
                }
            }
            Err(e) => tracing::error!(table, error = %e, "inserting buffer failed"),
        }

        result
    }

    /// Updates the table from the given rows of the buffer, matching on the
    /// key column. Semantics as `insert_buffer`.
    pub fn update_buffer(
        &mut self,
        table: &str,
        buffer: &Buffer,
        key_column: &str,
        idx_from: Option<usize>,
        idx_to: Option<usize>,
    ) -> DbResult<()> {
        let range = RowRange::resolve(idx_from, idx_to, buffer.len())?;

        if !buffer.has_column(key_column) {
            return Err(DbError::ExecuteFailed(format!(
                "key column '{key_column}' not found in buffer"
            )));
        }

        let update_columns: Vec<String> = buffer
            .properties()
            .iter()
            .filter(|p| p.name() != key_column)
            .map(|p| p.name().to_string())
            .collect();
        if update_columns.is_empty() {
            return Err(DbError::ExecuteFailed(
                "buffer holds no columns to update besides the key".into(),
            ));
        }

        let started = Instant::now();
        let bulk = self
            .backend
            .as_ref()
            .ok_or(DbError::NotOpen)?
            .supports_bulk_append();

        let result = if bulk {
            // stage the rows in a temporary table, then assign them to the
            // target in one statement
            let columns: Vec<ColumnDef> = buffer
                .properties()
                .iter()
                .map(|p| ColumnDef::new(p.name(), p.data_type()))
                .collect();

            with_temporary_table(self, &columns, &[], |conn, staging| {
                conn.backend_mut()?
                    .append_buffer(staging, buffer, range, None)?;
                conn.execute(&sqlgen::update_from_table_statement(
                    staging,
                    table,
                    &update_columns,
                    key_column,
                ))
            })
        } else {
            let backend = self.backend_mut()?;
            let sql = sqlgen::update_statement(
                backend.capabilities(),
                table,
                buffer.properties(),
                key_column,
            );
            let mut stmt = PreparedStatement::with_transaction(backend.prepare(&sql)?)?;
            match stmt.execute_buffer(buffer, range) {
                Ok(()) => stmt.commit(),
                Err(e) => {
                    if let Err(rollback_err) = stmt.rollback() {
                        tracing::error!(error = %rollback_err, "rollback failed");
                    }
                    Err(e)
                }
            }
        };

        match &result {
            Ok(()) => {
                if let Some(metrics) = self.metrics.as_mut() {
                    metrics.record_update(started.elapsed(), range.len() as u64);
                }
            }
            Err(e) => {
                tracing::error!(table, key_column, error = %e, "updating buffer failed")
            }
        }

        result
    }

    /// Compiles a statement for manual binds and execution.
    pub fn prepare(&mut self, sql: &str) -> DbResult<PreparedStatement<'_>> {
        let backend = self.backend.as_mut().ok_or(DbError::NotOpen)?;
        Ok(PreparedStatement::new(backend.prepare(sql)?))
    }

    /// As `prepare`, additionally opening a statement-scoped transaction.
    pub fn prepare_transaction(&mut self, sql: &str) -> DbResult<PreparedStatement<'_>> {
        let backend = self.backend.as_mut().ok_or(DbError::NotOpen)?;
        PreparedStatement::with_transaction(backend.prepare(sql)?)
    }

    /// Opens a streaming read over the given SELECT command. Exactly one
    /// read may be active per connection; opening a second one is a
    /// programming error.
    pub fn start_read(&mut self, command: &Command, offset: usize, chunk_size: usize) -> DbResult<()> {
        assert!(
            self.cursor.is_none(),
            "a streaming read is already active on this connection"
        );

        let backend = self.backend.as_mut().ok_or(DbError::NotOpen)?;
        let cursor = ResultCursor::open(backend.as_mut(), command, offset, chunk_size)?;
        self.cursor = Some(cursor);
        Ok(())
    }

    /// Fetches the next chunk of the active streaming read.
    pub fn read_chunk(&mut self) -> DbResult<ReadChunk> {
        let started = Instant::now();

        let Self {
            backend,
            cursor,
            metrics,
            ..
        } = self;

        let cursor = cursor.as_mut().ok_or(DbError::NoActiveReader)?;
        if cursor.chunk_failed() {
            return Err(DbError::ReaderNotReady);
        }
        let backend = backend.as_mut().ok_or(DbError::NotOpen)?;

        let chunk = cursor.read_chunk(backend.as_mut())?;

        if let Some(metrics) = metrics.as_mut() {
            metrics.record_read(started.elapsed(), chunk.buffer.len() as u64);
        }

        Ok(chunk)
    }

    /// Closes the active streaming read, releasing its resources. Safe to
    /// call without one.
    pub fn stop_read(&mut self) {
        self.cursor = None;
    }

    pub fn has_active_read(&self) -> bool {
        self.cursor.is_some()
    }

    /// Re-queries the live table list and per-table column metadata. The
    /// cached map is replaced atomically; callers never observe a
    /// half-updated map.
    pub fn update_table_info(&mut self) -> DbResult<()> {
        let backend = self.backend_mut()?;

        let names = backend.table_names()?;
        let mut info = HashMap::with_capacity(names.len());
        for name in names {
            let table = backend.table_columns(&name)?;
            info.insert(name, table);
        }

        tracing::debug!(tables = info.len(), "table info updated");
        self.table_info = info;
        Ok(())
    }

    /// The cached schema of the live database, keyed by table name.
    pub fn table_info(&self) -> &HashMap<String, TableInfo> {
        &self.table_info
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.table_info.contains_key(table)
    }

    /// Full-database copy; delegated to the backend.
    pub fn export_file(&mut self, path: &Path) -> DbResult<()> {
        tracing::info!(path = %path.display(), "exporting database");
        self.backend_mut()?.export_file(path)
    }

    /// Starts collecting performance counters; any previous counters are
    /// discarded.
    pub fn start_performance_metrics(&mut self) {
        self.metrics = Some(PerformanceMetrics::default());
    }

    /// Returns the collected counters and stops collecting.
    pub fn stop_performance_metrics(&mut self) -> Option<PerformanceMetrics> {
        self.metrics.take()
    }

    pub fn performance_metrics(&self) -> Option<&PerformanceMetrics> {
        self.metrics.as_ref()
    }
}
