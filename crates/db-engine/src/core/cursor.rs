//! Streaming-read cursor: one open SELECT served as bounded-size chunks.

use crate::backend::EngineConnection;
use crate::core::buffer::{Buffer, PropertyList, Value};
use crate::core::command::Command;
use crate::core::sqlgen;
use crate::error::{DbError, DbResult};

/// One chunk handed back to the caller.
#[derive(Debug)]
pub struct ReadChunk {
    pub buffer: Buffer,
    pub has_more: bool,
}

enum CursorSource {
    /// The full result was materialized up front; chunks slice into it.
    Materialized(Buffer),
    /// Chunks are fetched by re-querying a LIMIT/OFFSET window.
    Requery,
}

/// Owns one open streaming query. Total row/column counts are recorded at
/// creation; `read_chunk` advances through the result in `chunk_size` steps.
pub struct ResultCursor {
    command: Command,
    chunk_size: usize,
    offset: usize,
    total_rows: usize,
    num_columns: usize,
    source: CursorSource,
    chunk_failed: bool,
}

impl ResultCursor {
    /// Validates and executes the SELECT. Backends that materialize reads
    /// run the full query here; others just count its rows.
    pub(crate) fn open(
        backend: &mut dyn EngineConnection,
        command: &Command,
        offset: usize,
        chunk_size: usize,
    ) -> DbResult<ResultCursor> {
        assert!(chunk_size > 0, "chunk size must be positive");

        let schema = command
            .result_schema()
            .ok_or_else(|| {
                DbError::ExecuteFailed("read command declares no result schema".into())
            })?
            .clone();

        if !is_select(command.sql()) {
            return Err(DbError::ExecuteFailed(format!(
                "read command is not a SELECT: '{}'",
                command.sql()
            )));
        }

        let (source, total_rows) = if backend.materializes_reads() {
            let buffer = backend.query(command.sql(), Some(&schema))?;
            let total = buffer.len();
            (CursorSource::Materialized(buffer), total)
        } else {
            let total = count_rows(backend, command.sql())?;
            (CursorSource::Requery, total)
        };

        tracing::debug!(
            rows = total_rows,
            chunk_size,
            "opened streaming read of '{}'",
            command.sql()
        );

        Ok(ResultCursor {
            command: command.clone(),
            chunk_size,
            offset,
            total_rows,
            num_columns: schema.len(),
            source,
            chunk_failed: false,
        })
    }

    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn has_more(&self) -> bool {
        self.offset < self.total_rows
    }

    pub(crate) fn chunk_failed(&self) -> bool {
        self.chunk_failed
    }

    /// Returns up to `chunk_size` consecutive rows starting at the current
    /// offset and advances it.
    pub(crate) fn read_chunk(&mut self, backend: &mut dyn EngineConnection) -> DbResult<ReadChunk> {
        let end = (self.offset + self.chunk_size).min(self.total_rows);

        let buffer = match &self.source {
            CursorSource::Materialized(full) => full.copy_range(self.offset, end),
            CursorSource::Requery => {
                let schema = self
                    .command
                    .result_schema()
                    .expect("cursor command always has a schema");
                if self.offset >= end {
                    Buffer::new(schema.clone())
                } else {
                    match backend.query_range(
                        self.command.sql(),
                        schema,
                        self.offset,
                        end - self.offset,
                    ) {
                        Ok(buffer) => buffer,
                        Err(e) => {
                            self.chunk_failed = true;
                            return Err(e);
                        }
                    }
                }
            }
        };

        self.offset = end;

        Ok(ReadChunk {
            has_more: self.has_more(),
            buffer,
        })
    }
}

fn is_select(sql: &str) -> bool {
    sql.trim_start()
        .get(..6)
        .map_or(false, |prefix| prefix.eq_ignore_ascii_case("select"))
}

fn count_rows(backend: &mut dyn EngineConnection, sql: &str) -> DbResult<usize> {
    let mut schema = PropertyList::new();
    schema.add("row_count", crate::core::buffer::PropertyDataType::Long);

    let buffer = backend.query(&sqlgen::count_statement(sql), Some(&schema))?;
    match buffer.value(0, 0) {
        Some(Value::Long(n)) if n >= 0 => Ok(n as usize),
        other => Err(DbError::ExecuteFailed(format!(
            "row count query returned unexpected value: {other:?}"
        ))),
    }
}
