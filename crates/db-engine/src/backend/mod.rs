//! Backend abstraction: one trait set implemented per embeddable engine.

pub mod duckdb;
pub mod sqlite;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::buffer::{BindValue, Buffer, PropertyList};
use crate::core::table_info::TableInfo;
use crate::error::DbResult;

/// Bind placeholder syntax understood by a backend's SQL parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaceholderStyle {
    /// `?1`, `?2`, ...
    QuestionMark,
    /// `$1`, `$2`, ...
    Positional,
}

/// Static description of a backend's SQL dialect quirks, consumed by SQL
/// text generation and by execution-strategy decisions. One instance per
/// backend kind, never mutated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SqlCapabilities {
    pub precise_types: bool,
    pub placeholder: PlaceholderStyle,
    pub conflict_resolution: bool,
    pub prefer_indexing: bool,
    pub multi_threaded: bool,
    pub in_memory: bool,
}

pub static SQLITE_CAPABILITIES: SqlCapabilities = SqlCapabilities {
    precise_types: false,
    placeholder: PlaceholderStyle::QuestionMark,
    conflict_resolution: true,
    prefer_indexing: true,
    multi_threaded: false,
    in_memory: true,
};

pub static DUCKDB_CAPABILITIES: SqlCapabilities = SqlCapabilities {
    precise_types: true,
    placeholder: PlaceholderStyle::Positional,
    conflict_resolution: false,
    prefer_indexing: false,
    multi_threaded: true,
    in_memory: true,
};

/// Backend configuration directive applied once after a successful open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pragma {
    pub name: String,
    pub value: String,
}

impl Pragma {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn statement(&self) -> String {
        format!("PRAGMA {} = {};", self.name, self.value)
    }
}

/// Supported engine kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    Sqlite,
    DuckDb,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::DuckDb => "duckdb",
        }
    }
}

/// What the engine handle is opened against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenTarget {
    File(PathBuf),
    InMemory,
}

impl OpenTarget {
    pub fn is_in_memory(&self) -> bool {
        matches!(self, OpenTarget::InMemory)
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            OpenTarget::File(p) => Some(p),
            OpenTarget::InMemory => None,
        }
    }
}

/// Inclusive row range of a buffer operation, resolved from optional caller
/// bounds.
#[derive(Debug, Clone, Copy)]
pub struct RowRange {
    pub first: usize,
    pub last: usize,
}

impl RowRange {
    /// Resolves optional inclusive bounds against the buffer length,
    /// defaulting to the whole buffer.
    pub fn resolve(
        from: Option<usize>,
        to: Option<usize>,
        buffer_len: usize,
    ) -> DbResult<RowRange> {
        if buffer_len == 0 {
            return Err(crate::error::DbError::ExecuteFailed(
                "input buffer is empty".into(),
            ));
        }
        let first = from.unwrap_or(0);
        let last = to.unwrap_or(buffer_len - 1);
        if first > last || last >= buffer_len {
            return Err(crate::error::DbError::ExecuteFailed(format!(
                "invalid row range {first}..={last} for buffer of {buffer_len} row(s)"
            )));
        }
        Ok(RowRange { first, last })
    }

    pub fn len(&self) -> usize {
        self.last - self.first + 1
    }
}

/// Instance-level engine handle: owns the database file lifetime and hands
/// out connections.
pub trait DatabaseEngine: Send {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> &'static SqlCapabilities;

    /// Pragmas to apply, in order, right after a successful open.
    fn pragmas(&self) -> Vec<Pragma>;

    fn open(&mut self, target: &OpenTarget) -> DbResult<()>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Creates a new physical connection to the opened database.
    fn connect(&self) -> DbResult<Box<dyn EngineConnection>>;

    /// Compacts a closed database file in place. The original file must be
    /// preserved or restored on any failure.
    fn compact(&self, path: &Path) -> DbResult<()>;
}

/// Per-connection primitives a backend must provide. Everything above this
/// trait (transaction scoping, buffer loops, cursor arithmetic, metadata
/// caching) is backend-agnostic.
pub trait EngineConnection: Send {
    fn capabilities(&self) -> &'static SqlCapabilities;

    /// Runs one or more statements without fetching data.
    fn execute_batch(&mut self, sql: &str) -> DbResult<()>;

    /// Runs a query and materializes the result. With `schema` the result
    /// must match the declared column count; without, the schema is inferred
    /// from the statement and its first row.
    fn query(&mut self, sql: &str, schema: Option<&PropertyList>) -> DbResult<Buffer>;

    /// Fetches one bounded window of a SELECT, preserving its ordering.
    fn query_range(
        &mut self,
        sql: &str,
        schema: &PropertyList,
        offset: usize,
        limit: usize,
    ) -> DbResult<Buffer>;

    fn prepare<'c>(&'c mut self, sql: &str) -> DbResult<Box<dyn EngineStatement + 'c>>;

    fn table_names(&mut self) -> DbResult<Vec<String>>;

    fn table_columns(&mut self, table: &str) -> DbResult<TableInfo>;

    /// True when the backend bulk-appends buffers columnar-wise instead of
    /// executing a prepared statement per row.
    fn supports_bulk_append(&self) -> bool {
        false
    }

    /// Columnar bulk-append fast path. Only called when
    /// `supports_bulk_append` is true. `table_properties` aligns buffer
    /// columns to the table's column order; missing columns append null.
    fn append_buffer(
        &mut self,
        _table: &str,
        _buffer: &Buffer,
        _range: RowRange,
        _table_properties: Option<&PropertyList>,
    ) -> DbResult<()> {
        Err(crate::error::DbError::ExecuteFailed(
            "bulk append not supported by this backend".into(),
        ))
    }

    /// True when streaming reads materialize the whole result up front and
    /// index into it; false when chunks are fetched by re-querying a window.
    fn materializes_reads(&self) -> bool;

    /// Full-database copy to `path`; must not corrupt the source on failure.
    fn export_file(&mut self, path: &Path) -> DbResult<()>;
}

/// One compiled statement of a backend connection.
pub trait EngineStatement {
    /// Binds a value to the 0-based placeholder slot.
    fn bind(&mut self, index: usize, value: BindValue<'_>) -> DbResult<()>;

    fn clear_bindings(&mut self);

    /// Executes one pass over the currently bound values, without fetching.
    fn execute(&mut self) -> DbResult<()>;

    /// Executes and fills a fresh buffer matching the declared schema.
    fn query_into(&mut self, schema: &PropertyList) -> DbResult<Buffer>;

    fn begin_transaction(&mut self) -> DbResult<()>;

    fn commit(&mut self) -> DbResult<()>;

    fn rollback(&mut self) -> DbResult<()>;
}

/// Creates the engine for a backend kind.
pub fn create_engine(kind: BackendKind) -> Box<dyn DatabaseEngine> {
    match kind {
        BackendKind::Sqlite => Box::new(sqlite::SqliteEngine::new()),
        BackendKind::DuckDb => Box::new(duckdb::DuckDbEngine::new()),
    }
}
