//! Backend-agnostic embedded-database layer.
//!
//! An [`Instance`] owns a database file (or in-memory database) behind one
//! of two engines — row-oriented SQLite or columnar DuckDB — and hands out
//! [`Connection`]s that execute SQL, bulk-insert/update typed columnar
//! [`Buffer`]s and stream large results in bounded-memory chunks.

pub mod backend;
pub mod core;
pub mod error;
pub mod logging;

pub use crate::backend::{
    BackendKind, Pragma, PlaceholderStyle, RowRange, SqlCapabilities, DUCKDB_CAPABILITIES,
    SQLITE_CAPABILITIES,
};
pub use crate::core::buffer::{BindValue, Buffer, Property, PropertyDataType, PropertyList, Value};
pub use crate::core::command::{Command, CommandList};
pub use crate::core::connection::Connection;
pub use crate::core::cursor::{ReadChunk, ResultCursor};
pub use crate::core::instance::{ConcurrentConnection, CustomConnection, Instance, InstanceConfig};
pub use crate::core::metrics::PerformanceMetrics;
pub use crate::core::prepare::{ExecOptions, PreparedStatement};
pub use crate::core::table_info::{ColumnDef, ColumnInfo, IndexDef, TableInfo};
pub use crate::core::temp_table::{with_temporary_table, TemporaryTable};
pub use crate::error::{DbError, DbResult};
