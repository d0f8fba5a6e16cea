//! Prepared statements: typed positional binds, buffer-driven bulk
//! execution and statement-scoped transactions.

use chrono::{DateTime, Utc};

use crate::backend::{EngineStatement, RowRange};
use crate::core::buffer::{BindValue, Buffer, PropertyList};
use crate::error::{DbError, DbResult};

/// Execution options for a prepared statement: the declared schema of the
/// result, if data is expected back.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    buffer_properties: Option<PropertyList>,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(schema: PropertyList) -> Self {
        Self {
            buffer_properties: Some(schema),
        }
    }

    pub fn data_expected(&self) -> bool {
        self.buffer_properties.is_some()
    }

    pub fn buffer_properties(&self) -> Option<&PropertyList> {
        self.buffer_properties.as_ref()
    }
}

/// One compiled statement. Construction compiles it, dropping finalizes it;
/// an active transaction is committed best-effort on drop.
///
/// Bind indices are 0-based and correspond to the statement's placeholder
/// positions. All binds set the pending-binds flag; execution with pending
/// binds drives a single pass over them and clears them.
pub struct PreparedStatement<'c> {
    stmt: Box<dyn EngineStatement + 'c>,
    active_binds: bool,
    active_transaction: bool,
}

impl<'c> PreparedStatement<'c> {
    pub(crate) fn new(stmt: Box<dyn EngineStatement + 'c>) -> Self {
        Self {
            stmt,
            active_binds: false,
            active_transaction: false,
        }
    }

    pub(crate) fn with_transaction(stmt: Box<dyn EngineStatement + 'c>) -> DbResult<Self> {
        let mut prepared = Self::new(stmt);
        prepared.begin_transaction()?;
        Ok(prepared)
    }

    pub fn has_active_transaction(&self) -> bool {
        self.active_transaction
    }

    fn bind(&mut self, index: usize, value: BindValue<'_>) -> DbResult<()> {
        self.active_binds = true;
        self.stmt.bind(index, value)
    }

    pub fn bind_null(&mut self, index: usize) -> DbResult<()> {
        self.bind(index, BindValue::Null)
    }

    pub fn bind_bool(&mut self, index: usize, value: bool) -> DbResult<()> {
        self.bind(index, BindValue::Bool(value))
    }

    pub fn bind_char(&mut self, index: usize, value: i8) -> DbResult<()> {
        self.bind(index, BindValue::Char(value))
    }

    pub fn bind_uchar(&mut self, index: usize, value: u8) -> DbResult<()> {
        self.bind(index, BindValue::UChar(value))
    }

    pub fn bind_int(&mut self, index: usize, value: i32) -> DbResult<()> {
        self.bind(index, BindValue::Int(value))
    }

    pub fn bind_uint(&mut self, index: usize, value: u32) -> DbResult<()> {
        self.bind(index, BindValue::UInt(value))
    }

    pub fn bind_long(&mut self, index: usize, value: i64) -> DbResult<()> {
        self.bind(index, BindValue::Long(value))
    }

    pub fn bind_ulong(&mut self, index: usize, value: u64) -> DbResult<()> {
        self.bind(index, BindValue::ULong(value))
    }

    pub fn bind_float(&mut self, index: usize, value: f32) -> DbResult<()> {
        self.bind(index, BindValue::Float(value))
    }

    pub fn bind_double(&mut self, index: usize, value: f64) -> DbResult<()> {
        self.bind(index, BindValue::Double(value))
    }

    pub fn bind_string(&mut self, index: usize, value: &str) -> DbResult<()> {
        self.bind(index, BindValue::String(value))
    }

    pub fn bind_json(&mut self, index: usize, value: &serde_json::Value) -> DbResult<()> {
        self.bind(index, BindValue::Json(value))
    }

    pub fn bind_timestamp(&mut self, index: usize, value: DateTime<Utc>) -> DbResult<()> {
        self.bind(index, BindValue::Timestamp(value))
    }

    /// Executes the statement. Pending binds drive one pass and are cleared
    /// afterwards; without pending binds, a result buffer matching the
    /// declared schema is fetched when the options expect data.
    pub fn execute(&mut self, options: Option<&ExecOptions>) -> DbResult<Option<Buffer>> {
        if self.active_binds {
            let result = self.stmt.execute();
            self.stmt.clear_bindings();
            self.active_binds = false;
            result?;
            return Ok(None);
        }

        if let Some(schema) = options.and_then(|o| o.buffer_properties()) {
            let buffer = self.stmt.query_into(schema)?;
            return Ok(Some(buffer));
        }

        self.stmt.execute()?;
        Ok(None)
    }

    /// Executes the statement once per row of the inclusive range, binding
    /// every column by its schema position (null cells bind null). Stops at
    /// the first failed bind or execution, reporting the failing row.
    pub fn execute_buffer(&mut self, buffer: &Buffer, range: RowRange) -> DbResult<()> {
        let num_columns = buffer.num_columns();
        assert!(range.last < buffer.len(), "row range exceeds buffer");

        for r in range.first..=range.last {
            for c in 0..num_columns {
                self.active_binds = true;
                if let Err(e) = self.stmt.bind(c, buffer.bind_value(r, c)) {
                    self.clear_binds();
                    return Err(DbError::BindFailed(format!(
                        "binding column {c} of row {r} failed: {e}"
                    )));
                }
            }

            let result = self.stmt.execute();
            self.clear_binds();
            if let Err(e) = result {
                return Err(DbError::ExecuteFailed(format!("row {r} failed: {e}")));
            }
        }

        Ok(())
    }

    fn clear_binds(&mut self) {
        self.stmt.clear_bindings();
        self.active_binds = false;
    }

    pub fn begin_transaction(&mut self) -> DbResult<()> {
        assert!(
            !self.active_transaction,
            "transaction already active on prepared statement"
        );
        self.stmt.begin_transaction()?;
        self.active_transaction = true;
        Ok(())
    }

    /// Rolls the active transaction back.
    pub fn rollback(&mut self) -> DbResult<()> {
        assert!(
            self.active_transaction,
            "no transaction active on prepared statement"
        );
        self.active_transaction = false;
        self.stmt.rollback()
    }

    /// Commits the active transaction; a failed commit triggers a
    /// best-effort rollback.
    pub fn commit(&mut self) -> DbResult<()> {
        assert!(
            self.active_transaction,
            "no transaction active on prepared statement"
        );
        self.active_transaction = false;
        if let Err(e) = self.stmt.commit() {
            if let Err(rollback_err) = self.stmt.rollback() {
                tracing::error!(error = %rollback_err, "rollback after failed commit failed");
            }
            return Err(e);
        }
        Ok(())
    }
}

impl Drop for PreparedStatement<'_> {
    fn drop(&mut self) {
        if self.active_binds {
            tracing::warn!("prepared statement dropped with pending binds");
        }
        if self.active_transaction {
            self.active_transaction = false;
            if let Err(e) = self.stmt.commit() {
                tracing::error!(error = %e, "commit on statement drop failed");
                let _ = self.stmt.rollback();
            }
        }
    }
}
