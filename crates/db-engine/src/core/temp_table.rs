//! Scoped staging tables with generated unique names.

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::core::connection::Connection;
use crate::core::sqlgen;
use crate::core::table_info::{ColumnDef, IndexDef};
use crate::error::DbResult;

/// A uniquely-named staging table. `create` remembers the generated name,
/// `remove` drops the table again; an instance that was never created (or
/// already removed) ignores `remove`.
#[derive(Debug, Default)]
pub struct TemporaryTable {
    name: Option<String>,
}

impl TemporaryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn valid(&self) -> bool {
        self.name.is_some()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Creates the table under a fresh random name, dropping any table a
    /// previous `create` on this instance left behind.
    pub fn create(
        &mut self,
        connection: &mut Connection,
        columns: &[ColumnDef],
        indices: &[IndexDef],
    ) -> DbResult<()> {
        if self.valid() {
            self.remove(connection)?;
        }

        let name = unique_table_name();
        connection.create_table(&name, columns, indices)?;
        self.name = Some(name);

        Ok(())
    }

    /// Drops the table; no-op when invalid.
    pub fn remove(&mut self, connection: &mut Connection) -> DbResult<()> {
        let Some(name) = self.name.take() else {
            return Ok(());
        };
        connection.drop_table(&name)
    }
}

/// Runs `f` against a freshly created staging table and guarantees the DROP
/// afterwards, on success and on every error path.
pub fn with_temporary_table<R>(
    connection: &mut Connection,
    columns: &[ColumnDef],
    indices: &[IndexDef],
    f: impl FnOnce(&mut Connection, &str) -> DbResult<R>,
) -> DbResult<R> {
    let mut table = TemporaryTable::new();
    table.create(connection, columns, indices)?;

    let name = table
        .name()
        .expect("temporary table valid after create")
        .to_string();

    let result = f(connection, &name);
    let removed = table.remove(connection);

    match result {
        Ok(value) => {
            removed?;
            Ok(value)
        }
        Err(e) => {
            if let Err(drop_err) = removed {
                tracing::warn!(error = %drop_err, table = %name, "could not drop temporary table");
            }
            Err(e)
        }
    }
}

fn unique_table_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    sqlgen::sanitize_identifier(&format!("tmp_{}", suffix.to_ascii_lowercase()))
}
