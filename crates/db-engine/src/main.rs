mod cli;

use clap::Parser;

use db_engine::core::sqlgen;
use db_engine::{logging, BackendKind, Command, DbError, DbResult, Instance, InstanceConfig};

use crate::cli::Args;

fn main() -> DbResult<()> {
    let args = Args::parse();
    logging::init(&args.log_level);

    let backend = match args.backend.as_str() {
        "sqlite" => BackendKind::Sqlite,
        "duckdb" => BackendKind::DuckDb,
        other => {
            return Err(DbError::UnsupportedMode(format!(
                "unknown backend '{other}'"
            )))
        }
    };

    let mut instance = Instance::new(InstanceConfig::new(backend));
    match &args.db {
        Some(path) => instance.open(path)?,
        None => instance.open_in_memory()?,
    }

    if args.tables {
        let info = instance.connection()?.table_info().clone();
        let json =
            serde_json::to_string_pretty(&info).map_err(|e| DbError::Internal(e.to_string()))?;
        println!("{json}");
    }

    if let Some(sql) = &args.sql {
        let is_query = sql
            .trim_start()
            .get(..6)
            .map_or(false, |p| p.eq_ignore_ascii_case("select"));

        if is_query {
            stream_query(&mut instance, sql)?;
        } else {
            instance.connection()?.execute(sql)?;
        }
    }

    instance.close();
    Ok(())
}

/// Streams a SELECT chunk-wise, printing one JSON object per row. The result
/// schema is taken from a single-row probe of the same query.
fn stream_query(instance: &mut Instance, sql: &str) -> DbResult<()> {
    let chunk_size = instance.config().read_chunk_size;
    let connection = instance.connection()?;

    let probe = connection.execute_fetch(&sqlgen::chunk_statement(sql, 0, 1))?;
    if probe.is_empty() {
        tracing::info!(rows = 0usize, "query done");
        return Ok(());
    }

    let command = Command::with_result(sql, probe.properties().clone());
    connection.start_read(&command, 0, chunk_size)?;

    let mut rows = 0usize;
    loop {
        let chunk = match connection.read_chunk() {
            Ok(chunk) => chunk,
            Err(e) => {
                connection.stop_read();
                return Err(e);
            }
        };
        for row in 0..chunk.buffer.len() {
            println!("{}", chunk.buffer.row_to_json(row));
        }
        rows += chunk.buffer.len();
        if !chunk.has_more {
            break;
        }
    }
    connection.stop_read();

    tracing::info!(rows, "query done");
    Ok(())
}
