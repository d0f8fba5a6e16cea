use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "db-engine")]
pub struct Args {
    /// Database file to open; omit for an in-memory database.
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Backend engine: sqlite or duckdb.
    #[arg(long, default_value = "sqlite")]
    pub backend: String,

    /// Print table metadata as JSON and exit.
    #[arg(long)]
    pub tables: bool,

    /// SQL to execute; query results are printed as JSON rows.
    #[arg(long)]
    pub sql: Option<String>,

    /// Logging level (stderr). Also supports RUST_LOG.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
