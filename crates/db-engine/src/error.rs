use thiserror::Error;

/// Error kinds surfaced by the database layer.
///
/// Every public operation reports failure through this enum; native backend
/// errors are wrapped with their message at the backend boundary and never
/// swallowed. Programming-contract violations (double `begin_transaction`,
/// a second `start_read` while a cursor is open, ...) panic instead.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("could not connect to database: {0}")]
    ConnectFailed(String),

    #[error("database already open")]
    AlreadyOpen,

    #[error("database not open")]
    NotOpen,

    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),

    #[error("could not prepare statement: {0}")]
    PrepareFailed(String),

    #[error("could not bind value: {0}")]
    BindFailed(String),

    #[error("statement execution failed: {0}")]
    ExecuteFailed(String),

    #[error("result buffer mismatch: {0}")]
    BufferMismatch(String),

    #[error("no active reader")]
    NoActiveReader,

    #[error("reader not ready")]
    ReaderNotReady,

    #[error("database cleanup failed: {0}")]
    CleanupFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type DbResult<T> = Result<T, DbError>;
