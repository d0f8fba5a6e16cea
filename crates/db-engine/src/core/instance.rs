//! Database instance: owns the engine handle, the default connection and
//! the registry of concurrent/custom connections.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::ThreadId;

use crate::backend::{
    create_engine, BackendKind, DatabaseEngine, OpenTarget, Pragma, SqlCapabilities,
};
use crate::core::connection::Connection;
use crate::error::{DbError, DbResult};

/// Explicit instance configuration, passed at construction.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub backend: BackendKind,
    /// Default chunk size callers use for streaming reads.
    pub read_chunk_size: usize,
}

impl InstanceConfig {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            read_chunk_size: 50_000,
        }
    }
}

#[derive(Default)]
struct Registry {
    concurrent: HashMap<ThreadId, Arc<Mutex<Connection>>>,
    custom: HashMap<u64, Arc<Mutex<Connection>>>,
    next_custom_id: u64,
}

struct OpenState {
    target: OpenTarget,
    default_connection: Connection,
    registry: Arc<Mutex<Registry>>,
}

/// Owns the database file lifetime: opening creates the engine handle and
/// exactly one default connection; closing tears everything down in reverse.
/// Dropping an open instance closes it.
pub struct Instance {
    config: InstanceConfig,
    engine: Box<dyn DatabaseEngine>,
    open_state: Option<OpenState>,
}

impl Instance {
    pub fn new(config: InstanceConfig) -> Self {
        let engine = create_engine(config.backend);
        Self {
            config,
            engine,
            open_state: None,
        }
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.engine.kind()
    }

    /// Capability query for the SQL-text-generation collaborator.
    pub fn sql_configuration(&self, verbose: bool) -> &'static SqlCapabilities {
        let capabilities = self.engine.capabilities();
        if verbose {
            tracing::info!(
                backend = self.engine.kind().as_str(),
                ?capabilities,
                "sql configuration"
            );
        }
        capabilities
    }

    /// Pragmas the backend applies right after open, in list order.
    pub fn sql_pragmas(&self) -> Vec<Pragma> {
        self.engine.pragmas()
    }

    pub fn is_open(&self) -> bool {
        self.open_state.is_some()
    }

    /// Opens the given database file, creating it if absent.
    pub fn open(&mut self, path: impl AsRef<Path>) -> DbResult<()> {
        self.open_impl(OpenTarget::File(path.as_ref().to_path_buf()))
    }

    /// Opens an in-memory database; fails with `UnsupportedMode` when the
    /// backend cannot run in memory.
    pub fn open_in_memory(&mut self) -> DbResult<()> {
        if !self.engine.capabilities().in_memory {
            return Err(DbError::UnsupportedMode(format!(
                "backend '{}' does not support in-memory databases",
                self.engine.kind().as_str()
            )));
        }
        self.open_impl(OpenTarget::InMemory)
    }

    fn open_impl(&mut self, target: OpenTarget) -> DbResult<()> {
        if self.open_state.is_some() {
            return Err(DbError::AlreadyOpen);
        }

        tracing::info!(backend = self.engine.kind().as_str(), "opening database");
        self.engine.open(&target)?;

        match self.init_default_connection() {
            Ok(default_connection) => {
                self.open_state = Some(OpenState {
                    target,
                    default_connection,
                    registry: Arc::new(Mutex::new(Registry::default())),
                });
                Ok(())
            }
            Err(e) => {
                // roll back to the fully-closed state
                self.engine.close();
                Err(e)
            }
        }
    }

    fn init_default_connection(&self) -> DbResult<Connection> {
        let mut connection = Connection::new(self.engine.connect()?);

        for pragma in self.engine.pragmas() {
            if let Err(e) = connection.execute(&pragma.statement()) {
                tracing::error!(pragma = %pragma.name, error = %e, "applying pragma failed, aborting open");
                return Err(e);
            }
        }

        connection.update_table_info()?;
        Ok(connection)
    }

    /// The default connection created at open.
    pub fn connection(&mut self) -> DbResult<&mut Connection> {
        self.open_state
            .as_mut()
            .map(|s| &mut s.default_connection)
            .ok_or(DbError::NotOpen)
    }

    /// Closes the database: default connection first, then all registered
    /// connections, then the engine handle. Closing a closed instance is a
    /// no-op.
    pub fn close(&mut self) {
        let Some(mut state) = self.open_state.take() else {
            return;
        };

        tracing::info!("closing database");

        {
            let mut registry = state
                .registry
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for (_, connection) in registry.concurrent.drain() {
                lock_and_disconnect(&connection);
            }
            for (_, connection) in registry.custom.drain() {
                lock_and_disconnect(&connection);
            }
        }

        state.default_connection.disconnect();
        self.engine.close();
    }

    /// Closes and reopens the database file. With `cleanup` the file is
    /// compacted in between; compaction requires that all custom and
    /// concurrent connections have been released. For in-memory databases
    /// this is a no-op.
    pub fn reconnect(&mut self, cleanup: bool) -> DbResult<()> {
        let state = self.open_state.as_ref().ok_or(DbError::NotOpen)?;

        let path: PathBuf = match &state.target {
            OpenTarget::InMemory => {
                tracing::info!("in-memory database, reconnect skipped");
                return Ok(());
            }
            OpenTarget::File(path) => path.clone(),
        };

        if cleanup {
            let registry = state
                .registry
                .lock()
                .map_err(|_| DbError::Internal("poisoned registry lock".into()))?;
            assert!(
                registry.concurrent.is_empty() && registry.custom.is_empty(),
                "compaction requires all extra connections to be released"
            );
        }

        self.close();

        if cleanup {
            if let Err(compact_err) = self.engine.compact(&path) {
                // the original file is preserved; reopen it so the instance
                // stays usable and report the failure
                if let Err(reopen_err) = self.open_impl(OpenTarget::File(path)) {
                    tracing::error!(error = %reopen_err, "reopen after failed compaction failed");
                }
                return Err(compact_err);
            }
        }

        self.open_impl(OpenTarget::File(path))
    }

    /// The connection cached for the given thread key, lazily created.
    /// Requires a backend supporting multiple connections.
    pub fn concurrent_connection(&mut self, key: ThreadId) -> DbResult<ConcurrentConnection> {
        assert!(
            self.engine.capabilities().multi_threaded,
            "backend '{}' does not support concurrent connections",
            self.engine.kind().as_str()
        );

        let state = self.open_state.as_ref().ok_or(DbError::NotOpen)?;
        let mut registry = state
            .registry
            .lock()
            .map_err(|_| DbError::Internal("poisoned registry lock".into()))?;

        if let Some(existing) = registry.concurrent.get(&key) {
            return Ok(ConcurrentConnection {
                inner: existing.clone(),
            });
        }

        let mut connection = Connection::new(self.engine.connect()?);
        connection.update_table_info()?;

        let connection = Arc::new(Mutex::new(connection));
        registry.concurrent.insert(key, connection.clone());
        tracing::debug!(?key, "created concurrent connection");

        Ok(ConcurrentConnection { inner: connection })
    }

    /// A free-standing connection owned by the returned handle; dropping the
    /// handle unregisters and disconnects it.
    pub fn new_custom_connection(&mut self) -> DbResult<CustomConnection> {
        assert!(
            self.engine.capabilities().multi_threaded,
            "backend '{}' does not support custom connections",
            self.engine.kind().as_str()
        );

        let state = self.open_state.as_ref().ok_or(DbError::NotOpen)?;

        let mut connection = Connection::new(self.engine.connect()?);
        connection.update_table_info()?;
        let connection = Arc::new(Mutex::new(connection));

        let mut registry = state
            .registry
            .lock()
            .map_err(|_| DbError::Internal("poisoned registry lock".into()))?;
        let id = registry.next_custom_id;
        registry.next_custom_id += 1;
        registry.custom.insert(id, connection.clone());
        tracing::debug!(id, "created custom connection");

        Ok(CustomConnection {
            id,
            connection,
            registry: Arc::downgrade(&state.registry),
        })
    }

    /// Number of currently registered concurrent and custom connections.
    pub fn num_registered_connections(&self) -> usize {
        match &self.open_state {
            Some(state) => state
                .registry
                .lock()
                .map(|r| r.concurrent.len() + r.custom.len())
                .unwrap_or(0),
            None => 0,
        }
    }

    /// Full-database copy to `path` through the default connection.
    pub fn export_to_file(&mut self, path: impl AsRef<Path>) -> DbResult<()> {
        self.connection()?.export_file(path.as_ref())
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock_and_disconnect(connection: &Arc<Mutex<Connection>>) {
    match connection.lock() {
        Ok(mut c) => c.disconnect(),
        Err(poisoned) => poisoned.into_inner().disconnect(),
    }
}

/// Handle to a connection cached per thread key. Locking yields the
/// connection for the duration of a call sequence.
#[derive(Clone)]
pub struct ConcurrentConnection {
    inner: Arc<Mutex<Connection>>,
}

impl ConcurrentConnection {
    pub fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.inner
            .lock()
            .map_err(|_| DbError::Internal("poisoned connection lock".into()))
    }
}

/// RAII handle to a free-standing registered connection.
pub struct CustomConnection {
    id: u64,
    connection: Arc<Mutex<Connection>>,
    registry: Weak<Mutex<Registry>>,
}

impl CustomConnection {
    pub fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| DbError::Internal("poisoned connection lock".into()))
    }
}

impl Drop for CustomConnection {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut registry) = registry.lock() {
                registry.custom.remove(&self.id);
            }
        }
        match self.connection.lock() {
            Ok(mut c) => c.disconnect(),
            Err(poisoned) => poisoned.into_inner().disconnect(),
        }
    }
}
