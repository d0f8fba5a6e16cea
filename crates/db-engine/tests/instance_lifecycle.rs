//! Instance lifecycle: open/close/reconnect, compaction safety and export.

use db_engine::{
    BackendKind, Buffer, ColumnDef, Command, DbError, Instance, InstanceConfig, PropertyDataType,
    PropertyList, Value,
};
use tempfile::TempDir;

fn id_schema() -> PropertyList {
    let mut schema = PropertyList::new();
    schema.add("id", PropertyDataType::Int);
    schema
}

fn seed_rows(instance: &mut Instance, count: i32) {
    let conn = instance.connection().unwrap();
    let columns = vec![ColumnDef::new("id", PropertyDataType::Int)];
    conn.create_table("numbers", &columns, &[]).unwrap();

    let mut buffer = Buffer::new(id_schema());
    for i in 0..count {
        buffer.push_row(vec![Some(Value::Int(i))]).unwrap();
    }
    conn.insert_buffer("numbers", &buffer, None, None).unwrap();
}

fn count_rows(instance: &mut Instance) -> u64 {
    instance.connection().unwrap().row_count("numbers").unwrap()
}

#[test]
fn open_and_close_are_idempotent_and_guarded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");

    let mut instance = Instance::new(InstanceConfig::new(BackendKind::Sqlite));
    assert!(!instance.is_open());
    assert!(matches!(instance.connection(), Err(DbError::NotOpen)));

    instance.open(&path).unwrap();
    assert!(instance.is_open());
    assert!(matches!(instance.open(&path), Err(DbError::AlreadyOpen)));

    instance.close();
    instance.close(); // closing a closed instance is a no-op
    assert!(!instance.is_open());
    assert!(matches!(instance.connection(), Err(DbError::NotOpen)));

    instance.open(&path).unwrap();
    assert!(instance.is_open());
}

#[test]
fn reconnect_with_compaction_preserves_data() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");

    let mut instance = Instance::new(InstanceConfig::new(BackendKind::Sqlite));
    instance.open(&path).unwrap();
    seed_rows(&mut instance, 100);

    instance.reconnect(true).unwrap();

    assert!(instance.is_open());
    assert_eq!(count_rows(&mut instance), 100);

    // no stray compaction files left behind
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.contains("compact"))
        .collect();
    assert!(leftovers.is_empty(), "stray files: {leftovers:?}");
}

#[test]
fn compaction_aborts_when_temp_file_exists() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");

    let mut instance = Instance::new(InstanceConfig::new(BackendKind::Sqlite));
    instance.open(&path).unwrap();
    seed_rows(&mut instance, 10);

    // occupy the compaction temp file slot
    let tmp = dir.path().join("test.db.compact_tmp");
    std::fs::write(&tmp, b"occupied").unwrap();

    let res = instance.reconnect(true);
    assert!(matches!(res, Err(DbError::CleanupFailed(_))));

    // the original file is untouched and still queryable
    assert!(path.exists());
    assert!(instance.is_open());
    assert_eq!(count_rows(&mut instance), 10);
}

#[test]
fn plain_reconnect_reopens_the_same_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");

    let mut instance = Instance::new(InstanceConfig::new(BackendKind::Sqlite));
    instance.open(&path).unwrap();
    seed_rows(&mut instance, 5);

    instance.reconnect(false).unwrap();
    assert_eq!(count_rows(&mut instance), 5);
}

#[test]
fn sqlite_export_produces_an_openable_copy() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");
    let export = dir.path().join("export.db");

    let mut instance = Instance::new(InstanceConfig::new(BackendKind::Sqlite));
    instance.open(&path).unwrap();
    seed_rows(&mut instance, 25);

    instance.export_to_file(&export).unwrap();
    assert!(export.exists());

    // the source stays open and intact
    assert_eq!(count_rows(&mut instance), 25);

    let mut copy = Instance::new(InstanceConfig::new(BackendKind::Sqlite));
    copy.open(&export).unwrap();
    assert_eq!(count_rows(&mut copy), 25);
}

#[test]
fn duckdb_export_copies_an_in_memory_database() {
    let dir = TempDir::new().unwrap();
    let export = dir.path().join("export.duckdb");

    let mut instance = Instance::new(InstanceConfig::new(BackendKind::DuckDb));
    instance.open_in_memory().unwrap();
    seed_rows(&mut instance, 12);

    instance.export_to_file(&export).unwrap();
    assert!(export.exists());

    // exporting to an existing file is refused
    assert!(instance.export_to_file(&export).is_err());
    instance.close();

    let mut copy = Instance::new(InstanceConfig::new(BackendKind::DuckDb));
    copy.open(&export).unwrap();
    assert_eq!(count_rows(&mut copy), 12);
}

#[test]
fn table_info_is_refreshed_at_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");

    {
        let mut instance = Instance::new(InstanceConfig::new(BackendKind::Sqlite));
        instance.open(&path).unwrap();
        seed_rows(&mut instance, 1);
        instance.close();
    }

    let mut instance = Instance::new(InstanceConfig::new(BackendKind::Sqlite));
    instance.open(&path).unwrap();
    let conn = instance.connection().unwrap();
    assert!(conn.has_table("numbers"));

    let schema = id_schema();
    let command = Command::with_result("SELECT id FROM numbers", schema);
    conn.start_read(&command, 0, 10).unwrap();
    let chunk = conn.read_chunk().unwrap();
    conn.stop_read();
    assert_eq!(chunk.buffer.len(), 1);
    assert_eq!(chunk.buffer.value(0, 0), Some(Value::Int(0)));
}

#[test]
fn pragma_list_is_backend_specific() {
    let sqlite = Instance::new(InstanceConfig::new(BackendKind::Sqlite));
    let pragmas = sqlite.sql_pragmas();
    assert!(pragmas.iter().any(|p| p.name == "synchronous"));
    assert_eq!(pragmas[0].statement(), "PRAGMA synchronous = OFF;");

    let duck = Instance::new(InstanceConfig::new(BackendKind::DuckDb));
    assert!(duck.sql_pragmas().iter().any(|p| p.name == "threads"));
}
