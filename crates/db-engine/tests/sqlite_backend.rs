//! Row-store backend: insert/read round-trips, chunked reads, updates,
//! prepared statements and metrics.

use db_engine::{
    BackendKind, ColumnDef, Command, CommandList, DbError, ExecOptions, Instance, InstanceConfig,
    PropertyDataType, PropertyList, Value,
};
use tempfile::TempDir;

fn open_instance(dir: &TempDir) -> Instance {
    let mut instance = Instance::new(InstanceConfig::new(BackendKind::Sqlite));
    instance.open(dir.path().join("test.db")).unwrap();
    instance
}

fn track_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::key("id", PropertyDataType::Int),
        ColumnDef::new("valid", PropertyDataType::Bool),
        ColumnDef::new("count", PropertyDataType::UInt),
        ColumnDef::new("big", PropertyDataType::ULong),
        ColumnDef::new("alt", PropertyDataType::Double),
        ColumnDef::new("name", PropertyDataType::String),
        ColumnDef::new("extra", PropertyDataType::Json),
        ColumnDef::new("seen", PropertyDataType::Timestamp),
    ]
}

fn track_schema() -> PropertyList {
    let mut schema = PropertyList::new();
    schema
        .add("id", PropertyDataType::Int)
        .add("valid", PropertyDataType::Bool)
        .add("count", PropertyDataType::UInt)
        .add("big", PropertyDataType::ULong)
        .add("alt", PropertyDataType::Double)
        .add("name", PropertyDataType::String)
        .add("extra", PropertyDataType::Json)
        .add("seen", PropertyDataType::Timestamp);
    schema
}

fn sample_timestamp() -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_micros(1_700_000_123_456_789).unwrap()
}

fn track_buffer() -> db_engine::Buffer {
    let mut buffer = db_engine::Buffer::new(track_schema());
    buffer
        .push_row(vec![
            Some(Value::Int(1)),
            Some(Value::Bool(true)),
            Some(Value::UInt(7)),
            Some(Value::ULong(u64::MAX)),
            Some(Value::Double(1050.5)),
            Some(Value::String("alpha".into())),
            Some(Value::Json(serde_json::json!({"mode": "s"}))),
            Some(Value::Timestamp(sample_timestamp())),
        ])
        .unwrap();
    buffer
        .push_row(vec![
            Some(Value::Int(2)),
            Some(Value::Bool(false)),
            None,
            Some(Value::ULong(42)),
            None,
            Some(Value::String("beta".into())),
            None,
            None,
        ])
        .unwrap();
    buffer
        .push_row(vec![
            Some(Value::Int(3)),
            None,
            Some(Value::UInt(0)),
            None,
            Some(Value::Double(-3.25)),
            None,
            Some(Value::Json(serde_json::json!([1, 2, 3]))),
            Some(Value::Timestamp(sample_timestamp())),
        ])
        .unwrap();
    buffer
}

fn select_all_command() -> Command {
    Command::with_result(
        "SELECT id, valid, count, big, alt, name, extra, seen FROM tracks",
        track_schema(),
    )
}

#[test]
fn insert_and_read_back_preserves_values_and_nulls() {
    let dir = TempDir::new().unwrap();
    let mut instance = open_instance(&dir);
    let conn = instance.connection().unwrap();

    conn.create_table("tracks", &track_columns(), &[]).unwrap();
    let buffer = track_buffer();
    conn.insert_buffer("tracks", &buffer, None, None).unwrap();

    conn.start_read(&select_all_command(), 0, 10).unwrap();
    let chunk = conn.read_chunk().unwrap();
    conn.stop_read();

    assert!(!chunk.has_more);
    assert_eq!(chunk.buffer.len(), buffer.len());
    for row in 0..buffer.len() {
        for col in 0..buffer.num_columns() {
            assert_eq!(
                chunk.buffer.value(row, col),
                buffer.value(row, col),
                "row {row} col {col}"
            );
            assert_eq!(chunk.buffer.is_null(row, col), buffer.is_null(row, col));
        }
    }
}

#[test]
fn insert_respects_inclusive_row_range() {
    let dir = TempDir::new().unwrap();
    let mut instance = open_instance(&dir);
    let conn = instance.connection().unwrap();

    conn.create_table("tracks", &track_columns(), &[]).unwrap();
    let buffer = track_buffer();
    conn.insert_buffer("tracks", &buffer, Some(1), Some(2)).unwrap();

    assert_eq!(conn.row_count("tracks").unwrap(), 2);

    conn.start_read(&select_all_command(), 0, 10).unwrap();
    let chunk = conn.read_chunk().unwrap();
    conn.stop_read();

    assert_eq!(chunk.buffer.value(0, 0), Some(Value::Int(2)));
    assert_eq!(chunk.buffer.value(1, 0), Some(Value::Int(3)));
}

#[test]
fn inserting_an_empty_buffer_fails() {
    let dir = TempDir::new().unwrap();
    let mut instance = open_instance(&dir);
    let conn = instance.connection().unwrap();

    conn.create_table("tracks", &track_columns(), &[]).unwrap();
    let empty = db_engine::Buffer::new(track_schema());
    let res = conn.insert_buffer("tracks", &empty, None, None);
    assert!(matches!(res, Err(DbError::ExecuteFailed(_))));
}

#[test]
fn create_table_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let mut instance = open_instance(&dir);
    let conn = instance.connection().unwrap();

    conn.create_table("tracks", &track_columns(), &[]).unwrap();
    let before = conn.table_info().get("tracks").unwrap().columns.len();

    // different definition, same name: succeeds without altering the schema
    let other = vec![ColumnDef::new("whatever", PropertyDataType::String)];
    conn.create_table("tracks", &other, &[]).unwrap();

    conn.update_table_info().unwrap();
    let after = conn.table_info().get("tracks").unwrap().columns.len();
    assert_eq!(before, after);
}

#[test]
fn table_info_matches_created_columns() {
    let dir = TempDir::new().unwrap();
    let mut instance = open_instance(&dir);
    let conn = instance.connection().unwrap();

    conn.create_table("tracks", &track_columns(), &[]).unwrap();
    conn.update_table_info().unwrap();

    let info = conn.table_info().get("tracks").unwrap();
    let names: Vec<&str> = info.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        ["id", "valid", "count", "big", "alt", "name", "extra", "seen"]
    );

    let id = info.column("id").unwrap();
    assert!(id.key);
    assert!(!id.null_allowed);

    // loose storage classes: everything integral lands on INTEGER
    assert_eq!(info.column("count").unwrap().db_type.as_deref(), Some("INTEGER"));
    assert_eq!(info.column("alt").unwrap().db_type.as_deref(), Some("REAL"));
    assert_eq!(info.column("name").unwrap().db_type.as_deref(), Some("TEXT"));
}

#[test]
fn chunked_read_arithmetic() {
    let dir = TempDir::new().unwrap();
    let mut instance = open_instance(&dir);
    let conn = instance.connection().unwrap();

    let columns = vec![ColumnDef::new("id", PropertyDataType::Int)];
    conn.create_table("numbers", &columns, &[]).unwrap();

    let mut schema = PropertyList::new();
    schema.add("id", PropertyDataType::Int);
    let mut buffer = db_engine::Buffer::new(schema.clone());
    for i in 0..5 {
        buffer.push_row(vec![Some(Value::Int(i))]).unwrap();
    }
    conn.insert_buffer("numbers", &buffer, None, None).unwrap();

    let command = Command::with_result("SELECT id FROM numbers", schema);
    conn.start_read(&command, 0, 2).unwrap();

    let mut sizes = Vec::new();
    let mut flags = Vec::new();
    loop {
        let chunk = conn.read_chunk().unwrap();
        sizes.push(chunk.buffer.len());
        flags.push(chunk.has_more);
        if !chunk.has_more {
            break;
        }
    }
    conn.stop_read();

    // ceil(5 / 2) chunks, the last of size 5 mod 2
    assert_eq!(sizes, [2, 2, 1]);
    assert_eq!(flags, [true, true, false]);

    assert!(matches!(conn.read_chunk(), Err(DbError::NoActiveReader)));
}

#[test]
fn read_chunk_without_reader_fails() {
    let dir = TempDir::new().unwrap();
    let mut instance = open_instance(&dir);
    let conn = instance.connection().unwrap();
    assert!(matches!(conn.read_chunk(), Err(DbError::NoActiveReader)));
}

#[test]
fn failed_chunk_latches_reader_not_ready() {
    let dir = TempDir::new().unwrap();
    let mut instance = open_instance(&dir);
    let conn = instance.connection().unwrap();

    let columns = vec![ColumnDef::new("id", PropertyDataType::Int)];
    conn.create_table("numbers", &columns, &[]).unwrap();
    let mut schema = PropertyList::new();
    schema.add("id", PropertyDataType::Int);
    let mut buffer = db_engine::Buffer::new(schema.clone());
    for i in 0..4 {
        buffer.push_row(vec![Some(Value::Int(i))]).unwrap();
    }
    conn.insert_buffer("numbers", &buffer, None, None).unwrap();

    let command = Command::with_result("SELECT id FROM numbers", schema);
    conn.start_read(&command, 0, 2).unwrap();
    conn.read_chunk().unwrap();

    // the table disappears mid-read; the next window re-query must fail
    conn.execute("DROP TABLE numbers;").unwrap();
    assert!(conn.read_chunk().is_err());
    assert!(matches!(conn.read_chunk(), Err(DbError::ReaderNotReady)));

    conn.stop_read();
}

#[test]
fn non_select_command_is_rejected_for_reads() {
    let dir = TempDir::new().unwrap();
    let mut instance = open_instance(&dir);
    let conn = instance.connection().unwrap();

    let mut schema = PropertyList::new();
    schema.add("id", PropertyDataType::Int);
    let command = Command::with_result("DELETE FROM tracks", schema);
    assert!(conn.start_read(&command, 0, 10).is_err());

    let plain = Command::new("SELECT 1");
    assert!(conn.start_read(&plain, 0, 10).is_err());
}

#[test]
fn update_buffer_by_key_column() {
    let dir = TempDir::new().unwrap();
    let mut instance = open_instance(&dir);
    let conn = instance.connection().unwrap();

    conn.create_table("tracks", &track_columns(), &[]).unwrap();
    conn.insert_buffer("tracks", &track_buffer(), None, None).unwrap();

    let mut schema = PropertyList::new();
    schema
        .add("id", PropertyDataType::Int)
        .add("name", PropertyDataType::String);
    let mut update = db_engine::Buffer::new(schema.clone());
    update
        .push_row(vec![
            Some(Value::Int(1)),
            Some(Value::String("renamed".into())),
        ])
        .unwrap();
    update
        .push_row(vec![Some(Value::Int(3)), None])
        .unwrap();

    conn.update_buffer("tracks", &update, "id", None, None).unwrap();

    let command = Command::with_result("SELECT id, name FROM tracks ORDER BY id", schema);
    conn.start_read(&command, 0, 10).unwrap();
    let chunk = conn.read_chunk().unwrap();
    conn.stop_read();

    assert_eq!(
        chunk.buffer.value_by_name(0, "name"),
        Some(Value::String("renamed".into()))
    );
    assert_eq!(
        chunk.buffer.value_by_name(1, "name"),
        Some(Value::String("beta".into()))
    );
    assert!(chunk.buffer.is_null(2, 1));
}

#[test]
fn update_buffer_requires_key_in_buffer() {
    let dir = TempDir::new().unwrap();
    let mut instance = open_instance(&dir);
    let conn = instance.connection().unwrap();

    conn.create_table("tracks", &track_columns(), &[]).unwrap();

    let mut schema = PropertyList::new();
    schema.add("name", PropertyDataType::String);
    let mut buffer = db_engine::Buffer::new(schema);
    buffer
        .push_row(vec![Some(Value::String("x".into()))])
        .unwrap();

    let res = conn.update_buffer("tracks", &buffer, "id", None, None);
    assert!(matches!(res, Err(DbError::ExecuteFailed(_))));
}

#[test]
fn scoped_temporary_table_is_dropped_on_error_paths() {
    let dir = TempDir::new().unwrap();
    let mut instance = open_instance(&dir);
    let conn = instance.connection().unwrap();

    let columns = vec![ColumnDef::new("id", PropertyDataType::Int)];
    let mut staged_name = String::new();

    let result: db_engine::DbResult<()> =
        db_engine::with_temporary_table(conn, &columns, &[], |conn, staging| {
            staged_name = staging.to_string();
            assert!(conn.has_table(staging));
            Err(DbError::ExecuteFailed("simulated failure".into()))
        });

    assert!(result.is_err());
    assert!(!staged_name.is_empty());
    conn.update_table_info().unwrap();
    assert!(!conn.has_table(&staged_name));
}

#[test]
fn prepared_statement_binds_and_fetches() {
    let dir = TempDir::new().unwrap();
    let mut instance = open_instance(&dir);
    let conn = instance.connection().unwrap();

    conn.create_table("tracks", &track_columns(), &[]).unwrap();

    {
        let mut stmt = conn
            .prepare_transaction(
                "INSERT INTO tracks (id, valid, count, big, alt, name, extra, seen) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .unwrap();
        stmt.bind_int(0, 9).unwrap();
        stmt.bind_bool(1, true).unwrap();
        stmt.bind_uint(2, 11).unwrap();
        stmt.bind_null(3).unwrap();
        stmt.bind_double(4, 0.5).unwrap();
        stmt.bind_string(5, "bound").unwrap();
        stmt.bind_json(6, &serde_json::json!({"k": 1})).unwrap();
        stmt.bind_timestamp(7, sample_timestamp()).unwrap();
        stmt.execute(None).unwrap();
        stmt.commit().unwrap();
    }

    let mut schema = PropertyList::new();
    schema
        .add("id", PropertyDataType::Int)
        .add("name", PropertyDataType::String);
    let mut stmt = conn
        .prepare("SELECT id, name FROM tracks WHERE id = 9")
        .unwrap();
    let options = ExecOptions::with_result(schema);
    let buffer = stmt.execute(Some(&options)).unwrap().unwrap();
    assert_eq!(buffer.len(), 1);
    assert_eq!(buffer.value(0, 0), Some(Value::Int(9)));
    assert_eq!(buffer.value(0, 1), Some(Value::String("bound".into())));
}

#[test]
#[should_panic(expected = "transaction already active")]
fn nested_transactions_are_a_programming_error() {
    let dir = TempDir::new().unwrap();
    let mut instance = open_instance(&dir);
    let conn = instance.connection().unwrap();
    conn.create_table("tracks", &track_columns(), &[]).unwrap();

    let mut stmt = conn
        .prepare_transaction("INSERT INTO tracks (id) VALUES (?1)")
        .unwrap();
    let _ = stmt.begin_transaction();
}

#[test]
fn command_list_accumulates_and_fails_fast() {
    let dir = TempDir::new().unwrap();
    let mut instance = open_instance(&dir);
    let conn = instance.connection().unwrap();

    conn.create_table("tracks", &track_columns(), &[]).unwrap();
    conn.insert_buffer("tracks", &track_buffer(), None, None).unwrap();

    let mut schema = PropertyList::new();
    schema.add("id", PropertyDataType::Int);

    let mut list = CommandList::with_result(schema.clone());
    list.add("SELECT id FROM tracks WHERE id <= 2")
        .add("SELECT id FROM tracks WHERE id = 3");
    let buffer = conn.execute_command_list(&list).unwrap().unwrap();
    assert_eq!(buffer.len(), 3);

    let mut failing = CommandList::with_result(schema);
    failing
        .add("SELECT id FROM tracks WHERE id = 1")
        .add("SELECT id FROM no_such_table")
        .add("SELECT id FROM tracks WHERE id = 2");
    assert!(conn.execute_command_list(&failing).is_err());
}

#[test]
fn metrics_accumulate_only_while_started() {
    let dir = TempDir::new().unwrap();
    let mut instance = open_instance(&dir);
    let conn = instance.connection().unwrap();

    conn.create_table("tracks", &track_columns(), &[]).unwrap();

    // not started: nothing recorded
    conn.insert_buffer("tracks", &track_buffer(), None, None).unwrap();
    assert!(conn.performance_metrics().is_none());

    conn.start_performance_metrics();
    conn.insert_buffer("tracks", &track_buffer(), None, None).unwrap();

    conn.start_read(&select_all_command(), 0, 2).unwrap();
    while conn.read_chunk().unwrap().has_more {}
    conn.stop_read();

    let metrics = conn.stop_performance_metrics().unwrap();
    assert_eq!(metrics.insert_calls, 1);
    assert_eq!(metrics.insert_rows, 3);
    // the repeated ids replaced the first insert, so the table holds 3 rows
    assert_eq!(metrics.read_rows, 3);
    assert_eq!(metrics.read_chunks, 2);
    assert!(conn.performance_metrics().is_none());
}

#[test]
#[should_panic(expected = "does not support concurrent connections")]
fn concurrent_connections_require_multithread_support() {
    let dir = TempDir::new().unwrap();
    let mut instance = open_instance(&dir);
    let _ = instance.concurrent_connection(std::thread::current().id());
}
