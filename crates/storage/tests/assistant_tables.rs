#![forbid(unsafe_code)]

use ds_core::{Record, Value};
use ds_storage::{Catalog, Config, SourceError, TableKind};
use std::path::Path;
use tempfile::TempDir;

fn temp_dir(test_name: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(&format!("ds_storage_{test_name}_"))
        .tempdir()
        .expect("create temp dir")
}

fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent");
    }
    std::fs::write(path, contents).expect("write fixture");
}

fn scan(catalog: &Catalog, table: &str) -> (Vec<Record>, usize) {
    let resolved = catalog.resolve(table).expect("resolve");
    let mut rows = Vec::new();
    let mut skipped = 0;
    for item in resolved.source.scan().expect("scan") {
        match item {
            Ok(record) => rows.push(record),
            Err(err) if err.is_recoverable() => skipped += 1,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
    (rows, skipped)
}

fn column(catalog: &Catalog, table: &str, record: &Record, name: &str) -> Value {
    let schema = catalog.resolve(table).expect("resolve").source.schema();
    let index = schema.position(name).expect("column exists");
    record.get(index).cloned().unwrap_or(Value::Null)
}

fn catalog_for(dir: &TempDir) -> Catalog {
    Catalog::assistant(&Config::new(
        dir.path().join("claude"),
        dir.path().join("codex"),
    ))
}

#[test]
fn schemas_are_stable_without_any_data() {
    let dir = temp_dir("schemas_are_stable_without_any_data");
    let catalog = catalog_for(&dir);

    let expected: &[(&str, &[&str])] = &[
        (
            "history",
            &["display", "timestamp", "project", "session_id", "pasted_contents", "_source_file", "_line"],
        ),
        (
            "jhistory",
            &["session_id", "ts", "text", "display", "timestamp", "_source_file", "_line"],
        ),
        (
            "todos",
            &["id", "content", "status", "active_form", "priority", "_source_file", "_workspace_id", "_agent_id", "_index"],
        ),
        (
            "stats",
            &["date", "message_count", "session_count", "tool_call_count", "_source_file"],
        ),
    ];
    for (table, columns) in expected {
        let schema = catalog.resolve(table).expect("resolve").source.schema();
        assert_eq!(&schema.names().collect::<Vec<_>>(), columns, "{table}");
        let (rows, skipped) = scan(&catalog, table);
        assert!(rows.is_empty(), "{table} should be empty");
        assert_eq!(skipped, 0);
    }
    let (rows, _) = scan(&catalog, "transcripts");
    assert!(rows.is_empty());
}

#[test]
fn history_skips_a_corrupt_line_among_a_hundred() {
    let dir = temp_dir("history_skips_a_corrupt_line_among_a_hundred");
    let mut contents = String::new();
    for i in 0..100 {
        if i == 42 {
            contents.push_str("{\"display\": broken\n");
        } else {
            contents.push_str(&format!(
                "{{\"display\":\"p{i}\",\"timestamp\":{},\"project\":\"/repo\"}}\n",
                1_700_000_000_000_i64 + i
            ));
        }
    }
    write(&dir.path().join("claude/history.jsonl"), &contents);
    let catalog = catalog_for(&dir);

    let (rows, skipped) = scan(&catalog, "history");
    assert_eq!(rows.len(), 99);
    assert_eq!(skipped, 1);
    assert_eq!(column(&catalog, "history", &rows[42], "_line"), Value::Integer(44));
    assert_eq!(
        column(&catalog, "history", &rows[0], "timestamp"),
        Value::Integer(1_700_000_000_000)
    );
}

#[test]
fn history_reports_malformed_lines_with_location() {
    let dir = temp_dir("history_reports_malformed_lines_with_location");
    let path = dir.path().join("claude/history.jsonl");
    write(&path, "{\"display\":\"ok\"}\n42\n");
    let catalog = catalog_for(&dir);
    let resolved = catalog.resolve("history").expect("resolve");
    let errors = resolved
        .source
        .scan()
        .expect("scan")
        .filter_map(Result::err)
        .collect::<Vec<_>>();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        SourceError::Malformed { path: at, line, .. } => {
            assert_eq!(at, &path);
            assert_eq!(*line, Some(2));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn aliases_share_rows_and_mutability() {
    let dir = temp_dir("aliases_share_rows_and_mutability");
    write(
        &dir.path().join("codex/history.jsonl"),
        "{\"session_id\":\"s1\",\"ts\":1700000000,\"text\":\"one\"}\n{\"sessionId\":\"s2\",\"timestamp\":1700000001000,\"display\":\"two\"}\n",
    );
    let catalog = catalog_for(&dir);
    let (canonical, _) = scan(&catalog, "jhistory");
    let (aliased, _) = scan(&catalog, "codex_history");
    assert_eq!(canonical, aliased);
    assert_eq!(canonical.len(), 2);
    assert_eq!(
        column(&catalog, "jhistory", &canonical[1], "ts"),
        Value::Integer(1_700_000_001)
    );

    let alias = catalog.resolve("codex_history").expect("alias");
    assert!(alias.source.is_mutable());
    assert_eq!(alias.source.kind(), TableKind::SingleFile);
    assert_eq!(
        alias.source.mutable_file(),
        Some(dir.path().join("codex/history.jsonl").as_path())
    );
}

#[test]
fn transcripts_fan_out_in_path_order_with_provenance() {
    let dir = temp_dir("transcripts_fan_out_in_path_order_with_provenance");
    let root = dir.path().join("claude");
    write(
        &root.join("transcripts/ses_b.jsonl"),
        "{\"type\":\"user\",\"message\":{\"role\":\"user\",\"content\":\"second file\"}}\n",
    );
    write(
        &root.join("transcripts/ses_a.jsonl"),
        "{\"type\":\"user\",\"message\":{\"role\":\"user\",\"content\":\"first\"}}\n{\"type\":\"assistant\",\"message\":{\"role\":\"assistant\",\"content\":[{\"type\":\"text\",\"text\":\"reply\"}]}}\n",
    );
    write(
        &root.join("transcripts/notes.jsonl"),
        "{\"type\":\"summary\"}\n",
    );
    write(
        &root.join("projects/ws-one/abc.jsonl"),
        "{\"type\":\"user\",\"sessionId\":\"abc\"}\n",
    );
    let catalog = catalog_for(&dir);

    let (rows, _) = scan(&catalog, "transcripts");
    let contents = rows
        .iter()
        .map(|row| column(&catalog, "transcripts", row, "content"))
        .collect::<Vec<_>>();
    assert_eq!(
        contents,
        vec![
            Value::Null,
            Value::text("first"),
            Value::text("reply"),
            Value::text("second file"),
            Value::Null,
        ]
    );
    // notes.jsonl does not follow the ses_<id> pattern.
    assert_eq!(column(&catalog, "transcripts", &rows[0], "_session_id"), Value::Null);
    assert_eq!(
        column(&catalog, "transcripts", &rows[1], "_session_id"),
        Value::text("a")
    );
    assert_eq!(
        column(&catalog, "transcripts", &rows[4], "_workspace_id"),
        Value::text("ws-one")
    );
    assert_eq!(
        column(&catalog, "transcripts", &rows[4], "_session_id"),
        Value::text("abc")
    );
    assert!(!catalog.resolve("transcripts").expect("resolve").source.is_mutable());
}

#[test]
fn todos_accept_arrays_and_tag_workspace_and_agent() {
    let dir = temp_dir("todos_accept_arrays_and_tag_workspace_and_agent");
    let root = dir.path().join("claude/todos");
    write(
        &root.join("ws1-agent-a1.json"),
        r#"[{"id":"1","content":"write tests","status":"pending","activeForm":"Writing tests"},{"id":"2","content":"ship","status":"completed"}]"#,
    );
    write(&root.join("loose.json"), r#"{"id":"9","content":"solo","status":"pending"}"#);
    let catalog = catalog_for(&dir);

    let (rows, skipped) = scan(&catalog, "todos");
    assert_eq!(skipped, 0);
    assert_eq!(rows.len(), 3);
    assert_eq!(column(&catalog, "todos", &rows[0], "content"), Value::text("solo"));
    assert_eq!(column(&catalog, "todos", &rows[0], "_workspace_id"), Value::Null);
    assert_eq!(column(&catalog, "todos", &rows[2], "_index"), Value::Integer(1));
    assert_eq!(
        column(&catalog, "todos", &rows[1], "active_form"),
        Value::text("Writing tests")
    );
    assert_eq!(column(&catalog, "todos", &rows[1], "_agent_id"), Value::text("a1"));
}

#[test]
fn stats_reads_daily_activity() {
    let dir = temp_dir("stats_reads_daily_activity");
    write(
        &dir.path().join("claude/stats-cache.json"),
        r#"{"version":1,"dailyActivity":[{"date":"2024-01-01","messageCount":5,"sessionCount":1,"toolCallCount":2}],"totalMessages":5}"#,
    );
    let catalog = catalog_for(&dir);
    let (rows, _) = scan(&catalog, "stats");
    assert_eq!(rows.len(), 1);
    assert_eq!(column(&catalog, "stats", &rows[0], "date"), Value::text("2024-01-01"));
    assert_eq!(column(&catalog, "stats", &rows[0], "message_count"), Value::Integer(5));
    assert!(!catalog.resolve("stats").expect("resolve").source.is_mutable());
}

#[test]
fn unreadable_stats_document_is_a_hard_error() {
    let dir = temp_dir("unreadable_stats_document_is_a_hard_error");
    write(&dir.path().join("claude/stats-cache.json"), "{not json");
    let catalog = catalog_for(&dir);
    let resolved = catalog.resolve("stats").expect("resolve");
    let err = resolved.source.scan().err().expect("decode failure");
    assert!(!err.is_recoverable());
}
