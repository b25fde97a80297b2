#![forbid(unsafe_code)]

use crate::Config;
use crate::source::{JsonlTable, get_named, lookup, set_named};
use crate::timefmt::normalize_seconds;
use ds_core::{Column, ColumnType, Record, Schema, Value};
use serde_json::{Map, Value as Json};

const COLUMNS: &[Column] = &[
    Column::key("session_id", ColumnType::Text, &["session_id", "sessionId"]),
    Column::key("ts", ColumnType::Integer, &["ts"]),
    Column::key("text", ColumnType::Text, &["text", "display"]),
    Column::derived("display", ColumnType::Text),
    Column::derived("timestamp", ColumnType::Integer),
    Column::provenance("_source_file", ColumnType::Text),
    Column::provenance("_line", ColumnType::Integer),
];

pub const SCHEMA: Schema = Schema::new(COLUMNS);

pub fn table(config: &Config) -> JsonlTable {
    JsonlTable::new(
        "jhistory",
        "Secondary CLI prompt history (ts in epoch seconds, timestamp in epoch ms)",
        SCHEMA,
        config.jhistory_file(),
        Some(derive),
    )
}

fn derive(object: &Map<String, Json>, schema: &Schema, record: &mut Record) {
    let ts = get_named(schema, record, "ts")
        .and_then(Value::as_i64)
        .or_else(|| {
            lookup(object, &["timestamp"])
                .and_then(|json| Value::from_json(json, ColumnType::Integer).as_i64())
                .map(normalize_seconds)
        });
    set_named(schema, record, "ts", Value::from(ts));
    set_named(
        schema,
        record,
        "timestamp",
        Value::from(ts.map(|seconds| seconds.saturating_mul(1000))),
    );
    let text = get_named(schema, record, "text").cloned().unwrap_or(Value::Null);
    set_named(schema, record, "display", text);
}
