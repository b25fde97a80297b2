#![forbid(unsafe_code)]

use crate::Config;
use crate::source::JsonlTable;
use ds_core::{Column, ColumnType, Schema};

const COLUMNS: &[Column] = &[
    Column::key("display", ColumnType::Text, &["display"]),
    Column::key("timestamp", ColumnType::Integer, &["timestamp"]),
    Column::key("project", ColumnType::Text, &["project"]),
    Column::key("session_id", ColumnType::Text, &["sessionId", "session_id"]),
    Column::key("pasted_contents", ColumnType::Json, &["pastedContents"]),
    Column::provenance("_source_file", ColumnType::Text),
    Column::provenance("_line", ColumnType::Integer),
];

pub const SCHEMA: Schema = Schema::new(COLUMNS);

pub fn table(config: &Config) -> JsonlTable {
    JsonlTable::new(
        "history",
        "Prompt history, one row per submitted prompt (timestamp in epoch ms)",
        SCHEMA,
        config.history_file(),
        None,
    )
}
