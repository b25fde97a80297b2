#![forbid(unsafe_code)]

use crate::Config;
use crate::source::DocumentTable;
use ds_core::{Column, ColumnType, Schema};

const COLUMNS: &[Column] = &[
    Column::key("date", ColumnType::Text, &["date"]),
    Column::key("message_count", ColumnType::Integer, &["messageCount"]),
    Column::key("session_count", ColumnType::Integer, &["sessionCount"]),
    Column::key("tool_call_count", ColumnType::Integer, &["toolCallCount"]),
    Column::provenance("_source_file", ColumnType::Text),
];

pub const SCHEMA: Schema = Schema::new(COLUMNS);

pub fn table(config: &Config) -> DocumentTable {
    DocumentTable::new(
        "stats",
        "Daily activity counters from the usage stats cache",
        SCHEMA,
        config.stats_file(),
        "/dailyActivity",
    )
}
