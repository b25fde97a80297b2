#![forbid(unsafe_code)]

use crate::Config;
use crate::error::SourceError;
use crate::source::{
    FanOut, FileOrigin, JsonlLines, Position, RowIter, TableKind, TableSource, decode_object,
    empty_rows, file_stem, list_dirs, list_files, lookup, set_named,
};
use crate::timefmt::{millis_from_rfc3339, normalize_millis};
use ds_core::{Column, ColumnType, Record, Schema, Value};
use serde_json::{Map, Value as Json};
use std::path::{Path, PathBuf};

const COLUMNS: &[Column] = &[
    Column::key("type", ColumnType::Text, &["type"]),
    Column::key("uuid", ColumnType::Text, &["uuid"]),
    Column::key("parent_uuid", ColumnType::Text, &["parentUuid", "parent_uuid"]),
    Column::key("session_id", ColumnType::Text, &["sessionId", "session_id"]),
    Column::derived("timestamp", ColumnType::Integer),
    Column::derived("role", ColumnType::Text),
    Column::derived("model", ColumnType::Text),
    Column::derived("content", ColumnType::Text),
    Column::derived("tool_name", ColumnType::Text),
    Column::derived("tool_input", ColumnType::Json),
    Column::key("cwd", ColumnType::Text, &["cwd"]),
    Column::key("git_branch", ColumnType::Text, &["gitBranch", "git_branch"]),
    Column::key("message", ColumnType::Json, &["message"]),
    Column::provenance("_source_file", ColumnType::Text),
    Column::provenance("_session_id", ColumnType::Text),
    Column::provenance("_workspace_id", ColumnType::Text),
    Column::provenance("_line", ColumnType::Integer),
];

pub const SCHEMA: Schema = Schema::new(COLUMNS);

/// Conversation transcripts: `transcripts/ses_<id>.jsonl`, then `projects/<ws>/<id>.jsonl`.
#[derive(Debug)]
pub struct TranscriptsTable {
    transcripts_dir: PathBuf,
    projects_dir: PathBuf,
}

pub fn table(config: &Config) -> TranscriptsTable {
    TranscriptsTable {
        transcripts_dir: config.transcripts_dir(),
        projects_dir: config.projects_dir(),
    }
}

impl TranscriptsTable {
    fn files(&self) -> Result<Vec<(PathBuf, FileOrigin)>, SourceError> {
        let mut files = Vec::new();
        for path in list_files(&self.transcripts_dir, "jsonl")? {
            let mut origin = FileOrigin::new(&path);
            origin.session_id = file_stem(&path)
                .and_then(|stem| stem.strip_prefix("ses_"))
                .filter(|id| !id.is_empty())
                .map(str::to_string);
            files.push((path, origin));
        }
        for workspace in list_dirs(&self.projects_dir)? {
            let workspace_id = workspace
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string);
            for path in list_files(&workspace, "jsonl")? {
                let mut origin = FileOrigin::new(&path);
                origin.workspace_id = workspace_id.clone();
                origin.session_id = file_stem(&path).map(str::to_string);
                files.push((path, origin));
            }
        }
        Ok(files)
    }
}

impl TableSource for TranscriptsTable {
    fn name(&self) -> &str {
        "transcripts"
    }

    fn schema(&self) -> Schema {
        SCHEMA
    }

    fn kind(&self) -> TableKind {
        TableKind::MultiFile
    }

    fn description(&self) -> &str {
        "Conversation transcript entries across all sessions (timestamp in epoch ms)"
    }

    fn scan(&self) -> Result<RowIter, SourceError> {
        let files = self.files()?;
        Ok(Box::new(FanOut::new(files, |(path, origin): &(PathBuf, FileOrigin)| {
            open_transcript(path, origin.clone())
        })))
    }
}

fn open_transcript(path: &Path, origin: FileOrigin) -> Result<RowIter, SourceError> {
    let Some(lines) = JsonlLines::open(path)? else {
        return Ok(empty_rows());
    };
    Ok(Box::new(lines.map(move |item| {
        item.map(|(line, object)| {
            decode_object(&SCHEMA, &object, &origin, Position::Line(line), Some(derive))
        })
    })))
}

fn derive(object: &Map<String, Json>, schema: &Schema, record: &mut Record) {
    let message = object.get("message").and_then(Json::as_object);
    let from_message = |key: &str| message.and_then(|message| message.get(key));

    let timestamp = lookup(object, &["timestamp"]).and_then(|json| match json {
        Json::String(text) => millis_from_rfc3339(text),
        Json::Number(number) => number.as_i64().map(normalize_millis),
        _ => None,
    });
    set_named(schema, record, "timestamp", Value::from(timestamp));

    let role = from_message("role").or_else(|| object.get("role"));
    set_named(schema, record, "role", text_of(role));
    let model = from_message("model").or_else(|| object.get("model"));
    set_named(schema, record, "model", text_of(model));

    let content = from_message("content").or_else(|| object.get("content"));
    set_named(
        schema,
        record,
        "content",
        Value::opt_text(content.and_then(content_text)),
    );

    let blocks = content.and_then(Json::as_array);
    let tool_use = blocks.and_then(|blocks| {
        blocks
            .iter()
            .find(|block| block.get("type").and_then(Json::as_str) == Some("tool_use"))
    });
    let tool_name = lookup(object, &["tool_name", "toolName"])
        .or_else(|| tool_use.and_then(|block| block.get("name")));
    set_named(schema, record, "tool_name", text_of(tool_name));
    let tool_input = lookup(object, &["tool_input", "toolInput"])
        .or_else(|| tool_use.and_then(|block| block.get("input")));
    set_named(
        schema,
        record,
        "tool_input",
        tool_input.map_or(Value::Null, |json| Value::from_json(json, ColumnType::Json)),
    );
}

fn text_of(json: Option<&Json>) -> Value {
    json.map_or(Value::Null, |json| Value::from_json(json, ColumnType::Text))
}

/// String content as-is; block content as its `text` blocks joined by spaces.
fn content_text(content: &Json) -> Option<String> {
    match content {
        Json::String(text) => Some(text.clone()),
        Json::Array(blocks) => {
            let texts = blocks
                .iter()
                .filter(|block| block.get("type").and_then(Json::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Json::as_str))
                .collect::<Vec<_>>();
            (!texts.is_empty()).then(|| texts.join(" "))
        }
        _ => None,
    }
}
