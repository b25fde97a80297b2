#![forbid(unsafe_code)]

use crate::Config;
use crate::error::SourceError;
use crate::source::{
    FanOut, FileOrigin, Position, RowIter, TableKind, TableSource, decode_object, file_stem,
    list_files, read_documents,
};
use ds_core::{Column, ColumnType, Schema};
use std::path::PathBuf;

const COLUMNS: &[Column] = &[
    Column::key("id", ColumnType::Text, &["id"]),
    Column::key("content", ColumnType::Text, &["content"]),
    Column::key("status", ColumnType::Text, &["status"]),
    Column::key("active_form", ColumnType::Text, &["activeForm", "active_form"]),
    Column::key("priority", ColumnType::Text, &["priority"]),
    Column::provenance("_source_file", ColumnType::Text),
    Column::provenance("_workspace_id", ColumnType::Text),
    Column::provenance("_agent_id", ColumnType::Text),
    Column::provenance("_index", ColumnType::Integer),
];

pub const SCHEMA: Schema = Schema::new(COLUMNS);

#[derive(Debug)]
pub struct TodosTable {
    dir: PathBuf,
}

pub fn table(config: &Config) -> TodosTable {
    TodosTable {
        dir: config.todos_dir(),
    }
}

/// `<workspace>-agent-<agent>` file stems.
fn split_stem(stem: &str) -> Option<(&str, &str)> {
    stem.split_once("-agent-")
        .filter(|(workspace, agent)| !workspace.is_empty() && !agent.is_empty())
}

impl TableSource for TodosTable {
    fn name(&self) -> &str {
        "todos"
    }

    fn schema(&self) -> Schema {
        SCHEMA
    }

    fn kind(&self) -> TableKind {
        TableKind::MultiFile
    }

    fn description(&self) -> &str {
        "Todo items from every agent todo list"
    }

    fn scan(&self) -> Result<RowIter, SourceError> {
        let files = list_files(&self.dir, "json")?;
        Ok(Box::new(FanOut::new(files, |path: &PathBuf| {
            let mut origin = FileOrigin::new(path);
            if let Some((workspace, agent)) = file_stem(path).and_then(split_stem) {
                origin.workspace_id = Some(workspace.to_string());
                origin.agent_id = Some(agent.to_string());
            }
            let rows = read_documents(path)?
                .into_iter()
                .enumerate()
                .map(move |(index, element)| {
                    element.map(|object| {
                        decode_object(&SCHEMA, &object, &origin, Position::Index(index), None)
                    })
                });
            Ok(Box::new(rows) as RowIter)
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems_split_into_workspace_and_agent() {
        assert_eq!(split_stem("ws1-agent-a2"), Some(("ws1", "a2")));
        assert_eq!(split_stem("random"), None);
        assert_eq!(split_stem("-agent-x"), None);
    }
}
