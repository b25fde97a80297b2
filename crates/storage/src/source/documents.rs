#![forbid(unsafe_code)]

use super::jsonl::{json_kind, parse_object};
use super::{FileOrigin, Position, RowIter, TableKind, TableSource, decode_object};
use crate::error::SourceError;
use ds_core::Schema;
use serde_json::{Map, Value as Json};
use std::path::{Path, PathBuf};
use tracing::debug;

type Element = Result<Map<String, Json>, SourceError>;

/// Reads a JSON file that holds an array of objects, a single object, or (failing both) JSONL.
///
/// Elements come back in file order. A missing or blank file has no elements.
pub fn read_documents(path: &Path) -> Result<Vec<Element>, SourceError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(SourceError::io(path, err)),
    };
    if bytes.trim_ascii().is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_slice::<Json>(&bytes) {
        Ok(Json::Array(items)) => Ok(array_elements(path, items)),
        Ok(Json::Object(object)) => Ok(vec![Ok(object)]),
        Ok(other) => Err(SourceError::Decode {
            path: path.to_path_buf(),
            message: format!("expected an array or object, found {}", json_kind(&other)),
        }),
        Err(_) => Ok(jsonl_elements(path, &bytes)),
    }
}

fn array_elements(path: &Path, items: Vec<Json>) -> Vec<Element> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Json::Object(object) => Ok(object),
            other => Err(SourceError::Malformed {
                path: path.to_path_buf(),
                line: None,
                message: format!(
                    "element {index} is {}, expected an object",
                    json_kind(&other)
                ),
            }),
        })
        .collect()
}

fn jsonl_elements(path: &Path, bytes: &[u8]) -> Vec<Element> {
    bytes
        .split(|byte| *byte == b'\n')
        .enumerate()
        .filter(|(_, line)| !line.trim_ascii().is_empty())
        .map(|(index, line)| {
            parse_object(line.trim_ascii()).map_err(|message| SourceError::Malformed {
                path: path.to_path_buf(),
                line: Some(index + 1),
                message,
            })
        })
        .collect()
}

/// Rows taken from an array nested inside one JSON document. Read-only.
#[derive(Debug)]
pub struct DocumentTable {
    name: &'static str,
    description: &'static str,
    schema: Schema,
    path: PathBuf,
    pointer: &'static str,
}

impl DocumentTable {
    /// `pointer` is a JSON Pointer (RFC 6901) to the array holding the rows.
    pub fn new(
        name: &'static str,
        description: &'static str,
        schema: Schema,
        path: PathBuf,
        pointer: &'static str,
    ) -> Self {
        Self {
            name,
            description,
            schema,
            path,
            pointer,
        }
    }
}

impl TableSource for DocumentTable {
    fn name(&self) -> &str {
        self.name
    }

    fn schema(&self) -> Schema {
        self.schema
    }

    fn kind(&self) -> TableKind {
        TableKind::SingleFile
    }

    fn description(&self) -> &str {
        self.description
    }

    fn scan(&self) -> Result<RowIter, SourceError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(table = self.name, path = %self.path.display(), "source file missing; table is empty");
                return Ok(super::empty_rows());
            }
            Err(err) => return Err(SourceError::io(&self.path, err)),
        };
        let document =
            serde_json::from_slice::<Json>(&bytes).map_err(|err| SourceError::Decode {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        let items = match document.pointer(self.pointer) {
            Some(Json::Array(items)) => items.clone(),
            Some(other) => {
                return Err(SourceError::Decode {
                    path: self.path.clone(),
                    message: format!(
                        "`{}` is {}, expected an array",
                        self.pointer,
                        json_kind(other)
                    ),
                });
            }
            None => Vec::new(),
        };
        let schema = self.schema;
        let origin = FileOrigin::new(&self.path);
        let rows = array_elements(&self.path, items)
            .into_iter()
            .enumerate()
            .map(move |(index, element)| {
                element.map(|object| {
                    decode_object(&schema, &object, &origin, Position::Index(index), None)
                })
            });
        Ok(Box::new(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_array_object_and_jsonl_layouts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let array = dir.path().join("array.json");
        std::fs::write(&array, r#"[{"id":"1"},{"id":"2"},3]"#).expect("write");
        let single = dir.path().join("single.json");
        std::fs::write(&single, r#"{"id":"1"}"#).expect("write");
        let lines = dir.path().join("lines.json");
        std::fs::write(&lines, "{\"id\":\"1\"}\n{\"id\":\"2\"}\n").expect("write");

        let items = read_documents(&array).expect("array");
        assert_eq!(items.len(), 3);
        assert!(items[2].as_ref().is_err_and(SourceError::is_recoverable));
        assert_eq!(read_documents(&single).expect("single").len(), 1);
        assert_eq!(read_documents(&lines).expect("lines").len(), 2);
        assert!(
            read_documents(&dir.path().join("absent.json"))
                .expect("absent")
                .is_empty()
        );
    }
}
