#![forbid(unsafe_code)]

use super::{DeriveFn, FileOrigin, Position, RowIter, TableKind, TableSource, decode_object};
use crate::error::SourceError;
use ds_core::Schema;
use serde_json::{Map, Value as Json};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lazily yields the JSON objects of a JSONL file with their 1-based line numbers.
///
/// Blank lines are skipped. A line that is not a JSON object yields a recoverable
/// [`SourceError::Malformed`] and iteration continues with the next line.
pub struct JsonlLines {
    path: PathBuf,
    reader: BufReader<File>,
    line: usize,
    buf: Vec<u8>,
    done: bool,
}

impl JsonlLines {
    /// `Ok(None)` when the file does not exist.
    pub fn open(path: &Path) -> Result<Option<Self>, SourceError> {
        match File::open(path) {
            Ok(file) => Ok(Some(Self {
                path: path.to_path_buf(),
                reader: BufReader::new(file),
                line: 0,
                buf: Vec::new(),
                done: false,
            })),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SourceError::io(path, err)),
        }
    }
}

impl Iterator for JsonlLines {
    type Item = Result<(usize, Map<String, Json>), SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line += 1;
                    let bytes = self.buf.trim_ascii();
                    if bytes.is_empty() {
                        continue;
                    }
                    return Some(
                        parse_object(bytes)
                            .map(|object| (self.line, object))
                            .map_err(|message| SourceError::Malformed {
                                path: self.path.clone(),
                                line: Some(self.line),
                                message,
                            }),
                    );
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(SourceError::io(&self.path, err)));
                }
            }
        }
        None
    }
}

pub(crate) fn parse_object(bytes: &[u8]) -> Result<Map<String, Json>, String> {
    match serde_json::from_slice::<Json>(bytes) {
        Ok(Json::Object(object)) => Ok(object),
        Ok(other) => Err(format!("expected a JSON object, found {}", json_kind(&other))),
        Err(err) => Err(err.to_string()),
    }
}

pub(crate) fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}

/// A single JSONL file exposed as a mutable table, one row per non-blank line.
#[derive(Debug)]
pub struct JsonlTable {
    name: &'static str,
    description: &'static str,
    schema: Schema,
    path: PathBuf,
    derive: Option<DeriveFn>,
}

impl JsonlTable {
    pub fn new(
        name: &'static str,
        description: &'static str,
        schema: Schema,
        path: PathBuf,
        derive: Option<DeriveFn>,
    ) -> Self {
        Self {
            name,
            description,
            schema,
            path,
            derive,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TableSource for JsonlTable {
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
        let Some(lines) = JsonlLines::open(&self.path)? else {
            debug!(table = self.name, path = %self.path.display(), "source file missing; table is empty");
            return Ok(super::empty_rows());
        };
        let schema = self.schema;
        let derive = self.derive;
        let origin = FileOrigin::new(&self.path);
        Ok(Box::new(lines.map(move |item| {
            item.map(|(line, object)| {
                decode_object(&schema, &object, &origin, Position::Line(line), derive)
            })
        })))
    }

    fn mutable_file(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn lines_are_numbered_physically_and_bad_lines_are_recoverable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("h.jsonl");
        let mut file = File::create(&path).expect("create");
        file.write_all(b"{\"a\":1}\n\n[1,2]\nnot json\n{\"a\":2}").expect("write");
        drop(file);

        let items = JsonlLines::open(&path)
            .expect("open")
            .expect("exists")
            .collect::<Vec<_>>();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].as_ref().map(|(line, _)| *line).ok(), Some(1));
        assert!(items[1].as_ref().is_err_and(SourceError::is_recoverable));
        assert!(items[2].as_ref().is_err_and(SourceError::is_recoverable));
        assert_eq!(items[3].as_ref().map(|(line, _)| *line).ok(), Some(5));
    }

    #[test]
    fn missing_file_opens_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let opened = JsonlLines::open(&dir.path().join("absent.jsonl")).expect("open");
        assert!(opened.is_none());
    }
}
