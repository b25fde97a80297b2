#![forbid(unsafe_code)]

mod documents;
mod fanout;
mod jsonl;

pub use documents::{DocumentTable, read_documents};
pub use fanout::FanOut;
pub use jsonl::{JsonlLines, JsonlTable};

use crate::error::SourceError;
use ds_core::{Field, Record, Schema, Value, provenance};
use serde_json::{Map, Value as Json};
use std::fmt;
use std::path::{Path, PathBuf};

/// Lazy row sequence produced by one scan of a table.
pub type RowIter = Box<dyn Iterator<Item = Result<Record, SourceError>>>;

/// Table-specific normalization run after the key columns are filled.
pub type DeriveFn = fn(&Map<String, Json>, &Schema, &mut Record);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableKind {
    /// One file, one row per line or array element. Mutable when line-oriented.
    SingleFile,
    /// A directory of independent files exposed as one table.
    MultiFile,
    /// Computed from git metadata on every scan.
    Repository,
}

impl TableKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleFile => "single-file",
            Self::MultiFile => "multi-file",
            Self::Repository => "repository",
        }
    }
}

/// A named virtual table backed by files or a repository.
pub trait TableSource: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn schema(&self) -> Schema;
    fn kind(&self) -> TableKind;
    fn description(&self) -> &str;

    /// Starts a fresh pass over the underlying source.
    fn scan(&self) -> Result<RowIter, SourceError>;

    /// The JSONL file rewritten by mutations, for tables that accept them.
    fn mutable_file(&self) -> Option<&Path> {
        None
    }

    fn is_mutable(&self) -> bool {
        self.mutable_file().is_some()
    }
}

pub fn empty_rows() -> RowIter {
    Box::new(std::iter::empty())
}

/// Position of a record inside its file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Position {
    /// 1-based physical line of a JSONL file.
    Line(usize),
    /// 0-based element of a JSON document.
    Index(usize),
}

/// Provenance shared by every record of one physical file.
#[derive(Clone, Debug, Default)]
pub struct FileOrigin {
    pub file: String,
    pub session_id: Option<String>,
    pub workspace_id: Option<String>,
    pub agent_id: Option<String>,
}

impl FileOrigin {
    pub fn new(path: &Path) -> Self {
        Self {
            file: path.display().to_string(),
            ..Self::default()
        }
    }

    fn stamp(&self, schema: &Schema, position: Position, record: &mut Record) {
        set_named(schema, record, provenance::SOURCE_FILE, Value::text(&self.file));
        set_named(
            schema,
            record,
            provenance::SESSION_ID,
            Value::opt_text(self.session_id.as_deref()),
        );
        set_named(
            schema,
            record,
            provenance::WORKSPACE_ID,
            Value::opt_text(self.workspace_id.as_deref()),
        );
        set_named(
            schema,
            record,
            provenance::AGENT_ID,
            Value::opt_text(self.agent_id.as_deref()),
        );
        match position {
            Position::Line(line) => {
                set_named(schema, record, provenance::LINE, Value::Integer(line as i64));
            }
            Position::Index(index) => {
                set_named(schema, record, provenance::INDEX, Value::Integer(index as i64));
            }
        }
    }
}

/// Builds a record from one JSON object: key columns, then derived columns, then provenance.
pub fn decode_object(
    schema: &Schema,
    object: &Map<String, Json>,
    origin: &FileOrigin,
    position: Position,
    derive: Option<DeriveFn>,
) -> Record {
    let mut record = schema.empty_record();
    for (index, column) in schema.columns().iter().enumerate() {
        if let Field::Key(keys) = column.field
            && let Some(json) = lookup(object, keys)
        {
            record.set(index, Value::from_json(json, column.ty));
        }
    }
    if let Some(derive) = derive {
        derive(object, schema, &mut record);
    }
    origin.stamp(schema, position, &mut record);
    record
}

/// First non-null value among `keys`.
pub fn lookup<'a>(object: &'a Map<String, Json>, keys: &[&str]) -> Option<&'a Json> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| !value.is_null())
}

pub fn set_named(schema: &Schema, record: &mut Record, name: &str, value: Value) {
    if let Some(index) = schema.position(name) {
        record.set(index, value);
    }
}

pub fn get_named<'a>(schema: &Schema, record: &'a Record, name: &str) -> Option<&'a Value> {
    schema.position(name).and_then(|index| record.get(index))
}

/// Regular files in `dir` with the given extension, sorted by path. A missing directory is empty.
pub fn list_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, SourceError> {
    let mut files = list_entries(dir)?
        .into_iter()
        .filter(|path| path.is_file())
        .filter(|path| path.extension().is_some_and(|ext| ext == extension))
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

/// Subdirectories of `dir`, sorted by path. A missing directory is empty.
pub fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let mut dirs = list_entries(dir)?
        .into_iter()
        .filter(|path| path.is_dir())
        .collect::<Vec<_>>();
    dirs.sort();
    Ok(dirs)
}

fn list_entries(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(SourceError::io(dir, err)),
    };
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| SourceError::io(dir, err))?;
        paths.push(entry.path());
    }
    Ok(paths)
}

pub(crate) fn file_stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|stem| stem.to_str())
}
