#![forbid(unsafe_code)]

use crate::error::EngineError;
use ds_core::{ColumnType, Value};
use serde::Serialize;
use std::path::PathBuf;

/// One output column: the label SQLite reports plus its declared type when it maps
/// straight onto a table column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResultColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Option<ColumnType>,
}

impl ResultColumn {
    pub fn new(name: impl Into<String>, ty: Option<ColumnType>) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// What a mutating statement did, or would do under `--dry-run`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MutationSummary {
    pub table: String,
    pub file: PathBuf,
    pub deleted: usize,
    pub updated: usize,
    pub inserted: usize,
    pub applied: bool,
    pub backup: Option<PathBuf>,
}

impl MutationSummary {
    pub fn affected(&self) -> usize {
        self.deleted + self.updated + self.inserted
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Rows handed to the sink.
    pub rows: usize,
    /// Malformed source records that were skipped while loading tables.
    pub skipped_records: usize,
    pub mutation: Option<MutationSummary>,
}

/// Receives a result set as it is produced.
///
/// `columns` is called exactly once before any `row`; `finish` is called once after
/// the last row, also for empty results.
pub trait RowSink {
    fn columns(&mut self, columns: &[ResultColumn]) -> Result<(), EngineError>;
    fn row(&mut self, values: Vec<Value>) -> Result<(), EngineError>;
    fn finish(&mut self, summary: &RunSummary) -> Result<(), EngineError>;
}

/// A sink that keeps everything in memory.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ResultColumn>,
    pub rows: Vec<Vec<Value>>,
    pub summary: RunSummary,
}

impl QueryResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(|column| column.name.as_str())
            .collect()
    }

    /// The single value of a one-row, one-column result.
    pub fn scalar(&self) -> Option<&Value> {
        match self.rows.as_slice() {
            [row] if row.len() == 1 => row.first(),
            _ => None,
        }
    }

    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self
            .columns
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(name))?;
        Some(self.rows.iter().filter_map(|row| row.get(index)).collect())
    }
}

impl RowSink for QueryResult {
    fn columns(&mut self, columns: &[ResultColumn]) -> Result<(), EngineError> {
        self.columns = columns.to_vec();
        Ok(())
    }

    fn row(&mut self, values: Vec<Value>) -> Result<(), EngineError> {
        self.rows.push(values);
        Ok(())
    }

    fn finish(&mut self, summary: &RunSummary) -> Result<(), EngineError> {
        self.summary = summary.clone();
        Ok(())
    }
}
