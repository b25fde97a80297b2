#![forbid(unsafe_code)]

use super::backup::fingerprint;
use crate::error::{EngineError, Rejection};
use crate::loader::{Session, from_sql, quote_ident};
use ds_core::{Column, ColumnType, Schema, Value};
use ds_storage::ResolvedTable;
use rusqlite::types::{Value as SqlValue, ValueRef};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One row the statement deletes, changes or adds. Lines are 1-based physical lines.
#[derive(Clone, Debug, PartialEq)]
pub enum RowChange {
    Delete {
        line: usize,
        before: Vec<Value>,
    },
    Update {
        line: usize,
        before: Vec<Value>,
        after: Vec<Value>,
        /// Schema positions whose value differs.
        changed: Vec<usize>,
    },
    Insert {
        after: Vec<Value>,
    },
}

impl RowChange {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Delete { .. } => "delete",
            Self::Update { .. } => "update",
            Self::Insert { .. } => "insert",
        }
    }

    /// The row as it is shown in a preview: old values for deletions, new values otherwise.
    pub fn shown(&self) -> &[Value] {
        match self {
            Self::Delete { before, .. } => before,
            Self::Update { after, .. } | Self::Insert { after } => after,
        }
    }
}

/// The exact effect of one mutating statement on one JSONL file.
#[derive(Clone, Debug)]
pub struct MutationPlan {
    pub table: String,
    pub file: PathBuf,
    pub schema: Schema,
    /// SHA-256 of the file before it was read; `None` when it did not exist.
    pub fingerprint: Option<String>,
    pub changes: Vec<RowChange>,
    pub skipped_records: usize,
}

impl MutationPlan {
    pub fn count(&self, label: &str) -> usize {
        self.changes
            .iter()
            .filter(|change| change.label() == label)
            .count()
    }
}

type Snapshot = BTreeMap<i64, Vec<SqlValue>>;

/// Runs `sql` against an in-memory copy of `target` and records what changed.
///
/// The target is loaded under the name the statement uses, with `rowid` equal to the
/// physical line, so every surviving row can be traced back to its line.
pub(crate) fn plan(
    sql: &str,
    target: &ResolvedTable,
    others: &[ResolvedTable],
    file: &Path,
) -> Result<MutationPlan, EngineError> {
    let fingerprint = fingerprint(file).map_err(|err| EngineError::Write {
        path: file.to_path_buf(),
        message: err.to_string(),
    })?;

    let schema = target.source.schema();
    let mut session = Session::open()?;
    session.attach_lines(&target.name, target.source.as_ref())?;
    let others = others
        .iter()
        .filter(|table| table.name != target.name)
        .cloned()
        .collect::<Vec<_>>();
    session.attach(&others)?;

    let before = snapshot(&session, &target.name)?;
    {
        let mut stmt = session.conn().prepare(sql)?;
        let mut rows = stmt.query([])?;
        while rows.next()?.is_some() {}
    }
    let after = snapshot(&session, &target.name)?;

    let changes = diff(&schema, &before, &after);
    validate(&target.name, &schema, &changes)?;
    debug!(
        table = %target.name,
        changes = changes.len(),
        "planned mutation"
    );

    Ok(MutationPlan {
        table: target.name.clone(),
        file: file.to_path_buf(),
        schema,
        fingerprint,
        changes: changes
            .into_iter()
            .map(|change| change.into_values(&schema))
            .collect(),
        skipped_records: session.skipped(),
    })
}

fn snapshot(session: &Session, table: &str) -> Result<Snapshot, EngineError> {
    let mut stmt = session.conn().prepare(&format!(
        "SELECT rowid, * FROM {} ORDER BY rowid",
        quote_ident(table)
    ))?;
    let width = stmt.column_count();
    let mut rows = stmt.query([])?;
    let mut snapshot = Snapshot::new();
    while let Some(row) = rows.next()? {
        let rowid: i64 = row.get(0)?;
        let values = (1..width)
            .map(|index| row.get::<_, SqlValue>(index))
            .collect::<Result<Vec<_>, _>>()?;
        snapshot.insert(rowid, values);
    }
    Ok(snapshot)
}

/// A change still in SQLite storage form.
enum RawChange {
    Delete(i64, Vec<SqlValue>),
    Update(i64, Vec<SqlValue>, Vec<SqlValue>, Vec<usize>),
    Insert(Vec<SqlValue>),
}

impl RawChange {
    fn into_values(self, schema: &Schema) -> RowChange {
        let convert = |values: Vec<SqlValue>| -> Vec<Value> {
            values
                .iter()
                .zip(schema.columns())
                .map(|(value, column)| from_sql(ValueRef::from(value), Some(column.ty)))
                .collect()
        };
        match self {
            Self::Delete(line, before) => RowChange::Delete {
                line: line_number(line),
                before: convert(before),
            },
            Self::Update(line, before, after, changed) => RowChange::Update {
                line: line_number(line),
                before: convert(before),
                after: convert(after),
                changed,
            },
            Self::Insert(after) => RowChange::Insert {
                after: convert(after),
            },
        }
    }
}

fn line_number(rowid: i64) -> usize {
    usize::try_from(rowid).unwrap_or(0)
}

fn diff(schema: &Schema, before: &Snapshot, after: &Snapshot) -> Vec<RawChange> {
    let mut changes = Vec::new();
    for (rowid, old) in before {
        match after.get(rowid) {
            None => changes.push(RawChange::Delete(*rowid, old.clone())),
            Some(new) if new != old => {
                let changed = (0..schema.len())
                    .filter(|&index| old.get(index) != new.get(index))
                    .collect();
                changes.push(RawChange::Update(*rowid, old.clone(), new.clone(), changed));
            }
            Some(_) => {}
        }
    }
    for (rowid, new) in after {
        if !before.contains_key(rowid) {
            changes.push(RawChange::Insert(new.clone()));
        }
    }
    changes
}

fn validate(table: &str, schema: &Schema, changes: &[RawChange]) -> Result<(), EngineError> {
    let columns = schema.columns();
    for change in changes {
        let (values, touched): (&[SqlValue], Vec<usize>) = match change {
            RawChange::Delete(..) => continue,
            RawChange::Update(_, _, after, changed) => (after, changed.clone()),
            RawChange::Insert(after) => (after, (0..columns.len()).collect()),
        };
        for index in touched {
            let (Some(column), Some(value)) = (columns.get(index), values.get(index)) else {
                continue;
            };
            let is_set = match change {
                RawChange::Insert(_) => !matches!(value, SqlValue::Null),
                _ => true,
            };
            if !column.is_writable() && is_set {
                return Err(EngineError::rejected(Rejection::ReadOnlyColumn {
                    table: table.to_string(),
                    column: column.name.to_string(),
                }));
            }
            check_stored(table, column, value)?;
        }
    }
    Ok(())
}

/// Storage classes a column accepts after SQLite applied its affinity.
fn check_stored(table: &str, column: &Column, value: &SqlValue) -> Result<(), EngineError> {
    let fits = match (column.ty, value) {
        (_, SqlValue::Null) => true,
        (_, SqlValue::Blob(_)) => false,
        (ColumnType::Json, _) => true,
        (ColumnType::Integer, SqlValue::Integer(_)) => true,
        (ColumnType::Real, SqlValue::Integer(_) | SqlValue::Real(_)) => true,
        (ColumnType::Text, SqlValue::Text(_)) => true,
        (ColumnType::Boolean, SqlValue::Integer(0 | 1)) => true,
        _ => false,
    };
    if fits {
        return Ok(());
    }
    Err(EngineError::Type(format!(
        "cannot store {} in {} column `{table}.{}`",
        describe(value),
        column.ty,
        column.name
    )))
}

fn describe(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Integer(n) => format!("the integer {n}"),
        SqlValue::Real(x) => format!("the real {x}"),
        SqlValue::Text(text) => format!("the text '{text}'"),
        SqlValue::Blob(bytes) => format!("a {}-byte BLOB", bytes.len()),
    }
}
