#![forbid(unsafe_code)]

//! Gate for INSERT/UPDATE/DELETE.
//!
//! A mutating statement runs only against a single-file JSONL table, only with an
//! explicit mode, and UPDATE/DELETE only with a WHERE clause. Preview and write share
//! one [`MutationPlan`], so a dry run shows exactly the rows a write would touch.

mod apply;
mod backup;
mod plan;

pub use plan::{MutationPlan, RowChange};

use crate::error::{EngineError, Rejection};
use crate::result::{MutationSummary, ResultColumn, RowSink, RunSummary};
use crate::statement::{Analysis, StatementKind};
use ds_core::{ColumnType, Value};
use ds_storage::ResolvedTable;
use tracing::debug;

/// How mutating statements are treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Refuse them.
    #[default]
    Reject,
    /// Compute and show the affected rows without touching any file.
    DryRun,
    /// Back up the file, then rewrite it.
    Write,
}

/// Label of the leading preview column.
pub const CHANGE_COLUMN: &str = "_change";

pub(crate) fn run(
    sql: &str,
    analysis: &Analysis,
    tables: &[ResolvedTable],
    mode: WriteMode,
    sink: &mut dyn RowSink,
) -> Result<RunSummary, EngineError> {
    let target = analysis
        .target
        .as_deref()
        .and_then(|name| tables.iter().find(|table| table.name == name))
        .ok_or_else(|| EngineError::Execution("mutating statement without a target table".to_string()))?;

    let Some(file) = target.source.mutable_file() else {
        return Err(EngineError::rejected(Rejection::ReadOnlyTable {
            table: target.name.clone(),
            kind: target.source.kind().as_str(),
        }));
    };
    if matches!(analysis.kind, StatementKind::Update | StatementKind::Delete) && !analysis.has_where {
        return Err(EngineError::rejected(Rejection::MissingWhere {
            statement: analysis.kind.as_str(),
        }));
    }
    if mode == WriteMode::Reject {
        return Err(EngineError::rejected(Rejection::FlagRequired));
    }

    debug!(table = %target.name, canonical = %target.canonical, ?mode, "planning mutation");
    let plan = plan::plan(sql, target, tables, file)?;
    let backup = match mode {
        WriteMode::Write => apply::apply(&plan)?,
        WriteMode::DryRun | WriteMode::Reject => None,
    };
    emit_changes(&plan, sink)?;
    let summary = RunSummary {
        rows: plan.changes.len(),
        skipped_records: plan.skipped_records,
        mutation: Some(MutationSummary {
            table: plan.table.clone(),
            file: plan.file.clone(),
            deleted: plan.count("delete"),
            updated: plan.count("update"),
            inserted: plan.count("insert"),
            applied: mode == WriteMode::Write && !plan.changes.is_empty(),
            backup,
        }),
    };
    sink.finish(&summary)?;
    Ok(summary)
}

fn emit_changes(plan: &MutationPlan, sink: &mut dyn RowSink) -> Result<(), EngineError> {
    let mut columns = vec![ResultColumn::new(CHANGE_COLUMN, Some(ColumnType::Text))];
    columns.extend(
        plan.schema
            .columns()
            .iter()
            .map(|column| ResultColumn::new(column.name, Some(column.ty))),
    );
    sink.columns(&columns)?;
    for change in &plan.changes {
        let mut row = Vec::with_capacity(columns.len());
        row.push(Value::text(change.label()));
        row.extend(change.shown().iter().cloned());
        sink.row(row)?;
    }
    Ok(())
}
